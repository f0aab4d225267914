//! API layer - HTTP endpoint handlers organized by domain.

mod health;
mod metrics;
mod relay;
mod routes;
mod spaces;

pub use health::{health, stats};
pub use metrics::prometheus_metrics;
pub use relay::relay_credentials;
pub use routes::api_routes;
pub use spaces::{list_spaces, recent_messages, space_occupants};
