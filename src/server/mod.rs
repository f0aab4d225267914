mod app;
mod identity;
mod state;

pub use app::create_app;
pub use identity::{bearer_token, CallerIdentity};
pub use state::AppState;
