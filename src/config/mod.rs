mod settings;

pub use settings::{
    AccessConfig, CollaboratorConfig, JwtConfig, LogFormat, LoggingConfig, RelayConfig,
    ServerConfig, Settings, WebSocketConfig,
};
