use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub jwt: JwtConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub collaborators: CollaboratorConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Heartbeat interval in seconds (server sends heartbeat event)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// Connection timeout in seconds (disconnect if no activity)
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    /// Cleanup task interval in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
    /// Outbound queue depth per connection; a full queue drops the event
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
}

fn default_heartbeat_interval() -> u64 {
    30 // 30 seconds
}

fn default_connection_timeout() -> u64 {
    120 // 2 minutes
}

fn default_cleanup_interval() -> u64 {
    60 // 1 minute
}

fn default_channel_buffer() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// JWT validation settings. Without a secret every connection is a guest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JwtConfig {
    pub secret: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

/// Shared secret and advertised URIs of the media relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    pub secret: Option<String>,
    #[serde(default)]
    pub uris: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollaboratorConfig {
    /// Upper bound for any single call into an external collaborator
    #[serde(default = "default_collaborator_timeout_ms")]
    pub timeout_ms: u64,
    /// Deferred jobs a connection may have queued; more are refused
    #[serde(default = "default_lane_capacity")]
    pub lane_capacity: usize,
}

fn default_collaborator_timeout_ms() -> u64 {
    5000
}

fn default_lane_capacity() -> usize {
    32
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    #[serde(default = "default_allow_guests")]
    pub allow_guests: bool,
    /// Space types that may be joined; empty means any
    #[serde(default)]
    pub space_types: Vec<String>,
}

fn default_allow_guests() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8081)?
            .set_default("websocket.heartbeat_interval", 30)?
            .set_default("websocket.connection_timeout", 120)?
            .set_default("websocket.cleanup_interval", 60)?
            .set_default("websocket.channel_buffer", 64)?
            .set_default("collaborators.timeout_ms", 5000)?
            .set_default("collaborators.lane_capacity", 32)?
            .set_default("access.allow_guests", true)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // SERVER_PORT, JWT_SECRET, RELAY_SECRET, RELAY_URIS, LOGGING_FORMAT, etc.
            // Keys whose names contain '_' can only be set from config files.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("relay.uris"),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            connection_timeout: default_connection_timeout(),
            cleanup_interval: default_cleanup_interval(),
            channel_buffer: default_channel_buffer(),
        }
    }
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_collaborator_timeout_ms(),
            lane_capacity: default_lane_capacity(),
        }
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            allow_guests: default_allow_guests(),
            space_types: vec![],
        }
    }
}
