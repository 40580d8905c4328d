//! Configuration for wardend

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use warden_engine::EngineConfig;
use warden_types::ChannelId;

/// Main daemon configuration
///
/// The engine sections (`roles`, `vetting`, `sync`, `incarceration`,
/// `locks`, `monitor`) sit at the top level next to the daemon's own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Chat platform connection
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// Document storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging and audit output
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(flatten)]
    pub engine: EngineConfig,
}

/// Chat platform REST connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// REST API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Community (guild) the daemon manages
    #[serde(default)]
    pub guild_id: u64,

    /// Environment variable holding the bot token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            guild_id: 0,
            token_env: default_token_env(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl DirectoryConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the JSON documents
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,

    /// Channel that receives audit lines; none disables forwarding
    #[serde(default)]
    pub audit_channel: Option<ChannelId>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            audit_channel: None,
        }
    }
}

// Default value helpers
fn default_base_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_token_env() -> String {
    "WARDEN_BOT_TOKEN".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration from an optional file and `WARDEN_*` variables.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `WARDEN_INCARCERATION__POLL_INTERVAL_SECS=15`.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("WARDEN")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
