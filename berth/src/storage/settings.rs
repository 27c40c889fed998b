//! Settings file management

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Daemon settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Whether the daemon runs persistently
    #[serde(default = "default_true")]
    pub is_persistent: bool,

    /// Enable the HTTP listener (webhooks + control endpoints)
    #[serde(default = "default_true")]
    pub enable_server: bool,

    /// Optional override for the storage base directory
    #[serde(default)]
    pub data_dir: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            server: ServerSettings::default(),
            is_persistent: true,
            enable_server: true,
            data_dir: None,
        }
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}
