//! Daemon configuration options

use std::time::Duration;

use crate::storage::layout::StorageLayout;
use crate::workers::{notifier, reaper};

/// Main daemon options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage configuration
    pub storage: StorageOptions,

    /// Enable the HTTP listener
    pub enable_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Notifier worker options
    pub notifier: notifier::Options,

    /// Approval reaper options
    pub reaper: reaper::Options,

    /// Docker network instances attach to
    pub docker_network: String,

    /// Lifecycle event queue depth
    pub event_queue_depth: usize,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageOptions::default(),
            enable_server: true,
            server: ServerOptions::default(),
            notifier: notifier::Options::default(),
            reaper: reaper::Options::default(),
            docker_network: "berth".to_string(),
            event_queue_depth: 64,
        }
    }
}

/// Lifecycle options for the daemon
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Whether the daemon runs persistently (as a service)
    pub is_persistent: bool,

    /// Idle timeout before shutdown (non-persistent mode)
    pub idle_timeout: Duration,

    /// Interval to check for idle timeout
    pub idle_timeout_poll_interval: Duration,

    /// Maximum runtime before shutdown (non-persistent mode)
    pub max_runtime: Duration,

    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            is_persistent: true,
            idle_timeout: Duration::from_secs(300),
            idle_timeout_poll_interval: Duration::from_secs(10),
            max_runtime: Duration::from_secs(3600),
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    /// Storage layout paths
    pub layout: StorageLayout,
}

/// HTTP listener options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}
