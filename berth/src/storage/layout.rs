//! Storage layout configuration

use std::path::PathBuf;

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// On-disk layout for all orchestrator state
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Get the apps directory
    pub fn apps_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("apps"))
    }

    /// Get the directory for one app
    pub fn app_dir(&self, app: &str) -> Dir {
        self.apps_dir().subdir(app)
    }

    /// App definition file (app + environments + pipeline config)
    pub fn app_file(&self, app: &str) -> File {
        self.app_dir(app).file("app.json")
    }

    /// Release arena for one app
    pub fn releases_file(&self, app: &str) -> File {
        self.app_dir(app).file("releases.json")
    }

    /// Deployment run history for one app
    pub fn runs_file(&self, app: &str) -> File {
        self.app_dir(app).file("runs.json")
    }

    /// Approval requests for one app
    pub fn approvals_file(&self, app: &str) -> File {
        self.app_dir(app).file("approvals.json")
    }

    /// Append-only webhook delivery log for one app
    pub fn deliveries_file(&self, app: &str) -> File {
        self.app_dir(app).file("deliveries.jsonl")
    }

    /// Get the routing table directory (proxy dynamic config)
    pub fn routing_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("routing"))
    }

    /// Get the build workspace directory
    pub fn builds_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("builds"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), crate::errors::OrchestratorError> {
        self.apps_dir().create().await?;
        self.routing_dir().create().await?;
        self.builds_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        // Use /var/lib/berth on Linux, or user home directory on other platforms
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/var/lib/berth");

        #[cfg(not(target_os = "linux"))]
        let base_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".berth");

        Self::new(base_dir)
    }
}

// Add dirs crate functionality inline for cross-platform support
#[cfg(not(target_os = "linux"))]
mod dirs {
    use std::path::PathBuf;

    pub fn home_dir() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
    }
}
