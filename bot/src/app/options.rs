//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::storage::settings::Settings;
use crate::worker::WorkerIdentity;

/// Master process options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Settings file, re-read on SIGHUP and handed to forked workers
    pub settings_path: PathBuf,

    pub settings: Settings,
}

/// Worker process options
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub lifecycle: LifecycleOptions,
    pub identity: WorkerIdentity,
    pub settings: Settings,
}

/// Lifecycle options shared by both process kinds
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}
