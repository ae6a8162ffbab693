//! Configuration pushed from the master to every worker

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::BotError;

/// Everything a worker needs to run jobs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub deploy: DeployConfig,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

/// Deployment sub-object of the worker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployConfig {
    #[serde(default)]
    pub app: AppConfig,

    /// Branch checked out before switching to the requested one
    #[serde(default = "default_base_branch")]
    pub base_branch: String,

    #[serde(default = "default_remote")]
    pub remote: String,

    #[serde(default)]
    pub engine: EngineConfig,

    /// Opaque keys handed to the deploy engine
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_base_branch() -> String {
    "master".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            app: AppConfig::default(),
            base_branch: default_base_branch(),
            remote: default_remote(),
            engine: EngineConfig::default(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Application directory, relative to the worker's working copy
    #[serde(default = "default_app_directory")]
    pub directory: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_app_directory() -> String {
    ".".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: None,
            directory: default_app_directory(),
            extra: Map::new(),
        }
    }
}

/// Command line deploy engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_engine_command")]
    pub command: String,

    /// Arguments placed before the action
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_engine_command() -> String {
    "deploy".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: default_engine_command(),
            args: Vec::new(),
        }
    }
}

/// Execution time limits, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_step_secs")]
    pub step_secs: u64,
    #[serde(default = "default_engine_secs")]
    pub engine_secs: u64,
    #[serde(default = "default_job_secs")]
    pub job_secs: u64,
}

fn default_step_secs() -> u64 {
    600
}

fn default_engine_secs() -> u64 {
    1800
}

fn default_job_secs() -> u64 {
    3600
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            step_secs: default_step_secs(),
            engine_secs: default_engine_secs(),
            job_secs: default_job_secs(),
        }
    }
}

impl TimeoutSettings {
    pub fn step(&self) -> Duration {
        Duration::from_secs(self.step_secs)
    }

    pub fn engine(&self) -> Duration {
        Duration::from_secs(self.engine_secs)
    }

    pub fn job(&self) -> Duration {
        Duration::from_secs(self.job_secs)
    }
}

/// Worker configuration with paths resolved against one working copy
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub working_copy: PathBuf,
    pub app_dir: PathBuf,
    pub deploy: DeployConfig,
    pub timeouts: TimeoutSettings,
}

impl ResolvedConfig {
    pub fn resolve(config: &WorkerConfig, working_copy: &Path) -> Result<Self, BotError> {
        let working_copy = std::path::absolute(working_copy).map_err(|e| {
            BotError::ConfigError(format!(
                "Unable to resolve working copy {}: {}",
                working_copy.display(),
                e
            ))
        })?;

        // An absolute app directory is still taken relative to the working copy
        let relative: PathBuf = Path::new(&config.deploy.app.directory)
            .components()
            .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
            .collect();
        let app_dir = normalize(&working_copy.join(relative));

        let mut deploy = config.deploy.clone();
        deploy.app.directory = app_dir.display().to_string();

        Ok(Self {
            working_copy: normalize(&working_copy),
            app_dir,
            deploy,
            timeouts: config.timeouts,
        })
    }

    pub fn app_name(&self) -> Option<&str> {
        self.deploy.app.name.as_deref()
    }
}

/// Lexically remove `.` and `..` components
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
