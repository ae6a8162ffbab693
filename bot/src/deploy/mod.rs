//! Deployment collaborators: git plumbing and the deploy engine

pub mod engine;
pub mod git;

use std::path::Path;
use std::sync::Arc;

use crate::deploy::engine::{CommandEngine, DeployEngine};
use crate::deploy::git::{GitRepo, Repository};
use crate::errors::BotError;
use crate::worker::config::ResolvedConfig;

/// Builds the collaborators a worker runs jobs with
pub trait Toolchain: Send + Sync {
    fn repository(&self, dir: &Path) -> Arc<dyn Repository>;

    fn engine(&self, config: &ResolvedConfig) -> Result<Arc<dyn DeployEngine>, BotError>;
}

/// The `git` binary and the configured engine command
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemToolchain;

impl Toolchain for SystemToolchain {
    fn repository(&self, dir: &Path) -> Arc<dyn Repository> {
        Arc::new(GitRepo::new(dir))
    }

    fn engine(&self, config: &ResolvedConfig) -> Result<Arc<dyn DeployEngine>, BotError> {
        Ok(Arc::new(CommandEngine::new(config)?))
    }
}
