//! Git plumbing for a worker's working copy

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::errors::BotError;
use crate::models::summary::{Commit, RevInfo};

/// Result of one external command.
///
/// `error` is set when the command exited unsuccessfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub error: Option<String>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            error: None,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// Stdout and stderr joined for display, trimmed
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => String::new(),
            (false, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (false, false) => format!("{}\n{}", stdout, stderr),
        }
    }
}

/// Repository operations used by the deploy pipeline
#[async_trait]
pub trait Repository: Send + Sync {
    /// Discard local changes
    async fn reset_hard(&self) -> Result<CommandOutput, BotError>;

    /// Remove untracked files and directories
    async fn clean(&self) -> Result<CommandOutput, BotError>;

    async fn fetch_tags(&self, remote: &str) -> Result<CommandOutput, BotError>;

    async fn checkout(&self, branch: &str) -> Result<CommandOutput, BotError>;

    /// Force delete a local branch
    async fn delete_branch(&self, branch: &str) -> Result<CommandOutput, BotError>;

    async fn pull(&self, remote: &str, branch: &str) -> Result<CommandOutput, BotError>;

    /// Update submodules recursively
    async fn submodule_update(&self) -> Result<CommandOutput, BotError>;

    /// Describe the checked out revision
    async fn rev_info(&self) -> Result<RevInfo, BotError>;
}

/// Repository backed by the `git` binary
#[derive(Debug, Clone)]
pub struct GitRepo {
    dir: PathBuf,
}

impl GitRepo {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn git(&self, args: &[&str]) -> Result<CommandOutput, BotError> {
        debug!("Running git {} in {}", args.join(" "), self.dir.display());
        let output = Command::new("git")
            .current_dir(&self.dir)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BotError::GitError(format!("Failed to run git {}: {}", args[0], e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let error = if output.status.success() {
            None
        } else {
            let detail = stderr.trim();
            Some(if detail.is_empty() {
                format!("git {} failed with {}", args.join(" "), output.status)
            } else {
                format!("git {} failed: {}", args.join(" "), detail)
            })
        };

        Ok(CommandOutput {
            error,
            stdout,
            stderr,
        })
    }
}

#[async_trait]
impl Repository for GitRepo {
    async fn reset_hard(&self) -> Result<CommandOutput, BotError> {
        self.git(&["reset", "--hard"]).await
    }

    async fn clean(&self) -> Result<CommandOutput, BotError> {
        self.git(&["clean", "-f", "-d"]).await
    }

    async fn fetch_tags(&self, remote: &str) -> Result<CommandOutput, BotError> {
        self.git(&["fetch", "--tags", remote]).await
    }

    async fn checkout(&self, branch: &str) -> Result<CommandOutput, BotError> {
        self.git(&["checkout", branch]).await
    }

    async fn delete_branch(&self, branch: &str) -> Result<CommandOutput, BotError> {
        self.git(&["branch", "-D", branch]).await
    }

    async fn pull(&self, remote: &str, branch: &str) -> Result<CommandOutput, BotError> {
        self.git(&["pull", remote, branch]).await
    }

    async fn submodule_update(&self) -> Result<CommandOutput, BotError> {
        self.git(&["submodule", "update", "--init", "--recursive", "--force"])
            .await
    }

    async fn rev_info(&self) -> Result<RevInfo, BotError> {
        let describe = self.git(&["describe", "--tags", "--always"]).await?;
        if let Some(error) = describe.error {
            return Err(BotError::GitError(error));
        }

        let log = self
            .git(&["log", "-1", "--format=%H%x1f%an%x1f%s%x1f%cI"])
            .await?;
        if let Some(error) = log.error {
            return Err(BotError::GitError(error));
        }

        Ok(RevInfo {
            describe: describe.stdout.trim().to_string(),
            commits: parse_log(&log.stdout),
        })
    }
}

/// Parse `git log` lines formatted as unit-separated hash, author, subject, date
fn parse_log(output: &str) -> Vec<Commit> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\u{1f}');
            Some(Commit {
                hash: fields.next()?.to_string(),
                author: fields.next()?.to_string(),
                message: fields.next()?.to_string(),
                committed_at: fields.next()?.to_string(),
            })
        })
        .collect()
}
