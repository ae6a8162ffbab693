//! Deploy engine contract and the command-line engine.
//!
//! The command-line engine is invoked as
//! `<command> <args..> <action> --sites=a,b [--tasks=x,y] --deployment-id=<id>`
//! from the application directory, with the resolved deploy configuration in
//! `DEPLOYBOT_CONFIG`. It may print JSON lines on stdout:
//!
//! - `{"event": "task.started", "task": "deploy:assets"}` (also `task.success`, `task.failed`)
//! - `{"summary": {"<host>": {"error": null, "history": [{"task": "...", "error": null}]}}}`
//!
//! Any other line is treated as plain output.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::BotError;
use crate::models::notice::TaskStatus;
use crate::models::summary::{Deployment, HostSummary, SummaryMap};
use crate::worker::config::{EngineConfig, ResolvedConfig};

/// What the engine is asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineAction {
    Deploy,
    Setup { tasks: Vec<String> },
    Restart,
    Logs,
}

impl EngineAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineAction::Deploy => "deploy",
            EngineAction::Setup { .. } => "setup",
            EngineAction::Restart => "restart",
            EngineAction::Logs => "logs",
        }
    }
}

/// Engine run options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub dry_run: bool,
    /// Remove build leftovers before running
    pub clean: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            clean: true,
        }
    }
}

/// Receives engine events while it runs
#[async_trait]
pub trait EngineObserver: Send + Sync {
    async fn on_task(&self, task: &str, status: TaskStatus);

    async fn on_output(&self, line: &str);
}

#[async_trait]
pub trait DeployEngine: Send + Sync {
    /// Run an action against a list of sites, returning the summary keyed by host
    async fn run(
        &self,
        action: &EngineAction,
        deployment: &Deployment,
        sites: &[String],
        options: &RunOptions,
        observer: &dyn EngineObserver,
    ) -> Result<SummaryMap, BotError>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EngineLine {
    Summary { summary: SummaryMap },
    Task { event: String, task: String },
}

/// Engine backed by an external command
#[derive(Debug, Clone)]
pub struct CommandEngine {
    engine: EngineConfig,
    app_dir: PathBuf,
    config_json: String,
}

impl CommandEngine {
    pub fn new(config: &ResolvedConfig) -> Result<Self, BotError> {
        Ok(Self {
            engine: config.deploy.engine.clone(),
            app_dir: config.app_dir.clone(),
            config_json: serde_json::to_string(&config.deploy)?,
        })
    }

    fn arguments(
        &self,
        action: &EngineAction,
        deployment: &Deployment,
        sites: &[String],
        options: &RunOptions,
    ) -> Vec<String> {
        let mut args = self.engine.args.clone();
        args.push(action.as_str().to_string());
        args.push(format!("--sites={}", sites.join(",")));
        if let EngineAction::Setup { tasks } = action {
            if !tasks.is_empty() {
                args.push(format!("--tasks={}", tasks.join(",")));
            }
        }
        args.push(format!("--deployment-id={}", deployment.id));
        if let Some(tag) = &deployment.tag {
            args.push(format!("--revision={}", tag));
        }
        if options.dry_run {
            args.push("--dry-run".to_string());
        }
        if !options.clean {
            args.push("--no-clean".to_string());
        }
        args
    }
}

#[async_trait]
impl DeployEngine for CommandEngine {
    async fn run(
        &self,
        action: &EngineAction,
        deployment: &Deployment,
        sites: &[String],
        options: &RunOptions,
        observer: &dyn EngineObserver,
    ) -> Result<SummaryMap, BotError> {
        let args = self.arguments(action, deployment, sites, options);
        info!(
            "Running engine: {} {} in {}",
            self.engine.command,
            args.join(" "),
            self.app_dir.display()
        );

        let mut child = Command::new(&self.engine.command)
            .args(&args)
            .current_dir(&self.app_dir)
            .env("DEPLOYBOT_CONFIG", &self.config_json)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BotError::EngineError(format!("Failed to start {}: {}", self.engine.command, e))
            })?;

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                if let Err(e) = stderr.read_to_end(&mut buf).await {
                    warn!("Failed to read engine stderr: {}", e);
                }
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        let mut summary: Option<SummaryMap> = None;
        if let Some(stdout) = child.stdout.take() {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Stopped reading engine output: {}", e);
                        break;
                    }
                }
                let line = decode_line(&buf);
                match serde_json::from_str::<EngineLine>(&line) {
                    Ok(EngineLine::Summary { summary: map }) => summary = Some(map),
                    Ok(EngineLine::Task { event, task }) => match task_status(&event) {
                        Some(status) => observer.on_task(&task, status).await,
                        None => debug!("Ignoring engine event {} for {}", event, task),
                    },
                    Err(_) => observer.on_output(&line).await,
                }
            }
        }

        let status = child.wait().await?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        if !stderr.trim().is_empty() {
            observer.on_output(stderr.trim()).await;
        }

        match summary {
            Some(map) => Ok(map),
            None => {
                if !status.success() {
                    warn!("Engine exited with {} without a summary", status);
                }
                Ok(synthesize_summary(sites, status.success(), &status.to_string()))
            }
        }
    }
}

/// Engine output is not guaranteed to be UTF-8
fn decode_line(buf: &[u8]) -> String {
    let text = String::from_utf8_lossy(buf);
    text.trim_end_matches(['\n', '\r']).to_string()
}

fn task_status(event: &str) -> Option<TaskStatus> {
    match event {
        "task.started" => Some(TaskStatus::Started),
        "task.success" | "task.succeeded" => Some(TaskStatus::Succeeded),
        "task.failed" => Some(TaskStatus::Failed),
        _ => None,
    }
}

/// One entry per site, failed when the engine exited unsuccessfully
fn synthesize_summary(sites: &[String], success: bool, status: &str) -> SummaryMap {
    sites
        .iter()
        .map(|site| {
            let error = (!success).then(|| format!("engine exited with {}", status));
            (
                site.clone(),
                HostSummary {
                    error,
                    history: Vec::new(),
                },
            )
        })
        .collect()
}
