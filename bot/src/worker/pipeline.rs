//! Job workflows run by a worker.
//!
//! Repository steps are best effort: a failed or timed out step is reported as
//! an `error` event and the workflow moves on to the next step.

use std::future::Future;
use std::sync::Arc;

use tokio::time::timeout;
use tracing::{info, warn};

use crate::deploy::engine::{DeployEngine, EngineAction, RunOptions};
use crate::deploy::git::{CommandOutput, Repository};
use crate::errors::BotError;
use crate::models::request::{DeployRequest, Request};
use crate::models::summary::{Deployment, HostSummary, JobSummary, RevInfo, SummaryMap};
use crate::worker::config::ResolvedConfig;
use crate::worker::reporter::JobReporter;

/// Everything one job runs with
pub struct JobContext {
    pub config: ResolvedConfig,
    pub repo: Arc<dyn Repository>,
    pub engine: Arc<dyn DeployEngine>,
    pub reporter: JobReporter,
}

/// What a finished workflow left behind
#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
    /// Errors reported along the way, in order
    pub errors: Vec<String>,
    pub summary: Option<JobSummary>,
}

impl JobOutcome {
    pub fn last_error(&self) -> Option<&str> {
        self.errors.last().map(String::as_str)
    }
}

/// Run the workflow matching the context's request
pub async fn execute(ctx: &JobContext) -> Result<JobOutcome, BotError> {
    let mut outcome = JobOutcome::default();
    match ctx.reporter.request() {
        Request::Deploy(request) => deploy(ctx, request, &mut outcome).await?,
        Request::Setup(request) => {
            let action = EngineAction::Setup {
                tasks: request.tasks.clone(),
            };
            run_action(ctx, action, RevInfo::default(), &mut outcome).await?;
        }
        Request::Restart(_) => {
            run_action(ctx, EngineAction::Restart, RevInfo::default(), &mut outcome).await?
        }
        Request::Logs(_) => {
            run_action(ctx, EngineAction::Logs, RevInfo::default(), &mut outcome).await?
        }
    }
    Ok(outcome)
}

async fn deploy(
    ctx: &JobContext,
    request: &DeployRequest,
    outcome: &mut JobOutcome,
) -> Result<(), BotError> {
    let reporter = &ctx.reporter;
    let repo = &ctx.repo;
    let remote = ctx.config.deploy.remote.as_str();
    let base = ctx.config.deploy.base_branch.as_str();
    let branch = request.branch.as_str();

    reporter
        .progress(format!("OK, checking out branch {} ...", branch))
        .await?;

    reporter.progress("Resetting changes...").await?;
    step(ctx, outcome, "reset", "Changes have been reset.", repo.reset_hard()).await?;

    reporter.progress("Removing untracked files...").await?;
    step(ctx, outcome, "clean", "Repository is now cleaned.", repo.clean()).await?;

    reporter.progress("Fetching tags...").await?;
    step(ctx, outcome, "fetch", "Fetched tags.", repo.fetch_tags(remote)).await?;

    let title = format!("Checked out branch {}.", base);
    step(ctx, outcome, "checkout", &title, repo.checkout(base)).await?;

    if branch != base {
        let title = format!("Removed local branch {}", branch);
        step(ctx, outcome, "delete-branch", &title, repo.delete_branch(branch)).await?;
    }

    let title = format!("Checking out branch {}.", branch);
    step(ctx, outcome, "checkout", &title, repo.checkout(branch)).await?;

    reporter
        .progress(format!(
            "Going to pull down the changes for branch {}...",
            branch
        ))
        .await?;
    let title = format!("OK, the branch {} is now updated.", branch);
    step(ctx, outcome, "pull", &title, repo.pull(remote, branch)).await?;

    reporter.progress("Updating submodules...").await?;
    step(ctx, outcome, "submodule", "Submodule updated.", repo.submodule_update()).await?;

    let after = ctx.config.timeouts.step();
    let rev_info = match timeout(after, repo.rev_info()).await {
        Ok(Ok(rev_info)) => rev_info,
        Ok(Err(e)) => {
            report_error(ctx, outcome, e.to_string()).await?;
            RevInfo::default()
        }
        Err(_) => {
            let e = BotError::StepTimeout {
                step: "describe".to_string(),
                after,
            };
            report_error(ctx, outcome, e.to_string()).await?;
            RevInfo::default()
        }
    };

    reporter
        .progress(format!(
            "Started building {} on branch {}",
            request.app_name, branch
        ))
        .await?;
    run_action(ctx, EngineAction::Deploy, rev_info, outcome).await
}

/// Run the engine, then publish the completion summary
async fn run_action(
    ctx: &JobContext,
    action: EngineAction,
    rev_info: RevInfo,
    outcome: &mut JobOutcome,
) -> Result<(), BotError> {
    let reporter = &ctx.reporter;
    let request = reporter.request();
    let sites = request.sites();
    let deployment = Deployment::new(rev_info);

    if !matches!(action, EngineAction::Deploy) {
        reporter
            .progress(format!("Running {} on {}...", action.as_str(), sites.join(", ")))
            .await?;
    }

    let options = RunOptions::default();
    let after = ctx.config.timeouts.engine();
    let run = ctx
        .engine
        .run(&action, &deployment, sites, &options, reporter);
    let map = match timeout(after, run).await {
        Ok(Ok(map)) => map,
        Ok(Err(e)) => {
            let message = e.to_string();
            report_error(ctx, outcome, message.clone()).await?;
            failed_summary(sites, &message)
        }
        Err(_) => {
            let message = BotError::StepTimeout {
                step: action.as_str().to_string(),
                after,
            }
            .to_string();
            report_error(ctx, outcome, message.clone()).await?;
            failed_summary(sites, &message)
        }
    };

    let summary = JobSummary::from_summary_map(request, reporter.worker_name(), &deployment, &map);
    info!(
        "Job {} finished on {} host(s), succeeded: {}",
        deployment.id,
        summary.hosts.len(),
        summary.succeeded()
    );
    reporter.complete(summary.clone()).await?;
    outcome.summary = Some(summary);
    Ok(())
}

/// Await one repository step within the step timeout and relay its output
async fn step<F>(
    ctx: &JobContext,
    outcome: &mut JobOutcome,
    name: &str,
    title: &str,
    fut: F,
) -> Result<(), BotError>
where
    F: Future<Output = Result<CommandOutput, BotError>>,
{
    let after = ctx.config.timeouts.step();
    let output = match timeout(after, fut).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => CommandOutput::failed(e.to_string()),
        Err(_) => CommandOutput::failed(
            BotError::StepTimeout {
                step: name.to_string(),
                after,
            }
            .to_string(),
        ),
    };

    ctx.reporter.output(title, &output.combined()).await?;
    if let Some(error) = output.error {
        report_error(ctx, outcome, error).await?;
    }
    Ok(())
}

async fn report_error(
    ctx: &JobContext,
    outcome: &mut JobOutcome,
    error: String,
) -> Result<(), BotError> {
    warn!("Step failed: {}", error);
    ctx.reporter.error(error.clone()).await?;
    outcome.errors.push(error);
    Ok(())
}

fn failed_summary(sites: &[String], error: &str) -> SummaryMap {
    sites
        .iter()
        .map(|site| {
            (
                site.clone(),
                HostSummary {
                    error: Some(error.to_string()),
                    history: Vec::new(),
                },
            )
        })
        .collect()
}
