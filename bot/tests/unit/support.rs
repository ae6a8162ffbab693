//! Fakes of the external collaborators

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use deploybot::bus::envelope::Envelope;
use deploybot::bus::Subscription;
use deploybot::chat::{ChatClient, ChatPayload};
use deploybot::deploy::engine::{DeployEngine, EngineAction, EngineObserver, RunOptions};
use deploybot::deploy::git::{CommandOutput, Repository};
use deploybot::deploy::Toolchain;
use deploybot::errors::BotError;
use deploybot::models::message::ChatMessage;
use deploybot::models::notice::TaskStatus;
use deploybot::models::request::{DeployRequest, Request, Verbosity};
use deploybot::models::summary::{Commit, Deployment, HostSummary, RevInfo, SummaryMap};
use deploybot::worker::config::ResolvedConfig;

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Repository recording every call, optionally failing or hanging on one step
#[derive(Default)]
pub struct FakeRepo {
    pub calls: CallLog,
    pub fail_on: Option<&'static str>,
    pub hang_on: Option<&'static str>,
}

impl FakeRepo {
    pub fn failing(step: &'static str) -> Self {
        Self {
            fail_on: Some(step),
            ..Self::default()
        }
    }

    pub fn hanging(step: &'static str) -> Self {
        Self {
            hang_on: Some(step),
            ..Self::default()
        }
    }

    async fn record(&self, step: &'static str, call: String) -> Result<CommandOutput, BotError> {
        self.calls.lock().unwrap().push(call);
        if self.hang_on == Some(step) {
            std::future::pending::<()>().await;
        }
        if self.fail_on == Some(step) {
            return Ok(CommandOutput {
                error: Some(format!("git {} failed", step)),
                stdout: String::new(),
                stderr: format!("fatal: {} went wrong", step),
            });
        }
        Ok(CommandOutput::ok(format!("{} done", step)))
    }
}

#[async_trait]
impl Repository for FakeRepo {
    async fn reset_hard(&self) -> Result<CommandOutput, BotError> {
        self.record("reset", "reset".to_string()).await
    }

    async fn clean(&self) -> Result<CommandOutput, BotError> {
        self.record("clean", "clean".to_string()).await
    }

    async fn fetch_tags(&self, remote: &str) -> Result<CommandOutput, BotError> {
        self.record("fetch", format!("fetch {}", remote)).await
    }

    async fn checkout(&self, branch: &str) -> Result<CommandOutput, BotError> {
        self.record("checkout", format!("checkout {}", branch)).await
    }

    async fn delete_branch(&self, branch: &str) -> Result<CommandOutput, BotError> {
        self.record("delete", format!("delete {}", branch)).await
    }

    async fn pull(&self, remote: &str, branch: &str) -> Result<CommandOutput, BotError> {
        self.record("pull", format!("pull {} {}", remote, branch)).await
    }

    async fn submodule_update(&self) -> Result<CommandOutput, BotError> {
        self.record("submodule", "submodule".to_string()).await
    }

    async fn rev_info(&self) -> Result<RevInfo, BotError> {
        self.calls.lock().unwrap().push("rev_info".to_string());
        Ok(RevInfo {
            describe: "v1.2.0-3-gabc1234".to_string(),
            commits: vec![Commit {
                hash: "abc1234".to_string(),
                author: "Carlos".to_string(),
                message: "Fix assets".to_string(),
                committed_at: "2026-10-01T12:00:00Z".to_string(),
            }],
        })
    }
}

/// Engine reporting every site as deployed
#[derive(Default)]
pub struct FakeEngine {
    pub runs: CallLog,
    pub fail: bool,
}

#[async_trait]
impl DeployEngine for FakeEngine {
    async fn run(
        &self,
        action: &EngineAction,
        deployment: &Deployment,
        sites: &[String],
        _options: &RunOptions,
        observer: &dyn EngineObserver,
    ) -> Result<SummaryMap, BotError> {
        let tag = deployment.tag.clone().unwrap_or_default();
        self.runs
            .lock()
            .unwrap()
            .push(format!("{} {} {}", action.as_str(), sites.join(","), tag).trim_end().to_string());

        if self.fail {
            return Err(BotError::EngineError("engine exited with status 1".to_string()));
        }

        observer.on_task("deploy:update_code", TaskStatus::Started).await;
        observer.on_task("deploy:update_code", TaskStatus::Succeeded).await;
        Ok(sites
            .iter()
            .map(|site| (site.clone(), HostSummary::default()))
            .collect())
    }
}

pub struct FakeToolchain {
    pub repo: Arc<FakeRepo>,
    pub engine: Arc<dyn DeployEngine>,
}

impl FakeToolchain {
    pub fn new(repo: FakeRepo, engine: Arc<dyn DeployEngine>) -> Self {
        Self {
            repo: Arc::new(repo),
            engine,
        }
    }
}

impl Toolchain for FakeToolchain {
    fn repository(&self, _dir: &Path) -> Arc<dyn Repository> {
        self.repo.clone()
    }

    fn engine(&self, _config: &ResolvedConfig) -> Result<Arc<dyn DeployEngine>, BotError> {
        Ok(self.engine.clone())
    }
}

/// Chat client keeping everything it was asked to send
#[derive(Default)]
pub struct RecordingChat {
    sent: Mutex<Vec<(String, ChatPayload)>>,
}

impl RecordingChat {
    pub fn sent(&self) -> Vec<(String, ChatPayload)> {
        self.sent.lock().unwrap().clone()
    }

    /// Headlines sent to one channel
    pub fn lines(&self, channel: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, payload)| payload.headline().to_string())
            .collect()
    }
}

#[async_trait]
impl ChatClient for RecordingChat {
    async fn send_message(&self, payload: &ChatPayload, channel: &str) -> Result<(), BotError> {
        self.sent
            .lock()
            .unwrap()
            .push((channel.to_string(), payload.clone()));
        Ok(())
    }
}

pub fn deploy_request(branch: &str, sites: &[&str], verbosity: Verbosity) -> Request {
    Request::Deploy(DeployRequest {
        app_name: "shaka".to_string(),
        branch: branch.to_string(),
        sites: sites.iter().map(|s| s.to_string()).collect(),
        verbosity,
        from_message: Some(ChatMessage::new("C1", "U1", "deploy")),
    })
}

/// Next envelope on a subscription, failing the test after a few seconds
pub async fn next_envelope(subscription: &mut Subscription) -> Envelope {
    let message = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .expect("timed out waiting for a bus message")
        .expect("bus closed");
    message.envelope().expect("undecodable envelope")
}

/// Envelopes up to and including the first `ready` that carries a request
pub async fn until_job_ready(subscription: &mut Subscription) -> Vec<Envelope> {
    let mut seen = Vec::new();
    loop {
        let envelope = next_envelope(subscription).await;
        let done = matches!(
            &envelope,
            Envelope::Ready {
                current_request: Some(_),
                ..
            }
        );
        seen.push(envelope);
        if done {
            return seen;
        }
    }
}
