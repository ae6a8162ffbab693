//! Worker protocol and job workflow tests

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use deploybot::bus::channels::Channel;
use deploybot::bus::envelope::Envelope;
use deploybot::bus::memory::MemoryBus;
use deploybot::bus::{Bus, Subscription};
use deploybot::deploy::engine::{DeployEngine, EngineAction, EngineObserver, RunOptions};
use deploybot::errors::BotError;
use deploybot::models::notice::Notice;
use deploybot::models::request::{Request, SetupRequest, Verbosity};
use deploybot::models::summary::{Deployment, HostSummary, SummaryMap};
use deploybot::pool::availability::Availability;
use deploybot::pool::{PoolEntry, WorkerPool};
use deploybot::worker::config::{TimeoutSettings, WorkerConfig};
use deploybot::worker::{Worker, WorkerIdentity};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::support::{
    calls, deploy_request, next_envelope, until_job_ready, FakeEngine, FakeRepo, FakeToolchain,
};

struct Harness {
    bus: Arc<MemoryBus>,
    master: Subscription,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), BotError>>,
}

impl Harness {
    async fn start(bus: Arc<MemoryBus>, toolchain: FakeToolchain) -> Self {
        let mut master = bus.subscribe(&[Channel::Master]).await.unwrap();
        let worker = Worker::new(
            WorkerIdentity::new("w1", "/srv/deploy/w1"),
            bus.clone(),
            Arc::new(toolchain),
        );
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(worker.run(async move {
            let _ = stopped.await;
        }));

        assert_eq!(
            next_envelope(&mut master).await,
            Envelope::Connect {
                name: "w1".to_string()
            }
        );
        Self {
            bus,
            master,
            stop,
            handle,
        }
    }

    async fn configure(&mut self, config: WorkerConfig) {
        self.send(Envelope::Config { config }).await;
        assert_eq!(
            next_envelope(&mut self.master).await,
            Envelope::Ready {
                name: "w1".to_string(),
                current_request: None
            }
        );
    }

    async fn send(&self, envelope: Envelope) {
        self.bus
            .publish(&Channel::worker("w1"), &envelope)
            .await
            .unwrap();
    }

    async fn stop(self) {
        let _ = self.stop.send(());
        tokio_test::assert_ok!(self.handle.await.unwrap());
    }
}

fn errors(envelopes: &[Envelope]) -> Vec<(String, Option<Request>)> {
    envelopes
        .iter()
        .filter_map(|e| match e {
            Envelope::Error {
                message,
                current_request,
                ..
            } => Some((message.clone(), current_request.clone())),
            _ => None,
        })
        .collect()
}

fn readies(envelopes: &[Envelope]) -> usize {
    envelopes
        .iter()
        .filter(|e| matches!(e, Envelope::Ready { .. }))
        .count()
}

#[tokio::test]
async fn test_deploy_runs_repository_steps_in_order() {
    let repo = FakeRepo::default();
    let repo_calls = repo.calls.clone();
    let engine = Arc::new(FakeEngine::default());
    let runs = engine.runs.clone();

    let mut harness = Harness::start(
        Arc::new(MemoryBus::new()),
        FakeToolchain::new(repo, engine),
    )
    .await;
    harness.configure(WorkerConfig::default()).await;

    let request = deploy_request("feature/x", &["staging", "dev"], Verbosity::Normal);
    harness.send(Envelope::job(request.clone())).await;

    let seen = until_job_ready(&mut harness.master).await;
    assert_eq!(
        seen[0],
        Envelope::Start {
            name: "w1".to_string()
        }
    );
    assert!(errors(&seen).is_empty());
    assert_eq!(
        seen.last(),
        Some(&Envelope::Ready {
            name: "w1".to_string(),
            current_request: Some(request),
        })
    );

    assert_eq!(
        calls(&repo_calls),
        vec![
            "reset",
            "clean",
            "fetch origin",
            "checkout master",
            "delete feature/x",
            "checkout feature/x",
            "pull origin feature/x",
            "submodule",
            "rev_info",
        ]
    );
    assert_eq!(calls(&runs), vec!["deploy staging,dev v1.2.0-3-gabc1234"]);

    let summary = seen.iter().find_map(|e| match e {
        Envelope::Progress {
            message: Notice::Summary { summary },
            ..
        } => Some(summary.clone()),
        _ => None,
    });
    let summary = summary.expect("no summary published");
    assert!(summary.succeeded());
    assert_eq!(summary.revision.as_deref(), Some("v1.2.0-3-gabc1234"));
    assert_eq!(summary.requested_by.as_deref(), Some("U1"));

    harness.stop().await;
}

#[tokio::test]
async fn test_base_branch_is_not_deleted() {
    let repo = FakeRepo::default();
    let repo_calls = repo.calls.clone();
    let mut harness = Harness::start(
        Arc::new(MemoryBus::new()),
        FakeToolchain::new(repo, Arc::new(FakeEngine::default())),
    )
    .await;
    harness.configure(WorkerConfig::default()).await;

    harness
        .send(Envelope::job(deploy_request("master", &["dev"], Verbosity::Silent)))
        .await;
    let seen = until_job_ready(&mut harness.master).await;

    assert!(!calls(&repo_calls).iter().any(|c| c.starts_with("delete")));
    // Silent jobs still get the final summary
    assert!(seen.iter().any(|e| matches!(
        e,
        Envelope::Progress {
            message: Notice::Summary { .. },
            ..
        }
    )));
    assert!(!seen.iter().any(|e| matches!(
        e,
        Envelope::Progress {
            message: Notice::Text { .. },
            ..
        }
    )));

    harness.stop().await;
}

#[tokio::test]
async fn test_repository_error_then_exactly_one_ready() {
    let mut harness = Harness::start(
        Arc::new(MemoryBus::new()),
        FakeToolchain::new(FakeRepo::failing("pull"), Arc::new(FakeEngine::default())),
    )
    .await;
    harness.configure(WorkerConfig::default()).await;

    let request = deploy_request("feature/x", &["dev"], Verbosity::Normal);
    harness.send(Envelope::job(request.clone())).await;
    let seen = until_job_ready(&mut harness.master).await;

    let errors = errors(&seen);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "git pull failed");
    assert_eq!(errors[0].1, Some(request));
    assert_eq!(readies(&seen), 1);

    // The workflow went on to the engine after the failed pull
    assert!(seen.iter().any(|e| matches!(
        e,
        Envelope::Progress {
            message: Notice::Summary { .. },
            ..
        }
    )));

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(harness.master.try_recv().is_none());

    harness.stop().await;
}

#[tokio::test]
async fn test_engine_failure_reports_failed_hosts() {
    let engine = FakeEngine {
        fail: true,
        ..FakeEngine::default()
    };
    let mut harness = Harness::start(
        Arc::new(MemoryBus::new()),
        FakeToolchain::new(FakeRepo::default(), Arc::new(engine)),
    )
    .await;
    harness.configure(WorkerConfig::default()).await;

    harness
        .send(Envelope::job(deploy_request("master", &["dev", "prod"], Verbosity::Normal)))
        .await;
    let seen = until_job_ready(&mut harness.master).await;

    let errors = errors(&seen);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].0.contains("engine exited with status 1"));

    let summary = seen
        .iter()
        .find_map(|e| match e {
            Envelope::Progress {
                message: Notice::Summary { summary },
                ..
            } => Some(summary.clone()),
            _ => None,
        })
        .unwrap();
    assert!(!summary.succeeded());
    assert_eq!(summary.failed_hosts().count(), 2);

    harness.stop().await;
}

#[tokio::test]
async fn test_step_timeout_is_reported_and_workflow_continues() {
    let mut harness = Harness::start(
        Arc::new(MemoryBus::new()),
        FakeToolchain::new(FakeRepo::hanging("fetch"), Arc::new(FakeEngine::default())),
    )
    .await;
    harness
        .configure(WorkerConfig {
            timeouts: TimeoutSettings {
                step_secs: 1,
                ..TimeoutSettings::default()
            },
            ..WorkerConfig::default()
        })
        .await;

    let request = deploy_request("master", &["dev"], Verbosity::Normal);
    harness.send(Envelope::job(request.clone())).await;
    let seen = until_job_ready(&mut harness.master).await;

    let errors = errors(&seen);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].0.starts_with("Timeout: step `fetch`"));
    assert_eq!(errors[0].1, Some(request));
    assert_eq!(readies(&seen), 1);

    harness.stop().await;
}

#[tokio::test]
async fn test_job_timeout_forces_ready() {
    let mut harness = Harness::start(
        Arc::new(MemoryBus::new()),
        FakeToolchain::new(FakeRepo::hanging("reset"), Arc::new(FakeEngine::default())),
    )
    .await;
    harness
        .configure(WorkerConfig {
            timeouts: TimeoutSettings {
                step_secs: 30,
                engine_secs: 30,
                job_secs: 1,
            },
            ..WorkerConfig::default()
        })
        .await;

    harness
        .send(Envelope::job(deploy_request("master", &["dev"], Verbosity::Normal)))
        .await;
    let seen = until_job_ready(&mut harness.master).await;

    let errors = errors(&seen);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].0.starts_with("Timeout: job did not finish"));
    assert_eq!(readies(&seen), 1);

    harness.stop().await;
}

#[tokio::test]
async fn test_job_before_config_is_dropped() {
    let repo = FakeRepo::default();
    let repo_calls = repo.calls.clone();
    let mut harness = Harness::start(
        Arc::new(MemoryBus::new()),
        FakeToolchain::new(repo, Arc::new(FakeEngine::default())),
    )
    .await;

    let pool = WorkerPool::new(
        harness.bus.clone(),
        vec![PoolEntry {
            name: "w1".to_string(),
            directory: PathBuf::from("/srv/deploy/w1"),
        }],
    );
    pool.observe(&Envelope::Connect {
        name: "w1".to_string(),
    });

    let request = deploy_request("master", &["dev"], Verbosity::Normal);
    assert_eq!(pool.dispatch(request.clone()).await.unwrap(), "w1");
    assert_eq!(pool.availability("w1"), Some(Availability::Busy));

    let error = next_envelope(&mut harness.master).await;
    assert_eq!(
        error,
        Envelope::Error {
            name: "w1".to_string(),
            message: "Worker is not configured yet".to_string(),
            current_request: Some(request.clone()),
        }
    );
    let ready = next_envelope(&mut harness.master).await;
    assert_eq!(
        ready,
        Envelope::Ready {
            name: "w1".to_string(),
            current_request: Some(request.clone()),
        }
    );

    // The dropped job hands the worker back to the pool
    pool.observe(&error);
    assert_eq!(pool.observe(&ready), Some(request));
    assert_eq!(pool.availability("w1"), Some(Availability::Ready));

    // Once configured the worker only reports ready, nothing was queued
    harness.configure(WorkerConfig::default()).await;
    assert!(calls(&repo_calls).is_empty());

    harness.stop().await;
}

#[tokio::test]
async fn test_broadcast_only_accepts_config() {
    let mut harness = Harness::start(
        Arc::new(MemoryBus::new()),
        FakeToolchain::new(FakeRepo::default(), Arc::new(FakeEngine::default())),
    )
    .await;
    harness.configure(WorkerConfig::default()).await;

    let job = Envelope::job(deploy_request("master", &["dev"], Verbosity::Normal));
    harness.bus.publish(&Channel::Broadcast, &job).await.unwrap();
    match next_envelope(&mut harness.master).await {
        Envelope::Error { message, .. } => assert_eq!(message, "unknown command `deploy`"),
        other => panic!("expected an error, got {:?}", other),
    }

    // A broadcast config is applied without a ready announcement
    harness
        .bus
        .publish(
            &Channel::Broadcast,
            &Envelope::Config {
                config: WorkerConfig::default(),
            },
        )
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(harness.master.try_recv().is_none());

    harness.stop().await;
}

#[tokio::test]
async fn test_setup_skips_repository_sync() {
    let repo = FakeRepo::default();
    let repo_calls = repo.calls.clone();
    let engine = Arc::new(FakeEngine::default());
    let runs = engine.runs.clone();
    let mut harness = Harness::start(
        Arc::new(MemoryBus::new()),
        FakeToolchain::new(repo, engine),
    )
    .await;
    harness.configure(WorkerConfig::default()).await;

    let request = Request::Setup(SetupRequest {
        tasks: vec!["deploy:prepare".to_string()],
        sites: vec!["dev".to_string()],
        verbosity: Verbosity::Normal,
        from_message: None,
    });
    harness.send(Envelope::job(request)).await;
    let seen = until_job_ready(&mut harness.master).await;

    assert!(errors(&seen).is_empty());
    assert!(calls(&repo_calls).is_empty());
    assert_eq!(calls(&runs), vec!["setup dev"]);

    harness.stop().await;
}

/// Engine that checks, when each run starts, how many job `ready` events the master could already see
struct ProbeEngine {
    master: Mutex<Subscription>,
    ready_seen: Mutex<usize>,
    starts: Mutex<Vec<(String, usize)>>,
}

#[async_trait]
impl DeployEngine for ProbeEngine {
    async fn run(
        &self,
        _action: &EngineAction,
        _deployment: &Deployment,
        sites: &[String],
        _options: &RunOptions,
        _observer: &dyn EngineObserver,
    ) -> Result<SummaryMap, BotError> {
        let mut ready_seen = self.ready_seen.lock().unwrap();
        {
            let mut master = self.master.lock().unwrap();
            while let Some(message) = master.try_recv() {
                if let Ok(Envelope::Ready {
                    current_request: Some(_),
                    ..
                }) = message.envelope()
                {
                    *ready_seen += 1;
                }
            }
        }
        self.starts
            .lock()
            .unwrap()
            .push((sites.join(","), *ready_seen));
        Ok(sites
            .iter()
            .map(|s| (s.clone(), HostSummary::default()))
            .collect())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_back_to_back_jobs_run_in_arrival_order() {
    let bus = Arc::new(MemoryBus::new());
    let probe = Arc::new(ProbeEngine {
        master: Mutex::new(bus.subscribe(&[Channel::Master]).await.unwrap()),
        ready_seen: Mutex::new(0),
        starts: Mutex::new(Vec::new()),
    });

    let mut harness = Harness::start(
        bus,
        FakeToolchain::new(FakeRepo::default(), probe.clone()),
    )
    .await;
    harness.configure(WorkerConfig::default()).await;

    let first = deploy_request("master", &["first"], Verbosity::Normal);
    let second = deploy_request("master", &["second"], Verbosity::Normal);
    harness.send(Envelope::job(first.clone())).await;
    harness.send(Envelope::job(second.clone())).await;

    let seen = until_job_ready(&mut harness.master).await;
    assert!(matches!(seen.last(), Some(Envelope::Ready { current_request: Some(r), .. }) if *r == first));
    let seen = until_job_ready(&mut harness.master).await;
    assert!(matches!(seen.last(), Some(Envelope::Ready { current_request: Some(r), .. }) if *r == second));

    assert_eq!(
        probe.starts.lock().unwrap().clone(),
        vec![("first".to_string(), 0), ("second".to_string(), 1)]
    );

    harness.stop().await;
}
