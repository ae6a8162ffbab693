//! Worker side of the bus protocol

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::bus::channels::Channel;
use crate::bus::envelope::Envelope;
use crate::bus::Bus;
use crate::deploy::Toolchain;
use crate::errors::BotError;
use crate::models::request::Request;
use crate::worker::config::{ResolvedConfig, WorkerConfig};
use crate::worker::queue::{JobQueue, JobReceiver, JobRunner};
use crate::worker::state::{WorkerEvent, WorkerFsm, WorkerState};

/// Name and working copy of a worker, fixed for the process lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    pub name: String,
    pub directory: PathBuf,
}

impl WorkerIdentity {
    pub fn new(name: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            directory: directory.into(),
        }
    }
}

/// State shared between the message handler and the job runner
pub struct WorkerCore {
    pub(crate) identity: WorkerIdentity,
    pub(crate) bus: Arc<dyn Bus>,
    pub(crate) toolchain: Arc<dyn Toolchain>,
    pub(crate) fsm: RwLock<WorkerFsm>,
    pub(crate) config: RwLock<Option<ResolvedConfig>>,
    pub(crate) current: RwLock<Option<Request>>,
}

impl WorkerCore {
    async fn publish_error(&self, message: impl Into<String>, request: Option<Request>) {
        let current_request = match request {
            Some(request) => Some(request),
            None => self.current.read().await.clone(),
        };
        let envelope = Envelope::Error {
            name: self.identity.name.clone(),
            message: message.into(),
            current_request,
        };
        if let Err(e) = self.bus.publish(&Channel::Master, &envelope).await {
            warn!("#{}: failed to publish error: {}", self.identity.name, e);
        }
    }
}

/// A worker bound to one working copy
pub struct Worker {
    core: Arc<WorkerCore>,
    queue: JobQueue,
    jobs: Option<JobReceiver>,
}

impl Worker {
    pub fn new(identity: WorkerIdentity, bus: Arc<dyn Bus>, toolchain: Arc<dyn Toolchain>) -> Self {
        let (queue, jobs) = JobQueue::new();
        Self {
            core: Arc::new(WorkerCore {
                identity,
                bus,
                toolchain,
                fsm: RwLock::new(WorkerFsm::new()),
                config: RwLock::new(None),
                current: RwLock::new(None),
            }),
            queue,
            jobs: Some(jobs),
        }
    }

    pub fn name(&self) -> &str {
        &self.core.identity.name
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.core.identity
    }

    pub async fn state(&self) -> WorkerState {
        self.core.fsm.read().await.state()
    }

    pub async fn current_request(&self) -> Option<Request> {
        self.core.current.read().await.clone()
    }

    /// Jobs queued or running
    pub fn pending_jobs(&self) -> usize {
        self.queue.len()
    }

    /// Apply a configuration, resolving the app directory under this worker's working copy
    pub async fn set_config(&self, config: &WorkerConfig) -> Result<(), BotError> {
        let resolved = ResolvedConfig::resolve(config, &self.core.identity.directory)?;
        info!(
            "#{}: configured, app directory {}",
            self.name(),
            resolved.app_dir.display()
        );
        *self.core.config.write().await = Some(resolved);
        self.core
            .fsm
            .write()
            .await
            .process(WorkerEvent::Configured)
            .map_err(BotError::Internal)
    }

    /// Handle one decoded message received on `channel`
    pub async fn on_bus_message(&self, channel: &Channel, envelope: Envelope) -> Result<(), BotError> {
        debug!("#{}: {} on {}", self.name(), envelope.type_name(), channel);
        match channel {
            Channel::Worker(name) if *name == self.core.identity.name => {
                self.on_own_message(envelope).await
            }
            Channel::Broadcast => match envelope {
                Envelope::Config { config } => self.apply_config(&config).await,
                other => {
                    let message = format!("unknown command `{}`", other.type_name());
                    warn!("#{}: {} on broadcast channel", self.name(), message);
                    self.core.publish_error(message, None).await;
                    Ok(())
                }
            },
            other => {
                debug!("#{}: ignoring message on {}", self.name(), other);
                Ok(())
            }
        }
    }

    async fn on_own_message(&self, envelope: Envelope) -> Result<(), BotError> {
        if let Envelope::Config { config } = &envelope {
            self.apply_config(config).await?;
            // Only announce readiness when nothing is queued or running
            if self.queue.is_empty() {
                self.publish_ready(None).await?;
            }
            return Ok(());
        }

        if !envelope.is_job() {
            let message = format!("unexpected `{}` message", envelope.type_name());
            warn!("#{}: {}", self.name(), message);
            self.core.publish_error(message, None).await;
            return Ok(());
        }

        let Some(request) = envelope.into_request() else {
            return Ok(());
        };

        if !self.core.fsm.read().await.is_configured() {
            warn!("#{}: dropping {} before configuration", self.name(), request.kind());
            self.core
                .publish_error(BotError::WorkerNotConfigured.to_string(), Some(request.clone()))
                .await;
            // Hand the claim back to the master
            return self.publish_ready(Some(request)).await;
        }

        let start = Envelope::Start {
            name: self.name().to_string(),
        };
        self.core.bus.publish(&Channel::Master, &start).await?;
        self.queue.push(request)
    }

    async fn apply_config(&self, config: &WorkerConfig) -> Result<(), BotError> {
        if let Err(e) = self.set_config(config).await {
            warn!("#{}: rejected configuration: {}", self.name(), e);
            self.core.publish_error(e.to_string(), None).await;
        }
        Ok(())
    }

    async fn publish_ready(&self, current_request: Option<Request>) -> Result<(), BotError> {
        let ready = Envelope::Ready {
            name: self.name().to_string(),
            current_request,
        };
        self.core.bus.publish(&Channel::Master, &ready).await
    }

    /// Subscribe, announce this worker and handle messages until `shutdown` resolves
    pub async fn run<F>(mut self, shutdown: F) -> Result<(), BotError>
    where
        F: Future<Output = ()>,
    {
        let jobs = self
            .jobs
            .take()
            .ok_or_else(|| BotError::Internal("worker is already running".to_string()))?;
        let runner = tokio::spawn(JobRunner::new(self.core.clone(), jobs).run());

        let name = self.name().to_string();
        let mut subscription = self
            .core
            .bus
            .subscribe(&[Channel::Broadcast, Channel::worker(&name)])
            .await?;
        self.core
            .bus
            .publish(&Channel::Master, &Envelope::Connect { name: name.clone() })
            .await?;
        info!("#{}: connected, waiting for configuration", name);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("#{}: shutting down", name);
                    break;
                }
                message = subscription.recv() => {
                    let Some(message) = message else {
                        warn!("#{}: bus closed", name);
                        break;
                    };
                    match message.envelope() {
                        Ok(envelope) => {
                            if let Err(e) = self.on_bus_message(&message.channel, envelope).await {
                                warn!("#{}: failed to handle message: {}", name, e);
                            }
                        }
                        Err(e) => {
                            warn!("#{}: {}", name, e);
                            self.core.publish_error(e.to_string(), None).await;
                        }
                    }
                }
            }
        }

        let _ = self.core.fsm.write().await.process(WorkerEvent::Terminate);
        runner.abort();
        Ok(())
    }
}
