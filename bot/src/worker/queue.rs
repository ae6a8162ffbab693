//! Per-worker FIFO job queue and the runner draining it

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::bus::channels::Channel;
use crate::bus::envelope::Envelope;
use crate::errors::BotError;
use crate::models::request::{Request, RequestKind};
use crate::worker::handler::WorkerCore;
use crate::worker::pipeline::{self, JobContext};
use crate::worker::reporter::JobReporter;
use crate::worker::state::WorkerEvent;

/// Sending half of a worker's job queue
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<Request>,
    pending: Arc<AtomicUsize>,
}

/// Receiving half, owned by the runner
#[derive(Debug)]
pub struct JobReceiver {
    rx: mpsc::UnboundedReceiver<Request>,
    pending: Arc<AtomicUsize>,
}

impl JobQueue {
    pub fn new() -> (Self, JobReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        (
            Self {
                tx,
                pending: pending.clone(),
            },
            JobReceiver { rx, pending },
        )
    }

    /// Append a job behind every job already queued
    pub fn push(&self, request: Request) -> Result<(), BotError> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.tx.send(request).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            BotError::Internal("job runner is gone".to_string())
        })
    }

    /// Jobs queued or running
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl JobReceiver {
    async fn next(&mut self) -> Option<Request> {
        self.rx.recv().await
    }

    fn settle(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs queued jobs one at a time, in arrival order
pub struct JobRunner {
    core: Arc<WorkerCore>,
    jobs: JobReceiver,
}

impl JobRunner {
    pub fn new(core: Arc<WorkerCore>, jobs: JobReceiver) -> Self {
        Self { core, jobs }
    }

    pub async fn run(mut self) {
        while let Some(request) = self.jobs.next().await {
            self.run_job(request).await;
            self.jobs.settle();
        }
        info!("Job queue of {} closed", self.core.identity.name);
    }

    async fn run_job(&self, request: Request) {
        let core = &self.core;
        let name = core.identity.name.clone();
        info!("#{}: running {}", name, request.describe());

        *core.current.write().await = Some(request.clone());
        if let Err(e) = core.fsm.write().await.process(WorkerEvent::JobStarted) {
            warn!("#{}: {}", name, e);
        }

        let mut reporter = JobReporter::new(core.bus.clone(), name.clone(), request.clone());
        if request.kind() == RequestKind::Logs {
            reporter = reporter.with_output_as_progress();
        }

        let last_error = match self.execute(reporter.clone()).await {
            Ok(last_error) => last_error,
            Err(e) => {
                error!("#{}: job failed: {}", name, e);
                let message = e.to_string();
                if let Err(e) = reporter.error(message.clone()).await {
                    warn!("#{}: failed to report error: {}", name, e);
                }
                Some(message)
            }
        };

        if let Err(e) = core
            .fsm
            .write()
            .await
            .process(WorkerEvent::JobSettled(last_error))
        {
            warn!("#{}: {}", name, e);
        }

        let ready = Envelope::Ready {
            name: name.clone(),
            current_request: Some(request),
        };
        if let Err(e) = core.bus.publish(&Channel::Master, &ready).await {
            error!("#{}: failed to report ready: {}", name, e);
        }
        *core.current.write().await = None;
    }

    /// Run the workflow under the job timeout, returning its last error
    async fn execute(&self, reporter: JobReporter) -> Result<Option<String>, BotError> {
        let config = self
            .core
            .config
            .read()
            .await
            .clone()
            .ok_or(BotError::WorkerNotConfigured)?;

        let ctx = JobContext {
            repo: self.core.toolchain.repository(&config.working_copy),
            engine: self.core.toolchain.engine(&config)?,
            config,
            reporter,
        };

        let after = ctx.config.timeouts.job();
        match timeout(after, pipeline::execute(&ctx)).await {
            Ok(outcome) => Ok(outcome?.last_error().map(str::to_string)),
            Err(_) => Err(BotError::JobTimeout { after }),
        }
    }
}
