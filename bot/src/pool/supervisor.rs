//! Detects workers that went away and resets their availability

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::errors::BotError;
use crate::models::request::Request;
use crate::pool::availability::AvailabilityTable;
use crate::pool::routing::WorkerProcess;

/// A worker that exited
#[derive(Debug, Clone)]
pub struct WorkerExit {
    pub name: String,
    /// How it exited, for humans
    pub status: String,
    /// Request it was working on, if any
    pub request: Option<Request>,
}

/// Something whose completion means a worker is gone
pub struct Supervised {
    name: String,
    exit: BoxFuture<'static, String>,
}

impl Supervised {
    /// A forked worker process
    pub fn process(process: WorkerProcess) -> Self {
        let WorkerProcess { name, mut child } = process;
        let exit = async move {
            match child.wait().await {
                Ok(status) => status.to_string(),
                Err(e) => format!("wait failed: {}", e),
            }
        }
        .boxed();
        Self { name, exit }
    }

    /// An in-process worker task
    pub fn task(name: impl Into<String>, handle: JoinHandle<Result<(), BotError>>) -> Self {
        let exit = async move {
            match handle.await {
                Ok(Ok(())) => "stopped".to_string(),
                Ok(Err(e)) => format!("failed: {}", e),
                Err(e) => format!("panicked: {}", e),
            }
        }
        .boxed();
        Self {
            name: name.into(),
            exit,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Wait for supervised workers to exit until `shutdown` resolves.
///
/// Every exit marks the worker unregistered and is reported on `exits`.
/// Dropping the remaining futures on shutdown kills forked processes.
pub async fn supervise<F>(
    workers: Vec<Supervised>,
    table: Arc<AvailabilityTable>,
    exits: mpsc::UnboundedSender<WorkerExit>,
    shutdown: F,
) where
    F: Future<Output = ()>,
{
    let mut running: FuturesUnordered<_> = workers
        .into_iter()
        .map(|w| {
            let name = w.name;
            w.exit.map(move |status| (name, status))
        })
        .collect();

    if running.is_empty() {
        shutdown.await;
        return;
    }

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Supervisor stopping {} worker(s)", running.len());
                return;
            }
            exited = running.next() => {
                let Some((name, status)) = exited else {
                    info!("All workers have exited");
                    (&mut shutdown).await;
                    return;
                };
                warn!("Worker {} exited: {}", name, status);
                let request = table.mark_unregistered(&name);
                let _ = exits.send(WorkerExit { name, status, request });
            }
        }
    }
}
