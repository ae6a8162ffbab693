//! Master side view of the workers

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::bus::channels::Channel;
use crate::bus::envelope::Envelope;
use crate::bus::Bus;
use crate::errors::BotError;
use crate::models::request::Request;
use crate::pool::availability::{Availability, AvailabilityTable, WorkerStatus};
use crate::worker::config::WorkerConfig;

/// One configured worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
    pub name: String,
    pub directory: PathBuf,
}

/// How to launch worker processes
#[derive(Debug, Clone)]
pub struct ForkOptions {
    /// Executable to run, normally the current one
    pub program: PathBuf,
    pub config_path: Option<PathBuf>,
}

impl ForkOptions {
    pub fn current_exe(config_path: Option<PathBuf>) -> Result<Self, BotError> {
        Ok(Self {
            program: std::env::current_exe()?,
            config_path,
        })
    }
}

/// A launched worker process
#[derive(Debug)]
pub struct WorkerProcess {
    pub name: String,
    pub child: Child,
}

pub struct WorkerPool {
    bus: Arc<dyn Bus>,
    table: Arc<AvailabilityTable>,
    entries: Vec<PoolEntry>,
}

impl WorkerPool {
    pub fn new(bus: Arc<dyn Bus>, entries: Vec<PoolEntry>) -> Self {
        let table = AvailabilityTable::with_roster(entries.iter().map(|e| e.name.clone()));
        Self {
            bus,
            table: Arc::new(table),
            entries,
        }
    }

    pub fn entries(&self) -> &[PoolEntry] {
        &self.entries
    }

    pub fn table(&self) -> Arc<AvailabilityTable> {
        self.table.clone()
    }

    pub fn bus(&self) -> Arc<dyn Bus> {
        self.bus.clone()
    }

    pub fn availability(&self, name: &str) -> Option<Availability> {
        self.table.get(name)
    }

    pub fn status(&self) -> Vec<WorkerStatus> {
        self.table.snapshot()
    }

    /// Claim the first ready worker for `request`, marking it busy
    pub fn route_to_available_worker(&self, request: &Request) -> Result<String, BotError> {
        match self.table.try_acquire(request) {
            Some(name) => {
                info!("Routing {} to {}", request.describe(), name);
                Ok(name)
            }
            None => Err(BotError::NoWorkerAvailable),
        }
    }

    /// Route a request and send it to the chosen worker
    pub async fn dispatch(&self, request: Request) -> Result<String, BotError> {
        let name = self.route_to_available_worker(&request)?;
        let envelope = Envelope::job(request);
        if let Err(e) = self.publish(&Channel::worker(&name), &envelope).await {
            self.table.release(&name);
            return Err(e);
        }
        Ok(name)
    }

    pub async fn publish(&self, channel: &Channel, envelope: &Envelope) -> Result<(), BotError> {
        self.bus.publish(channel, envelope).await
    }

    /// Update availability from a worker event.
    ///
    /// Returns the request the worker was last assigned when the event ends it.
    pub fn observe(&self, envelope: &Envelope) -> Option<Request> {
        match envelope {
            Envelope::Connect { name } => {
                info!("Worker {} connected", name);
                self.table.register(name);
                None
            }
            Envelope::Start { name } => {
                self.table.mark_busy(name);
                None
            }
            Envelope::Ready {
                name,
                current_request: Some(_),
            } => {
                debug!("Worker {} finished its job", name);
                self.table.mark_ready(name)
            }
            Envelope::Ready {
                name,
                current_request: None,
            } => {
                debug!("Worker {} is ready", name);
                self.table.mark_idle(name);
                None
            }
            _ => None,
        }
    }

    /// Push the worker configuration to one worker
    pub async fn send_config(&self, name: &str, config: &WorkerConfig) -> Result<(), BotError> {
        let envelope = Envelope::Config {
            config: config.clone(),
        };
        self.publish(&Channel::worker(name), &envelope).await
    }

    /// Push the worker configuration to every worker
    pub async fn broadcast_config(&self, config: &WorkerConfig) -> Result<(), BotError> {
        let envelope = Envelope::Config {
            config: config.clone(),
        };
        self.publish(&Channel::Broadcast, &envelope).await
    }

    /// Launch one worker process per pool entry.
    ///
    /// Processes are killed when their handle is dropped. Crashed workers are
    /// not restarted.
    pub fn fork(&self, options: &ForkOptions) -> Result<Vec<WorkerProcess>, BotError> {
        let mut processes = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let mut command = Command::new(&options.program);
            command
                .arg("--worker")
                .arg(format!("--name={}", entry.name))
                .arg(format!("--dir={}", entry.directory.display()));
            if let Some(config_path) = &options.config_path {
                command.arg(format!("--config={}", config_path.display()));
            }

            let child = command
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| {
                    BotError::Internal(format!("Failed to fork worker {}: {}", entry.name, e))
                })?;
            info!(
                "Forked worker {} (pid {:?}) on {}",
                entry.name,
                child.id(),
                entry.directory.display()
            );
            processes.push(WorkerProcess {
                name: entry.name.clone(),
                child,
            });
        }
        if processes.is_empty() {
            warn!("Worker pool is empty, nothing to fork");
        }
        Ok(processes)
    }
}
