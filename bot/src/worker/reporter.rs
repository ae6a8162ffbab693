//! Publishes job events on the master channel, honouring the job's verbosity

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::bus::channels::Channel;
use crate::bus::envelope::Envelope;
use crate::bus::Bus;
use crate::deploy::engine::EngineObserver;
use crate::errors::BotError;
use crate::models::notice::{Notice, TaskStatus};
use crate::models::request::Request;
use crate::models::summary::JobSummary;

/// Event publisher bound to one in-flight request
#[derive(Clone)]
pub struct JobReporter {
    bus: Arc<dyn Bus>,
    name: String,
    request: Request,
    output_as_progress: bool,
}

impl JobReporter {
    pub fn new(bus: Arc<dyn Bus>, name: impl Into<String>, request: Request) -> Self {
        Self {
            bus,
            name: name.into(),
            request,
            output_as_progress: false,
        }
    }

    /// Relay engine output as progress instead of debug, for jobs whose output is the result
    pub fn with_output_as_progress(mut self) -> Self {
        self.output_as_progress = true;
        self
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn worker_name(&self) -> &str {
        &self.name
    }

    /// Progress update, dropped for silent jobs
    pub async fn progress(&self, text: impl Into<String>) -> Result<(), BotError> {
        self.progress_notice(Notice::text(text)).await
    }

    async fn progress_notice(&self, notice: Notice) -> Result<(), BotError> {
        if !self.request.verbosity().shows_progress() {
            return Ok(());
        }
        let envelope = Envelope::Progress {
            name: self.name.clone(),
            message: notice,
            current_request: Some(self.request.clone()),
        };
        self.bus.publish(&Channel::Master, &envelope).await
    }

    /// Verbose-only update
    pub async fn debug(&self, notice: Notice) -> Result<(), BotError> {
        if !self.request.verbosity().shows_debug() {
            return Ok(());
        }
        let envelope = Envelope::Debug {
            name: self.name.clone(),
            message: notice,
            current_request: Some(self.request.clone()),
        };
        self.bus.publish(&Channel::Master, &envelope).await
    }

    /// Relay command output, skipped when there is none
    pub async fn output(&self, title: &str, output: &str) -> Result<(), BotError> {
        if output.trim().is_empty() {
            return Ok(());
        }
        self.debug(Notice::output(title, output.trim())).await
    }

    /// Non-fatal failure, always sent
    pub async fn error(&self, message: impl Into<String>) -> Result<(), BotError> {
        let envelope = Envelope::Error {
            name: self.name.clone(),
            message: message.into(),
            current_request: Some(self.request.clone()),
        };
        self.bus.publish(&Channel::Master, &envelope).await
    }

    /// Final summary, always sent
    pub async fn complete(&self, summary: JobSummary) -> Result<(), BotError> {
        let envelope = Envelope::Progress {
            name: self.name.clone(),
            message: Notice::from(summary),
            current_request: Some(self.request.clone()),
        };
        self.bus.publish(&Channel::Master, &envelope).await
    }
}

#[async_trait]
impl EngineObserver for JobReporter {
    async fn on_task(&self, task: &str, status: TaskStatus) {
        if let Err(e) = self.progress_notice(Notice::task(task, status)).await {
            warn!("Failed to relay task {}: {}", task, e);
        }
    }

    async fn on_output(&self, line: &str) {
        let relayed = if self.output_as_progress {
            self.progress_notice(Notice::output(self.request.kind().as_str(), line))
                .await
        } else {
            self.output("engine", line).await
        };
        if let Err(e) = relayed {
            warn!("Failed to relay engine output: {}", e);
        }
    }
}
