//! Error types for the deploy bot

use std::time::Duration;

use thiserror::Error;

/// Main error type shared by the master and the workers
#[derive(Error, Debug)]
pub enum BotError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Bus error: {0}")]
    BusError(String),

    #[error("Chat error: {0}")]
    ChatError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Git error: {0}")]
    GitError(String),

    #[error("Engine error: {0}")]
    EngineError(String),

    #[error("All workers are busy")]
    NoWorkerAvailable,

    #[error("Worker is not configured yet")]
    WorkerNotConfigured,

    #[error("Timeout: step `{step}` did not finish within {after:?}")]
    StepTimeout { step: String, after: Duration },

    #[error("Timeout: job did not finish within {after:?}")]
    JobTimeout { after: Duration },

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BotError {
    /// Whether this error was produced by one of the execution timeouts
    pub fn is_timeout(&self) -> bool {
        matches!(self, BotError::StepTimeout { .. } | BotError::JobTimeout { .. })
    }
}
