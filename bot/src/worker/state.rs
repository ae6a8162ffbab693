//! Finite state machine of a worker process

use serde::{Deserialize, Serialize};

/// Worker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Started, no configuration received yet
    Disconnected,

    /// Configured and waiting for a job
    Ready,

    /// Running a job
    Busy,

    /// Shutting down
    Terminated,
}

/// Worker event
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A `config` message was applied
    Configured,

    /// A job left the queue and started running
    JobStarted,

    /// The running job settled, with its last error if any
    JobSettled(Option<String>),

    /// The process is going away
    Terminate,
}

/// Worker FSM
#[derive(Debug, Clone)]
pub struct WorkerFsm {
    state: WorkerState,
    last_error: Option<String>,
    jobs_completed: u64,
}

impl WorkerFsm {
    /// Create a new FSM in disconnected state
    pub fn new() -> Self {
        Self {
            state: WorkerState::Disconnected,
            last_error: None,
            jobs_completed: 0,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Error of the last settled job
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed
    }

    pub fn is_configured(&self) -> bool {
        matches!(self.state, WorkerState::Ready | WorkerState::Busy)
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: WorkerEvent) -> Result<(), String> {
        let new_state = match (self.state, &event) {
            (WorkerState::Disconnected, WorkerEvent::Configured) => WorkerState::Ready,

            // Configuration may be replaced at any time, a running job keeps the worker busy
            (WorkerState::Ready, WorkerEvent::Configured) => WorkerState::Ready,
            (WorkerState::Busy, WorkerEvent::Configured) => WorkerState::Busy,

            (WorkerState::Ready, WorkerEvent::JobStarted) => {
                self.last_error = None;
                WorkerState::Busy
            }

            (WorkerState::Busy, WorkerEvent::JobSettled(error)) => {
                self.last_error = error.clone();
                self.jobs_completed += 1;
                WorkerState::Ready
            }

            (WorkerState::Terminated, event) => {
                return Err(format!("Worker is terminated, ignoring {:?}", event));
            }
            (_, WorkerEvent::Terminate) => WorkerState::Terminated,

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for WorkerFsm {
    fn default() -> Self {
        Self::new()
    }
}
