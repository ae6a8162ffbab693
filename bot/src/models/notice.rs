//! Chat-bound notices carried by progress and debug events

use serde::{Deserialize, Serialize};

use crate::models::summary::JobSummary;

/// Status of a task reported by the deploy engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Started,
    Succeeded,
    Failed,
}

/// Something a worker wants shown in chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum Notice {
    /// Plain sentence
    Text { text: String },

    /// Raw command output, rendered as a code block
    Output { title: String, output: String },

    /// Engine task lifecycle
    Task { task: String, status: TaskStatus },

    /// Final job summary
    Summary { summary: JobSummary },
}

impl Notice {
    pub fn text(text: impl Into<String>) -> Self {
        Notice::Text { text: text.into() }
    }

    pub fn output(title: impl Into<String>, output: impl Into<String>) -> Self {
        Notice::Output {
            title: title.into(),
            output: output.into(),
        }
    }

    pub fn task(task: impl Into<String>, status: TaskStatus) -> Self {
        Notice::Task {
            task: task.into(),
            status,
        }
    }
}

impl From<JobSummary> for Notice {
    fn from(summary: JobSummary) -> Self {
        Notice::Summary { summary }
    }
}
