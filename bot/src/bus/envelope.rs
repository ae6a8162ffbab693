//! Bus message envelopes.
//!
//! Every message is a JSON object with a `type` field. Jobs may carry their
//! request under `task` instead of `request`, and `idle` is accepted for
//! `ready`.

use serde::{Deserialize, Serialize};

use crate::errors::BotError;
use crate::models::notice::Notice;
use crate::models::request::{DeployRequest, LogsRequest, Request, RestartRequest, SetupRequest};
use crate::worker::config::WorkerConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum Envelope {
    /// Push deployment configuration to a worker
    Config { config: WorkerConfig },

    Deploy {
        #[serde(alias = "task")]
        request: DeployRequest,
    },

    Setup {
        #[serde(alias = "task")]
        request: SetupRequest,
    },

    Restart {
        #[serde(alias = "task")]
        request: RestartRequest,
    },

    Logs {
        #[serde(alias = "task")]
        request: LogsRequest,
    },

    /// Worker process came up
    Connect { name: String },

    /// Worker accepted a job
    #[serde(alias = "busy")]
    Start { name: String },

    /// Worker finished its job
    #[serde(alias = "idle")]
    Ready {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_request: Option<Request>,
    },

    Progress {
        #[serde(default)]
        name: String,
        message: Notice,
        #[serde(default)]
        current_request: Option<Request>,
    },

    /// Only sent for verbose and debug jobs
    Debug {
        #[serde(default)]
        name: String,
        message: Notice,
        #[serde(default)]
        current_request: Option<Request>,
    },

    /// Non-fatal failure on the worker side
    Error {
        #[serde(default)]
        name: String,
        message: String,
        #[serde(default)]
        current_request: Option<Request>,
    },
}

impl Envelope {
    /// Job envelope for a request
    pub fn job(request: Request) -> Self {
        match request {
            Request::Deploy(request) => Envelope::Deploy { request },
            Request::Setup(request) => Envelope::Setup { request },
            Request::Restart(request) => Envelope::Restart { request },
            Request::Logs(request) => Envelope::Logs { request },
        }
    }

    /// The request carried by a job envelope
    pub fn into_request(self) -> Option<Request> {
        match self {
            Envelope::Deploy { request } => Some(Request::Deploy(request)),
            Envelope::Setup { request } => Some(Request::Setup(request)),
            Envelope::Restart { request } => Some(Request::Restart(request)),
            Envelope::Logs { request } => Some(Request::Logs(request)),
            _ => None,
        }
    }

    pub fn is_job(&self) -> bool {
        matches!(
            self,
            Envelope::Deploy { .. }
                | Envelope::Setup { .. }
                | Envelope::Restart { .. }
                | Envelope::Logs { .. }
        )
    }

    /// The in-flight request of a worker event
    pub fn current_request(&self) -> Option<&Request> {
        match self {
            Envelope::Ready { current_request, .. }
            | Envelope::Progress { current_request, .. }
            | Envelope::Debug { current_request, .. }
            | Envelope::Error { current_request, .. } => current_request.as_ref(),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Envelope::Config { .. } => "config",
            Envelope::Deploy { .. } => "deploy",
            Envelope::Setup { .. } => "setup",
            Envelope::Restart { .. } => "restart",
            Envelope::Logs { .. } => "logs",
            Envelope::Connect { .. } => "connect",
            Envelope::Start { .. } => "start",
            Envelope::Ready { .. } => "ready",
            Envelope::Progress { .. } => "progress",
            Envelope::Debug { .. } => "debug",
            Envelope::Error { .. } => "error",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, BotError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, BotError> {
        serde_json::from_slice(payload).map_err(|e| {
            let kind = serde_json::from_slice::<serde_json::Value>(payload)
                .ok()
                .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_string));
            match kind {
                Some(kind) => BotError::ProtocolError(format!("bad `{}` message: {}", kind, e)),
                None => BotError::ProtocolError(format!("undecodable message: {}", e)),
            }
        })
    }
}
