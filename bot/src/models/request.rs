//! Typed requests parsed from chat sentences

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::message::ChatMessage;

/// Kind of job a request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Deploy,
    Setup,
    Restart,
    Logs,
}

impl RequestKind {
    /// Fixed priority order in which statements are tried
    pub const PRIORITY: [RequestKind; 4] = [
        RequestKind::Deploy,
        RequestKind::Setup,
        RequestKind::Restart,
        RequestKind::Logs,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Deploy => "deploy",
            RequestKind::Setup => "setup",
            RequestKind::Restart => "restart",
            RequestKind::Logs => "logs",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How chatty a job is while it runs.
///
/// On the wire this is three mutually exclusive booleans (`verbose`, `silent`,
/// `debug`), all false for [`Verbosity::Normal`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "VerbosityFlags", into = "VerbosityFlags")]
pub enum Verbosity {
    #[default]
    Normal,
    Verbose,
    Silent,
    Debug,
}

impl Verbosity {
    /// Map a logging token from a sentence to a verbosity
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_lowercase().as_str() {
            "verbosely" => Some(Verbosity::Verbose),
            "silently" => Some(Verbosity::Silent),
            "debugly" => Some(Verbosity::Debug),
            _ => None,
        }
    }

    pub fn token(self) -> Option<&'static str> {
        match self {
            Verbosity::Normal => None,
            Verbosity::Verbose => Some("verbosely"),
            Verbosity::Silent => Some("silently"),
            Verbosity::Debug => Some("debugly"),
        }
    }

    pub fn is_verbose(self) -> bool {
        self == Verbosity::Verbose
    }

    pub fn is_silent(self) -> bool {
        self == Verbosity::Silent
    }

    pub fn is_debug(self) -> bool {
        self == Verbosity::Debug
    }

    /// Progress updates are shown unless the job runs silently
    pub fn shows_progress(self) -> bool {
        !self.is_silent()
    }

    /// Step output is only shown to verbose and debug jobs
    pub fn shows_debug(self) -> bool {
        matches!(self, Verbosity::Verbose | Verbosity::Debug)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
struct VerbosityFlags {
    #[serde(skip_serializing_if = "is_false")]
    verbose: bool,
    #[serde(skip_serializing_if = "is_false")]
    silent: bool,
    #[serde(skip_serializing_if = "is_false")]
    debug: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl From<VerbosityFlags> for Verbosity {
    fn from(flags: VerbosityFlags) -> Self {
        // Conflicting flags from a hand-written payload resolve to the most verbose one
        if flags.debug {
            Verbosity::Debug
        } else if flags.verbose {
            Verbosity::Verbose
        } else if flags.silent {
            Verbosity::Silent
        } else {
            Verbosity::Normal
        }
    }
}

impl From<Verbosity> for VerbosityFlags {
    fn from(verbosity: Verbosity) -> Self {
        VerbosityFlags {
            verbose: verbosity.is_verbose(),
            silent: verbosity.is_silent(),
            debug: verbosity.is_debug(),
        }
    }
}

/// Deploy an application from a branch to a list of sites
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub app_name: String,
    pub branch: String,
    pub sites: Vec<String>,
    #[serde(flatten)]
    pub verbosity: Verbosity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_message: Option<ChatMessage>,
}

/// Run setup tasks (all of them when `tasks` is empty) on a list of sites
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupRequest {
    #[serde(default)]
    pub tasks: Vec<String>,
    pub sites: Vec<String>,
    #[serde(flatten)]
    pub verbosity: Verbosity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_message: Option<ChatMessage>,
}

/// Restart an application on a list of sites
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartRequest {
    pub app_name: String,
    pub sites: Vec<String>,
    #[serde(flatten)]
    pub verbosity: Verbosity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_message: Option<ChatMessage>,
}

/// Fetch application logs from a list of sites
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsRequest {
    pub sites: Vec<String>,
    #[serde(flatten)]
    pub verbosity: Verbosity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_message: Option<ChatMessage>,
}

/// Any request, tagged by `kind` when it travels as `currentRequest`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Request {
    Deploy(DeployRequest),
    Setup(SetupRequest),
    Restart(RestartRequest),
    Logs(LogsRequest),
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Deploy(_) => RequestKind::Deploy,
            Request::Setup(_) => RequestKind::Setup,
            Request::Restart(_) => RequestKind::Restart,
            Request::Logs(_) => RequestKind::Logs,
        }
    }

    pub fn sites(&self) -> &[String] {
        match self {
            Request::Deploy(r) => &r.sites,
            Request::Setup(r) => &r.sites,
            Request::Restart(r) => &r.sites,
            Request::Logs(r) => &r.sites,
        }
    }

    pub fn verbosity(&self) -> Verbosity {
        match self {
            Request::Deploy(r) => r.verbosity,
            Request::Setup(r) => r.verbosity,
            Request::Restart(r) => r.verbosity,
            Request::Logs(r) => r.verbosity,
        }
    }

    pub fn from_message(&self) -> Option<&ChatMessage> {
        match self {
            Request::Deploy(r) => r.from_message.as_ref(),
            Request::Setup(r) => r.from_message.as_ref(),
            Request::Restart(r) => r.from_message.as_ref(),
            Request::Logs(r) => r.from_message.as_ref(),
        }
    }

    pub fn branch(&self) -> Option<&str> {
        match self {
            Request::Deploy(r) => Some(&r.branch),
            _ => None,
        }
    }

    pub fn app_name(&self) -> Option<&str> {
        match self {
            Request::Deploy(r) => Some(&r.app_name),
            Request::Restart(r) => Some(&r.app_name),
            _ => None,
        }
    }

    /// Channel replies for this request go to
    pub fn reply_channel(&self) -> Option<&str> {
        self.from_message().map(|m| m.channel.as_str())
    }

    /// User who asked for this request
    pub fn requester(&self) -> Option<&str> {
        self.from_message().map(|m| m.user.as_str())
    }

    /// Attach the chat message this request was parsed from
    pub fn with_origin(mut self, message: ChatMessage) -> Self {
        let slot = match &mut self {
            Request::Deploy(r) => &mut r.from_message,
            Request::Setup(r) => &mut r.from_message,
            Request::Restart(r) => &mut r.from_message,
            Request::Logs(r) => &mut r.from_message,
        };
        *slot = Some(message);
        self
    }

    /// Short human readable description used in logs and replies
    pub fn describe(&self) -> String {
        let sites = self.sites().join(", ");
        match self {
            Request::Deploy(r) => format!("deploy {} from {} to {}", r.app_name, r.branch, sites),
            Request::Setup(r) if r.tasks.is_empty() => format!("setup on {}", sites),
            Request::Setup(r) => format!("setup {} on {}", r.tasks.join(", "), sites),
            Request::Restart(r) => format!("restart {} on {}", r.app_name, sites),
            Request::Logs(_) => format!("logs on {}", sites),
        }
    }
}
