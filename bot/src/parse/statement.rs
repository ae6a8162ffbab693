//! Statements turn chat sentences into typed requests

use std::collections::HashMap;

use crate::errors::BotError;
use crate::models::request::{
    DeployRequest, LogsRequest, Request, RequestKind, RestartRequest, SetupRequest, Verbosity,
};
use crate::parse::pattern::{GroupSpec, Pattern, PatternFlags};
use crate::utils::split_list;

const APP_NAME: &str = r"[a-zA-Z0-9\-]+";
const BRANCH: &str = r"[a-zA-Z0-9_/.\-]+";
const NAME_LIST: &str = r"[a-zA-Z0-9_\-]+(?:\s*,\s*[a-zA-Z0-9_\-]+)*";
const TASK_LIST: &str = r"[a-zA-Z0-9_:\-]+(?:\s*,\s*[a-zA-Z0-9_:\-]+)*";
const LOGGING: &str = "verbosely|silently|debugly";

/// One request kind and the patterns that recognise it, tried in order
#[derive(Debug, Clone)]
pub struct Statement {
    kind: RequestKind,
    patterns: Vec<Pattern>,
}

impl Statement {
    pub fn new(kind: RequestKind, patterns: Vec<Pattern>) -> Self {
        Self { kind, patterns }
    }

    /// Built-in statement for a request kind
    pub fn builtin(kind: RequestKind) -> Result<Self, BotError> {
        let flags = PatternFlags::case_insensitive();
        let pattern = match kind {
            RequestKind::Deploy => Pattern::compile(
                "(?:please )?deploy :appName from :branch branch (?:to|on) :sites(?: (?:servers?|sites?))?(?: :logging)?",
                flags,
                vec![
                    GroupSpec::new("appName", APP_NAME),
                    GroupSpec::new("branch", BRANCH),
                    GroupSpec::new("sites", NAME_LIST),
                    GroupSpec::new("logging", LOGGING),
                ],
            )?,
            RequestKind::Setup => Pattern::compile(
                "(?:please )?setup(?: :tasks)? (?:to|on) :sites(?: (?:servers?|sites?))?(?: :logging)?",
                flags,
                vec![
                    GroupSpec::new("tasks", TASK_LIST),
                    GroupSpec::new("sites", NAME_LIST),
                    GroupSpec::new("logging", LOGGING),
                ],
            )?,
            RequestKind::Restart => Pattern::compile(
                "(?:please )?restart :appName (?:to|on) :sites(?: (?:servers?|sites?))?(?: :logging)?",
                flags,
                vec![
                    GroupSpec::new("appName", APP_NAME),
                    GroupSpec::new("sites", NAME_LIST),
                    GroupSpec::new("logging", LOGGING),
                ],
            )?,
            RequestKind::Logs => Pattern::compile(
                "show me the logs (?:to|on|from|of) :sites(?: (?:servers?|sites?))?",
                flags,
                vec![GroupSpec::new("sites", NAME_LIST)],
            )?,
        };
        Ok(Self::new(kind, vec![pattern]))
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    /// Whether any pattern matches the input
    pub fn test(&self, input: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(input))
    }

    /// Parse a sentence into a request.
    ///
    /// `Ok(None)` when no pattern matches. An unknown logging token or a
    /// match missing a required field is an error.
    pub fn parse(&self, input: &str) -> Result<Option<Request>, BotError> {
        for pattern in &self.patterns {
            let Some(captures) = pattern.captures(input) else {
                continue;
            };
            if let Some(request) = self.build(captures)? {
                return Ok(Some(request));
            }
        }
        Ok(None)
    }

    fn build(&self, mut captures: HashMap<String, String>) -> Result<Option<Request>, BotError> {
        let sites = captures
            .remove("sites")
            .map(|s| split_list(&s))
            .unwrap_or_default();
        if sites.is_empty() {
            return Ok(None);
        }

        let verbosity = match captures.remove("logging") {
            None => Verbosity::Normal,
            Some(token) => Verbosity::from_token(&token).ok_or_else(|| {
                BotError::ParseError(format!("unknown logging option `{}`", token))
            })?,
        };

        let request = match self.kind {
            RequestKind::Deploy => Request::Deploy(DeployRequest {
                app_name: required(&mut captures, "appName")?,
                branch: required(&mut captures, "branch")?,
                sites,
                verbosity,
                from_message: None,
            }),
            RequestKind::Setup => Request::Setup(SetupRequest {
                tasks: captures
                    .remove("tasks")
                    .map(|t| split_list(&t))
                    .unwrap_or_default(),
                sites,
                verbosity,
                from_message: None,
            }),
            RequestKind::Restart => Request::Restart(RestartRequest {
                app_name: required(&mut captures, "appName")?,
                sites,
                verbosity,
                from_message: None,
            }),
            RequestKind::Logs => Request::Logs(LogsRequest {
                sites,
                verbosity,
                from_message: None,
            }),
        };
        Ok(Some(request))
    }
}

fn required(captures: &mut HashMap<String, String>, name: &str) -> Result<String, BotError> {
    captures
        .remove(name)
        .ok_or_else(|| BotError::ParseError(format!("missing `{}` in sentence", name)))
}
