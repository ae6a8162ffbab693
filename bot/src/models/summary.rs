//! Deployment metadata and job summaries

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::request::{Request, RequestKind};

/// Per-host history reported by the deploy engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryItem>,
}

/// One task run on a host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HostSummary {
    /// Every error reported for this host, top level first
    pub fn errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if let Some(error) = &self.error {
            errors.push(error.clone());
        }
        for item in &self.history {
            if let Some(error) = &item.error {
                match &item.task {
                    Some(task) => errors.push(format!("{}: {}", task, error)),
                    None => errors.push(error.clone()),
                }
            }
        }
        errors
    }
}

/// Summary keyed by host, as emitted by the engine
pub type SummaryMap = BTreeMap<String, HostSummary>;

/// One commit of the deployed revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub hash: String,
    pub author: String,
    pub message: String,
    pub committed_at: String,
}

/// Revision metadata of the working copy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevInfo {
    /// `git describe --tags --always`
    pub describe: String,
    #[serde(default)]
    pub commits: Vec<Commit>,
}

/// A single engine run handed out by a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default)]
    pub rev_info: RevInfo,
    pub created_at: DateTime<Utc>,
}

impl Deployment {
    pub fn new(rev_info: RevInfo) -> Self {
        let tag = if rev_info.describe.is_empty() {
            None
        } else {
            Some(rev_info.describe.clone())
        };
        Self {
            id: crate::utils::generate_uuid(),
            tag,
            rev_info,
            created_at: Utc::now(),
        }
    }
}

/// Outcome for one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostOutcome {
    pub host: String,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Final report of a job, relayed to chat as a summary notice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub kind: RequestKind,
    pub worker: String,
    pub deployment_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub sites: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
    pub hosts: Vec<HostOutcome>,
    pub finished_at: DateTime<Utc>,
}

impl JobSummary {
    pub fn from_summary_map(
        request: &Request,
        worker: &str,
        deployment: &Deployment,
        map: &SummaryMap,
    ) -> Self {
        let hosts = map
            .iter()
            .map(|(host, summary)| {
                let errors = summary.errors();
                HostOutcome {
                    host: host.clone(),
                    succeeded: errors.is_empty(),
                    errors,
                }
            })
            .collect();

        Self {
            kind: request.kind(),
            worker: worker.to_string(),
            deployment_id: deployment.id.clone(),
            revision: deployment.tag.clone(),
            branch: request.branch().map(str::to_string),
            sites: request.sites().to_vec(),
            requested_by: request.requester().map(str::to_string),
            hosts,
            finished_at: Utc::now(),
        }
    }

    /// True when no host reported an error
    pub fn succeeded(&self) -> bool {
        self.hosts.iter().all(|h| h.succeeded)
    }

    pub fn failed_hosts(&self) -> impl Iterator<Item = &HostOutcome> {
        self.hosts.iter().filter(|h| !h.succeeded)
    }
}
