//! Bus channel names and their MQTT topics

use std::fmt;

use serde::{Deserialize, Serialize};

/// A named bus channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Worker to master
    Master,

    /// Master to every worker
    Broadcast,

    /// Master to one worker
    Worker(String),
}

impl Channel {
    pub fn worker(name: impl Into<String>) -> Self {
        Channel::Worker(name.into())
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Master => f.write_str("master"),
            Channel::Broadcast => f.write_str("broadcast"),
            Channel::Worker(name) => write!(f, "worker/{}", name),
        }
    }
}

/// Maps channels to topics under a common prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
    broadcast: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self::new("deploybot", "jobs")
    }
}

impl Topics {
    pub fn new(prefix: impl Into<String>, broadcast: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().trim_end_matches('/').to_string(),
            broadcast: broadcast.into(),
        }
    }

    /// Topic for a channel
    pub fn topic(&self, channel: &Channel) -> String {
        match channel {
            Channel::Master => format!("{}/master", self.prefix),
            Channel::Broadcast => format!("{}/{}", self.prefix, self.broadcast),
            Channel::Worker(name) => format!("{}/worker/{}", self.prefix, name),
        }
    }

    /// Parse a topic back into a channel
    pub fn parse(&self, topic: &str) -> Option<Channel> {
        let rest = topic.strip_prefix(&self.prefix)?.strip_prefix('/')?;
        if rest == "master" {
            return Some(Channel::Master);
        }
        if rest == self.broadcast {
            return Some(Channel::Broadcast);
        }
        match rest.strip_prefix("worker/") {
            Some(name) if !name.is_empty() && !name.contains('/') => {
                Some(Channel::Worker(name.to_string()))
            }
            _ => None,
        }
    }
}
