//! Chat message references

use serde::{Deserialize, Serialize};

/// The chat message a request originated from.
///
/// Only used to route replies back to the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Channel id the message was posted in
    pub channel: String,

    /// User id of the author
    pub user: String,

    /// Raw message text
    pub text: String,

    /// Platform timestamp, when the platform provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
}

impl ChatMessage {
    pub fn new(channel: impl Into<String>, user: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            user: user.into(),
            text: text.into(),
            ts: None,
        }
    }
}
