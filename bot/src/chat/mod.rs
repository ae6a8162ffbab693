//! Chat platform adapters

pub mod console;
pub mod format;
pub mod slack;

use async_trait::async_trait;

use crate::errors::BotError;
use crate::models::notice::Notice;

/// Something to post in a chat channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatPayload {
    /// Plain message text
    Text(String),

    /// Structured notice, with a text line shown above it
    Structured { text: String, notice: Notice },
}

impl ChatPayload {
    pub fn text(text: impl Into<String>) -> Self {
        ChatPayload::Text(text.into())
    }

    /// Text line of the payload
    pub fn headline(&self) -> &str {
        match self {
            ChatPayload::Text(text) => text,
            ChatPayload::Structured { text, .. } => text,
        }
    }
}

/// Outbound side of a chat platform
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn send_message(&self, payload: &ChatPayload, channel: &str) -> Result<(), BotError>;
}
