//! Terminal chat adapter, for running the bot without a chat platform

use std::future::Future;

use async_trait::async_trait;
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::chat::format::render_plain;
use crate::chat::{ChatClient, ChatPayload};
use crate::errors::BotError;
use crate::models::message::ChatMessage;

pub const CONSOLE_CHANNEL: &str = "console";
pub const CONSOLE_USER: &str = "operator";

#[derive(Debug, Default)]
pub struct ConsoleChat;

impl ConsoleChat {
    pub fn new() -> Self {
        Self
    }

    /// Each non-empty stdin line becomes a chat message from the operator
    pub async fn listen<F>(&self, messages: mpsc::UnboundedSender<ChatMessage>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => return,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let text = line.trim();
                        if text.is_empty() {
                            continue;
                        }
                        if messages
                            .send(ChatMessage::new(CONSOLE_CHANNEL, CONSOLE_USER, text))
                            .is_err()
                        {
                            return;
                        }
                    }
                    Ok(None) => {
                        info!("Console input closed");
                        (&mut shutdown).await;
                        return;
                    }
                    Err(e) => {
                        error!("Failed to read console input: {}", e);
                        return;
                    }
                }
            }
        }
    }
}

/// Console rendering of a payload
pub fn render(payload: &ChatPayload) -> String {
    match payload {
        ChatPayload::Text(text) => text.clone(),
        ChatPayload::Structured { text, notice } => {
            let body = render_plain(notice);
            if text.is_empty() {
                body
            } else {
                format!("{}\n{}", text, body)
            }
        }
    }
}

#[async_trait]
impl ChatClient for ConsoleChat {
    async fn send_message(&self, payload: &ChatPayload, channel: &str) -> Result<(), BotError> {
        println!("{} {}", format!("[{}]", channel).cyan().bold(), render(payload));
        Ok(())
    }
}
