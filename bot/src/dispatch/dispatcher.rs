//! Chat messages in, jobs out; worker events back to chat

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::bus::envelope::Envelope;
use crate::chat::format::{format_plain_text, format_reply, mention};
use crate::chat::{ChatClient, ChatPayload};
use crate::errors::BotError;
use crate::models::message::ChatMessage;
use crate::models::notice::Notice;
use crate::models::request::Request;
use crate::parse::Statements;
use crate::pool::supervisor::WorkerExit;
use crate::pool::WorkerPool;
use crate::worker::config::WorkerConfig;

pub const NOT_UNDERSTOOD: &str = "Sorry, I don't understand.";
pub const ALL_BUSY: &str = "Sorry, all the workers are busy...";

static MENTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<@(\w+)>:?\s*").expect("valid regex"));

pub struct Dispatcher {
    statements: Statements,
    pool: Arc<WorkerPool>,
    chat: Arc<dyn ChatClient>,
    worker_config: RwLock<WorkerConfig>,

    /// Messages must start with a mention of this user; every message is
    /// addressed to the bot when unset
    bot_user_id: Option<String>,
}

impl Dispatcher {
    pub fn new(
        statements: Statements,
        pool: Arc<WorkerPool>,
        chat: Arc<dyn ChatClient>,
        worker_config: WorkerConfig,
        bot_user_id: Option<String>,
    ) -> Self {
        Self {
            statements,
            pool,
            chat,
            worker_config: RwLock::new(worker_config),
            bot_user_id,
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// The sentence addressed to the bot, without the leading mention
    pub fn addressed_text<'a>(&self, text: &'a str) -> Option<&'a str> {
        let Some(bot_user_id) = &self.bot_user_id else {
            return Some(text.trim());
        };
        let captures = MENTION_RE.captures(text)?;
        if &captures[1] != bot_user_id.as_str() {
            return None;
        }
        Some(text[captures.get(0)?.end()..].trim())
    }

    /// Handle one inbound chat message
    pub async fn handle_chat_message(&self, message: ChatMessage) -> Result<(), BotError> {
        let Some(sentence) = self.addressed_text(&message.text) else {
            return Ok(());
        };

        let request = match self.statements.parse(sentence) {
            Ok(Some(request)) => request,
            Ok(None) => {
                debug!("No statement matches {:?}", sentence);
                return self.reply(&message, NOT_UNDERSTOOD).await;
            }
            Err(e) => {
                warn!("Rejected {:?}: {}", sentence, e);
                return self.reply(&message, &e.to_string()).await;
            }
        };

        let request = request.with_origin(message.clone());
        match self.pool.dispatch(request).await {
            Ok(name) => {
                info!("Job sent to worker {}", name);
                Ok(())
            }
            Err(BotError::NoWorkerAvailable) => self.reply(&message, ALL_BUSY).await,
            Err(e) => {
                error!("Failed to dispatch job: {}", e);
                self.reply(&message, &format!("Error: {}", e)).await
            }
        }
    }

    /// Handle one event a worker published on the master channel
    pub async fn handle_master_message(&self, envelope: Envelope) -> Result<(), BotError> {
        let assigned = self.pool.observe(&envelope);

        match envelope {
            Envelope::Connect { name } => {
                let config = self.worker_config.read().await.clone();
                self.pool.send_config(&name, &config).await
            }
            Envelope::Start { .. } => Ok(()),
            Envelope::Ready {
                name,
                current_request,
            } => {
                let Some(request) = current_request.or(assigned) else {
                    return Ok(());
                };
                let text = format!("The deploy worker {} is ready.", name);
                self.notify(&request, ChatPayload::Text(mention(request.requester(), &text)))
                    .await
            }
            Envelope::Progress {
                message,
                current_request,
                ..
            }
            | Envelope::Debug {
                message,
                current_request,
                ..
            } => match current_request {
                Some(request) => {
                    let payload = notice_payload(&request, message);
                    self.notify(&request, payload).await
                }
                None => Ok(()),
            },
            Envelope::Error {
                name,
                message,
                current_request,
            } => {
                warn!("Worker {} reported: {}", name, message);
                match current_request {
                    Some(request) => {
                        let text = mention(request.requester(), &format_plain_text(&message));
                        self.notify(&request, ChatPayload::Text(text)).await
                    }
                    None => Ok(()),
                }
            }
            other => {
                warn!("Ignoring `{}` message on the master channel", other.type_name());
                Ok(())
            }
        }
    }

    /// Tell the requester of the last job routed to a dead worker
    pub async fn handle_worker_exit(&self, exit: WorkerExit) -> Result<(), BotError> {
        let Some(request) = exit.request else {
            return Ok(());
        };
        let text = format!(
            "The deploy worker {} stopped ({}) while running {}.",
            exit.name,
            exit.status,
            request.describe()
        );
        self.notify(&request, ChatPayload::Text(mention(request.requester(), &text)))
            .await
    }

    /// Replace the worker configuration and push it to every worker
    pub async fn reload_config(&self, config: WorkerConfig) -> Result<(), BotError> {
        *self.worker_config.write().await = config.clone();
        info!("Broadcasting reloaded worker configuration");
        self.pool.broadcast_config(&config).await
    }

    async fn reply(&self, message: &ChatMessage, text: &str) -> Result<(), BotError> {
        let payload = ChatPayload::Text(format_reply(&message.user, text));
        self.chat.send_message(&payload, &message.channel).await
    }

    async fn notify(&self, request: &Request, payload: ChatPayload) -> Result<(), BotError> {
        match request.reply_channel() {
            Some(channel) => self.chat.send_message(&payload, channel).await,
            None => Ok(()),
        }
    }
}

/// Chat payload for a relayed notice
fn notice_payload(request: &Request, notice: Notice) -> ChatPayload {
    match notice {
        Notice::Text { text } => ChatPayload::Text(mention(request.requester(), &text)),
        Notice::Summary { .. } => ChatPayload::Structured {
            text: mention(
                request.requester(),
                &format!("Finished {}.", request.describe()),
            ),
            notice,
        },
        notice => ChatPayload::Structured {
            text: request
                .requester()
                .map(|user| format!("<@{}>:", user))
                .unwrap_or_default(),
            notice,
        },
    }
}
