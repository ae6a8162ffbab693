//! Slack adapter: Web API for outbound messages, Socket Mode for inbound events

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::{header, Client};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::chat::format::{format_plain_text, task_line};
use crate::chat::{ChatClient, ChatPayload};
use crate::errors::BotError;
use crate::models::message::ChatMessage;
use crate::models::notice::{Notice, TaskStatus};
use crate::models::summary::JobSummary;
use crate::utils::{calc_exp_backoff, CooldownOptions};

pub const DEFAULT_API_BASE_URL: &str = "https://slack.com/api";

/// Slack adapter options
#[derive(Debug, Clone)]
pub struct SlackOptions {
    pub api_base_url: String,

    /// Bot token (`xoxb-`), used for the Web API
    pub bot_token: SecretString,

    /// App-level token (`xapp-`), used to open Socket Mode connections
    pub app_token: SecretString,

    pub reconnect: CooldownOptions,
}

impl SlackOptions {
    pub fn new(bot_token: SecretString, app_token: SecretString) -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            bot_token,
            app_token,
            reconnect: CooldownOptions::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    rest: Value,
}

/// Socket Mode frame
#[derive(Debug, Deserialize)]
struct SocketEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct MessageEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    ts: Option<String>,
}

pub struct SlackClient {
    client: Client,
    options: SlackOptions,
}

impl SlackClient {
    pub fn new(options: SlackOptions) -> Result<Self, BotError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, options })
    }

    async fn call(&self, method: &str, token: &SecretString, body: &Value) -> Result<Value, BotError> {
        let url = format!("{}/{}", self.options.api_base_url.trim_end_matches('/'), method);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            )
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Slack {} failed: {} - {}", method, status, body);
            return Err(BotError::ChatError(format!("{}: {}", status, body)));
        }

        let body: ApiResponse = response.json().await?;
        if !body.ok {
            let reason = body.error.unwrap_or_else(|| "unknown error".to_string());
            return Err(BotError::ChatError(format!("{}: {}", method, reason)));
        }
        Ok(body.rest)
    }

    /// User id of the bot, used to recognise mentions
    pub async fn identify(&self) -> Result<String, BotError> {
        let body = self
            .call("auth.test", &self.options.bot_token, &json!({}))
            .await?;
        let user_id = body
            .get("user_id")
            .and_then(Value::as_str)
            .ok_or_else(|| BotError::ChatError("auth.test returned no user_id".to_string()))?;
        info!(
            "Logged in to Slack as {} ({})",
            body.get("user").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
            user_id
        );
        Ok(user_id.to_string())
    }

    async fn open_connection(&self) -> Result<Url, BotError> {
        let body = self
            .call("apps.connections.open", &self.options.app_token, &json!({}))
            .await?;
        let url = body
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| BotError::ChatError("apps.connections.open returned no url".to_string()))?;
        Url::parse(url).map_err(|e| BotError::ChatError(format!("invalid socket url: {}", e)))
    }

    /// Forward user messages to `messages` until `shutdown` resolves, reconnecting with backoff
    pub async fn listen<F>(&self, messages: mpsc::UnboundedSender<ChatMessage>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut attempt: u32 = 0;

        loop {
            let delay = calc_exp_backoff(&self.options.reconnect, attempt);
            match self.open_connection().await {
                Ok(url) => {
                    info!("Connecting to Slack Socket Mode");
                    match connect_async(url.as_str()).await {
                        Ok((mut ws_stream, _)) => {
                            attempt = 0;
                            loop {
                                tokio::select! {
                                    _ = &mut shutdown => {
                                        info!("Slack listener shutting down...");
                                        let _ = ws_stream.close(None).await;
                                        return;
                                    }
                                    frame = ws_stream.next() => match frame {
                                        Some(Ok(Message::Text(text))) => {
                                            let (ack, reconnect) = handle_frame(&text, &messages);
                                            if let Some(ack) = ack {
                                                if let Err(e) = ws_stream.send(Message::Text(ack.into())).await {
                                                    warn!("Failed to acknowledge Slack event: {}", e);
                                                    break;
                                                }
                                            }
                                            if reconnect {
                                                info!("Slack asked for a reconnect");
                                                break;
                                            }
                                        }
                                        Some(Ok(Message::Close(_))) | None => {
                                            warn!("Slack closed the socket");
                                            break;
                                        }
                                        Some(Err(e)) => {
                                            error!("Slack socket error: {}", e);
                                            break;
                                        }
                                        _ => {}
                                    }
                                }
                            }
                            continue;
                        }
                        Err(e) => error!("Failed to connect to Slack: {}", e),
                    }
                }
                Err(e) => error!("Failed to open Slack connection: {}", e),
            }

            attempt = attempt.saturating_add(1);
            warn!("Retrying Slack connection in {:?}", delay);
            tokio::select! {
                _ = &mut shutdown => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[async_trait]
impl ChatClient for SlackClient {
    async fn send_message(&self, payload: &ChatPayload, channel: &str) -> Result<(), BotError> {
        let body = match payload {
            ChatPayload::Text(text) => json!({ "channel": channel, "text": text, "as_user": true }),
            ChatPayload::Structured { text, notice } => json!({
                "channel": channel,
                "text": text,
                "as_user": true,
                "attachments": attachments(notice),
            }),
        };
        self.call("chat.postMessage", &self.options.bot_token, &body)
            .await?;
        Ok(())
    }
}

/// Handle one Socket Mode frame, returning the ack to send and whether to reconnect
fn handle_frame(text: &str, messages: &mpsc::UnboundedSender<ChatMessage>) -> (Option<String>, bool) {
    let envelope: SocketEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!("Ignoring Slack frame: {}", e);
            return (None, false);
        }
    };

    let ack = envelope
        .envelope_id
        .as_ref()
        .map(|id| json!({ "envelope_id": id }).to_string());

    match envelope.kind.as_str() {
        "hello" => info!("Slack socket ready"),
        "disconnect" => return (ack, true),
        "events_api" => {
            if let Some(message) = envelope
                .payload
                .as_ref()
                .and_then(|p| p.get("event"))
                .and_then(|event| to_chat_message(event.clone()))
            {
                let _ = messages.send(message);
            }
        }
        other => debug!("Unhandled Slack frame type: {}", other),
    }
    (ack, false)
}

/// User authored messages only; bot messages and edits are skipped
fn to_chat_message(event: Value) -> Option<ChatMessage> {
    let event: MessageEvent = serde_json::from_value(event).ok()?;
    if event.kind != "message" || event.bot_id.is_some() || event.subtype.is_some() {
        return None;
    }
    Some(ChatMessage {
        channel: event.channel?,
        user: event.user?,
        text: event.text?,
        ts: event.ts,
    })
}

/// Slack attachments for a notice
pub fn attachments(notice: &Notice) -> Value {
    match notice {
        Notice::Text { text } => json!([{ "text": text, "fallback": text, "mrkdwn_in": ["text"] }]),
        Notice::Output { title, output } => json!([{
            "pretext": title,
            "fallback": title,
            "text": format_plain_text(output.trim()),
            "color": "#aaa",
            "mrkdwn_in": ["text", "pretext"]
        }]),
        Notice::Task { task, status } => {
            let line = task_line(task, *status);
            let color = match status {
                TaskStatus::Started => "#ccc",
                TaskStatus::Succeeded => "#36a64f",
                TaskStatus::Failed => "danger",
            };
            json!([{ "text": line, "fallback": line, "color": color, "mrkdwn_in": ["text", "pretext"] }])
        }
        Notice::Summary { summary } => summary_attachments(summary),
    }
}

fn summary_attachments(summary: &JobSummary) -> Value {
    let mut attachments = Vec::new();

    if let Some(revision) = &summary.revision {
        attachments.push(json!({
            "title": "Application Revision",
            "fallback": "Application Revision",
            "color": "#cccccc",
            "fields": [{ "title": "Describe", "value": revision, "short": true }],
            "mrkdwn_in": ["text", "pretext", "fields"]
        }));
    }

    let mut fields = vec![json!({ "title": "Sites", "value": summary.sites.join(", "), "short": true })];
    if let Some(branch) = &summary.branch {
        fields.push(json!({ "title": "Branch", "value": branch, "short": true }));
    }
    if let Some(user) = &summary.requested_by {
        fields.push(json!({ "title": "By User", "value": format!("<@{}>", user), "short": true }));
    }
    attachments.push(json!({
        "title": "Operation Request",
        "fallback": "Operation Request",
        "color": "#cccccc",
        "fields": fields,
        "mrkdwn_in": ["text", "pretext", "fields"]
    }));

    for host in &summary.hosts {
        if host.succeeded {
            let text = format!("The operation on host {} has been successfully performed.", host.host);
            attachments.push(json!({
                "text": text,
                "fallback": text,
                "color": "#36a64f",
                "mrkdwn_in": ["text", "pretext"]
            }));
        } else {
            let pretext = format!("The operation on host {} has failed.", host.host);
            for error in &host.errors {
                attachments.push(json!({
                    "pretext": pretext,
                    "fallback": pretext,
                    "text": format_plain_text(error.trim()),
                    "color": "red",
                    "mrkdwn_in": ["text", "pretext"]
                }));
            }
        }
    }

    Value::Array(attachments)
}
