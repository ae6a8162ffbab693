//! Settings file management

use std::env;
use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::bus::channels::Topics;
use crate::bus::mqtt::MqttAddress;
use crate::errors::BotError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::pool::PoolEntry;
use crate::worker::config::WorkerConfig;

pub const DEFAULT_SETTINGS_FILE: &str = "deploybot.json";

/// Bot settings, shared by the master and the workers it forks
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Directory for rolling log files
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default)]
    pub json_logs: bool,

    #[serde(default)]
    pub bus: BusSettings,

    #[serde(default)]
    pub chat: ChatSettings,

    /// Workers, in routing order
    #[serde(default)]
    pub pool: Vec<PoolSettings>,

    /// Configuration pushed to every worker
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl Settings {
    pub async fn load(file: &File) -> Result<Self, BotError> {
        let settings: Settings = file.read_json().await?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), BotError> {
        for (i, entry) in self.pool.iter().enumerate() {
            if entry.name.trim().is_empty() {
                return Err(BotError::ConfigError(format!("pool entry #{} has no name", i)));
            }
            if self.pool[..i].iter().any(|other| other.name == entry.name) {
                return Err(BotError::ConfigError(format!(
                    "worker name `{}` is used twice",
                    entry.name
                )));
            }
            if self.pool[..i]
                .iter()
                .any(|other| other.directory == entry.directory)
            {
                return Err(BotError::ConfigError(format!(
                    "working copy {} is shared by two workers",
                    entry.directory.display()
                )));
            }
        }
        Ok(())
    }

    pub fn pool_entries(&self) -> Vec<PoolEntry> {
        self.pool
            .iter()
            .map(|p| PoolEntry {
                name: p.name.clone(),
                directory: p.directory.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    Mqtt,
    /// Workers run as tasks inside the master process
    Memory,
}

/// Message bus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusSettings {
    #[serde(default)]
    pub kind: BusKind,

    #[serde(default = "default_mqtt_host")]
    pub host: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    #[serde(default)]
    pub tls: bool,

    /// Optional path to a PEM-encoded CA certificate for broker TLS verification.
    /// When absent, the system certificate store is used.
    #[serde(default)]
    pub ca_cert_path: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    /// Environment variable holding the broker password
    #[serde(default)]
    pub password_env: Option<String>,

    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    #[serde(default = "default_broadcast_channel")]
    pub broadcast_channel: String,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_topic_prefix() -> String {
    "deploybot".to_string()
}

fn default_broadcast_channel() -> String {
    "jobs".to_string()
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            kind: BusKind::default(),
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            tls: false,
            ca_cert_path: None,
            username: None,
            password_env: None,
            topic_prefix: default_topic_prefix(),
            broadcast_channel: default_broadcast_channel(),
        }
    }
}

impl BusSettings {
    pub fn topics(&self) -> Topics {
        Topics::new(&self.topic_prefix, &self.broadcast_channel)
    }

    pub fn mqtt_address(&self) -> Result<MqttAddress, BotError> {
        let password = match &self.password_env {
            Some(var) => Some(read_secret(var)?),
            None => None,
        };
        Ok(MqttAddress {
            host: self.host.clone(),
            port: self.port,
            use_tls: self.tls,
            ca_cert_path: self.ca_cert_path.clone(),
            username: self.username.clone(),
            password,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    #[default]
    Slack,
    /// Read commands from stdin, print replies to stdout
    Console,
}

/// Chat platform settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSettings {
    #[serde(default)]
    pub kind: ChatKind,

    #[serde(default = "default_bot_token_env")]
    pub bot_token_env: String,

    #[serde(default = "default_app_token_env")]
    pub app_token_env: String,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

fn default_bot_token_env() -> String {
    "SLACK_BOT_TOKEN".to_string()
}

fn default_app_token_env() -> String {
    "SLACK_APP_TOKEN".to_string()
}

fn default_api_base_url() -> String {
    crate::chat::slack::DEFAULT_API_BASE_URL.to_string()
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            kind: ChatKind::default(),
            bot_token_env: default_bot_token_env(),
            app_token_env: default_app_token_env(),
            api_base_url: default_api_base_url(),
        }
    }
}

/// One worker of the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    pub name: String,
    /// Working copy owned by this worker
    pub directory: PathBuf,
}

/// Read a secret from the environment
pub fn read_secret(var: &str) -> Result<SecretString, BotError> {
    env::var(var)
        .map(SecretString::from)
        .map_err(|_| BotError::ConfigError(format!("environment variable {} is not set", var)))
}
