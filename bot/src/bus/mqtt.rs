//! MQTT bus transport

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::bus::channels::{Channel, Topics};
use crate::bus::envelope::Envelope;
use crate::bus::{Bus, Fanout, Subscription};
use crate::errors::BotError;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Jobs must never be delivered twice
const QOS: QoS = QoS::ExactlyOnce;

/// MQTT broker address
#[derive(Debug, Clone)]
pub struct MqttAddress {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    /// Optional path to a PEM-encoded CA certificate for broker verification.
    /// When `None` and `use_tls` is `true`, the system certificate store is used.
    pub ca_cert_path: Option<String>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
}

impl Default for MqttAddress {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            use_tls: false,
            ca_cert_path: None,
            username: None,
            password: None,
        }
    }
}

/// Publishing half of the MQTT bus
pub struct MqttBus {
    client: AsyncClient,
    topics: Topics,
    fanout: Arc<Fanout>,
    subscribed: Arc<Mutex<BTreeSet<String>>>,
}

/// Connection driver; must be polled with [`MqttEventLoop::run`] for the bus to work
pub struct MqttEventLoop {
    client: AsyncClient,
    eventloop: EventLoop,
    topics: Topics,
    fanout: Arc<Fanout>,
    subscribed: Arc<Mutex<BTreeSet<String>>>,
    cooldown: CooldownOptions,
}

impl MqttBus {
    /// Create the bus and its event loop; `client_id` must be unique per process
    pub fn new(
        address: &MqttAddress,
        client_id: &str,
        topics: Topics,
    ) -> Result<(Self, MqttEventLoop), BotError> {
        if address.host.is_empty() {
            return Err(BotError::BusError("MQTT host is not configured".to_string()));
        }

        let mut options = MqttOptions::new(client_id, &address.host, address.port);
        options.set_keep_alive(Duration::from_secs(30));
        // Keep the session so subscriptions survive reconnects
        options.set_clean_session(false);
        if let (Some(username), Some(password)) = (&address.username, &address.password) {
            options.set_credentials(username, password.expose_secret());
        }

        if address.use_tls {
            use rumqttc::{TlsConfiguration, Transport};
            use rustls::ClientConfig;

            let mut root_cert_store = rustls::RootCertStore::empty();

            if let Some(ref ca_path) = address.ca_cert_path {
                let ca_pem = std::fs::read(ca_path).map_err(|e| {
                    BotError::BusError(format!("Failed to read CA cert {ca_path}: {e}"))
                })?;
                let mut cursor = std::io::Cursor::new(ca_pem);
                for cert in rustls_pemfile::certs(&mut cursor).flatten() {
                    let _ = root_cert_store.add(cert);
                }
            } else {
                for cert in rustls_native_certs::load_native_certs().unwrap_or_default() {
                    let _ = root_cert_store.add(cert);
                }
            }

            let client_config = ClientConfig::builder()
                .with_root_certificates(root_cert_store)
                .with_no_client_auth();

            options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
                Arc::new(client_config),
            )));
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        let fanout = Arc::new(Fanout::new());
        let subscribed = Arc::new(Mutex::new(BTreeSet::new()));

        let bus = Self {
            client: client.clone(),
            topics: topics.clone(),
            fanout: fanout.clone(),
            subscribed: subscribed.clone(),
        };
        let driver = MqttEventLoop {
            client,
            eventloop,
            topics,
            fanout,
            subscribed,
            cooldown: CooldownOptions::default(),
        };
        Ok((bus, driver))
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Disconnect from the broker
    pub async fn disconnect(&self) -> Result<(), BotError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| BotError::BusError(e.to_string()))?;
        info!("MQTT disconnected");
        Ok(())
    }
}

#[async_trait]
impl Bus for MqttBus {
    async fn publish(&self, channel: &Channel, envelope: &Envelope) -> Result<(), BotError> {
        let topic = self.topics.topic(channel);
        let payload = envelope.encode()?;

        self.client
            .publish(&topic, QOS, false, payload)
            .await
            .map_err(|e| BotError::BusError(e.to_string()))?;

        debug!("Published {} to: {}", envelope.type_name(), topic);
        Ok(())
    }

    async fn subscribe(&self, channels: &[Channel]) -> Result<Subscription, BotError> {
        let subscription = self.fanout.add(channels)?;
        for channel in channels {
            let topic = self.topics.topic(channel);
            self.client
                .subscribe(&topic, QOS)
                .await
                .map_err(|e| BotError::BusError(e.to_string()))?;
            if let Ok(mut subscribed) = self.subscribed.lock() {
                subscribed.insert(topic.clone());
            }
            info!("Subscribed to: {}", topic);
        }
        Ok(subscription)
    }
}

impl MqttEventLoop {
    /// Drive the connection until `shutdown` resolves, reconnecting with backoff
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut attempt: u32 = 0;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    let _ = self.client.try_disconnect();
                    info!("MQTT event loop stopped");
                    return;
                }
                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        match self.topics.parse(&publish.topic) {
                            Some(channel) => {
                                if let Err(e) = self.fanout.deliver(&channel, &publish.payload) {
                                    warn!("Dropping message on {}: {}", publish.topic, e);
                                }
                            }
                            None => debug!("Ignoring message on foreign topic: {}", publish.topic),
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("MQTT connected");
                        attempt = 0;
                        self.resubscribe();
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        debug!("Subscription acknowledged");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let delay = calc_exp_backoff(&self.cooldown, attempt);
                        attempt = attempt.saturating_add(1);
                        warn!("MQTT poll error: {}, reconnecting in {:?}", e, delay);
                        tokio::select! {
                            _ = &mut shutdown => return,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }
    }

    fn resubscribe(&self) {
        let topics: Vec<String> = match self.subscribed.lock() {
            Ok(subscribed) => subscribed.iter().cloned().collect(),
            Err(_) => return,
        };
        for topic in topics {
            if let Err(e) = self.client.try_subscribe(&topic, QOS) {
                warn!("Failed to resubscribe to {}: {}", topic, e);
            }
        }
    }
}
