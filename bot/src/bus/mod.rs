pub mod channels;
pub mod envelope;
pub mod memory;
pub mod mqtt;

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::bus::channels::Channel;
use crate::bus::envelope::Envelope;
use crate::errors::BotError;

/// A raw message received on a channel
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub channel: Channel,
    pub payload: Vec<u8>,
}

impl BusMessage {
    /// Decode the payload as an envelope
    pub fn envelope(&self) -> Result<Envelope, BotError> {
        Envelope::decode(&self.payload)
    }
}

/// Stream of messages for the channels a subscriber asked for
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<BusMessage>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<BusMessage>) -> Self {
        Self { rx }
    }

    /// Next message, `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<BusMessage> {
        self.rx.try_recv().ok()
    }
}

struct Subscriber {
    channels: Vec<Channel>,
    tx: mpsc::UnboundedSender<BusMessage>,
}

/// Subscriber registry shared by the transports
#[derive(Default)]
pub struct Fanout {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for a set of channels
    pub fn add(&self, channels: &[Channel]) -> Result<Subscription, BotError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .map_err(|e| BotError::BusError(format!("subscriber list poisoned: {}", e)))?
            .push(Subscriber {
                channels: channels.to_vec(),
                tx,
            });
        Ok(Subscription::new(rx))
    }

    /// Hand a payload to every subscriber of `channel`, returning how many got it
    pub fn deliver(&self, channel: &Channel, payload: &[u8]) -> Result<usize, BotError> {
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|e| BotError::BusError(format!("subscriber list poisoned: {}", e)))?;

        // Drop subscriptions whose receiver is gone
        subscribers.retain(|s| !s.tx.is_closed());

        let mut delivered = 0;
        for subscriber in subscribers.iter().filter(|s| s.channels.contains(channel)) {
            let message = BusMessage {
                channel: channel.clone(),
                payload: payload.to_vec(),
            };
            if subscriber.tx.send(message).is_ok() {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Number of live subscriptions
    pub fn len(&self) -> usize {
        self.subscribers
            .lock()
            .map(|subs| subs.iter().filter(|s| !s.tx.is_closed()).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Publish/subscribe transport shared by the master and the workers.
///
/// Publishing is fire-and-forget. Messages on one channel arrive in the order
/// they were published.
#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, channel: &Channel, envelope: &Envelope) -> Result<(), BotError>;

    async fn subscribe(&self, channels: &[Channel]) -> Result<Subscription, BotError>;
}
