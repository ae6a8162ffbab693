//! In-process bus used in standalone mode and by the tests

use async_trait::async_trait;
use tracing::trace;

use crate::bus::channels::Channel;
use crate::bus::envelope::Envelope;
use crate::bus::{Bus, Fanout, Subscription};
use crate::errors::BotError;

/// Fans every published message out to the subscribers of its channel
#[derive(Default)]
pub struct MemoryBus {
    fanout: Fanout,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.fanout.len()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, channel: &Channel, envelope: &Envelope) -> Result<(), BotError> {
        let payload = envelope.encode()?;
        let delivered = self.fanout.deliver(channel, &payload)?;
        trace!(
            "Published {} on {} to {} subscriber(s)",
            envelope.type_name(),
            channel,
            delivered
        );
        Ok(())
    }

    async fn subscribe(&self, channels: &[Channel]) -> Result<Subscription, BotError> {
        self.fanout.add(channels)
    }
}
