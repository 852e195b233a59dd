//! Event producer.
//!
//! Wraps payloads in an `EventEnvelope` stamped with this service's
//! `source` and publishes them keyed, so every event for one entity lands
//! on the same partition in order.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::{BusError, Delivery, EventPublisher, Result};
use crate::events::EventEnvelope;

pub struct LogProducer {
    publisher: Arc<dyn EventPublisher>,
    source: String,
}

impl LogProducer {
    pub fn new(publisher: Arc<dyn EventPublisher>, source: impl Into<String>) -> Self {
        Self {
            publisher,
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Publish `data` as an event of `event_type` and wait for the broker
    /// to acknowledge it.
    pub async fn send<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        event_type: &str,
        data: T,
    ) -> Result<Delivery> {
        let envelope = EventEnvelope::new(self.source.clone(), event_type, data);
        let payload = serde_json::to_vec(&envelope)
            .map_err(|e| BusError::Publish(format!("Failed to serialize event: {}", e)))?;

        let delivery = self.publisher.publish(topic, key, payload).await?;

        debug!(
            topic = %topic,
            key = %key,
            event_type = %event_type,
            event_id = %envelope.id,
            partition = delivery.partition,
            offset = delivery.offset,
            "Published event"
        );
        Ok(delivery)
    }
}
