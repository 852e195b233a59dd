//! Shared utilities for integration tests.
//!
//! Review change builders, a handler that forwards deliveries to a channel,
//! and a polling helper for asserting on background consumers.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use product_ratings::bus::{
    BusError, Delivery, EventPublisher, InboundMessage, LogProducer, MessageHandler,
};
use product_ratings::events::{ReviewCreated, ReviewDeleted, ReviewModified, ReviewUpdated};

/// `source` stamped on review changes produced by tests.
pub const PRODUCT_SERVICE: &str = "product/product-service";

pub fn created(product_id: &str, review_id: &str, rating: i64) -> ReviewModified {
    ReviewModified::Created(ReviewCreated {
        product_id: product_id.to_string(),
        review_id: review_id.to_string(),
        new_rating: rating,
    })
}

pub fn updated(product_id: &str, review_id: &str, old: i64, new: i64) -> ReviewModified {
    ReviewModified::Updated(ReviewUpdated {
        product_id: product_id.to_string(),
        review_id: review_id.to_string(),
        new_rating: new,
        old_rating: old,
    })
}

pub fn deleted(product_id: &str, review_id: &str, old: i64) -> ReviewModified {
    ReviewModified::Deleted(ReviewDeleted {
        product_id: product_id.to_string(),
        review_id: review_id.to_string(),
        old_rating: old,
    })
}

/// Publish a review change keyed by its product, as the product service does.
pub async fn publish_change(
    publisher: Arc<dyn EventPublisher>,
    topic: &str,
    change: ReviewModified,
) -> Delivery {
    let producer = LogProducer::new(publisher, PRODUCT_SERVICE);
    let key = change.product_id().to_string();
    let event_type = change.event_type();
    producer
        .send(topic, &key, event_type, change)
        .await
        .expect("publish review change")
}

/// Forwards every delivery to a channel.
pub struct ForwardingHandler {
    tx: mpsc::UnboundedSender<Arc<InboundMessage>>,
}

impl ForwardingHandler {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Arc<InboundMessage>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl MessageHandler for ForwardingHandler {
    fn name(&self) -> &str {
        "forwarding"
    }

    fn handle(&self, message: Arc<InboundMessage>) -> BoxFuture<'static, Result<(), BusError>> {
        let tx = self.tx.clone();
        Box::pin(async move {
            tx.send(message).map_err(|_| BusError::HandlerFailed {
                name: "forwarding".to_string(),
                message: "receiver dropped".to_string(),
            })
        })
    }
}

/// Wait for the next forwarded message.
pub async fn next_message(
    rx: &mut mpsc::UnboundedReceiver<Arc<InboundMessage>>,
    timeout: Duration,
) -> Arc<InboundMessage> {
    tokio::time::timeout(timeout, rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("handler dropped")
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(what: &str, timeout: Duration, check: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
