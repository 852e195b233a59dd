//! Partitioned log messaging.
//!
//! This module contains:
//! - `ConsumerBackend` / `ConsumerSession` / `OffsetCommitter`: the broker
//!   seam the consumer drives
//! - `MessageHandler` trait: processing of one inbound message
//! - `EventPublisher` trait: keyed publish with delivery acknowledgement
//! - `LogConsumer` and `LogProducer`, built on those seams
//! - Implementations: in-memory channel broker, Kafka

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;

pub mod channel;
pub mod consumer;
pub mod producer;

#[cfg(feature = "kafka")]
pub mod kafka;

pub use channel::ChannelBroker;
pub use consumer::{ConsumerOptions, LogConsumer};
pub use producer::LogProducer;

#[cfg(feature = "kafka")]
pub use kafka::{KafkaConsumerBackend, KafkaPublisher, ProducerPool};

// ============================================================================
// Traits
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Consume failed: {0}")]
    Consume(String),

    #[error("Offset commit failed: {0}")]
    Commit(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Handler '{name}' failed: {message}")]
    HandlerFailed { name: String, message: String },

    #[error("Consumer already subscribed to {0}")]
    AlreadySubscribed(String),
}

/// A topic and one of its partitions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.topic, self.partition)
    }
}

/// One message read from the log.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    /// Broker timestamp in milliseconds since the epoch, when known.
    pub timestamp: Option<i64>,
}

impl InboundMessage {
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }

    /// The offset to commit once this message is processed.
    pub fn next_offset(&self) -> i64 {
        self.offset + 1
    }

    pub fn key_str(&self) -> Option<&str> {
        self.key.as_deref().and_then(|k| std::str::from_utf8(k).ok())
    }
}

/// Handler for processing messages from the log.
///
/// Returning an error leaves the message uncommitted; it will be delivered
/// again after the consumer recovers.
pub trait MessageHandler: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Process one message.
    fn handle(&self, message: Arc<InboundMessage>) -> BoxFuture<'static, Result<()>>;
}

/// Records processing progress for a consumer group.
#[async_trait]
pub trait OffsetCommitter: Send + Sync {
    /// Commit `next_offset` (the offset of the next message to read).
    async fn commit(&self, partition: &TopicPartition, next_offset: i64) -> Result<()>;
}

/// A live connection to the broker.
#[async_trait]
pub trait ConsumerSession: Send {
    /// Register interest in `topic`. Reading starts from the committed
    /// offset, or from the reset position chosen at connect time.
    async fn subscribe(&mut self, topic: &str) -> Result<()>;

    /// Next message. `Some(Err)` means the session crashed; `None` means it
    /// ended.
    async fn recv(&mut self) -> Option<Result<InboundMessage>>;

    /// Stop fetching `partition` until `resume`. Messages already fetched
    /// may still arrive.
    fn pause(&mut self, partition: &TopicPartition) -> Result<()>;

    fn resume(&mut self, partition: &TopicPartition) -> Result<()>;

    fn committer(&self) -> Arc<dyn OffsetCommitter>;

    async fn close(&mut self);
}

/// Opens sessions against a broker.
///
/// Implementations:
/// - `ChannelBroker`: in-memory, with fault injection
/// - `KafkaConsumerBackend`: rdkafka `StreamConsumer`
#[async_trait]
pub trait ConsumerBackend: Send + Sync {
    /// Connect as a member of the configured group. `from_beginning` picks
    /// the starting point for partitions with no committed offset.
    async fn connect(&self, from_beginning: bool) -> Result<Box<dyn ConsumerSession>>;
}

/// Where a published message landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

/// Keyed publish to the log.
///
/// Messages with the same key always land on the same partition.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish and wait for the broker acknowledgement.
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<Delivery>;
}

// ============================================================================
// Consumer state
// ============================================================================

/// Lifecycle of a `LogConsumer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Connecting,
    Connected,
    Subscribing,
    Consuming,
    Crashed,
    Reconnecting,
    ShutDown,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsumerState::Disconnected => "disconnected",
            ConsumerState::Connecting => "connecting",
            ConsumerState::Connected => "connected",
            ConsumerState::Subscribing => "subscribing",
            ConsumerState::Consuming => "consuming",
            ConsumerState::Crashed => "crashed",
            ConsumerState::Reconnecting => "reconnecting",
            ConsumerState::ShutDown => "shut_down",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Kafka-specific configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,
    /// Consumer group ID.
    pub group_id: String,
    /// Client ID reported to the brokers.
    pub client_id: Option<String>,
    /// Topic carrying review changes.
    pub review_modified_topic: String,
    /// Topic receiving recomputed averages.
    pub rating_calculated_topic: String,
    /// Start from the earliest offset when the group has no commit.
    pub from_beginning: bool,
    /// Partitions processed at the same time.
    pub partitions_consumed_concurrently: usize,
    /// Fixed delay between reconnect attempts.
    pub reconnect_backoff_ms: u64,
    /// Producer delivery timeout.
    pub message_timeout_ms: u64,
    /// `source` attribute of produced events.
    pub source: String,
    /// SASL username (optional, for authenticated clusters).
    pub sasl_username: Option<String>,
    /// SASL password (optional, for authenticated clusters).
    pub sasl_password: Option<String>,
    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512).
    pub sasl_mechanism: Option<String>,
    /// Security protocol (PLAINTEXT, SSL, SASL_PLAINTEXT, SASL_SSL).
    pub security_protocol: Option<String>,
    /// SSL CA certificate path (for SSL connections).
    pub ssl_ca_location: Option<String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            group_id: "review-processing-service".to_string(),
            client_id: None,
            review_modified_topic: "review-modified".to_string(),
            rating_calculated_topic: "rating-calculated".to_string(),
            from_beginning: false,
            partitions_consumed_concurrently: 10,
            reconnect_backoff_ms: 5000,
            message_timeout_ms: 5000,
            source: "product/review-processing-service".to_string(),
            sasl_username: None,
            sasl_password: None,
            sasl_mechanism: None,
            security_protocol: None,
            ssl_ca_location: None,
        }
    }
}

impl KafkaConfig {
    /// Add SASL authentication.
    pub fn with_sasl(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        mechanism: impl Into<String>,
    ) -> Self {
        self.sasl_username = Some(username.into());
        self.sasl_password = Some(password.into());
        self.sasl_mechanism = Some(mechanism.into());
        self.security_protocol = Some("SASL_SSL".to_string());
        self
    }

    /// Set security protocol.
    pub fn with_security_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.security_protocol = Some(protocol.into());
        self
    }

    /// Set SSL CA certificate location.
    pub fn with_ssl_ca(mut self, ca_location: impl Into<String>) -> Self {
        self.ssl_ca_location = Some(ca_location.into());
        self
    }

    /// Broker list, trimmed and sorted. Two configs listing the same brokers
    /// in a different order share one producer.
    pub fn brokers(&self) -> Vec<String> {
        let mut brokers: Vec<String> = self
            .bootstrap_servers
            .split(',')
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string)
            .collect();
        brokers.sort();
        brokers.dedup();
        brokers
    }
}
