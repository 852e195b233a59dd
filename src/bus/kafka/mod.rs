//! Kafka backend.
//!
//! - `KafkaConsumerBackend`: one `StreamConsumer` per session, manual
//!   commits only (`enable.auto.commit=false`). Commits are sent
//!   asynchronously; a commit the broker rejects is reported by the
//!   consumer context and ends the session on its next `recv`
//! - `KafkaPublisher`: `FutureProducer` with `acks=all` and idempotence;
//!   keys are hashed with murmur2 so partitioning matches Java clients
//! - `ProducerPool`: one producer per distinct broker set

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::client::ClientContext;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    BusError, ConsumerBackend, ConsumerSession, Delivery, EventPublisher, InboundMessage,
    KafkaConfig, OffsetCommitter, Result, TopicPartition,
};
use crate::utils::pool::ConnectionPool;

impl KafkaConfig {
    /// Build a ClientConfig for producers.
    pub fn build_producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", self.brokers().join(","));
        config.set("message.timeout.ms", self.message_timeout_ms.to_string());
        config.set("acks", "all");
        config.set("enable.idempotence", "true");
        config.set("partitioner", "murmur2_random");

        self.apply_client_id(&mut config);
        self.apply_security_config(&mut config);
        config
    }

    /// Build a ClientConfig for consumers.
    pub fn build_consumer_config(&self, from_beginning: bool) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", self.brokers().join(","));
        config.set("group.id", &self.group_id);
        config.set("enable.auto.commit", "false");
        config.set("enable.partition.eof", "false");
        config.set(
            "auto.offset.reset",
            if from_beginning { "earliest" } else { "latest" },
        );

        self.apply_client_id(&mut config);
        self.apply_security_config(&mut config);
        config
    }

    fn apply_client_id(&self, config: &mut ClientConfig) {
        if let Some(ref client_id) = self.client_id {
            config.set("client.id", client_id);
        }
    }

    /// Apply security settings to a ClientConfig.
    fn apply_security_config(&self, config: &mut ClientConfig) {
        if let Some(ref protocol) = self.security_protocol {
            config.set("security.protocol", protocol);
        }

        if let Some(ref mechanism) = self.sasl_mechanism {
            config.set("sasl.mechanism", mechanism);
        }

        if let Some(ref username) = self.sasl_username {
            config.set("sasl.username", username);
        }

        if let Some(ref password) = self.sasl_password {
            config.set("sasl.password", password);
        }

        if let Some(ref ca_location) = self.ssl_ca_location {
            config.set("ssl.ca.location", ca_location);
        }
    }
}

// ============================================================================
// Consumer
// ============================================================================

/// Opens Kafka consumer sessions for the configured group.
pub struct KafkaConsumerBackend {
    config: KafkaConfig,
}

impl KafkaConsumerBackend {
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }
}

/// Forwards broker-side commit failures to the owning session.
struct SessionContext {
    commit_failures: mpsc::UnboundedSender<String>,
}

impl ClientContext for SessionContext {}

impl ConsumerContext for SessionContext {
    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        if let Err(e) = result {
            warn!(error = %e, offsets = ?offsets, "Broker rejected offset commit");
            let _ = self
                .commit_failures
                .send(format!("Broker rejected commit: {}", e));
        }
    }
}

type SessionConsumer = StreamConsumer<SessionContext>;

#[async_trait]
impl ConsumerBackend for KafkaConsumerBackend {
    async fn connect(&self, from_beginning: bool) -> Result<Box<dyn ConsumerSession>> {
        let (commit_failures, failed_commits) = mpsc::unbounded_channel();
        let consumer: SessionConsumer = self
            .config
            .build_consumer_config(from_beginning)
            .create_with_context(SessionContext { commit_failures })
            .map_err(|e| BusError::Connection(format!("Failed to create Kafka consumer: {}", e)))?;
        let consumer = Arc::new(consumer);

        // Client creation is lazy; ask for metadata to prove the brokers answer.
        let probe = consumer.clone();
        let timeout = Duration::from_millis(self.config.message_timeout_ms);
        tokio::task::spawn_blocking(move || probe.fetch_metadata(None, timeout).map(|_| ()))
            .await
            .map_err(|e| BusError::Connection(format!("Metadata probe aborted: {}", e)))?
            .map_err(|e| BusError::Connection(format!("Kafka brokers unreachable: {}", e)))?;

        info!(
            bootstrap_servers = %self.config.bootstrap_servers,
            group_id = %self.config.group_id,
            "Connected to Kafka"
        );

        Ok(Box::new(KafkaSession {
            consumer,
            failed_commits,
        }))
    }
}

struct KafkaSession {
    consumer: Arc<SessionConsumer>,
    failed_commits: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl ConsumerSession for KafkaSession {
    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        self.consumer
            .subscribe(&[topic])
            .map_err(|e| BusError::Subscribe(format!("Failed to subscribe to {}: {}", topic, e)))?;
        info!(topic = %topic, "Subscribed to Kafka topic");
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<InboundMessage>> {
        loop {
            let received = tokio::select! {
                Some(failure) = self.failed_commits.recv() => {
                    return Some(Err(BusError::Commit(failure)));
                }
                received = self.consumer.recv() => received,
            };
            match received {
                Ok(message) => {
                    return Some(Ok(InboundMessage {
                        topic: message.topic().to_string(),
                        partition: message.partition(),
                        offset: message.offset(),
                        key: message.key().map(<[u8]>::to_vec),
                        payload: message.payload().map(<[u8]>::to_vec),
                        timestamp: message.timestamp().to_millis(),
                    }))
                }
                // librdkafka recovers from these on its own.
                Err(KafkaError::MessageConsumption(code)) if code != RDKafkaErrorCode::Fatal => {
                    warn!(error = %code, "Transient Kafka consume error");
                }
                Err(e) => return Some(Err(BusError::Consume(e.to_string()))),
            }
        }
    }

    fn pause(&mut self, partition: &TopicPartition) -> Result<()> {
        self.consumer
            .pause(&partition_list(partition))
            .map_err(|e| BusError::Consume(format!("Failed to pause {}: {}", partition, e)))
    }

    fn resume(&mut self, partition: &TopicPartition) -> Result<()> {
        self.consumer
            .resume(&partition_list(partition))
            .map_err(|e| BusError::Consume(format!("Failed to resume {}: {}", partition, e)))
    }

    fn committer(&self) -> Arc<dyn OffsetCommitter> {
        Arc::new(KafkaCommitter {
            consumer: self.consumer.clone(),
        })
    }

    async fn close(&mut self) {
        self.consumer.unsubscribe();
        debug!("Kafka consumer session closed");
    }
}

fn partition_list(partition: &TopicPartition) -> TopicPartitionList {
    let mut list = TopicPartitionList::new();
    list.add_partition(&partition.topic, partition.partition);
    list
}

struct KafkaCommitter {
    consumer: Arc<SessionConsumer>,
}

#[async_trait]
impl OffsetCommitter for KafkaCommitter {
    /// Enqueue the commit. Broker rejections surface later through
    /// `SessionContext`.
    async fn commit(&self, partition: &TopicPartition, next_offset: i64) -> Result<()> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &partition.topic,
                partition.partition,
                Offset::Offset(next_offset),
            )
            .map_err(|e| BusError::Commit(e.to_string()))?;
        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| BusError::Commit(format!("Failed to commit {}: {}", partition, e)))
    }
}

// ============================================================================
// Producer
// ============================================================================

/// Keyed Kafka publisher.
pub struct KafkaPublisher {
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaPublisher {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = config
            .build_producer_config()
            .create()
            .map_err(|e| BusError::Connection(format!("Failed to create Kafka producer: {}", e)))?;

        info!(bootstrap_servers = %config.bootstrap_servers, "Created Kafka producer");

        Ok(Self {
            producer,
            timeout: Duration::from_millis(config.message_timeout_ms),
        })
    }

    /// Wait for queued messages to be delivered.
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        self.producer
            .flush(timeout)
            .map_err(|e| BusError::Publish(format!("Failed to flush producer: {}", e)))
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<Delivery> {
        let record = FutureRecord::to(topic).key(key).payload(&payload);

        let (partition, offset) = self
            .producer
            .send(record, self.timeout)
            .await
            .map_err(|(e, _)| BusError::Publish(format!("Failed to publish: {}", e)))?;

        Ok(Delivery { partition, offset })
    }
}

/// One `KafkaPublisher` per distinct broker set.
#[derive(Default)]
pub struct ProducerPool {
    producers: ConnectionPool<String, KafkaPublisher>,
}

impl ProducerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool key: sorted broker list.
    pub fn key_for(config: &KafkaConfig) -> String {
        config.brokers().join(";")
    }

    pub async fn get_or_create(&self, config: &KafkaConfig) -> Result<Arc<KafkaPublisher>> {
        self.producers
            .get_or_try_init(&Self::key_for(config), || async {
                KafkaPublisher::new(config).map(Arc::new)
            })
            .await
    }

    /// Flush and release every producer.
    pub async fn close(&self, timeout: Duration) {
        for producer in self.producers.drain().await {
            let result = tokio::task::spawn_blocking(move || producer.flush(timeout)).await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Producer flush failed"),
                Err(e) => warn!(error = %e, "Producer flush aborted"),
            }
        }
    }
}
