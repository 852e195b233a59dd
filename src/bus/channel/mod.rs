//! In-memory partitioned log for standalone mode.
//!
//! Behaves like a small Kafka cluster inside one process: topics split into
//! partitions, keyed messages hash to a fixed partition, consumer groups
//! track committed offsets, and sessions resume from those offsets after a
//! reconnect. Fault injection hooks let tests fail connects, subscribes,
//! commits and publishes, or crash every live session.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

use super::{
    BusError, ConsumerBackend, ConsumerSession, Delivery, EventPublisher, InboundMessage,
    OffsetCommitter, Result, TopicPartition,
};

/// Partitions per topic unless configured otherwise.
pub const DEFAULT_PARTITIONS: i32 = 3;

/// Partition a keyed message lands on.
pub fn partition_for_key(key: &str, partitions: i32) -> i32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions.max(1) as u64) as i32
}

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<Vec<u8>>,
    payload: Vec<u8>,
    timestamp: i64,
}

#[derive(Default)]
struct BrokerState {
    logs: HashMap<String, Vec<Vec<StoredRecord>>>,
    committed: HashMap<(String, TopicPartition), i64>,
    /// Bumped by `crash`; sessions from an older generation are dead.
    generation: u64,
    connections: u32,
    fail_connects: u32,
    fail_subscribes: u32,
    fail_commits: u32,
    fail_publishes: u32,
}

impl BrokerState {
    fn log_mut(&mut self, topic: &str, partitions: i32) -> &mut Vec<Vec<StoredRecord>> {
        self.logs
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions.max(1) as usize])
    }
}

struct BrokerInner {
    partitions: i32,
    state: Mutex<BrokerState>,
    notify: Notify,
}

/// In-memory broker.
#[derive(Clone)]
pub struct ChannelBroker {
    inner: Arc<BrokerInner>,
}

impl Default for ChannelBroker {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITIONS)
    }
}

impl ChannelBroker {
    pub fn new(partitions: i32) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                partitions: partitions.max(1),
                state: Mutex::new(BrokerState::default()),
                notify: Notify::new(),
            }),
        }
    }

    pub fn partitions(&self) -> i32 {
        self.inner.partitions
    }

    /// Consumer backend joining `group_id`.
    pub fn consumer_group(&self, group_id: impl Into<String>) -> ChannelConsumerBackend {
        ChannelConsumerBackend {
            broker: self.clone(),
            group_id: group_id.into(),
        }
    }

    /// Drop every live session, as a broker restart would.
    pub async fn crash(&self) {
        self.inner.state.lock().await.generation += 1;
        self.inner.notify.notify_waiters();
    }

    pub async fn fail_next_connects(&self, count: u32) {
        self.inner.state.lock().await.fail_connects = count;
    }

    pub async fn fail_next_subscribes(&self, count: u32) {
        self.inner.state.lock().await.fail_subscribes = count;
    }

    pub async fn fail_next_commits(&self, count: u32) {
        self.inner.state.lock().await.fail_commits = count;
    }

    pub async fn fail_next_publishes(&self, count: u32) {
        self.inner.state.lock().await.fail_publishes = count;
    }

    /// Successful connects so far.
    pub async fn connection_count(&self) -> u32 {
        self.inner.state.lock().await.connections
    }

    pub async fn committed_offset(&self, group_id: &str, partition: &TopicPartition) -> Option<i64> {
        self.inner
            .state
            .lock()
            .await
            .committed
            .get(&(group_id.to_string(), partition.clone()))
            .copied()
    }

    /// Every message in `topic`, partition by partition.
    pub async fn messages(&self, topic: &str) -> Vec<InboundMessage> {
        let state = self.inner.state.lock().await;
        let Some(log) = state.logs.get(topic) else {
            return Vec::new();
        };
        log.iter()
            .enumerate()
            .flat_map(|(partition, records)| {
                records.iter().enumerate().map(move |(offset, record)| {
                    to_message(topic, partition as i32, offset as i64, record)
                })
            })
            .collect()
    }
}

fn to_message(topic: &str, partition: i32, offset: i64, record: &StoredRecord) -> InboundMessage {
    InboundMessage {
        topic: topic.to_string(),
        partition,
        offset,
        key: record.key.clone(),
        payload: Some(record.payload.clone()),
        timestamp: Some(record.timestamp),
    }
}

#[async_trait]
impl EventPublisher for ChannelBroker {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<Delivery> {
        let partition = partition_for_key(key, self.inner.partitions);
        let offset = {
            let mut state = self.inner.state.lock().await;
            if state.fail_publishes > 0 {
                state.fail_publishes -= 1;
                return Err(BusError::Publish(format!("broker rejected message for {topic}")));
            }
            let log = &mut state.log_mut(topic, self.inner.partitions)[partition as usize];
            log.push(StoredRecord {
                key: Some(key.as_bytes().to_vec()),
                payload,
                timestamp: chrono::Utc::now().timestamp_millis(),
            });
            (log.len() - 1) as i64
        };
        self.inner.notify.notify_waiters();

        debug!(topic = %topic, key = %key, partition, offset, "Published message to channel");
        Ok(Delivery { partition, offset })
    }
}

/// A consumer group on a `ChannelBroker`.
#[derive(Clone)]
pub struct ChannelConsumerBackend {
    broker: ChannelBroker,
    group_id: String,
}

#[async_trait]
impl ConsumerBackend for ChannelConsumerBackend {
    async fn connect(&self, from_beginning: bool) -> Result<Box<dyn ConsumerSession>> {
        let mut state = self.broker.inner.state.lock().await;
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(BusError::Connection("channel broker unavailable".to_string()));
        }
        state.connections += 1;

        Ok(Box::new(ChannelSession {
            broker: self.broker.clone(),
            group_id: self.group_id.clone(),
            from_beginning,
            generation: state.generation,
            topic: None,
            positions: BTreeMap::new(),
            paused: BTreeSet::new(),
            next_partition: 0,
            closed: false,
        }))
    }
}

struct ChannelSession {
    broker: ChannelBroker,
    group_id: String,
    from_beginning: bool,
    generation: u64,
    topic: Option<String>,
    /// Next offset to read, per partition.
    positions: BTreeMap<i32, i64>,
    paused: BTreeSet<i32>,
    /// Round-robin cursor so busy partitions do not starve the others.
    next_partition: i32,
    closed: bool,
}

impl ChannelSession {
    /// Take the next unread record, if any.
    fn poll(&mut self, state: &BrokerState, topic: &str) -> Option<InboundMessage> {
        let log = state.logs.get(topic)?;
        let count = log.len() as i32;
        for step in 0..count {
            let partition = (self.next_partition + step) % count;
            if self.paused.contains(&partition) {
                continue;
            }
            let position = self.positions.entry(partition).or_insert(0);
            if let Some(record) = log[partition as usize].get(*position as usize) {
                let message = to_message(topic, partition, *position, record);
                *position += 1;
                self.next_partition = (partition + 1) % count;
                return Some(message);
            }
        }
        None
    }
}

#[async_trait]
impl ConsumerSession for ChannelSession {
    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        let partitions = self.broker.inner.partitions;
        let mut state = self.broker.inner.state.lock().await;
        if state.generation != self.generation {
            return Err(BusError::Subscribe("session is no longer connected".to_string()));
        }
        if state.fail_subscribes > 0 {
            state.fail_subscribes -= 1;
            return Err(BusError::Subscribe(format!("could not join group for {topic}")));
        }

        let ends: Vec<i64> = state
            .log_mut(topic, partitions)
            .iter()
            .map(|records| records.len() as i64)
            .collect();
        self.positions = ends
            .iter()
            .enumerate()
            .map(|(partition, end)| {
                let tp = TopicPartition::new(topic, partition as i32);
                let start = match state.committed.get(&(self.group_id.clone(), tp)) {
                    Some(committed) => *committed,
                    None if self.from_beginning => 0,
                    None => *end,
                };
                (partition as i32, start)
            })
            .collect();
        self.topic = Some(topic.to_string());

        info!(topic = %topic, group_id = %self.group_id, positions = ?self.positions, "Subscribed to channel topic");
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<InboundMessage>> {
        let topic = match (&self.topic, self.closed) {
            (_, true) => return None,
            (Some(topic), false) => topic.clone(),
            (None, false) => return Some(Err(BusError::Consume("not subscribed".to_string()))),
        };
        let inner = self.broker.inner.clone();

        loop {
            let notified = inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = inner.state.lock().await;
                if state.generation != self.generation {
                    return Some(Err(BusError::Consume("broker connection lost".to_string())));
                }
                if let Some(message) = self.poll(&state, &topic) {
                    return Some(Ok(message));
                }
            }

            notified.await;
        }
    }

    fn pause(&mut self, partition: &TopicPartition) -> Result<()> {
        self.paused.insert(partition.partition);
        Ok(())
    }

    fn resume(&mut self, partition: &TopicPartition) -> Result<()> {
        self.paused.remove(&partition.partition);
        Ok(())
    }

    fn committer(&self) -> Arc<dyn OffsetCommitter> {
        Arc::new(ChannelCommitter {
            broker: self.broker.clone(),
            group_id: self.group_id.clone(),
        })
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

struct ChannelCommitter {
    broker: ChannelBroker,
    group_id: String,
}

#[async_trait]
impl OffsetCommitter for ChannelCommitter {
    async fn commit(&self, partition: &TopicPartition, next_offset: i64) -> Result<()> {
        let mut state = self.broker.inner.state.lock().await;
        if state.fail_commits > 0 {
            state.fail_commits -= 1;
            return Err(BusError::Commit(format!("commit rejected for {partition}")));
        }
        state
            .committed
            .insert((self.group_id.clone(), partition.clone()), next_offset);
        Ok(())
    }
}
