//! Supervised log consumer.
//!
//! `LogConsumer` drives a `ConsumerBackend` through its lifecycle:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Subscribing -> Consuming
//!                     ^                                        |
//!                     +--- Reconnecting <--- Crashed <---------+
//! any state -> ShutDown (on disconnect)
//! ```
//!
//! Messages of one partition are handled strictly in order by a dedicated
//! worker; up to `concurrency` partitions are handled at the same time. A
//! partition whose worker falls behind is paused on the session instead of
//! stalling the shared dispatch loop. An offset is committed only after the
//! handler succeeded for that message. A handler failure, a commit the
//! backend reports as failed, or a broken connection crashes the session:
//! the consumer waits the fixed backoff, reconnects, and the broker
//! redelivers everything after the last committed offset.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{
    BusError, ConsumerBackend, ConsumerSession, ConsumerState, InboundMessage, KafkaConfig,
    MessageHandler, OffsetCommitter, Result, TopicPartition,
};
use crate::utils::retry::{is_shutdown, retry_until_shutdown, wait_for_shutdown, FixedBackoff};

/// Settings for one subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerOptions {
    /// Start from the earliest offset when the group has no commit.
    pub from_beginning: bool,
    /// Partitions handled at the same time.
    pub concurrency: usize,
    /// Delay between connect/subscribe attempts and after a crash.
    pub backoff: FixedBackoff,
    /// Messages buffered per partition worker.
    pub queue_depth: usize,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            from_beginning: false,
            concurrency: 10,
            backoff: FixedBackoff::default(),
            queue_depth: 64,
        }
    }
}

impl ConsumerOptions {
    pub fn from_config(config: &KafkaConfig) -> Self {
        Self {
            from_beginning: config.from_beginning,
            concurrency: config.partitions_consumed_concurrently.max(1),
            backoff: FixedBackoff::from_millis(config.reconnect_backoff_ms),
            ..Self::default()
        }
    }

    pub fn from_beginning(mut self) -> Self {
        self.from_beginning = true;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_backoff(mut self, delay: Duration) -> Self {
        self.backoff = FixedBackoff::new(delay);
        self
    }
}

/// Consumer that keeps one subscription alive until `disconnect`.
pub struct LogConsumer {
    name: String,
    backend: Arc<dyn ConsumerBackend>,
    options: ConsumerOptions,
    state: Arc<watch::Sender<ConsumerState>>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LogConsumer {
    pub fn new(
        name: impl Into<String>,
        backend: Arc<dyn ConsumerBackend>,
        options: ConsumerOptions,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        Self {
            name: name.into(),
            backend,
            options,
            state: Arc::new(state),
            shutdown,
            task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Start consuming `topic` in the background.
    ///
    /// Returns once the supervisor is running; connecting and subscribing
    /// happen asynchronously and are retried until they succeed. One
    /// consumer serves one subscription.
    pub async fn subscribe(&self, topic: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return Err(BusError::AlreadySubscribed(topic.to_string()));
        }

        let supervisor = Supervisor {
            name: self.name.clone(),
            topic: topic.to_string(),
            handler,
            backend: self.backend.clone(),
            options: self.options.clone(),
            state: self.state.clone(),
            shutdown: self.shutdown.subscribe(),
        };
        *task = Some(tokio::spawn(supervisor.run()));

        info!(consumer = %self.name, topic = %topic, "Consumer subscription started");
        Ok(())
    }

    /// Stop consuming. In-flight handlers finish; nothing new is started.
    pub async fn disconnect(&self) {
        self.shutdown.send_replace(true);
        let task = self.task.lock().await.take();
        match task {
            Some(handle) => {
                if let Err(e) = handle.await {
                    error!(consumer = %self.name, error = %e, "Consumer task panicked");
                    self.state.send_replace(ConsumerState::ShutDown);
                }
            }
            None => {
                self.state.send_replace(ConsumerState::ShutDown);
            }
        }
        info!(consumer = %self.name, "Consumer disconnected");
    }
}

/// Why a session stopped.
enum SessionEnd {
    Shutdown,
    Crashed(BusError),
}

/// Owns the reconnect loop for one subscription.
struct Supervisor {
    name: String,
    topic: String,
    handler: Arc<dyn MessageHandler>,
    backend: Arc<dyn ConsumerBackend>,
    options: ConsumerOptions,
    state: Arc<watch::Sender<ConsumerState>>,
    shutdown: watch::Receiver<bool>,
}

impl Supervisor {
    fn set_state(&self, state: ConsumerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(consumer = %self.name, from = %previous, to = %state, "Consumer state changed");
        }
    }

    async fn run(mut self) {
        let mut recovering = false;

        loop {
            self.set_state(if recovering {
                ConsumerState::Reconnecting
            } else {
                ConsumerState::Connecting
            });
            let Some(mut session) = self.connect().await else {
                break;
            };
            self.set_state(ConsumerState::Connected);

            self.set_state(ConsumerState::Subscribing);
            if let Err(e) = session.subscribe(&self.topic).await {
                warn!(
                    consumer = %self.name,
                    topic = %self.topic,
                    error = %e,
                    retry_in_ms = self.options.backoff.delay.as_millis() as u64,
                    "Subscribe failed, retrying"
                );
                session.close().await;
                recovering = true;
                if !self.options.backoff.wait(&mut self.shutdown).await {
                    break;
                }
                continue;
            }
            info!(consumer = %self.name, topic = %self.topic, "Subscribed");
            self.set_state(ConsumerState::Consuming);

            let end = self.consume(&mut session).await;
            session.close().await;
            match end {
                SessionEnd::Shutdown => break,
                SessionEnd::Crashed(e) => {
                    self.set_state(ConsumerState::Crashed);
                    error!(
                        consumer = %self.name,
                        topic = %self.topic,
                        error = %e,
                        retry_in_ms = self.options.backoff.delay.as_millis() as u64,
                        "Consumer crashed, reconnecting"
                    );
                    recovering = true;
                    if !self.options.backoff.wait(&mut self.shutdown).await {
                        break;
                    }
                }
            }
        }

        self.set_state(ConsumerState::ShutDown);
        info!(consumer = %self.name, "Consumer shut down");
    }

    /// Connect, retrying with the fixed backoff until shutdown.
    async fn connect(&mut self) -> Option<Box<dyn ConsumerSession>> {
        let backend = self.backend.clone();
        let from_beginning = self.options.from_beginning;
        let session = retry_until_shutdown(
            "connect",
            &self.options.backoff,
            &mut self.shutdown,
            || {
                let backend = backend.clone();
                async move { backend.connect(from_beginning).await }
            },
        )
        .await?;
        info!(consumer = %self.name, "Consumer connected");
        Some(session)
    }

    /// Pump messages to partition workers until shutdown or a crash.
    ///
    /// A partition whose worker queue is full is paused and its overflow
    /// parked in that worker's backlog, so one slow partition never blocks
    /// delivery to the others.
    async fn consume(&self, session: &mut Box<dyn ConsumerSession>) -> SessionEnd {
        let (halt_tx, halt_rx) = watch::channel(false);
        let (failure_tx, mut failures) = mpsc::unbounded_channel();
        let drained = Arc::new(Notify::new());
        let context = WorkerContext {
            consumer: self.name.clone(),
            handler: self.handler.clone(),
            committer: session.committer(),
            permits: Arc::new(Semaphore::new(self.options.concurrency.max(1))),
            halt: halt_rx,
            failures: failure_tx,
            drained: drained.clone(),
        };
        let mut shutdown = self.shutdown.clone();
        let mut workers: HashMap<TopicPartition, PartitionWorker> = HashMap::new();

        let end = loop {
            if is_shutdown(&shutdown) {
                break SessionEnd::Shutdown;
            }
            let backed_up = workers.values().any(PartitionWorker::is_backed_up);
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => break SessionEnd::Shutdown,
                Some(failure) = failures.recv() => break SessionEnd::Crashed(failure),
                _ = drained.notified(), if backed_up => {
                    if let Err(e) = self.flush_backlogs(session, &mut workers) {
                        break SessionEnd::Crashed(e);
                    }
                }
                next = session.recv() => match next {
                    None => {
                        break SessionEnd::Crashed(BusError::Consume(
                            "message stream ended".to_string(),
                        ))
                    }
                    Some(Err(e)) => break SessionEnd::Crashed(e),
                    Some(Ok(message)) => {
                        let partition = message.topic_partition();
                        let worker = workers.entry(partition.clone()).or_insert_with(|| {
                            PartitionWorker::spawn(
                                context.clone(),
                                partition.clone(),
                                self.options.queue_depth.max(1),
                            )
                        });
                        if worker.offer(message) {
                            debug!(
                                consumer = %self.name,
                                partition = %partition,
                                "Partition queue full, pausing"
                            );
                            if let Err(e) = session.pause(&partition) {
                                break SessionEnd::Crashed(e);
                            }
                        }
                    }
                },
            }
        };

        halt_tx.send_replace(true);
        for (partition, worker) in workers {
            drop(worker.queue);
            if let Err(e) = worker.handle.await {
                error!(consumer = %self.name, partition = %partition, error = %e, "Partition worker panicked");
            }
        }
        end
    }

    /// Move parked messages into queues with room; resume partitions whose
    /// backlog emptied.
    fn flush_backlogs(
        &self,
        session: &mut Box<dyn ConsumerSession>,
        workers: &mut HashMap<TopicPartition, PartitionWorker>,
    ) -> Result<()> {
        for (partition, worker) in workers.iter_mut() {
            if worker.is_backed_up() && worker.drain_backlog() {
                debug!(consumer = %self.name, partition = %partition, "Partition queue drained, resuming");
                session.resume(partition)?;
            }
        }
        Ok(())
    }
}

/// Shared by all partition workers of one session.
#[derive(Clone)]
struct WorkerContext {
    consumer: String,
    handler: Arc<dyn MessageHandler>,
    committer: Arc<dyn OffsetCommitter>,
    permits: Arc<Semaphore>,
    halt: watch::Receiver<bool>,
    failures: mpsc::UnboundedSender<BusError>,
    /// Signalled each time a worker takes a message off its queue.
    drained: Arc<Notify>,
}

struct PartitionWorker {
    queue: mpsc::Sender<InboundMessage>,
    /// Messages that did not fit in `queue`, oldest first.
    backlog: VecDeque<InboundMessage>,
    handle: JoinHandle<()>,
}

impl PartitionWorker {
    fn spawn(context: WorkerContext, partition: TopicPartition, depth: usize) -> Self {
        let (queue, messages) = mpsc::channel(depth);
        let handle = tokio::spawn(Self::run(context, partition, messages));
        Self {
            queue,
            backlog: VecDeque::new(),
            handle,
        }
    }

    fn is_backed_up(&self) -> bool {
        !self.backlog.is_empty()
    }

    /// Queue `message` without waiting. Returns `true` when the queue just
    /// filled up and the partition should be paused.
    fn offer(&mut self, message: InboundMessage) -> bool {
        if self.is_backed_up() {
            self.backlog.push_back(message);
            return false;
        }
        match self.queue.try_send(message) {
            Ok(()) => false,
            Err(TrySendError::Full(message)) => {
                self.backlog.push_back(message);
                true
            }
            // The worker stopped on a failure, which arrives on `failures`.
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Returns `true` once the backlog is empty.
    fn drain_backlog(&mut self) -> bool {
        while let Some(message) = self.backlog.pop_front() {
            match self.queue.try_send(message) {
                Ok(()) => {}
                Err(TrySendError::Full(message)) => {
                    self.backlog.push_front(message);
                    return false;
                }
                Err(TrySendError::Closed(_)) => {
                    self.backlog.clear();
                    return false;
                }
            }
        }
        true
    }

    /// Handle messages of one partition in order, committing each success.
    async fn run(
        context: WorkerContext,
        partition: TopicPartition,
        mut messages: mpsc::Receiver<InboundMessage>,
    ) {
        while let Some(message) = messages.recv().await {
            context.drained.notify_one();
            if is_shutdown(&context.halt) {
                break;
            }
            let Ok(_permit) = context.permits.acquire().await else {
                break;
            };
            if is_shutdown(&context.halt) {
                break;
            }

            let offset = message.offset;
            let next_offset = message.next_offset();
            debug!(
                consumer = %context.consumer,
                topic = %partition.topic,
                partition = partition.partition,
                offset,
                "Handling message"
            );

            if let Err(e) = context.handler.handle(Arc::new(message)).await {
                error!(
                    consumer = %context.consumer,
                    handler = context.handler.name(),
                    topic = %partition.topic,
                    partition = partition.partition,
                    offset,
                    error = %e,
                    "Handler failed, offset not committed"
                );
                let _ = context.failures.send(e);
                break;
            }

            match context.committer.commit(&partition, next_offset).await {
                Ok(()) => {
                    debug!(
                        consumer = %context.consumer,
                        topic = %partition.topic,
                        partition = partition.partition,
                        offset = next_offset,
                        "Committed offset"
                    );
                }
                Err(e) => {
                    error!(
                        consumer = %context.consumer,
                        topic = %partition.topic,
                        partition = partition.partition,
                        offset = next_offset,
                        error = %e,
                        "Offset commit failed"
                    );
                    let _ = context.failures.send(e);
                    break;
                }
            }
        }
    }
}
