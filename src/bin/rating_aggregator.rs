//! rating-aggregator: review change consumer
//!
//! Folds review changes into per-product rating accumulators and publishes
//! the recomputed averages. With `projector.enabled` it also copies those
//! averages onto the product records.
//!
//! ## Architecture
//! ```text
//! [review-modified] -> [RatingAggregator] -> [keyed store: RATING]
//!                              |
//!                              v
//!                    [rating-calculated] -> [ProductRatingProjector] -> [keyed store: PRODUCT]
//! ```
//!
//! ## Configuration
//! - First argument or RATINGS_CONFIG: YAML config file
//! - RATINGS__<SECTION>__<KEY>: overrides, e.g. RATINGS__KAFKA__GROUP_ID
//! - RATINGS_LOG: tracing filter (default "info")
//! - RATINGS_LOG_FORMAT=json: JSON log lines
//!
//! `storage.type: dynamo` needs the `dynamo` feature and
//! `messaging.type: kafka` needs the `kafka` feature.

use std::sync::Arc;
#[cfg(feature = "kafka")]
use std::time::Duration;

use tracing::{error, info};

use product_ratings::bus::{
    ChannelBroker, ConsumerBackend, ConsumerOptions, EventPublisher, LogConsumer, LogProducer,
};
use product_ratings::config::{Config, MessagingType, StorageConfig, StorageType};
use product_ratings::handlers::{ProductRatingProjector, RatingAggregator};
use product_ratings::repository::{ProductRepository, RatingRepository};
use product_ratings::storage::{self, KeyedStore, MemoryStore, StorePool};
use product_ratings::utils::bootstrap::{init_tracing, shutdown_signal};

#[cfg(feature = "kafka")]
use product_ratings::bus::{KafkaConsumerBackend, ProducerPool};

/// Broker-side handles for one run.
struct Messaging {
    publisher: Arc<dyn EventPublisher>,
    aggregator_backend: Arc<dyn ConsumerBackend>,
    projector_backend: Arc<dyn ConsumerBackend>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    info!(
        storage = ?config.storage.storage_type,
        messaging = ?config.messaging.messaging_type,
        table = %config.storage.table,
        "Starting rating-aggregator"
    );

    let stores = StorePool::new();
    let store = stores
        .get_or_connect(&config.storage.endpoint(), || {
            connect_store(config.storage.clone())
        })
        .await?;

    #[cfg(feature = "kafka")]
    let producers = ProducerPool::new();

    let messaging = match config.messaging.messaging_type {
        MessagingType::Channel => {
            let broker = ChannelBroker::new(config.messaging.channel_partitions);
            Messaging {
                publisher: Arc::new(broker.clone()),
                aggregator_backend: Arc::new(broker.consumer_group(config.kafka.group_id.clone())),
                projector_backend: Arc::new(
                    broker.consumer_group(config.projector.group_id.clone()),
                ),
            }
        }
        #[cfg(feature = "kafka")]
        MessagingType::Kafka => {
            let publisher = producers.get_or_create(&config.kafka).await?;
            let mut projector_kafka = config.kafka.clone();
            projector_kafka.group_id = config.projector.group_id.clone();
            Messaging {
                publisher,
                aggregator_backend: Arc::new(KafkaConsumerBackend::new(config.kafka.clone())),
                projector_backend: Arc::new(KafkaConsumerBackend::new(projector_kafka)),
            }
        }
        #[cfg(not(feature = "kafka"))]
        MessagingType::Kafka => {
            return Err("messaging.type kafka requires the `kafka` feature".into());
        }
    };

    let options = ConsumerOptions::from_config(&config.kafka);
    let producer = Arc::new(LogProducer::new(
        messaging.publisher.clone(),
        config.kafka.source.clone(),
    ));

    let aggregator = RatingAggregator::new(
        RatingRepository::new(store.clone()),
        producer,
        config.kafka.rating_calculated_topic.clone(),
    );
    let aggregator_consumer = LogConsumer::new(
        "rating-aggregator",
        messaging.aggregator_backend.clone(),
        options.clone(),
    );
    aggregator_consumer
        .subscribe(&config.kafka.review_modified_topic, Arc::new(aggregator))
        .await?;

    let projector_consumer = if config.projector.enabled {
        let consumer = LogConsumer::new(
            "product-rating-projector",
            messaging.projector_backend.clone(),
            options,
        );
        let projector = ProductRatingProjector::new(ProductRepository::new(store.clone()));
        consumer
            .subscribe(&config.kafka.rating_calculated_topic, Arc::new(projector))
            .await?;
        Some(consumer)
    } else {
        None
    };

    info!(
        topic = %config.kafka.review_modified_topic,
        group_id = %config.kafka.group_id,
        projector = config.projector.enabled,
        "rating-aggregator running"
    );

    shutdown_signal().await?;

    aggregator_consumer.disconnect().await;
    if let Some(consumer) = projector_consumer {
        consumer.disconnect().await;
    }

    #[cfg(feature = "kafka")]
    producers.close(Duration::from_secs(5)).await;

    info!("rating-aggregator stopped");
    Ok(())
}

async fn connect_store(config: StorageConfig) -> storage::Result<Arc<dyn KeyedStore>> {
    match config.storage_type {
        StorageType::Memory => {
            info!("Using in-memory store; data is lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageType::Dynamo => connect_dynamo(&config).await,
    }
}

#[cfg(feature = "dynamo")]
async fn connect_dynamo(config: &StorageConfig) -> storage::Result<Arc<dyn KeyedStore>> {
    use product_ratings::storage::{DynamoKeyedStore, KeySchema};

    let store = DynamoKeyedStore::connect(
        &config.endpoint(),
        config.region.as_deref(),
        KeySchema::default(),
    )
    .await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "dynamo"))]
async fn connect_dynamo(_config: &StorageConfig) -> storage::Result<Arc<dyn KeyedStore>> {
    Err(storage::StorageError::Backend(
        "storage.type dynamo requires the `dynamo` feature".to_string(),
    ))
}
