//! Rating aggregator.
//!
//! Consumes review changes and keeps each product's average rating current
//! without re-reading its reviews:
//!
//! 1. Parse the message. Anything malformed or of an unknown type is logged
//!    and skipped; the offset is still committed.
//! 2. Turn the change into a count/sum delta.
//! 3. Add the delta to the product's accumulator, fenced by the message
//!    offset. A fence conflict means this message was already applied; it
//!    is dropped without emitting anything.
//! 4. Publish `RatingCalculated` with the average of the updated totals,
//!    keyed by product id.
//!
//! Any other store or publish failure is returned, which leaves the offset
//! uncommitted and gets the message redelivered.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::bus::{self, BusError, InboundMessage, LogProducer, MessageHandler};
use crate::events::{parse_review_modified, types, RatingCalculated, ReviewModified};
use crate::repository::RatingRepository;
use crate::storage::StorageError;

const HANDLER_NAME: &str = "rating-aggregator";

#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Publish error: {0}")]
    Publish(#[from] BusError),
}

pub type Result<T> = std::result::Result<T, AggregateError>;

/// Change to a product's review count and rating sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatingDelta {
    pub count: i64,
    pub rating_sum: i64,
}

impl From<&ReviewModified> for RatingDelta {
    fn from(change: &ReviewModified) -> Self {
        match change {
            ReviewModified::Created(e) => RatingDelta {
                count: 1,
                rating_sum: e.new_rating,
            },
            ReviewModified::Updated(e) => RatingDelta {
                count: 0,
                rating_sum: e.new_rating - e.old_rating,
            },
            ReviewModified::Deleted(e) => RatingDelta {
                count: -1,
                rating_sum: -e.old_rating,
            },
        }
    }
}

/// What happened to one message.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateOutcome {
    /// Folded in; the emitted event is returned.
    Applied(RatingCalculated),
    /// Already applied by an earlier delivery.
    Duplicate,
    /// Not a valid review change.
    Skipped,
}

#[derive(Clone)]
pub struct RatingAggregator {
    ratings: RatingRepository,
    producer: Arc<LogProducer>,
    topic: String,
}

impl RatingAggregator {
    /// `topic` receives the `RatingCalculated` events.
    pub fn new(ratings: RatingRepository, producer: Arc<LogProducer>, topic: impl Into<String>) -> Self {
        Self {
            ratings,
            producer,
            topic: topic.into(),
        }
    }

    pub async fn process(&self, message: &InboundMessage) -> Result<AggregateOutcome> {
        let envelope = match parse_review_modified(message.payload.as_deref().unwrap_or_default()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "Incoming message did not pass validation, skipping"
                );
                return Ok(AggregateOutcome::Skipped);
            }
        };

        let change = envelope.data;
        let product_id = change.product_id();
        let delta = RatingDelta::from(&change);

        let totals = match self
            .ratings
            .apply(product_id, delta.count, delta.rating_sum, message.offset)
            .await
        {
            Ok(totals) => totals,
            Err(e) if e.is_conflict() => {
                debug!(
                    product_id = %product_id,
                    event_id = %envelope.id,
                    offset = message.offset,
                    "Review change already applied, skipping"
                );
                return Ok(AggregateOutcome::Duplicate);
            }
            Err(e) => return Err(e.into()),
        };

        let event = RatingCalculated {
            product_id: product_id.to_string(),
            average_rating: totals.average_rating(),
        };
        self.producer
            .send(&self.topic, product_id, types::RATING_CALCULATED, &event)
            .await?;

        info!(
            product_id = %product_id,
            event_type = %change.event_type(),
            review_count = totals.review_count,
            average_rating = ?event.average_rating,
            "Rating recalculated"
        );
        Ok(AggregateOutcome::Applied(event))
    }
}

impl MessageHandler for RatingAggregator {
    fn name(&self) -> &str {
        HANDLER_NAME
    }

    fn handle(&self, message: Arc<InboundMessage>) -> BoxFuture<'static, bus::Result<()>> {
        let aggregator = self.clone();

        Box::pin(async move {
            aggregator
                .process(&message)
                .await
                .map(|_| ())
                .map_err(|e| BusError::HandlerFailed {
                    name: HANDLER_NAME.to_string(),
                    message: e.to_string(),
                })
        })
    }
}
