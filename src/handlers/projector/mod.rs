//! Product rating projector.
//!
//! Consumes `RatingCalculated` events and stores the average on the product
//! record, removing it when the product has no reviews left. Events for a
//! product that no longer exists are dropped: the accumulator may outlive
//! its product.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::bus::{self, BusError, InboundMessage, MessageHandler};
use crate::events::parse_rating_calculated;
use crate::repository::ProductRepository;
use crate::storage::StorageError;

const HANDLER_NAME: &str = "product-rating-projector";

/// What happened to one message.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionOutcome {
    Updated,
    /// The product is gone.
    ProductMissing,
    /// Not a valid rating event.
    Skipped,
}

#[derive(Clone)]
pub struct ProductRatingProjector {
    products: ProductRepository,
}

impl ProductRatingProjector {
    pub fn new(products: ProductRepository) -> Self {
        Self { products }
    }

    pub async fn project(
        &self,
        message: &InboundMessage,
    ) -> Result<ProjectionOutcome, StorageError> {
        let envelope = match parse_rating_calculated(message.payload.as_deref().unwrap_or_default())
        {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    topic = %message.topic,
                    offset = message.offset,
                    error = %e,
                    "Incoming message did not pass validation, skipping"
                );
                return Ok(ProjectionOutcome::Skipped);
            }
        };
        let rating = envelope.data;

        match self
            .products
            .set_average_rating(&rating.product_id, rating.average_rating)
            .await
        {
            Ok(_) => {
                debug!(
                    product_id = %rating.product_id,
                    average_rating = ?rating.average_rating,
                    "Product rating updated"
                );
                Ok(ProjectionOutcome::Updated)
            }
            Err(e) if e.is_not_found() => {
                warn!(product_id = %rating.product_id, "Rating for unknown product, skipping");
                Ok(ProjectionOutcome::ProductMissing)
            }
            Err(e) => Err(e),
        }
    }
}

impl MessageHandler for ProductRatingProjector {
    fn name(&self) -> &str {
        HANDLER_NAME
    }

    fn handle(&self, message: Arc<InboundMessage>) -> BoxFuture<'static, bus::Result<()>> {
        let projector = self.clone();

        Box::pin(async move {
            projector
                .project(&message)
                .await
                .map(|_| ())
                .map_err(|e| BusError::HandlerFailed {
                    name: HANDLER_NAME.to_string(),
                    message: e.to_string(),
                })
        })
    }
}
