//! Message handlers plugged into `LogConsumer`.
//!
//! - `RatingAggregator`: folds review changes into the per-product
//!   accumulator and emits the recomputed average
//! - `ProductRatingProjector`: copies recomputed averages onto products

pub mod aggregator;
pub mod projector;

pub use aggregator::{AggregateError, AggregateOutcome, RatingAggregator, RatingDelta};
pub use projector::{ProductRatingProjector, ProjectionOutcome};
