//! Rating accumulator repository.
//!
//! One accumulator per product holds the running review count and rating
//! sum. Deltas are added by the store (never read-modify-write), and every
//! write is fenced by the offset of the message that produced it, so a
//! redelivered message is rejected with `StorageError::Conflict`.
//!
//! The fence relies on every event of one product arriving on the same
//! partition, which holds when producers key by product id.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::keys;
use crate::storage::{FieldAction, KeyedStore, Patch, Result, TypedStore, UpdateOptions};

const PRODUCT_ID: &str = "productId";
const REVIEW_COUNT: &str = "reviewCount";
const REVIEW_RATING_SUM: &str = "reviewRatingSum";
const LAST_APPLIED_OFFSET: &str = "lastAppliedOffset";

/// Running totals for one product.
///
/// `review_count` can dip below zero while a delete is applied ahead of
/// its create; it settles once both have been folded in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RatingAccumulator {
    #[validate(length(min = 1))]
    pub product_id: String,
    #[serde(default)]
    pub review_count: i64,
    #[serde(default)]
    pub review_rating_sum: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_offset: Option<i64>,
}

impl RatingAccumulator {
    /// Mean rating, undefined while there are no reviews.
    pub fn average_rating(&self) -> Option<f64> {
        if self.review_count > 0 {
            Some(self.review_rating_sum / self.review_count as f64)
        } else {
            None
        }
    }
}

#[derive(Clone)]
pub struct RatingRepository {
    store: TypedStore<RatingAccumulator>,
}

impl RatingRepository {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self {
            store: TypedStore::new(store),
        }
    }

    /// Add `count_delta` and `sum_delta` to the product's totals, creating
    /// the accumulator on first use. Fails with `Conflict` unless `offset`
    /// is newer than the last one applied.
    pub async fn apply(
        &self,
        product_id: &str,
        count_delta: i64,
        sum_delta: i64,
        offset: i64,
    ) -> Result<RatingAccumulator> {
        let patch = Patch::new()
            .set(PRODUCT_ID, product_id)
            .set(REVIEW_COUNT, count_delta)
            .set(REVIEW_RATING_SUM, sum_delta)
            .set(LAST_APPLIED_OFFSET, offset);
        let options = UpdateOptions::new()
            .with_action(REVIEW_COUNT, FieldAction::Accumulate)
            .with_action(REVIEW_RATING_SUM, FieldAction::Accumulate)
            .create_if_missing()
            .with_offset_fence(LAST_APPLIED_OFFSET, offset);

        self.store
            .update(&keys::rating(product_id), patch, options)
            .await
    }

    pub async fn get(&self, product_id: &str) -> Result<RatingAccumulator> {
        self.store.get(&keys::rating(product_id)).await
    }
}
