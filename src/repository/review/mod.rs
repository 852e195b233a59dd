//! Review repository.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use super::{keys, new_id};
use crate::storage::{
    Cursor, KeyedStore, Page, Patch, QueryOptions, Result, StorageError, TypedStore,
    UpdateOptions,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    #[validate(length(min = 1))]
    pub product_id: String,
    #[validate(length(min = 1))]
    pub review_id: String,
    pub first_name: String,
    pub last_name: String,
    pub review_text: String,
    #[validate(range(min = 1, max = 5))]
    pub rating: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewReview {
    pub first_name: String,
    pub last_name: String,
    pub review_text: String,
    #[validate(range(min = 1, max = 5))]
    pub rating: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReviewUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 5))]
    pub rating: Option<i64>,
}

#[derive(Clone)]
pub struct ReviewRepository {
    store: TypedStore<Review>,
}

impl ReviewRepository {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self {
            store: TypedStore::new(store),
        }
    }

    pub async fn create(&self, product_id: &str, input: NewReview) -> Result<Review> {
        input
            .validate()
            .map_err(|e| StorageError::Validation(e.to_string()))?;
        let review = Review {
            product_id: product_id.to_string(),
            review_id: new_id(),
            first_name: input.first_name,
            last_name: input.last_name,
            review_text: input.review_text,
            rating: input.rating,
        };
        self.store
            .create(&keys::review(product_id, &review.review_id), &review)
            .await
    }

    pub async fn get(&self, product_id: &str, review_id: &str) -> Result<Review> {
        self.store.get(&keys::review(product_id, review_id)).await
    }

    /// Reviews of one product, newest first.
    pub async fn list(
        &self,
        product_id: &str,
        cursor: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Page<Review>> {
        let mut options = QueryOptions::with_prefix(keys::REVIEW_SK_PREFIX)
            .descending()
            .with_cursor(cursor.map(Cursor::from_token));
        options.limit = limit;
        self.store
            .query(&keys::product_pk(product_id), options)
            .await
    }

    /// Apply a partial change. With `return_original` the review as it was
    /// before the change is returned, which callers use to learn the old
    /// rating.
    pub async fn update(
        &self,
        product_id: &str,
        review_id: &str,
        change: ReviewUpdate,
        return_original: bool,
    ) -> Result<Review> {
        change
            .validate()
            .map_err(|e| StorageError::Validation(e.to_string()))?;
        let patch = match serde_json::to_value(&change)? {
            Value::Object(fields) => Patch::from_item(fields),
            _ => Patch::new(),
        };
        if patch.is_empty() {
            return self.get(product_id, review_id).await;
        }
        let options = if return_original {
            UpdateOptions::new().return_original()
        } else {
            UpdateOptions::new()
        };
        self.store
            .update(&keys::review(product_id, review_id), patch, options)
            .await
    }

    pub async fn delete(&self, product_id: &str, review_id: &str) -> Result<Review> {
        self.store
            .delete(&keys::review(product_id, review_id))
            .await
    }
}

#[cfg(test)]
mod tests;
