//! Product repository.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use super::{keys, new_id};
use crate::storage::{
    Cursor, KeyedStore, Page, Patch, Result, ScanOptions, StorageError, TypedStore, UpdateOptions,
};

const AVERAGE_RATING: &str = "averageRating";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[validate(length(min = 1))]
    pub product_id: String,
    pub name: String,
    pub description: String,
    #[validate(range(min = 0.0))]
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1.0, max = 5.0))]
    pub average_rating: Option<f64>,
}

/// Input for `ProductRepository::create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    #[validate(range(min = 0.0))]
    pub price: f64,
}

/// Partial product change; absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProductUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0))]
    pub price: Option<f64>,
}

#[derive(Clone)]
pub struct ProductRepository {
    store: TypedStore<Product>,
}

impl ProductRepository {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self {
            store: TypedStore::new(store),
        }
    }

    pub async fn create(&self, input: NewProduct) -> Result<Product> {
        input
            .validate()
            .map_err(|e| StorageError::Validation(e.to_string()))?;
        let product = Product {
            product_id: new_id(),
            name: input.name,
            description: input.description,
            price: input.price,
            average_rating: None,
        };
        self.store
            .create(&keys::product(&product.product_id), &product)
            .await
    }

    pub async fn get(&self, product_id: &str) -> Result<Product> {
        self.store.get(&keys::product(product_id)).await
    }

    /// One page of products. Reviews and accumulators in the same table
    /// are not part of the listing.
    pub async fn list(&self, cursor: Option<&str>, limit: Option<u32>) -> Result<Page<Product>> {
        let options = ScanOptions {
            cursor: cursor.map(Cursor::from_token),
            limit,
        };
        self.store
            .scan_matching(options, |key| key.sk.as_deref() == Some(keys::PRODUCT_SK))
            .await
    }

    /// Apply a partial change. Fails with `NotFound` for unknown products.
    pub async fn update(&self, product_id: &str, change: ProductUpdate) -> Result<Product> {
        change
            .validate()
            .map_err(|e| StorageError::Validation(e.to_string()))?;
        let patch = match serde_json::to_value(&change)? {
            Value::Object(fields) => Patch::from_item(fields),
            _ => Patch::new(),
        };
        if patch.is_empty() {
            return self.get(product_id).await;
        }
        self.store
            .update(&keys::product(product_id), patch, UpdateOptions::new())
            .await
    }

    /// Store a recomputed average; `None` removes it.
    pub async fn set_average_rating(
        &self,
        product_id: &str,
        average_rating: Option<f64>,
    ) -> Result<Product> {
        let patch = match average_rating {
            Some(average) => Patch::new().set(AVERAGE_RATING, average),
            None => Patch::new().remove(AVERAGE_RATING),
        };
        self.store
            .update(&keys::product(product_id), patch, UpdateOptions::new())
            .await
    }

    pub async fn delete(&self, product_id: &str) -> Result<Product> {
        self.store.delete(&keys::product(product_id)).await
    }
}
