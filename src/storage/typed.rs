//! Typed facade over a `KeyedStore`.
//!
//! Every item read back is deserialized into `T` and re-validated, so
//! callers never see fields the record type does not declare. Listings drop
//! items that fail validation instead of failing the whole page.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::error;
use validator::Validate;

use super::{
    Item, Key, KeyedStore, Page, Patch, QueryOptions, Result, ScanOptions, StorageError,
    UpdateOptions,
};

pub struct TypedStore<T> {
    store: Arc<dyn KeyedStore>,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedStore<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _record: PhantomData,
        }
    }
}

impl<T> TypedStore<T>
where
    T: Serialize + DeserializeOwned + Validate,
{
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self {
            store,
            _record: PhantomData,
        }
    }

    pub fn inner(&self) -> &Arc<dyn KeyedStore> {
        &self.store
    }

    /// Deserialize and validate one stored item.
    pub fn decode(item: Item) -> Result<T> {
        let record: T = serde_json::from_value(Value::Object(item))?;
        record
            .validate()
            .map_err(|e| StorageError::Validation(e.to_string()))?;
        Ok(record)
    }

    /// Serialize a record into an item, validating it first.
    pub fn encode(record: &T) -> Result<Item> {
        record
            .validate()
            .map_err(|e| StorageError::Validation(e.to_string()))?;
        match serde_json::to_value(record)? {
            Value::Object(item) => Ok(item),
            other => Err(StorageError::Validation(format!(
                "record serialized to {other} instead of an object"
            ))),
        }
    }

    pub async fn get(&self, key: &Key) -> Result<T> {
        Self::decode(self.store.get(key).await?)
    }

    pub async fn create(&self, key: &Key, record: &T) -> Result<T> {
        let item = Self::encode(record)?;
        Self::decode(self.store.create(key, item).await?)
    }

    pub async fn update(&self, key: &Key, patch: Patch, options: UpdateOptions) -> Result<T> {
        Self::decode(self.store.update(key, patch, options).await?)
    }

    pub async fn delete(&self, key: &Key) -> Result<T> {
        Self::decode(self.store.delete(key).await?)
    }

    pub async fn scan(&self, options: ScanOptions) -> Result<Page<T>> {
        let page = self.store.scan(options).await?;
        Ok(Self::keep_valid(page))
    }

    /// Scan, keeping only items whose key passes `matches`. Other entity
    /// kinds sharing the table are skipped before decoding.
    pub async fn scan_matching<F>(&self, options: ScanOptions, matches: F) -> Result<Page<T>>
    where
        F: Fn(&Key) -> bool,
    {
        let schema = self.store.key_schema().clone();
        let mut page = self.store.scan(options).await?;
        page.items
            .retain(|item| schema.key_of(item).is_some_and(|key| matches(&key)));
        Ok(Self::keep_valid(page))
    }

    pub async fn query(&self, partition_key: &str, options: QueryOptions) -> Result<Page<T>> {
        let page = self.store.query(partition_key, options).await?;
        Ok(Self::keep_valid(page))
    }

    fn keep_valid(page: Page<Item>) -> Page<T> {
        let items = page
            .items
            .into_iter()
            .filter_map(|item| {
                let shown = Value::Object(item.clone()).to_string();
                match Self::decode(item) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        error!(item = %shown, error = %e, "Invalid item found in store, skipping");
                        None
                    }
                }
            })
            .collect();
        Page {
            items,
            cursor: page.cursor,
        }
    }
}
