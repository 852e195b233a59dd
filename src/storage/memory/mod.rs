//! In-memory KeyedStore implementation.
//!
//! Keeps items in a `BTreeMap` ordered by key so scans and queries page the
//! same way every time. Conditional updates follow the same rules as the
//! DynamoDB backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{Number, Value};
use tokio::sync::RwLock;

use crate::storage::{
    Cursor, FieldAction, Item, Key, KeySchema, KeyedStore, Page, Patch, QueryOptions, Result,
    ReturnValues, ScanOptions, StorageError, UpdateOptions,
};

/// In-memory keyed store.
#[derive(Default)]
pub struct MemoryStore {
    schema: KeySchema,
    items: RwLock<BTreeMap<Key, Item>>,
    fail_all: RwLock<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(schema: KeySchema) -> Self {
        Self {
            schema,
            ..Self::default()
        }
    }

    /// Make every subsequent operation fail with a backend error.
    pub async fn set_fail_all(&self, fail: bool) {
        *self.fail_all.write().await = fail;
    }

    /// Store an item as-is, bypassing all checks.
    pub async fn put_raw(&self, key: Key, mut item: Item) {
        self.schema.stamp(&key, &mut item);
        self.items.write().await.insert(key, item);
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    async fn check_available(&self) -> Result<()> {
        if *self.fail_all.read().await {
            return Err(StorageError::Backend("store unavailable".to_string()));
        }
        Ok(())
    }

    fn key_only(&self, key: &Key) -> Item {
        let mut item = Item::new();
        self.schema.stamp(key, &mut item);
        item
    }
}

/// Add `delta` to a stored number; a missing or null field counts as zero.
fn accumulate(field: &str, current: Option<&Value>, delta: &Value) -> Result<Value> {
    let not_numeric = || StorageError::Validation(format!("field {field} is not numeric"));
    let delta = delta.as_number().ok_or_else(not_numeric)?;
    let current = match current {
        None | Some(Value::Null) => return Ok(Value::Number(delta.clone())),
        Some(value) => value.as_number().ok_or_else(not_numeric)?,
    };

    if let (Some(a), Some(b)) = (current.as_i64(), delta.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Ok(Value::from(sum));
        }
    }
    let sum = current.as_f64().unwrap_or_default() + delta.as_f64().unwrap_or_default();
    Number::from_f64(sum)
        .map(Value::Number)
        .ok_or_else(|| StorageError::Validation(format!("field {field} overflowed")))
}

/// Take one page from an ordered iterator.
fn paginate<'a>(
    mut entries: impl Iterator<Item = (&'a Key, &'a Item)>,
    limit: Option<u32>,
) -> Result<Page<Item>> {
    let limit = limit.map(|l| l.max(1) as usize).unwrap_or(usize::MAX);
    let mut items = Vec::new();
    let mut last_key = None;

    for (key, item) in entries.by_ref() {
        if items.len() == limit {
            // More remain past this page.
            let cursor = last_key.map(Cursor::encode).transpose()?;
            return Ok(Page { items, cursor });
        }
        items.push(item.clone());
        last_key = Some(key);
    }

    Ok(Page {
        items,
        cursor: None,
    })
}

#[async_trait]
impl KeyedStore for MemoryStore {
    fn key_schema(&self) -> &KeySchema {
        &self.schema
    }

    async fn get(&self, key: &Key) -> Result<Item> {
        self.check_available().await?;
        self.items
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.clone()))
    }

    async fn create(&self, key: &Key, mut item: Item) -> Result<Item> {
        self.check_available().await?;
        let mut items = self.items.write().await;
        if items.contains_key(key) {
            return Err(StorageError::Conflict {
                key: key.clone(),
                reason: "item already exists".to_string(),
            });
        }
        self.schema.stamp(key, &mut item);
        items.insert(key.clone(), item.clone());
        Ok(item)
    }

    async fn update(&self, key: &Key, patch: Patch, options: UpdateOptions) -> Result<Item> {
        self.check_available().await?;
        if patch.is_empty() {
            return Err(StorageError::Validation("update patch is empty".to_string()));
        }
        let mut items = self.items.write().await;
        let original = items.get(key).cloned();

        if original.is_none() && !options.create_if_missing {
            return Err(StorageError::NotFound(key.clone()));
        }

        if let (Some(fence), Some(stored)) = (&options.offset_fence, &original) {
            match stored.get(&fence.attribute) {
                None | Some(Value::Null) => {}
                Some(value) => {
                    let last = value.as_i64().ok_or_else(|| {
                        StorageError::Validation(format!(
                            "offset attribute {} is not an integer",
                            fence.attribute
                        ))
                    })?;
                    if last >= fence.offset {
                        return Err(StorageError::Conflict {
                            key: key.clone(),
                            reason: format!("offset {} already applied (last {})", fence.offset, last),
                        });
                    }
                }
            }
        }

        let mut updated = original.clone().unwrap_or_default();
        self.schema.stamp(key, &mut updated);
        for (field, value) in patch.fields() {
            if self.schema.is_key_attribute(field) {
                return Err(StorageError::Validation(format!(
                    "key attribute {field} cannot be updated"
                )));
            }
            match value {
                None => {
                    updated.remove(field);
                }
                Some(value) => {
                    let value = match options.action_for(field) {
                        FieldAction::Replace => value.clone(),
                        FieldAction::Accumulate => accumulate(field, updated.get(field), value)?,
                    };
                    updated.insert(field.to_string(), value);
                }
            }
        }

        items.insert(key.clone(), updated.clone());
        Ok(match options.return_values {
            ReturnValues::Updated => updated,
            ReturnValues::Original => original.unwrap_or_else(|| self.key_only(key)),
        })
    }

    async fn delete(&self, key: &Key) -> Result<Item> {
        self.check_available().await?;
        self.items
            .write()
            .await
            .remove(key)
            .ok_or_else(|| StorageError::NotFound(key.clone()))
    }

    async fn scan(&self, options: ScanOptions) -> Result<Page<Item>> {
        self.check_available().await?;
        let after = options.cursor.as_ref().map(Cursor::key).transpose()?;
        let items = self.items.read().await;
        let entries = items
            .iter()
            .filter(|(key, _)| after.as_ref().map_or(true, |after| *key > after));
        paginate(entries, options.limit)
    }

    async fn query(&self, partition_key: &str, options: QueryOptions) -> Result<Page<Item>> {
        self.check_available().await?;
        let after = options.cursor.as_ref().map(Cursor::key).transpose()?;
        let items = self.items.read().await;
        let prefix = options.sort_key_prefix.as_deref().unwrap_or("");

        let mut entries: Vec<(&Key, &Item)> = items
            .iter()
            .filter(|(key, _)| key.pk == partition_key)
            .filter(|(key, _)| key.sk.as_deref().unwrap_or("").starts_with(prefix))
            .collect();
        if options.descending {
            entries.reverse();
        }

        let entries = entries.into_iter().filter(|(key, _)| match &after {
            None => true,
            Some(after) if options.descending => *key < after,
            Some(after) => *key > after,
        });
        paginate(entries, options.limit)
    }
}

#[cfg(test)]
mod tests;
