//! Keyed document storage.
//!
//! A `KeyedStore` holds schemaless items addressed by a partition key and an
//! optional sort key. Updates are conditional: a field can be replaced,
//! accumulated (numeric add) or removed, the item can be required to exist,
//! and an offset fence rejects writes that are not strictly newer than the
//! last one applied.
//!
//! Backends:
//! - `MemoryStore`: in-process, used for tests and standalone runs
//! - `DynamoKeyedStore`: DynamoDB (feature `dynamo`)

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod cursor;
pub mod memory;
pub mod pool;
pub mod typed;

#[cfg(feature = "dynamo")]
pub mod dynamo;

pub use cursor::Cursor;
pub use memory::MemoryStore;
pub use pool::{StoreEndpoint, StorePool};
pub use typed::TypedStore;

#[cfg(feature = "dynamo")]
pub use dynamo::DynamoKeyedStore;

/// A stored item: attribute name to JSON value.
pub type Item = serde_json::Map<String, Value>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Item not found: {0}")]
    NotFound(Key),

    #[error("Conditional check failed for {key}: {reason}")]
    Conflict { key: Key, reason: String },

    #[error("Invalid pagination cursor: {0}")]
    InvalidCursor(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }

    /// Errors caused by the caller's input rather than the backend.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StorageError::NotFound(_)
                | StorageError::Conflict { .. }
                | StorageError::InvalidCursor(_)
                | StorageError::Validation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Primary key of an item.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key {
    pub pk: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sk: Option<String>,
}

impl Key {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: Some(sk.into()),
        }
    }

    /// Key for a table without a sort key.
    pub fn partition(pk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sk {
            Some(sk) => write!(f, "{}/{}", self.pk, sk),
            None => f.write_str(&self.pk),
        }
    }
}

/// Attribute names holding the partition and sort key in stored items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    pub partition_attribute: String,
    pub sort_attribute: Option<String>,
}

impl KeySchema {
    pub fn new(partition_attribute: impl Into<String>, sort_attribute: Option<&str>) -> Self {
        Self {
            partition_attribute: partition_attribute.into(),
            sort_attribute: sort_attribute.map(str::to_string),
        }
    }

    /// Whether `name` is one of the key attributes.
    pub fn is_key_attribute(&self, name: &str) -> bool {
        name == self.partition_attribute || self.sort_attribute.as_deref() == Some(name)
    }

    /// Write the key attributes into an item.
    pub fn stamp(&self, key: &Key, item: &mut Item) {
        item.insert(
            self.partition_attribute.clone(),
            Value::String(key.pk.clone()),
        );
        if let (Some(attr), Some(sk)) = (&self.sort_attribute, &key.sk) {
            item.insert(attr.clone(), Value::String(sk.clone()));
        }
    }

    /// Read the key attributes back out of an item.
    pub fn key_of(&self, item: &Item) -> Option<Key> {
        let pk = item.get(&self.partition_attribute)?.as_str()?.to_string();
        let sk = match &self.sort_attribute {
            Some(attr) => Some(item.get(attr)?.as_str()?.to_string()),
            None => None,
        };
        Some(Key { pk, sk })
    }
}

impl Default for KeySchema {
    fn default() -> Self {
        Self::new("PK", Some("SK"))
    }
}

/// How a patched field combines with the stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldAction {
    /// Overwrite the stored value.
    #[default]
    Replace,
    /// Add the patch value to the stored number; a missing field counts as zero.
    Accumulate,
}

/// Field changes for an update.
///
/// A field set to `None` is removed from the item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    fields: BTreeMap<String, Option<Value>>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a patch that replaces every field of `item`.
    pub fn from_item(item: Item) -> Self {
        Self {
            fields: item.into_iter().map(|(k, v)| (k, Some(v))).collect(),
        }
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), Some(value.into()));
        self
    }

    pub fn remove(mut self, field: impl Into<String>) -> Self {
        self.fields.insert(field.into(), None);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }
}

/// Which version of the item an update returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnValues {
    #[default]
    Updated,
    Original,
}

/// Guard that only lets an update through when `offset` is newer than the
/// value stored in `attribute` (or the attribute is absent).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetFence {
    pub attribute: String,
    pub offset: i64,
}

/// Options controlling a conditional update.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOptions {
    pub field_actions: HashMap<String, FieldAction>,
    pub create_if_missing: bool,
    pub offset_fence: Option<OffsetFence>,
    pub return_values: ReturnValues,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            field_actions: HashMap::new(),
            create_if_missing: false,
            offset_fence: None,
            return_values: ReturnValues::Updated,
        }
    }
}

impl UpdateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_action(mut self, field: impl Into<String>, action: FieldAction) -> Self {
        self.field_actions.insert(field.into(), action);
        self
    }

    pub fn create_if_missing(mut self) -> Self {
        self.create_if_missing = true;
        self
    }

    pub fn with_offset_fence(mut self, attribute: impl Into<String>, offset: i64) -> Self {
        self.offset_fence = Some(OffsetFence {
            attribute: attribute.into(),
            offset,
        });
        self
    }

    pub fn return_original(mut self) -> Self {
        self.return_values = ReturnValues::Original;
        self
    }

    pub fn action_for(&self, field: &str) -> FieldAction {
        self.field_actions.get(field).copied().unwrap_or_default()
    }
}

/// Options for a full-table scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanOptions {
    pub cursor: Option<Cursor>,
    pub limit: Option<u32>,
}

/// Options for a query within one partition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// Only return items whose sort key starts with this prefix.
    pub sort_key_prefix: Option<String>,
    pub descending: bool,
    pub cursor: Option<Cursor>,
    pub limit: Option<u32>,
}

impl QueryOptions {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            sort_key_prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    pub fn with_cursor(mut self, cursor: Option<Cursor>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One page of results. `cursor` is absent when the listing is exhausted.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub cursor: Option<Cursor>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            cursor: None,
        }
    }
}

/// Interface for keyed item storage.
///
/// Implementations:
/// - `MemoryStore`: in-memory, same conditional semantics
/// - `DynamoKeyedStore`: DynamoDB
#[async_trait]
pub trait KeyedStore: Send + Sync {
    /// Attribute names the key is stored under.
    fn key_schema(&self) -> &KeySchema;

    /// Fetch one item. Fails with `NotFound` when absent.
    async fn get(&self, key: &Key) -> Result<Item>;

    /// Insert a new item. Fails with `Conflict` when the key already exists.
    async fn create(&self, key: &Key, item: Item) -> Result<Item>;

    /// Apply a patch atomically.
    ///
    /// Fails with `NotFound` when the item is absent and
    /// `create_if_missing` is false, and with `Conflict` when the offset
    /// fence rejects the write. Returns the updated item, or the original
    /// one when `ReturnValues::Original` is requested (key attributes only
    /// if the item did not exist before).
    async fn update(&self, key: &Key, patch: Patch, options: UpdateOptions) -> Result<Item>;

    /// Remove an item and return what was stored. Fails with `NotFound`.
    async fn delete(&self, key: &Key) -> Result<Item>;

    /// List every item in the store, one page at a time.
    async fn scan(&self, options: ScanOptions) -> Result<Page<Item>>;

    /// List items of one partition ordered by sort key.
    async fn query(&self, partition_key: &str, options: QueryOptions) -> Result<Page<Item>>;
}
