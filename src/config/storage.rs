//! Storage configuration types.

use serde::Deserialize;

use crate::storage::StoreEndpoint;

/// Storage backend discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// In-process store; contents are lost on exit.
    #[default]
    Memory,
    Dynamo,
}

/// Keyed store configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    /// Custom endpoint URL, e.g. DynamoDB Local.
    pub endpoint: Option<String>,
    /// Table holding products, reviews and rating accumulators.
    pub table: String,
    /// AWS region; the SDK default chain applies when unset.
    pub region: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Memory,
            endpoint: None,
            table: "products".to_string(),
            region: None,
        }
    }
}

impl StorageConfig {
    pub fn endpoint(&self) -> StoreEndpoint {
        StoreEndpoint::new(self.endpoint.as_deref(), self.table.clone())
    }
}
