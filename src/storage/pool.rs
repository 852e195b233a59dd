//! Store handles shared per `(endpoint, table)`.

use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use super::{KeyedStore, Result};
use crate::utils::pool::ConnectionPool;

/// Physical location of a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreEndpoint {
    /// Custom endpoint URL (e.g. DynamoDB Local); `None` uses the default.
    pub endpoint: Option<String>,
    pub table: String,
}

impl StoreEndpoint {
    pub fn new(endpoint: Option<&str>, table: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.map(str::to_string),
            table: table.into(),
        }
    }
}

#[derive(Default)]
pub struct StorePool {
    stores: ConnectionPool<StoreEndpoint, dyn KeyedStore>,
}

impl StorePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the store for `endpoint`, connecting on first use.
    pub async fn get_or_connect<F, Fut>(
        &self,
        endpoint: &StoreEndpoint,
        connect: F,
    ) -> Result<Arc<dyn KeyedStore>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn KeyedStore>>>,
    {
        self.stores
            .get_or_try_init(endpoint, || async {
                debug!(table = %endpoint.table, endpoint = ?endpoint.endpoint, "Creating store client");
                connect().await
            })
            .await
    }

    pub async fn len(&self) -> usize {
        self.stores.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.stores.is_empty().await
    }
}
