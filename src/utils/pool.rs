//! Get-or-create map of long-lived client handles.
//!
//! Clients are expensive to build, so each distinct key gets exactly one,
//! created on first use and shared afterwards. Creation happens under the
//! pool lock, so concurrent first callers never build duplicates. A failed
//! creation is not cached.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::Mutex;

pub struct ConnectionPool<K, V: ?Sized> {
    entries: Mutex<HashMap<K, Arc<V>>>,
}

impl<K, V: ?Sized> Default for ConnectionPool<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> ConnectionPool<K, V>
where
    K: Eq + Hash + Clone,
    V: ?Sized,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the handle for `key`, creating it with `init` if absent.
    pub async fn get_or_try_init<F, Fut, E>(&self, key: &K, init: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<V>, E>>,
    {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(key) {
            return Ok(existing.clone());
        }
        let created = init().await?;
        entries.insert(key.clone(), created.clone());
        Ok(created)
    }

    pub async fn get(&self, key: &K) -> Option<Arc<V>> {
        self.entries.lock().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Remove and return every handle, e.g. to close them on shutdown.
    pub async fn drain(&self) -> Vec<Arc<V>> {
        self.entries
            .lock()
            .await
            .drain()
            .map(|(_, handle)| handle)
            .collect()
    }
}
