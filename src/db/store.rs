use std::{collections::HashMap, sync::Arc};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;

pub const KEY_TOTAL_ANALYZED: &str = "totalAnalyzed";
pub const KEY_TOXIC_COUNT: &str = "toxicCount";
pub const KEY_BACKEND_URL: &str = "backendUrl";
pub const KEY_IS_ENABLED: &str = "isEnabled";
pub const KEY_INSTALLED_VERSION: &str = "installedVersion";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored value is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreEntries = HashMap<String, Value>;

/// Durable key-value contract. `get` returns only the keys that exist.
pub trait KeyValueStore: Send + Sync {
    fn get<'a>(&'a self, keys: &'a [&'a str]) -> BoxFuture<'a, Result<StoreEntries, StoreError>>;

    fn set(&self, entries: StoreEntries) -> BoxFuture<'_, Result<(), StoreError>>;
}

#[derive(Clone)]
pub struct StoreReader {
    store: Arc<dyn KeyValueStore>,
}

impl StoreReader {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, keys: &[&str]) -> Result<StoreEntries, StoreError> {
        self.store.get(keys).await
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<StoreEntries>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StoreEntries {
        self.entries.lock().clone()
    }
}

impl KeyValueStore for MemoryStore {
    fn get<'a>(&'a self, keys: &'a [&'a str]) -> BoxFuture<'a, Result<StoreEntries, StoreError>> {
        let entries = self.entries.lock();
        let found = keys
            .iter()
            .filter_map(|key| entries.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect();
        Box::pin(async move { Ok(found) })
    }

    fn set(&self, entries: StoreEntries) -> BoxFuture<'_, Result<(), StoreError>> {
        self.entries.lock().extend(entries);
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[derive(Default)]
    pub struct FlakyStore {
        pub inner: MemoryStore,
        pub fail_reads: AtomicBool,
        pub fail_writes: AtomicBool,
    }

    impl KeyValueStore for FlakyStore {
        fn get<'a>(
            &'a self,
            keys: &'a [&'a str],
        ) -> BoxFuture<'a, Result<StoreEntries, StoreError>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Box::pin(async { Err(StoreError::Unavailable("read refused".into())) });
            }
            self.inner.get(keys)
        }

        fn set(&self, entries: StoreEntries) -> BoxFuture<'_, Result<(), StoreError>> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Box::pin(async { Err(StoreError::Unavailable("write refused".into())) });
            }
            self.inner.set(entries)
        }
    }
}
