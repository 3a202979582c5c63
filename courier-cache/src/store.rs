//! The durable storage seam behind the cache.

use std::{
    collections::HashMap,
    io::Cursor,
    pin::Pin,
    sync::{
        Arc, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::CacheError;

/// An opened object: its size from metadata and an unread body.
pub struct StoredObject {
    pub size: u64,
    pub body: Pin<Box<dyn AsyncRead + Send>>,
}

impl std::fmt::Debug for StoredObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredObject")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Open `key` without reading its body.
    ///
    /// # Errors
    ///
    /// [`CacheError::NotFound`] if there is no such object, otherwise
    /// [`CacheError::Storage`].
    async fn open(&self, key: &str) -> Result<StoredObject, CacheError>;
}

/// Objects held in memory. Counts every `open` so tests can tell hits from
/// misses.
#[derive(Debug, Default, Clone)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<String, Arc<[u8]>>>>,
    opened: Arc<AtomicUsize>,
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: impl Into<String>, data: impl Into<Arc<[u8]>>) {
        if let Ok(mut objects) = self.objects.write() {
            objects.insert(key.into(), data.into());
        }
    }

    /// Number of times any object has been opened.
    #[must_use]
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn open(&self, key: &str) -> Result<StoredObject, CacheError> {
        self.opened.fetch_add(1, Ordering::SeqCst);

        let data = self
            .objects
            .read()
            .map_err(|err| CacheError::Storage(err.to_string()))?
            .get(key)
            .cloned()
            .ok_or_else(|| CacheError::NotFound(key.to_string()))?;

        Ok(StoredObject {
            size: data.len() as u64,
            body: Box::pin(Cursor::new(data)),
        })
    }
}
