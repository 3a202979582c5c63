use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use courier_common::{Signal, internal};
use dashmap::DashMap;
use tokio::{io::AsyncReadExt, sync::broadcast, time::Instant};

use crate::{CacheConfig, CacheError, ObjectStore};

#[derive(Debug)]
struct Entry {
    data: Arc<[u8]>,
    inserted_at: Instant,
}

/// A sharded, time-windowed, write-through cache of attachment bytes.
///
/// Safe to share between tasks without external locking. Concurrent misses
/// for the same name may both reach the store; the last insert wins.
pub struct AttachmentCache {
    store: Arc<dyn ObjectStore>,
    entries: DashMap<String, Entry>,
    total_bytes: AtomicU64,
    config: CacheConfig,
}

impl std::fmt::Debug for AttachmentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentCache")
            .field("entries", &self.entries.len())
            .field("total_bytes", &self.total_bytes())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AttachmentCache {
    pub fn new(store: Arc<dyn ObjectStore>, config: CacheConfig) -> Self {
        Self {
            store,
            entries: DashMap::with_shard_amount(config.shard_amount()),
            total_bytes: AtomicU64::new(0),
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Number of entries currently held, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes currently held across all entries.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// Fetch the bytes for `name`, reading through to storage on a miss.
    ///
    /// # Errors
    ///
    /// - [`CacheError::MaxEntrySize`] if the stored object is over
    ///   `max_entry_size`; the body is not read and nothing is cached
    /// - [`CacheError::NotFound`], [`CacheError::Storage`] or
    ///   [`CacheError::Io`] from the store
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get(&self, name: &str) -> Result<Arc<[u8]>, CacheError> {
        if let Some(data) = self.lookup(name) {
            internal!("Cache hit for {name}");
            return Ok(data);
        }

        let limit = self.config.max_entry_size;
        let object = self.store.open(name).await?;

        if object.size > limit {
            return Err(CacheError::MaxEntrySize {
                name: name.to_string(),
                size: object.size,
                limit,
            });
        }

        // Metadata may under-report; read at most one byte past the limit to
        // find out without buffering the whole object.
        let mut data = Vec::with_capacity(usize::try_from(object.size).unwrap_or_default());
        object
            .body
            .take(limit.saturating_add(1))
            .read_to_end(&mut data)
            .await?;

        let size = data.len() as u64;
        if size > limit {
            return Err(CacheError::MaxEntrySize {
                name: name.to_string(),
                size,
                limit,
            });
        }

        let data: Arc<[u8]> = data.into();
        self.insert(name, Arc::clone(&data));
        internal!("Cached {name} ({size} bytes)");

        Ok(data)
    }

    fn lookup(&self, name: &str) -> Option<Arc<[u8]>> {
        let entry = self.entries.get(name)?;
        (entry.inserted_at.elapsed() < self.config.life_window()).then(|| Arc::clone(&entry.data))
    }

    fn insert(&self, name: &str, data: Arc<[u8]>) {
        let size = data.len() as u64;
        let ceiling = self.config.hard_max_size;

        if ceiling > 0 && self.total_bytes().saturating_add(size) > ceiling {
            self.sweep();
            if self.total_bytes().saturating_add(size) > ceiling {
                internal!(
                    level = DEBUG,
                    "Cache is full ({} of {ceiling} bytes), not caching {name}",
                    self.total_bytes()
                );
                return;
            }
        }

        let replaced = self.entries.insert(
            name.to_string(),
            Entry {
                data,
                inserted_at: Instant::now(),
            },
        );

        self.total_bytes.fetch_add(size, Ordering::Relaxed);
        if let Some(old) = replaced {
            self.total_bytes
                .fetch_sub(old.data.len() as u64, Ordering::Relaxed);
        }
    }

    /// Drop every entry older than the life window. Returns how many were
    /// removed.
    pub fn sweep(&self) -> usize {
        let life_window = self.config.life_window();
        let mut removed = 0;
        let mut freed = 0;

        self.entries.retain(|_, entry| {
            let live = entry.inserted_at.elapsed() < life_window;
            if !live {
                removed += 1;
                freed += entry.data.len() as u64;
            }
            live
        });

        self.total_bytes.fetch_sub(freed, Ordering::Relaxed);
        removed
    }

    /// Sweep every clean window until shutdown.
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: broadcast::Receiver<Signal>) {
        let period = self.config.clean_window();
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        internal!("Sweeping attachment cache every {period:?}");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    internal!(level = INFO, "Attachment cache sweeper stopped");
                    return;
                }
                _ = interval.tick() => {
                    let removed = self.sweep();
                    if removed > 0 {
                        internal!(level = DEBUG, "Swept {removed} expired attachments");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::MemoryObjectStore;

    fn cache(store: &MemoryObjectStore, config: CacheConfig) -> AttachmentCache {
        AttachmentCache::new(Arc::new(store.clone()), config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_does_not_refetch() {
        let store = MemoryObjectStore::new();
        store.put("report.pdf", b"%PDF".to_vec());
        let cache = cache(&store, CacheConfig::default());

        let first = cache.get("report.pdf").await.unwrap();
        let second = cache.get("report.pdf").await.unwrap();

        assert_eq!(&*first, b"%PDF");
        assert_eq!(first, second);
        assert_eq!(store.opened(), 1);
        assert_eq!(cache.total_bytes(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_refetched() {
        let store = MemoryObjectStore::new();
        store.put("a.txt", b"one".to_vec());
        let cache = cache(
            &store,
            CacheConfig {
                life_window_secs: 10,
                ..Default::default()
            },
        );

        cache.get("a.txt").await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        store.put("a.txt", b"two".to_vec());

        assert_eq!(&*cache.get("a.txt").await.unwrap(), b"two");
        assert_eq!(store.opened(), 2);
        assert_eq!(cache.total_bytes(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let store = MemoryObjectStore::new();
        store.put("old", b"old".to_vec());
        store.put("new", b"fresh".to_vec());
        let cache = cache(
            &store,
            CacheConfig {
                life_window_secs: 10,
                ..Default::default()
            },
        );

        cache.get("old").await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        cache.get("new").await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_bytes(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_max_size_skips_caching() {
        let store = MemoryObjectStore::new();
        store.put("a", vec![0; 6]);
        store.put("b", vec![1; 6]);
        let cache = cache(
            &store,
            CacheConfig {
                hard_max_size: 10,
                ..Default::default()
            },
        );

        cache.get("a").await.unwrap();
        let b = cache.get("b").await.unwrap();

        assert_eq!(b.len(), 6);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_bytes(), 6);

        cache.get("b").await.unwrap();
        assert_eq!(store.opened(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_max_size_sweeps_first() {
        let store = MemoryObjectStore::new();
        store.put("a", vec![0; 6]);
        store.put("b", vec![1; 6]);
        let cache = cache(
            &store,
            CacheConfig {
                hard_max_size: 10,
                life_window_secs: 10,
                ..Default::default()
            },
        );

        cache.get("a").await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        cache.get("b").await.unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_bytes(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_every_clean_window() {
        let store = MemoryObjectStore::new();
        store.put("a", b"a".to_vec());
        let cache = Arc::new(cache(
            &store,
            CacheConfig {
                life_window_secs: 5,
                clean_window_secs: 10,
                ..Default::default()
            },
        ));
        let (tx, rx) = broadcast::channel(1);

        cache.get("a").await.unwrap();
        let sweeper = tokio::spawn(Arc::clone(&cache).run_sweeper(rx));

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(cache.len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(cache.len(), 0);

        tx.send(Signal::Shutdown).unwrap();
        sweeper.await.unwrap();
    }
}
