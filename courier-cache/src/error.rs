use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// The stored object is larger than the per-entry ceiling. It is never
    /// cached.
    #[error("Attachment {name} is {size} bytes, over the {limit} byte limit")]
    MaxEntrySize { name: String, size: u64, limit: u64 },

    #[error("Attachment {0} not found")]
    NotFound(String),

    /// The object store failed to answer.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Failed to read attachment body: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// Returns `true` if fetching the same name again may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Io(_))
    }
}
