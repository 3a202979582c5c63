//! Attachment cache for courier.
//!
//! [`AttachmentCache`] maps an attachment name to its bytes. Misses are read
//! through from an [`ObjectStore`] (S3 in production, memory in tests),
//! checked against a per-entry size ceiling before the body is read, and kept
//! for a fixed life window. A sweeper task purges expired entries.

mod cache;
mod config;
mod error;
mod s3;
mod store;

pub use cache::AttachmentCache;
pub use config::{CacheConfig, StorageConfig};
pub use error::CacheError;
pub use s3::S3ObjectStore;
pub use store::{MemoryObjectStore, ObjectStore, StoredObject};
