//! Physical storage: the LMDB metadata store, the framed blob store and
//! the writer lock on the data directory.

pub mod blobs;
pub mod kv;
pub mod lock;

pub use blobs::{BlobBatch, BlobKind, BlobStore};
pub use kv::{KvBatch, KvStore};
pub use lock::StoreLockGuard;
