#![forbid(unsafe_code)]

pub mod repository;
pub mod sqlite;

pub use repository::{InMemoryCache, ProgressCacheRepository, SnapshotRecord, StorageError};
pub use sqlite::{SqliteCache, SqliteInitError};
