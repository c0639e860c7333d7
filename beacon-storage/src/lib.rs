//! Durable storage layer for the Beacon telemetry SDK.
//!
//! Holds events that overflowed the in-memory queue so they survive a
//! process restart. The store is a single JSON file rewritten atomically
//! (write to a sibling temp file, fsync, rename) on every mutation, so a
//! crash at any point leaves either the old or the new contents on disk.

mod error;
mod overflow_store;

pub use error::{StorageError, StorageResult};
pub use overflow_store::{DurableOverflowStore, StoredEvent, STORAGE_FILE_NAME};
