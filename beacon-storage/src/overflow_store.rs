//! Bounded, evict-oldest event log persisted to a single file.

use crate::error::{StorageError, StorageResult};
use beacon_types::Event;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// File name of the overflow log inside the SDK data directory.
pub const STORAGE_FILE_NAME: &str = "beacon-events.json";

/// An event tagged with its queue sequence number.
///
/// Sequence numbers are assigned at enqueue time and only ever grow, so a
/// flush can acknowledge "everything up to N" without comparing payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub seq: u64,
    pub event: Event,
}

/// Persistent FIFO of overflowed events with a hard capacity.
///
/// Contents are mirrored in memory and the whole list is rewritten on every
/// mutation. The in-memory mirror is only updated after the write succeeds,
/// so a failed mutation leaves both views unchanged.
#[derive(Debug)]
pub struct DurableOverflowStore {
    path: PathBuf,
    capacity: usize,
    entries: VecDeque<StoredEvent>,
}

impl DurableOverflowStore {
    /// Opens the store at `path`, loading any events left by a previous run.
    ///
    /// A missing file is an empty store; the file is only created by the
    /// first mutation.
    pub fn open(path: impl Into<PathBuf>, capacity: usize) -> StorageResult<Self> {
        let path = path.into();
        let mut entries = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => VecDeque::new(),
            Ok(bytes) => serde_json::from_slice::<VecDeque<StoredEvent>>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => VecDeque::new(),
            Err(e) => return Err(e.into()),
        };

        if entries.len() > capacity {
            let excess = entries.len() - capacity;
            warn!(
                "overflow store holds {} events, above capacity {capacity}; dropping {excess} oldest",
                entries.len()
            );
            entries.drain(..excess);
        }

        debug!("opened overflow store at {} ({} events)", path.display(), entries.len());
        Ok(Self {
            path,
            capacity,
            entries,
        })
    }

    /// Opens the store, falling back to an empty one when the file is
    /// unreadable or corrupt. The bad file is replaced on the next write.
    pub fn open_or_empty(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let path = path.into();
        match Self::open(&path, capacity) {
            Ok(store) => store,
            Err(e) => {
                warn!("discarding unreadable overflow store {}: {e}", path.display());
                Self {
                    path,
                    capacity,
                    entries: VecDeque::new(),
                }
            }
        }
    }

    /// Appends a record, evicting the oldest entry if the store is full.
    ///
    /// Returns the evicted record, if any. Append and eviction land in the
    /// same write, so the file never holds more than `capacity` entries.
    pub fn append(&mut self, record: StoredEvent) -> StorageResult<Option<StoredEvent>> {
        let mut next = self.entries.clone();
        next.push_back(record);
        let evicted = if next.len() > self.capacity {
            next.pop_front()
        } else {
            None
        };
        self.commit(next)?;
        Ok(evicted)
    }

    /// Drops the oldest record.
    pub fn remove_oldest(&mut self) -> StorageResult<Option<StoredEvent>> {
        if self.entries.is_empty() {
            return Ok(None);
        }
        let mut next = self.entries.clone();
        let removed = next.pop_front();
        self.commit(next)?;
        Ok(removed)
    }

    /// Removes every record with `seq <= through`. Returns how many were removed.
    pub fn remove_through(&mut self, through: u64) -> StorageResult<usize> {
        let retained: VecDeque<StoredEvent> = self
            .entries
            .iter()
            .filter(|r| r.seq > through)
            .cloned()
            .collect();
        let removed = self.entries.len() - retained.len();
        if removed == 0 {
            return Ok(0);
        }
        if retained.is_empty() {
            self.clear()?;
        } else {
            self.commit(retained)?;
        }
        Ok(removed)
    }

    /// Removes every record. The empty list is written rather than the file
    /// deleted, so a stale copy can never reappear.
    pub fn clear(&mut self) -> StorageResult<()> {
        if self.entries.is_empty() && !self.path.exists() {
            return Ok(());
        }
        self.commit(VecDeque::new())
    }

    /// Events in chronological order.
    pub fn read_all(&self) -> Vec<Event> {
        self.entries.iter().map(|r| r.event.clone()).collect()
    }

    /// Records in chronological order.
    pub fn records(&self) -> impl Iterator<Item = &StoredEvent> {
        self.entries.iter()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Highest sequence number currently stored.
    pub fn last_seq(&self) -> Option<u64> {
        self.entries.iter().map(|r| r.seq).max()
    }

    fn commit(&mut self, next: VecDeque<StoredEvent>) -> StorageResult<()> {
        write_atomically(&self.path, &next)?;
        self.entries = next;
        Ok(())
    }
}

fn write_atomically(path: &Path, entries: &VecDeque<StoredEvent>) -> StorageResult<()> {
    let bytes = serde_json::to_vec(entries)?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut staging = NamedTempFile::new_in(parent)?;
    staging.write_all(&bytes)?;
    staging.as_file().sync_all()?;
    staging.persist(path).map_err(|e| StorageError::Persist {
        path: path.display().to_string(),
        source: e.error,
    })?;
    Ok(())
}
