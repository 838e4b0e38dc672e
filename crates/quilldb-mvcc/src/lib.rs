//! The reader registry (C9): tracks in-flight readers and their snapshot
//! LSNs, gating checkpoint and WAL truncation per spec.md §4.8/§5.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use quilldb_types::Lsn;
use tracing::{debug, warn};

/// Identifies one registered reader. Opaque and monotonically assigned;
/// never reused while the registry is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReaderId(u64);

#[derive(Debug, Clone, Copy)]
struct ReaderEntry {
    snapshot_lsn: Lsn,
    started_at: Instant,
}

/// A snapshot of one active reader, returned by [`ReaderRegistry::long_readers`].
#[derive(Debug, Clone, Copy)]
pub struct LongReader {
    pub id: ReaderId,
    pub snapshot_lsn: Lsn,
    pub age: Duration,
}

#[derive(Debug, Default)]
struct Inner {
    readers: HashMap<ReaderId, ReaderEntry>,
    next_id: u64,
}

/// The set of active readers. `begin_read`/`release` are the only mutating
/// operations; everything else is a read-only query used by the checkpoint
/// path and diagnostics.
#[derive(Debug, Default)]
pub struct ReaderRegistry {
    inner: Mutex<Inner>,
}

impl ReaderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new reader at `snapshot_lsn`, lock-free with respect to
    /// writers per spec.md §4.9.
    pub fn begin_read(&self, snapshot_lsn: Lsn) -> ReaderId {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = ReaderId(inner.next_id);
        inner.readers.insert(
            id,
            ReaderEntry {
                snapshot_lsn,
                started_at: Instant::now(),
            },
        );
        debug!(reader_id = id.0, %snapshot_lsn, "reader registered");
        id
    }

    /// Unregisters `id`. Releasing an id that is not (or no longer)
    /// registered is a no-op, matching a reader that was force-invalidated
    /// by a checkpoint and is merely tearing itself down afterward.
    pub fn release(&self, id: ReaderId) {
        let mut inner = self.inner.lock();
        if inner.readers.remove(&id).is_some() {
            debug!(reader_id = id.0, "reader released");
        }
    }

    /// The oldest (smallest) snapshot LSN among active readers, or `None` if
    /// no reader is registered. Checkpoint must not retire frames newer than
    /// this without `force_truncate_on_timeout`.
    #[must_use]
    pub fn oldest_active_lsn(&self) -> Option<Lsn> {
        self.inner.lock().readers.values().map(|e| e.snapshot_lsn).min()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.lock().readers.len()
    }

    /// Readers whose snapshot has been held longer than `threshold`,
    /// oldest first. Used both for the `reader_warn_after` diagnostic and to
    /// decide whether `force_truncate_on_timeout` should act at all.
    #[must_use]
    pub fn long_readers(&self, threshold: Duration) -> Vec<LongReader> {
        let now = Instant::now();
        let inner = self.inner.lock();
        let mut long: Vec<LongReader> = inner
            .readers
            .iter()
            .filter_map(|(&id, entry)| {
                let age = now.saturating_duration_since(entry.started_at);
                (age >= threshold).then_some(LongReader {
                    id,
                    snapshot_lsn: entry.snapshot_lsn,
                    age,
                })
            })
            .collect();
        long.sort_by_key(|r| r.snapshot_lsn);
        if !long.is_empty() {
            warn!(count = long.len(), ?threshold, "long-held reader snapshots detected");
        }
        long
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_read_assigns_distinct_ids() {
        let registry = ReaderRegistry::new();
        let a = registry.begin_read(Lsn::new(1));
        let b = registry.begin_read(Lsn::new(2));
        assert_ne!(a, b);
        assert_eq!(registry.active_count(), 2);
    }

    #[test]
    fn oldest_active_lsn_tracks_minimum() {
        let registry = ReaderRegistry::new();
        assert_eq!(registry.oldest_active_lsn(), None);
        registry.begin_read(Lsn::new(5));
        let mid = registry.begin_read(Lsn::new(2));
        registry.begin_read(Lsn::new(9));
        assert_eq!(registry.oldest_active_lsn(), Some(Lsn::new(2)));
        registry.release(mid);
        assert_eq!(registry.oldest_active_lsn(), Some(Lsn::new(5)));
    }

    #[test]
    fn release_is_idempotent() {
        let registry = ReaderRegistry::new();
        let id = registry.begin_read(Lsn::new(1));
        registry.release(id);
        registry.release(id);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn long_readers_empty_for_fresh_registry() {
        let registry = ReaderRegistry::new();
        registry.begin_read(Lsn::new(1));
        assert!(registry.long_readers(Duration::from_secs(3600)).is_empty());
    }

    #[test]
    fn long_readers_reports_readers_past_threshold() {
        let registry = ReaderRegistry::new();
        registry.begin_read(Lsn::new(1));
        let long = registry.long_readers(Duration::from_nanos(0));
        assert_eq!(long.len(), 1);
        assert_eq!(long[0].snapshot_lsn, Lsn::new(1));
    }
}
