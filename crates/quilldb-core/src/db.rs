//! The transaction controller and public facade (C10): `Db` ties the pager,
//! WAL, header, catalog and reader registry together behind one shared,
//! mutex-protected `Inner`, and hands out [`Snapshot`]s and [`WriteTxn`]s per
//! spec.md §4.9's state machine.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use quilldb_btree::{DbHeader, PageRead};
use quilldb_error::Result;
use quilldb_mvcc::ReaderRegistry;
use quilldb_pager::Pager;
use quilldb_types::{Lsn, PageId};
use quilldb_vfs::Vfs;
use quilldb_wal::{CheckpointStats, WalFile};
use tracing::info;

use crate::catalog::Catalog;
use crate::options::OpenOptions;
use crate::snapshot::Snapshot;
use crate::txn::WriteTxn;

/// Shared, mutex-protected engine state. Both readers and the one active
/// writer take this lock for short, bounded critical sections — never across
/// a VFS call — per spec.md §5's "short internal locks" rule.
pub(crate) struct Inner<V: Vfs> {
    pub(crate) pager: Pager<V>,
    pub(crate) wal: WalFile<V::File>,
    pub(crate) header: DbHeader,
    pub(crate) catalog: Catalog,
    /// Bumped each checkpoint; doubles as the pager cache's base-image
    /// generation so a stale, pre-checkpoint cache entry can never be served
    /// to a reader expecting the post-checkpoint main-file image.
    pub(crate) checkpoint_epoch: Lsn,
    /// The floor below which a reader's snapshot is no longer reconstructible
    /// because `force_truncate_on_timeout` retired WAL frames past it.
    pub(crate) invalidated_before: Lsn,
    last_checkpoint_at: Instant,
}

/// Blocking single-writer gate: `begin_write` waits here rather than failing
/// immediately, matching spec.md §4.9's "serializes writers via a single
/// write lock."
pub(crate) struct WriteGate {
    active: Mutex<bool>,
    cv: Condvar,
}

impl WriteGate {
    fn new() -> Self {
        Self {
            active: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn acquire(&self) {
        let mut active = self.active.lock();
        while *active {
            self.cv.wait(&mut active);
        }
        *active = true;
    }

    pub(crate) fn release(&self) {
        let mut active = self.active.lock();
        *active = false;
        drop(active);
        self.cv.notify_one();
    }
}

/// A snapshot of point-in-time engine metrics for diagnostics, not wired to
/// any telemetry exporter (spec.md's Non-goals exclude that layer; this is
/// just the plain struct an embedder can log itself).
#[derive(Debug, Clone, Copy)]
pub struct DbStats {
    pub reader_count: usize,
    pub wal_bytes: u64,
    pub wal_frame_count: usize,
    pub cache_len: usize,
    pub cache_evictions: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub last_durable_lsn: Lsn,
    pub schema_cookie: u32,
}

/// An open database: one main file plus its `-wal` sibling.
pub struct Db<V: Vfs> {
    shared: Arc<Mutex<Inner<V>>>,
    readers: Arc<ReaderRegistry>,
    write_gate: Arc<WriteGate>,
    options: OpenOptions,
    path: PathBuf,
}

struct BootstrapReader<'a, V: Vfs> {
    pager: &'a mut Pager<V>,
    wal: &'a WalFile<V::File>,
    snapshot: Lsn,
}

impl<V: Vfs> PageRead for BootstrapReader<'_, V> {
    fn read(&mut self, page_id: PageId) -> Result<quilldb_types::PageBuf> {
        if let Some(location) = self.wal.index().lookup(page_id, self.snapshot) {
            return self.wal.read_frame_image(location);
        }
        self.pager.read_base_image(page_id, Lsn::ZERO)
    }

    fn page_size(&self) -> quilldb_types::PageSize {
        self.pager.page_size()
    }
}

fn wal_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push("-wal");
    PathBuf::from(os)
}

impl<V: Vfs> Db<V> {
    /// Opens (creating if absent) the database at `path` with `options`.
    /// Bootstraps a fresh file with an empty header and catalog root, or
    /// replays the WAL and reloads the catalog by full scan for an existing
    /// one, repairing any `next_rowid` counters a crash left stale.
    pub fn open(vfs: &V, path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let path = path.as_ref();
        let page_size = options.resolved_page_size();
        let mut pager = Pager::open(vfs, path, page_size, options.resolved_cache_pages()?)?;

        let header = if pager.file_size_pages()? == 0 {
            let header_id = pager.extend_file_by_one_page()?;
            debug_assert!(header_id.is_header());
            let catalog_root = pager.extend_file_by_one_page()?;
            let leaf = quilldb_btree::encode_leaf(page_size, &[], PageId::HEADER)?;
            pager.write_through(catalog_root, Lsn::ZERO, &leaf)?;
            let mut header = DbHeader::new(page_size);
            header.catalog_root = catalog_root;
            pager.write_through(PageId::HEADER, Lsn::ZERO, &header.encode())?;
            pager.sync_main_file()?;
            info!(path = %path.display(), page_size = page_size.as_u32(), "created new database");
            header
        } else {
            let buf = pager.read_base_image(PageId::HEADER, Lsn::ZERO)?;
            DbHeader::decode(&buf, page_size)?
        };

        let wal_path = wal_path_for(path);
        let wal: WalFile<V::File> = WalFile::open(vfs, &wal_path, header.page_size)?;
        let snapshot_lsn = wal.last_durable_lsn();

        let header = match wal.index().lookup(PageId::HEADER, snapshot_lsn) {
            Some(location) => {
                let buf = wal.read_frame_image(location)?;
                DbHeader::decode(&buf, page_size)?
            }
            None => header,
        };

        let mut catalog = {
            let mut reader = BootstrapReader {
                pager: &mut pager,
                wal: &wal,
                snapshot: snapshot_lsn,
            };
            Catalog::load(&mut reader, header.catalog_root)?
        };
        {
            let mut reader = BootstrapReader {
                pager: &mut pager,
                wal: &wal,
                snapshot: snapshot_lsn,
            };
            catalog.repair_next_rowids(&mut reader)?;
        }

        let inner = Inner {
            pager,
            wal,
            header,
            catalog,
            checkpoint_epoch: Lsn::ZERO,
            invalidated_before: Lsn::ZERO,
            last_checkpoint_at: Instant::now(),
        };

        Ok(Self {
            shared: Arc::new(Mutex::new(inner)),
            readers: Arc::new(ReaderRegistry::new()),
            write_gate: Arc::new(WriteGate::new()),
            options,
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Begins a read-only snapshot at the current last-durable LSN. Lock-free
    /// with respect to the writer (only the reader registry and a brief
    /// `Inner` lock are touched), per spec.md §4.9.
    pub fn begin_read(&self) -> Snapshot<V> {
        let (snapshot_lsn, catalog) = {
            let inner = self.shared.lock();
            (inner.wal.last_durable_lsn(), inner.catalog.clone())
        };
        let reader_id = self.readers.begin_read(snapshot_lsn);
        Snapshot::new(
            Arc::clone(&self.shared),
            Arc::clone(&self.readers),
            reader_id,
            snapshot_lsn,
            catalog,
        )
    }

    /// Blocks until the single write lock is free, then begins a write
    /// transaction against the current committed state.
    pub fn begin_write(&self) -> WriteTxn<V> {
        self.write_gate.acquire();
        WriteTxn::begin(Arc::clone(&self.shared), Arc::clone(&self.write_gate))
    }

    /// Runs a checkpoint: writes through every page whose newest WAL frame is
    /// at or before the safe retire bound, fsyncs the main file, and
    /// truncates the WAL if nothing newer remains. The retire bound is
    /// `min(last_durable_lsn, oldest_active_reader_lsn)` unless
    /// `force_truncate_on_timeout` is set and a reader has overstayed
    /// `reader_timeout_after`, in which case that reader is invalidated
    /// instead of blocking the checkpoint (spec.md §4.4/§5, Open Question).
    pub fn checkpoint(&self) -> Result<CheckpointStats> {
        let mut inner = self.shared.lock();
        let last_durable = inner.wal.last_durable_lsn();
        let oldest_reader = self.readers.oldest_active_lsn();
        let safe_bound = oldest_reader.map_or(last_durable, |r| r.min(last_durable));

        let long_readers = self
            .readers
            .long_readers(self.options.reader_timeout_after_setting());
        let force = self.options.force_truncate_on_timeout_setting() && !long_readers.is_empty();
        let retire_through = if force { last_durable } else { safe_bound };

        if force && retire_through > safe_bound {
            inner.invalidated_before = inner.invalidated_before.max(retire_through);
            tracing::warn!(
                retire_through = %retire_through,
                safe_bound = %safe_bound,
                "checkpoint forced past a long-held reader snapshot; it is now invalidated"
            );
        }

        inner.checkpoint_epoch = inner.checkpoint_epoch.next();
        let epoch = inner.checkpoint_epoch;
        let Inner { pager, wal, .. } = &mut *inner;
        let stats = wal.checkpoint(
            retire_through,
            |page_id, image| pager.write_through(page_id, epoch, image),
            || pager.sync_main_file(),
        )?;
        inner.last_checkpoint_at = Instant::now();
        Ok(stats)
    }

    /// Runs a checkpoint only if the WAL has grown past
    /// `checkpoint_wal_pages` frames, or `checkpoint_interval` has elapsed
    /// since the last checkpoint. Intended to be called by the embedder after
    /// commits rather than on a background timer (spec.md's Non-goals exclude
    /// a background thread).
    pub fn maybe_checkpoint(&self) -> Result<Option<CheckpointStats>> {
        let due = {
            let inner = self.shared.lock();
            let frame_due = inner.wal.frame_count() >= self.options.checkpoint_wal_pages_threshold();
            let time_due = self
                .options
                .checkpoint_interval_setting()
                .is_some_and(|interval| inner.last_checkpoint_at.elapsed() >= interval);
            frame_due || time_due
        };
        if due {
            Ok(Some(self.checkpoint()?))
        } else {
            Ok(None)
        }
    }

    #[must_use]
    pub fn stats(&self) -> DbStats {
        let inner = self.shared.lock();
        DbStats {
            reader_count: self.readers.active_count(),
            wal_bytes: inner.wal.byte_len(),
            wal_frame_count: inner.wal.frame_count(),
            cache_len: inner.pager.cache_len(),
            cache_evictions: inner.pager.cache_evictions(),
            cache_hits: inner.pager.cache_hits(),
            cache_misses: inner.pager.cache_misses(),
            last_durable_lsn: inner.wal.last_durable_lsn(),
            schema_cookie: inner.header.schema_cookie,
        }
    }

    /// How long a reader may hold a snapshot before it shows up in
    /// diagnostics / becomes eligible for forced invalidation.
    #[must_use]
    pub fn reader_warn_after(&self) -> Duration {
        self.options.reader_warn_after_setting()
    }
}
