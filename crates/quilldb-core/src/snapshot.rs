//! Read-only snapshots (C9/C10): a consistent view of committed data as of
//! one LSN, isolated from every subsequent writer per spec.md §5's "readers
//! observe exactly those transactions whose commit LSN is <= their snapshot
//! LSN."

use std::sync::Arc;

use parking_lot::Mutex;
use quilldb_btree::PageRead;
use quilldb_error::{QuillError, Result};
use quilldb_mvcc::{ReaderId, ReaderRegistry};
use quilldb_types::{Lsn, PageBuf, PageId, PageSize};
use quilldb_vfs::Vfs;

use crate::catalog::{Catalog, IndexRecord, TableRecord, ViewRecord};
use crate::db::Inner;

/// A read-only view of the database frozen at `snapshot_lsn`. Reading never
/// blocks the writer and never takes the write lock; it only ever takes the
/// same short `Inner` mutex a writer briefly touches per page access.
pub struct Snapshot<V: Vfs> {
    shared: Arc<Mutex<Inner<V>>>,
    readers: Arc<ReaderRegistry>,
    reader_id: ReaderId,
    snapshot_lsn: Lsn,
    catalog: Catalog,
}

impl<V: Vfs> Snapshot<V> {
    pub(crate) fn new(
        shared: Arc<Mutex<Inner<V>>>,
        readers: Arc<ReaderRegistry>,
        reader_id: ReaderId,
        snapshot_lsn: Lsn,
        catalog: Catalog,
    ) -> Self {
        Self {
            shared,
            readers,
            reader_id,
            snapshot_lsn,
            catalog,
        }
    }

    #[must_use]
    pub const fn snapshot_lsn(&self) -> Lsn {
        self.snapshot_lsn
    }

    #[must_use]
    pub const fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn table(&self, name: &str) -> Option<&TableRecord> {
        self.catalog.table(name)
    }

    pub fn index(&self, name: &str) -> Option<&IndexRecord> {
        self.catalog.index(name)
    }

    pub fn view(&self, name: &str) -> Option<&ViewRecord> {
        self.catalog.view(name)
    }

    pub fn btree_find(&mut self, root: PageId, key: u64) -> Result<Option<Vec<u8>>> {
        quilldb_btree::find(self, root, key)
    }

    pub fn btree_contains(&mut self, root: PageId, key: u64) -> Result<bool> {
        quilldb_btree::contains(self, root, key)
    }

    pub fn btree_cursor(&mut self, root: PageId) -> Result<quilldb_btree::Cursor<'_, Self>> {
        quilldb_btree::open_cursor(self, root)
    }

    pub fn btree_cursor_at(&mut self, root: PageId, start: u64) -> Result<quilldb_btree::Cursor<'_, Self>> {
        quilldb_btree::open_cursor_at(self, root, start)
    }

    pub fn btree_utilization(&mut self, root: PageId) -> Result<f64> {
        quilldb_btree::utilization(self, root)
    }
}

impl<V: Vfs> PageRead for Snapshot<V> {
    fn read(&mut self, page_id: PageId) -> Result<PageBuf> {
        let mut inner = self.shared.lock();
        if self.snapshot_lsn < inner.invalidated_before {
            return Err(QuillError::snapshot_invalidated());
        }
        if let Some(location) = inner.wal.index().lookup(page_id, self.snapshot_lsn) {
            return inner.wal.read_frame_image(location);
        }
        let epoch = inner.checkpoint_epoch;
        inner.pager.read_base_image(page_id, epoch)
    }

    fn page_size(&self) -> PageSize {
        self.shared.lock().header.page_size
    }
}

impl<V: Vfs> Drop for Snapshot<V> {
    fn drop(&mut self) {
        self.readers.release(self.reader_id);
    }
}
