//! The write transaction (C10, part): a single writer's dirty-page overlay
//! over the committed state, plus the LIFO savepoint stack (§4.9 SUPPLEMENT).
//!
//! A `WriteTxn` implements [`PageStore`] directly: `read` consults its own
//! dirty overlay before falling back to the WAL/main-file snapshot it was
//! opened against, and `alloc`/`free` thread through the page allocator
//! (§4.2) via a small adapter that writes allocator bookkeeping into the
//! same dirty overlay ordinary page writes use.

use hashbrown::HashMap;
use quilldb_btree::{PageRead, PageStore};
use quilldb_error::{QuillError, Result};
use quilldb_pager::PageSource;
use quilldb_types::{Cx, Lsn, PageBuf, PageId, PageSize};
use quilldb_vfs::Vfs;
use quilldb_wal::WriteBatch;
use tracing::{debug, error};

use crate::catalog::{Catalog, ColumnSpec, IndexKind, IndexRecord, TableRecord, ViewRecord};
use crate::db::{Inner, WriteGate};
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Clone)]
struct SavepointEntry {
    name: String,
    dirty: HashMap<PageId, PageBuf>,
    freelist_head: PageId,
    catalog_root: PageId,
    catalog: Catalog,
    schema_cookie: u32,
}

/// The single active write transaction. Readers never see any of a
/// `WriteTxn`'s uncommitted pages; the writer sees its own writes
/// immediately through the dirty overlay (read-your-writes, §5).
pub struct WriteTxn<V: Vfs> {
    shared: Arc<Mutex<Inner<V>>>,
    write_gate: Arc<WriteGate>,
    page_size: PageSize,
    snapshot_lsn: Lsn,
    commit_lsn: Lsn,
    dirty: HashMap<PageId, PageBuf>,
    freelist_head: PageId,
    catalog_root: PageId,
    schema_cookie: u32,
    catalog: Catalog,
    savepoints: Vec<SavepointEntry>,
    batch: Option<WriteBatch>,
    finished: bool,
}

impl<V: Vfs> WriteTxn<V> {
    pub(crate) fn begin(
        shared: Arc<Mutex<Inner<V>>>,
        write_gate: Arc<WriteGate>,
    ) -> Self {
        let mut inner = shared.lock();
        let snapshot_lsn = inner.wal.last_durable_lsn();
        let batch = inner.wal.begin_batch();
        let txn = Self {
            page_size: inner.header.page_size,
            snapshot_lsn,
            commit_lsn: snapshot_lsn.next(),
            dirty: HashMap::new(),
            freelist_head: inner.header.freelist_head,
            catalog_root: inner.header.catalog_root,
            schema_cookie: inner.header.schema_cookie,
            catalog: inner.catalog.clone(),
            savepoints: Vec::new(),
            batch: Some(batch),
            finished: false,
            shared: Arc::clone(&shared),
            write_gate,
        };
        drop(inner);
        txn
    }

    fn read_impl(&mut self, page_id: PageId) -> Result<PageBuf> {
        if let Some(buf) = self.dirty.get(&page_id) {
            return Ok(buf.clone());
        }
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

    /// Commits the transaction: every dirty page (plus the rewritten DB
    /// header) is appended as a WAL frame, the header frame doubles as the
    /// commit frame, and the batch is fsynced and published per the commit
    /// protocol in spec.md §4.4. Returns the transaction's commit LSN.
    pub fn commit(mut self) -> Result<Lsn> {
        let mut inner = self.shared.lock();
        let mut header = inner.header;
        header.freelist_head = self.freelist_head;
        header.catalog_root = self.catalog_root;
        header.schema_cookie = self.schema_cookie;
        header.last_durable_lsn = self.commit_lsn;
        let header_image = header.encode();

        let mut batch = self.batch.take().expect("batch present until finished");
        for (page_id, image) in &self.dirty {
            if page_id.is_header() {
                continue;
            }
            inner.wal.append_page(&mut batch, *page_id, self.commit_lsn, image)?;
        }
        inner.wal.commit(batch, self.commit_lsn, PageId::HEADER, &header_image)?;
        inner.header = header;
        inner.catalog = std::mem::take(&mut self.catalog);
        drop(inner);

        debug!(lsn = %self.commit_lsn, pages = self.dirty.len(), "write transaction committed");
        self.finished = true;
        self.write_gate.release();
        Ok(self.commit_lsn)
    }

    /// Discards every dirty page and truncates the WAL back to the
    /// pre-transaction tail (§4.4 "Rollback"); no fsync is required.
    pub fn rollback(mut self) -> Result<()> {
        let batch = self.batch.take().expect("batch present until finished");
        let mut inner = self.shared.lock();
        inner.wal.rollback(batch)?;
        drop(inner);
        debug!("write transaction rolled back");
        self.finished = true;
        self.write_gate.release();
        Ok(())
    }

    /// Pushes a named savepoint, capturing the transaction's current dirty
    /// overlay, freelist head, catalog root/state, and schema cookie so
    /// `rollback_to` can restore exactly this point without discarding the
    /// whole transaction (§4.9 SUPPLEMENT).
    pub fn savepoint(&mut self, name: impl Into<String>) {
        let name = name.into();
        debug!(savepoint = %name, depth = self.savepoints.len() + 1, "savepoint pushed");
        self.savepoints.push(SavepointEntry {
            name,
            dirty: self.dirty.clone(),
            freelist_head: self.freelist_head,
            catalog_root: self.catalog_root,
            catalog: self.catalog.clone(),
            schema_cookie: self.schema_cookie,
        });
    }

    /// Restores the transaction to the state captured by savepoint `name`,
    /// undoing everything written since, while keeping `name` itself (and
    /// anything before it) on the stack.
    pub fn rollback_to(&mut self, name: &str) -> Result<()> {
        let idx = self
            .savepoints
            .iter()
            .rposition(|sp| sp.name == name)
            .ok_or_else(|| QuillError::no_such_savepoint(name))?;
        let entry = self.savepoints[idx].clone();
        self.dirty = entry.dirty;
        self.freelist_head = entry.freelist_head;
        self.catalog_root = entry.catalog_root;
        self.catalog = entry.catalog;
        self.schema_cookie = entry.schema_cookie;
        self.savepoints.truncate(idx + 1);
        Ok(())
    }

    /// Drops savepoint `name` (and everything pushed after it) from the
    /// stack, keeping all work done since it — equivalent to folding that
    /// sub-scope into the enclosing transaction.
    pub fn release(&mut self, name: &str) -> Result<()> {
        let idx = self
            .savepoints
            .iter()
            .rposition(|sp| sp.name == name)
            .ok_or_else(|| QuillError::no_such_savepoint(name))?;
        self.savepoints.truncate(idx);
        Ok(())
    }

    #[must_use]
    pub fn savepoint_depth(&self) -> usize {
        self.savepoints.len()
    }

    #[must_use]
    pub const fn snapshot_lsn(&self) -> Lsn {
        self.snapshot_lsn
    }

    #[must_use]
    pub const fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    // -- Catalog mutation surface: each bumps the schema cookie (§3's "bumped
    // on DDL") and keeps `catalog_root` in step with any tree-root split. --

    fn catalog_mutate<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Catalog, &mut Self, PageId) -> Result<PageId>,
    {
        let mut catalog = std::mem::take(&mut self.catalog);
        let root = self.catalog_root;
        let new_root = f(&mut catalog, self, root)?;
        self.catalog = catalog;
        self.catalog_root = new_root;
        self.schema_cookie = self.schema_cookie.wrapping_add(1);
        Ok(())
    }

    pub fn save_table(&mut self, table: TableRecord) -> Result<()> {
        self.catalog_mutate(|catalog, txn, root| catalog.save_table(txn, root, table))
    }

    pub fn save_index(&mut self, index: IndexRecord) -> Result<()> {
        self.catalog_mutate(|catalog, txn, root| catalog.save_index(txn, root, index))
    }

    pub fn save_view(&mut self, view: ViewRecord) -> Result<()> {
        self.catalog_mutate(|catalog, txn, root| catalog.save_view(txn, root, view))
    }

    pub fn drop_table(&mut self, name: &str) -> Result<bool> {
        let mut dropped = false;
        self.catalog_mutate(|catalog, txn, root| {
            dropped = catalog.drop_table(txn, root, name)?;
            Ok(root)
        })?;
        Ok(dropped)
    }

    pub fn drop_index(&mut self, name: &str) -> Result<bool> {
        let mut dropped = false;
        self.catalog_mutate(|catalog, txn, root| {
            dropped = catalog.drop_index(txn, root, name)?;
            Ok(root)
        })?;
        Ok(dropped)
    }

    pub fn drop_view(&mut self, name: &str) -> Result<bool> {
        let mut dropped = false;
        self.catalog_mutate(|catalog, txn, root| {
            dropped = catalog.drop_view(txn, root, name)?;
            Ok(root)
        })?;
        Ok(dropped)
    }

    pub fn rename_view(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        self.catalog_mutate(|catalog, txn, root| catalog.rename_view(txn, root, old_name, new_name))
    }

    /// Creates a fresh, empty table: allocates a data-tree root page and
    /// registers it in the catalog with `next_rowid = 1`.
    pub fn create_table(&mut self, name: &str, columns: Vec<ColumnSpec>) -> Result<PageId> {
        if self.catalog.has_table_or_view(name) {
            return Err(QuillError::constraint(name));
        }
        let root = self.alloc()?;
        let leaf = quilldb_btree::encode_leaf(self.page_size, &[], PageId::HEADER)?;
        self.write(root, leaf)?;
        self.save_table(TableRecord {
            name: name.to_string(),
            root_page: root,
            next_rowid: 1,
            columns,
        })?;
        Ok(root)
    }

    /// Creates a fresh, empty secondary index tree and registers it.
    pub fn create_index(
        &mut self,
        name: &str,
        table: &str,
        columns: Vec<String>,
        kind: IndexKind,
        unique: bool,
    ) -> Result<PageId> {
        if self.catalog.index(name).is_some() {
            return Err(QuillError::constraint(name));
        }
        let root = self.alloc()?;
        let leaf = quilldb_btree::encode_leaf(self.page_size, &[], PageId::HEADER)?;
        self.write(root, leaf)?;
        self.save_index(IndexRecord {
            name: name.to_string(),
            table: table.to_string(),
            columns,
            root_page: root,
            kind,
            unique,
        })?;
        Ok(root)
    }

    /// Allocates the next rowid for `table` and persists the incremented
    /// counter in the same transaction (§4.7's `next_rowid` field).
    pub fn next_rowid(&mut self, table: &str) -> Result<u64> {
        let record = self
            .catalog
            .table(table)
            .cloned()
            .ok_or_else(|| QuillError::internal(format!("next_rowid: no such table {table}")))?;
        let rowid = record.next_rowid;
        let mut updated = record;
        updated.next_rowid = rowid + 1;
        self.save_table(updated)?;
        Ok(rowid)
    }

    // -- Generic B+Tree operations over any tree root this transaction owns. --

    pub fn btree_find(&mut self, root: PageId, key: u64) -> Result<Option<Vec<u8>>> {
        quilldb_btree::find(self, root, key)
    }

    pub fn btree_contains(&mut self, root: PageId, key: u64) -> Result<bool> {
        quilldb_btree::contains(self, root, key)
    }

    pub fn btree_insert(&mut self, root: PageId, key: u64, value: &[u8], unique: bool) -> Result<PageId> {
        quilldb_btree::insert(self, root, key, value, unique)
    }

    pub fn btree_update(&mut self, root: PageId, key: u64, value: &[u8]) -> Result<bool> {
        quilldb_btree::update(self, root, key, value)
    }

    pub fn btree_delete(&mut self, root: PageId, key: u64) -> Result<bool> {
        quilldb_btree::delete(self, root, key)
    }

    pub fn btree_delete_key_value(&mut self, root: PageId, key: u64, value: &[u8]) -> Result<bool> {
        quilldb_btree::delete_key_value(self, root, key, value)
    }

    pub fn btree_cursor(&mut self, root: PageId) -> Result<quilldb_btree::Cursor<'_, Self>> {
        quilldb_btree::open_cursor(self, root)
    }

    pub fn btree_cursor_at(&mut self, root: PageId, start: u64) -> Result<quilldb_btree::Cursor<'_, Self>> {
        quilldb_btree::open_cursor_at(self, root, start)
    }

    pub fn btree_needs_compaction(&mut self, root: PageId, threshold: f64) -> Result<bool> {
        quilldb_btree::needs_compaction(self, root, threshold)
    }

    pub fn btree_utilization(&mut self, root: PageId) -> Result<f64> {
        quilldb_btree::utilization(self, root)
    }

    /// Rebuilds a table's data tree from a full scan, packing leaves to
    /// capacity and freeing the old tree's pages — the vacuum/compaction
    /// path named by spec.md §4.6.
    pub fn rebuild_table(&mut self, name: &str) -> Result<()> {
        let table = self
            .catalog
            .table(name)
            .cloned()
            .ok_or_else(|| QuillError::internal(format!("rebuild_table: no such table {name}")))?;
        let entries = self.drain_tree(table.root_page)?;
        let new_root = quilldb_btree::bulk_build_from_sorted(self, &entries)?;
        quilldb_btree::free_all_except_root(self, table.root_page)?;
        self.free(table.root_page)?;
        let mut updated = table;
        updated.root_page = new_root;
        self.save_table(updated)?;
        Ok(())
    }

    /// Rebuilds a secondary index tree the same way `rebuild_table` does for
    /// table data trees.
    pub fn rebuild_index(&mut self, name: &str) -> Result<()> {
        let index = self
            .catalog
            .index(name)
            .cloned()
            .ok_or_else(|| QuillError::internal(format!("rebuild_index: no such index {name}")))?;
        let entries = self.drain_tree(index.root_page)?;
        let new_root = quilldb_btree::bulk_build_from_sorted(self, &entries)?;
        quilldb_btree::free_all_except_root(self, index.root_page)?;
        self.free(index.root_page)?;
        let mut updated = index;
        updated.root_page = new_root;
        self.save_index(updated)?;
        Ok(())
    }

    fn drain_tree(&mut self, root: PageId) -> Result<Vec<(u64, Vec<u8>)>> {
        let mut entries = Vec::new();
        let mut cursor = quilldb_btree::open_cursor(self, root)?;
        while let Some(pair) = cursor.next()? {
            entries.push(pair);
        }
        Ok(entries)
    }
}

impl<V: Vfs> Drop for WriteTxn<V> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(batch) = self.batch.take() {
            let mut inner = self.shared.lock();
            if let Err(err) = inner.wal.rollback(batch) {
                error!(%err, "failed to roll back an abandoned write transaction");
            }
        }
        self.write_gate.release();
    }
}

impl<V: Vfs> PageRead for WriteTxn<V> {
    fn read(&mut self, page_id: PageId) -> Result<PageBuf> {
        self.read_impl(page_id)
    }

    fn page_size(&self) -> PageSize {
        self.page_size
    }
}

impl<V: Vfs> PageStore for WriteTxn<V> {
    fn alloc(&mut self) -> Result<PageId> {
        let cx = Cx::new();
        let page_size = self.page_size;
        let freelist_head = self.freelist_head;
        let mut adapter = PageSourceAdapter { txn: self };
        let (page_id, new_head) = quilldb_pager::allocate(cx, &mut adapter, page_size, freelist_head)?;
        self.freelist_head = new_head;
        Ok(page_id)
    }

    fn write(&mut self, page_id: PageId, data: PageBuf) -> Result<()> {
        self.dirty.insert(page_id, data);
        Ok(())
    }

    fn free(&mut self, page_id: PageId) -> Result<()> {
        let cx = Cx::new();
        let page_size = self.page_size;
        let freelist_head = self.freelist_head;
        let mut adapter = PageSourceAdapter { txn: self };
        let new_head = quilldb_pager::free(cx, &mut adapter, page_size, freelist_head, page_id)?;
        self.freelist_head = new_head;
        Ok(())
    }
}

/// Bridges the allocator's [`PageSource`] seam onto a [`WriteTxn`]'s own
/// dirty overlay and pager access, per spec.md §4.2.
struct PageSourceAdapter<'t, V: Vfs> {
    txn: &'t mut WriteTxn<V>,
}

impl<V: Vfs> PageSource for PageSourceAdapter<'_, V> {
    fn get_page(&mut self, _cx: Cx, page_id: PageId) -> Result<PageBuf> {
        self.txn.read_impl(page_id)
    }

    fn put_page(&mut self, _cx: Cx, page_id: PageId, data: PageBuf) -> Result<()> {
        self.txn.dirty.insert(page_id, data);
        Ok(())
    }

    fn extend(&mut self, _cx: Cx) -> Result<PageId> {
        let mut inner = self.txn.shared.lock();
        inner.pager.extend_file_by_one_page()
    }
}
