//! Public API facade for the embedded storage engine: a single-file,
//! ACID, single-writer/many-reader page store with a B+Tree and system
//! catalog built in, per spec.md.
//!
//! This crate adds nothing of its own beyond picking a concrete [`Vfs`] and
//! re-exporting `quilldb-core`'s types under one name; the engine itself
//! lives in `quilldb-core`, layered on `quilldb-pager`/`quilldb-wal`/
//! `quilldb-btree`/`quilldb-mvcc`.

pub use quilldb_core::{
    Catalog, CatalogRecord, ColumnFlag, ColumnSpec, Cursor, Db, DbStats, IndexKind, IndexRecord, OpenOptions,
    PageRead, PageStore, Snapshot, TableRecord, ViewRecord, WriteTxn, record_key,
};
pub use quilldb_core::{CheckpointStats, ErrorKind, Lsn, PageBuf, PageId, PageSize, QuillError, Result, TransactionError};
pub use quilldb_vfs::{FaultPlan, FaultyVfs, MemoryVfs, OsVfs, Vfs, VfsFile};

use std::path::Path;

/// An engine instance backed by real OS files. The common case: one main
/// file at `path`, a `<path>-wal` sibling managed automatically.
pub type OsDb = Db<OsVfs>;

/// An engine instance backed entirely by memory, for tests and ephemeral
/// use; nothing is written to disk.
pub type MemDb = Db<MemoryVfs>;

/// Opens (creating if absent) an OS-file-backed database at `path`.
pub fn open(path: impl AsRef<Path>, options: OpenOptions) -> Result<OsDb> {
    let vfs = OsVfs::new();
    Db::open(&vfs, path, options)
}

/// Opens an in-memory database rooted at a synthetic path, useful for tests
/// and short-lived scratch databases that never touch disk.
pub fn open_in_memory(path: impl AsRef<Path>, options: OpenOptions) -> Result<MemDb> {
    let vfs = MemoryVfs::new();
    Db::open(&vfs, path, options)
}
