//! The storage/transaction engine (C8-C10): system catalog, transaction
//! controller, snapshots and the validated `Db::open` configuration layer,
//! built on the VFS, pager, WAL, MVCC reader registry and B+Tree crates.
//!
//! Nothing here understands SQL; spec.md's Non-goals exclude a query layer
//! entirely. What's here is the complete storage substrate: pages in, pages
//! out, transactionally and durably.

mod catalog;
mod db;
mod options;
mod snapshot;
mod txn;

pub use catalog::{
    Catalog, CatalogRecord, ColumnFlag, ColumnSpec, IndexKind, IndexRecord, TableRecord, ViewRecord, record_key,
};
pub use db::{Db, DbStats};
pub use options::OpenOptions;
pub use quilldb_wal::CheckpointStats;
pub use snapshot::Snapshot;
pub use txn::WriteTxn;

pub use quilldb_btree::{Cursor, PageRead, PageStore};
pub use quilldb_error::{ErrorKind, QuillError, Result, TransactionError};
pub use quilldb_types::{Lsn, PageBuf, PageId, PageSize};
