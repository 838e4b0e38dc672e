//! The page-access seam the B+Tree and overflow-chain code need from their
//! caller: read a page, write a page, allocate a fresh or recycled page,
//! free a page. A write transaction in `quilldb-core` implements this over
//! its dirty overlay, the pager, and the WAL (§4.2, §4.3, §9's "long-held
//! owning handles" design note: callers borrow an RO page for navigation,
//! drop it, then acquire RW only for the scoped mutation).

use quilldb_error::Result;
use quilldb_types::{PageBuf, PageId};

/// Everything the B+Tree needs to read, mutate, allocate, and free pages.
/// Implemented by the write transaction (C10) over the pager + WAL + page
/// allocator; a read-only snapshot only ever needs [`PageRead`].
pub trait PageStore: PageRead {
    /// Allocates a fresh page (reusing a freed one if available).
    fn alloc(&mut self) -> Result<PageId>;
    /// Writes `data` as the new image for `page_id`.
    fn write(&mut self, page_id: PageId, data: PageBuf) -> Result<()>;
    /// Frees `page_id`, returning it to the freelist.
    fn free(&mut self, page_id: PageId) -> Result<()>;
}

/// Read-only access to pages, sufficient for cursors and lookups over a
/// reader's snapshot.
pub trait PageRead {
    fn read(&mut self, page_id: PageId) -> Result<PageBuf>;
    fn page_size(&self) -> quilldb_types::PageSize;
}
