//! The pager (C3): reads/writes fixed-size pages through the VFS and layers
//! a bounded ARC cache in front of the main database file.
//!
//! The pager has no notion of transactions or the WAL; it only knows how to
//! materialize a page's base image from the main file and, when asked by a
//! checkpoint, write a page image back into the main file. The snapshot
//! overlay described in spec.md §4.3 (consult the WAL index first, fall
//! back to this pager) is implemented one layer up, in `quilldb-core`, which
//! is the only component that needs to know about both the pager and the
//! WAL at once.

use std::path::{Path, PathBuf};

use quilldb_error::{QuillError, Result};
use quilldb_types::{Cx, Lsn, PageBuf, PageId, PageSize, SyncFlags, VfsOpenFlags};
use quilldb_vfs::{Vfs, VfsFile};

use crate::page_cache::PageCache;

/// Observer hook for pager-level events (§9 design note: "global statics for
/// benchmark counters" become an injected, optionally-null observer).
pub trait Observer: Send + Sync {
    fn page_read(&self, _page_id: PageId, _cache_hit: bool) {}
    fn page_written(&self, _page_id: PageId) {}
}

/// The default, zero-cost observer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl Observer for NullObserver {}

/// A pager backed by a VFS file, with an ARC cache in front of it.
pub struct Pager<V: Vfs> {
    db_file: V::File,
    path: PathBuf,
    cache: PageCache,
    page_size: PageSize,
    observer: Box<dyn Observer>,
    cache_hits: usize,
    cache_misses: usize,
}

impl<V: Vfs> Pager<V> {
    /// Opens (creating if necessary) the main database file at `path`.
    pub fn open(vfs: &V, path: &Path, page_size: PageSize, cache_pages: usize) -> Result<Self> {
        let cx = Cx::new();
        let db_file = vfs.open(cx, path, VfsOpenFlags::read_write_create())?;
        Ok(Self {
            db_file,
            path: path.to_path_buf(),
            cache: PageCache::new(page_size, cache_pages),
            page_size,
            observer: Box::new(NullObserver),
            cache_hits: 0,
            cache_misses: 0,
        })
    }

    pub fn set_observer(&mut self, observer: Box<dyn Observer>) {
        self.observer = observer;
    }

    #[must_use]
    pub const fn page_size(&self) -> PageSize {
        self.page_size
    }

    fn page_offset(&self, page_id: PageId) -> u64 {
        u64::from(page_id.get()) * u64::from(self.page_size.as_u32())
    }

    /// Returns the number of pages currently in the main file (including
    /// the header page).
    pub fn file_size_pages(&self) -> Result<u32> {
        let cx = Cx::new();
        let bytes = self.db_file.len(cx)?;
        Ok(u32::try_from(bytes / u64::from(self.page_size.as_u32()))
            .map_err(|_| QuillError::internal("database file larger than u32 pages"))?)
    }

    /// Grows the main file by exactly one page and returns its id. This is
    /// the allocator's fallback when the freelist is empty.
    pub fn extend_file_by_one_page(&mut self) -> Result<PageId> {
        let cx = Cx::new();
        let next_raw = self.file_size_pages()?;
        let new_size = u64::from(next_raw + 1) * u64::from(self.page_size.as_u32());
        self.db_file.truncate(cx, new_size)?;
        Ok(PageId::new(next_raw))
    }

    /// Reads the base (main-file) image of `page_id`, consulting the cache
    /// first under cache key `(page_id, generation)`.
    pub fn read_base_image(&mut self, page_id: PageId, generation: Lsn) -> Result<PageBuf> {
        if let Some(cached) = self.cache.get_visible(page_id, generation) {
            self.cache_hits += 1;
            self.observer.page_read(page_id, true);
            return Ok(cached);
        }

        let cx = Cx::new();
        let mut buf = PageBuf::new(self.page_size);
        let offset = self.page_offset(page_id);
        let file_len = self.db_file.len(cx)?;
        if offset < file_len {
            quilldb_vfs::read_at_exact(&self.db_file, cx, offset, buf.as_mut_slice())?;
        }
        self.cache_misses += 1;
        self.observer.page_read(page_id, false);
        self.cache.insert(page_id, generation, buf.clone());
        Ok(buf)
    }

    /// Writes `data` directly into the main file at `page_id`'s slot and
    /// refreshes the cache entry. Used only by checkpoint (and by recovery,
    /// which never touches the main file — see `quilldb-wal`).
    pub fn write_through(&mut self, page_id: PageId, generation: Lsn, data: &PageBuf) -> Result<()> {
        let cx = Cx::new();
        let offset = self.page_offset(page_id);
        quilldb_vfs::write_at_exact(&self.db_file, cx, offset, data.as_slice())?;
        self.cache.invalidate_page(page_id);
        self.cache.insert(page_id, generation, data.clone());
        self.observer.page_written(page_id);
        Ok(())
    }

    pub fn sync_main_file(&self) -> Result<()> {
        let cx = Cx::new();
        self.db_file.sync(cx, SyncFlags::FULL)
    }

    pub fn invalidate_page(&mut self, page_id: PageId) {
        self.cache.invalidate_page(page_id);
    }

    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn cache_evictions(&self) -> usize {
        self.cache.evictions()
    }

    #[must_use]
    pub fn cache_hits(&self) -> usize {
        self.cache_hits
    }

    #[must_use]
    pub fn cache_misses(&self) -> usize {
        self.cache_misses
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quilldb_vfs::MemoryVfs;

    fn open_pager() -> Pager<MemoryVfs> {
        let vfs = MemoryVfs::new();
        Pager::open(&vfs, Path::new("/test.db"), PageSize::DEFAULT, 16).unwrap()
    }

    #[test]
    fn fresh_file_has_zero_pages() {
        let pager = open_pager();
        assert_eq!(pager.file_size_pages().unwrap(), 0);
    }

    #[test]
    fn extend_then_read_sees_zeroed_page() {
        let mut pager = open_pager();
        let id = pager.extend_file_by_one_page().unwrap();
        assert_eq!(id, PageId::new(0));
        let page = pager.read_base_image(id, Lsn::ZERO).unwrap();
        assert!(page.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn write_through_is_visible_to_later_reads() {
        let mut pager = open_pager();
        let id = pager.extend_file_by_one_page().unwrap();
        let mut data = PageBuf::new(PageSize::DEFAULT);
        data.as_mut_slice()[0] = 0xAB;
        pager.write_through(id, Lsn::new(1), &data).unwrap();

        let read_back = pager.read_base_image(id, Lsn::new(1)).unwrap();
        assert_eq!(read_back.as_slice()[0], 0xAB);
    }

    #[test]
    fn cache_hit_after_first_read() {
        let mut pager = open_pager();
        let id = pager.extend_file_by_one_page().unwrap();
        let _ = pager.read_base_image(id, Lsn::ZERO).unwrap();
        assert_eq!(pager.cache_len(), 1);
        let _ = pager.read_base_image(id, Lsn::ZERO).unwrap();
        assert_eq!(pager.cache_len(), 1);
    }
}
