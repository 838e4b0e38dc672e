mod arc_cache;

pub use arc_cache::{AccessOutcome, ArcCache, CacheKey, CachedPage};

use quilldb_types::{Lsn, PageBuf, PageId, PageSize};

/// Bounded page cache sized in pages, layered over [`ArcCache`]. This is the
/// C3 cache half of the pager: a plain LRU-like bound over clean pages,
/// never evicting a pinned (in-use) handle.
#[derive(Debug)]
pub struct PageCache {
    arc: ArcCache,
    page_size: PageSize,
}

impl PageCache {
    #[must_use]
    pub fn new(page_size: PageSize, capacity_pages: usize) -> Self {
        let max_bytes = capacity_pages.saturating_mul(page_size.as_usize()).max(page_size.as_usize());
        Self {
            arc: ArcCache::new(capacity_pages.max(1), max_bytes),
            page_size,
        }
    }

    #[must_use]
    pub const fn page_size(&self) -> PageSize {
        self.page_size
    }

    #[must_use]
    pub fn get_visible(&self, page_id: PageId, snapshot: Lsn) -> Option<PageBuf> {
        self.arc
            .get_visible(page_id, snapshot)
            .map(|cached| cached.data.clone())
    }

    pub fn insert(&mut self, page_id: PageId, generation: Lsn, data: PageBuf) -> AccessOutcome {
        let key = CacheKey::new(page_id, generation);
        self.arc.access_or_insert(CachedPage::new(key, data))
    }

    pub fn invalidate_page(&mut self, page_id: PageId) {
        self.arc.invalidate_page(page_id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.arc.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arc.is_empty()
    }

    #[must_use]
    pub fn evictions(&self) -> usize {
        self.arc.evictions()
    }
}
