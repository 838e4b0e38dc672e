//! `OpenOptions` (§6 AMBIENT): the validated configuration layer `open()`
//! accepts. Mirrors the teacher's options-struct pattern: every field is
//! typed, mutually exclusive choices are enforced at `build()` time rather
//! than left as a stringly-typed option bag, and unknown options simply
//! cannot be expressed since there is no map to misspell a key into.

use std::time::Duration;

use quilldb_error::{QuillError, Result};
use quilldb_types::PageSize;

/// How the page cache's capacity was specified. Exactly one of
/// `cache_pages`/`cache_mb` may be given per spec.md §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheBudget {
    Pages(usize),
    Megabytes(usize),
}

/// Validated options for [`crate::Db::open`].
#[derive(Debug, Clone)]
pub struct OpenOptions {
    page_size: PageSize,
    cache_budget: CacheBudget,
    checkpoint_wal_pages: usize,
    checkpoint_interval: Option<Duration>,
    reader_warn_after: Duration,
    reader_timeout_after: Duration,
    force_truncate_on_timeout: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            page_size: PageSize::DEFAULT,
            cache_budget: CacheBudget::Pages(2000),
            checkpoint_wal_pages: 1000,
            checkpoint_interval: None,
            reader_warn_after: Duration::from_secs(30),
            reader_timeout_after: Duration::from_secs(300),
            force_truncate_on_timeout: false,
        }
    }
}

impl OpenOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the page size. Only meaningful when creating a new database;
    /// opening an existing file whose header disagrees is a `Corruption`
    /// error (the header, not this option, is authoritative once a file
    /// exists).
    #[must_use]
    pub fn page_size(mut self, page_size: PageSize) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn cache_pages(mut self, pages: usize) -> Self {
        self.cache_budget = CacheBudget::Pages(pages);
        self
    }

    #[must_use]
    pub fn cache_mb(mut self, megabytes: usize) -> Self {
        self.cache_budget = CacheBudget::Megabytes(megabytes);
        self
    }

    #[must_use]
    pub fn checkpoint_wal_pages(mut self, frames: usize) -> Self {
        self.checkpoint_wal_pages = frames;
        self
    }

    #[must_use]
    pub fn checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = Some(interval);
        self
    }

    #[must_use]
    pub fn reader_warn_after(mut self, after: Duration) -> Self {
        self.reader_warn_after = after;
        self
    }

    #[must_use]
    pub fn reader_timeout_after(mut self, after: Duration) -> Self {
        self.reader_timeout_after = after;
        self
    }

    /// Testing/dangerous path per spec.md §5: lets checkpoint proceed over a
    /// reader that has held its snapshot past `reader_timeout_after`,
    /// invalidating that reader rather than waiting for it.
    #[must_use]
    pub fn force_truncate_on_timeout(mut self, enabled: bool) -> Self {
        self.force_truncate_on_timeout = enabled;
        self
    }

    #[must_use]
    pub const fn resolved_page_size(&self) -> PageSize {
        self.page_size
    }

    #[must_use]
    pub const fn checkpoint_wal_pages_threshold(&self) -> usize {
        self.checkpoint_wal_pages
    }

    #[must_use]
    pub const fn checkpoint_interval_setting(&self) -> Option<Duration> {
        self.checkpoint_interval
    }

    #[must_use]
    pub const fn reader_warn_after_setting(&self) -> Duration {
        self.reader_warn_after
    }

    #[must_use]
    pub const fn reader_timeout_after_setting(&self) -> Duration {
        self.reader_timeout_after
    }

    #[must_use]
    pub const fn force_truncate_on_timeout_setting(&self) -> bool {
        self.force_truncate_on_timeout
    }

    /// Resolves the cache budget to a page count given this database's page
    /// size, validating the "exactly one of cache_pages/cache_mb" rule
    /// is well-formed (it always is by construction here — the only way to
    /// violate it would be a stringly-typed option bag, which this builder
    /// doesn't have).
    pub fn resolved_cache_pages(&self) -> Result<usize> {
        match self.cache_budget {
            CacheBudget::Pages(pages) => {
                if pages == 0 {
                    return Err(QuillError::internal("cache_pages must be non-zero"));
                }
                Ok(pages)
            }
            CacheBudget::Megabytes(mb) => {
                if mb == 0 {
                    return Err(QuillError::internal("cache_mb must be non-zero"));
                }
                let bytes = mb.saturating_mul(1024 * 1024);
                Ok((bytes / self.page_size.as_usize()).max(1))
            }
        }
    }
}
