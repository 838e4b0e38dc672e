//! The pager and page allocator (C2/C3): fixed-size page I/O through a VFS,
//! a bounded ARC page cache, and the freelist-chain allocator, per
//! spec.md §3/§4.1/§4.2.

mod allocator;
mod page_cache;
mod pager;

pub use allocator::{PageSource, allocate, free};
pub use page_cache::{AccessOutcome, ArcCache, CacheKey, CachedPage, PageCache};
pub use pager::{NullObserver, Observer, Pager};
