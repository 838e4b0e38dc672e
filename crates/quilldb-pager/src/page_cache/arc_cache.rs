//! Adaptive Replacement Cache (ARC) over MVCC-aware cache keys.
//!
//! Data structures: `CacheKey = (PageId, generation)`, `CachedPage` with pin
//! tracking, and the ARC sets `T1`/`T2`/`B1`/`B2` with adaptive target `p`.
//! Eviction is a pure memory operation and never performs I/O.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use quilldb_types::{Lsn, PageBuf, PageId};
use xxhash_rust::xxh3::xxh3_64;

/// MVCC-aware cache key. `generation` is the LSN of the snapshot that
/// produced this page image, so a checkpoint-truncated WAL frame can never
/// be handed back to a reader whose snapshot postdates the truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub page_id: PageId,
    pub generation: Lsn,
}

impl CacheKey {
    #[inline]
    #[must_use]
    pub const fn new(page_id: PageId, generation: Lsn) -> Self {
        Self { page_id, generation }
    }
}

/// A page cached by ARC.
pub struct CachedPage {
    pub key: CacheKey,
    pub data: PageBuf,
    pub ref_count: AtomicU32,
    pub xxh3: u64,
    pub byte_size: usize,
}

impl CachedPage {
    #[must_use]
    pub fn new(key: CacheKey, data: PageBuf) -> Self {
        let xxh3 = xxh3_64(data.as_slice());
        let byte_size = data.len();
        Self {
            key,
            data,
            ref_count: AtomicU32::new(0),
            xxh3,
            byte_size,
        }
    }

    /// Recomputes the integrity hash against the current contents, for use
    /// on write-back verification.
    #[must_use]
    pub fn current_xxh3(&self) -> u64 {
        xxh3_64(self.data.as_slice())
    }

    #[inline]
    pub fn pin(&self) {
        let _ = self.ref_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn unpin(&self) {
        let mut current = self.ref_count.load(Ordering::Relaxed);
        while current > 0 {
            match self.ref_count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    #[inline]
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.ref_count.load(Ordering::Relaxed) > 0
    }
}

impl fmt::Debug for CachedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedPage")
            .field("key", &self.key)
            .field("data", &format_args!("PageBuf(len={})", self.data.len()))
            .field("ref_count", &self.ref_count.load(Ordering::Relaxed))
            .field("xxh3", &format_args!("{:#018x}", self.xxh3))
            .field("byte_size", &self.byte_size)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOutcome {
    Hit,
    MissInserted,
    MissDroppedAllPinned,
}

#[derive(Debug, Default)]
struct Store {
    order: VecDeque<CacheKey>,
    set: HashSet<CacheKey>,
}

impl Store {
    fn contains(&self, key: CacheKey) -> bool {
        self.set.contains(&key)
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn push_back(&mut self, key: CacheKey) {
        if self.set.insert(key) {
            self.order.push_back(key);
        }
    }

    fn pop_front(&mut self) -> Option<CacheKey> {
        let key = self.order.pop_front()?;
        let _ = self.set.remove(&key);
        Some(key)
    }

    fn remove(&mut self, key: CacheKey) -> bool {
        if !self.set.remove(&key) {
            return false;
        }
        self.order.retain(|candidate| *candidate != key);
        true
    }

    fn move_to_back(&mut self, key: CacheKey) -> bool {
        if !self.remove(key) {
            return false;
        }
        self.push_back(key);
        true
    }

    fn ordered_keys(&self) -> impl Iterator<Item = CacheKey> + '_ {
        self.order.iter().copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    T1,
    T2,
}

/// ARC cache with MVCC-aware keys.
#[derive(Debug)]
pub struct ArcCache {
    t1: Store,
    t2: Store,
    b1: Store,
    b2: Store,
    p: usize,
    capacity: usize,
    total_bytes: usize,
    max_bytes: usize,
    index: HashMap<CacheKey, CachedPage>,
    evictions: usize,
    io_writes: usize,
}

impl ArcCache {
    #[must_use]
    pub fn new(capacity: usize, max_bytes: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        assert!(max_bytes > 0, "max_bytes must be > 0");
        Self {
            t1: Store::default(),
            t2: Store::default(),
            b1: Store::default(),
            b2: Store::default(),
            p: 0,
            capacity,
            total_bytes: 0,
            max_bytes,
            index: HashMap::new(),
            evictions: 0,
            io_writes: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, key: CacheKey) -> bool {
        self.index.contains_key(&key)
    }

    #[inline]
    #[must_use]
    pub fn get(&self, key: CacheKey) -> Option<&CachedPage> {
        self.index.get(&key)
    }

    #[inline]
    pub fn get_mut(&mut self, key: CacheKey) -> Option<&mut CachedPage> {
        self.index.get_mut(&key)
    }

    /// Finds the most recent cached generation of `page_id` at or before
    /// `snapshot`, if any is resident.
    #[must_use]
    pub fn get_visible(&self, page_id: PageId, snapshot: Lsn) -> Option<&CachedPage> {
        self.index
            .values()
            .filter(|page| page.key.page_id == page_id && page.key.generation <= snapshot)
            .max_by_key(|page| page.key.generation)
    }

    #[inline]
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    #[inline]
    #[must_use]
    pub fn p_target(&self) -> usize {
        self.p
    }

    #[inline]
    #[must_use]
    pub fn evictions(&self) -> usize {
        self.evictions
    }

    #[inline]
    #[must_use]
    pub fn io_writes(&self) -> usize {
        self.io_writes
    }

    /// Drops every cached entry whose key matches `page_id`, regardless of
    /// generation. Used when a page's identity is reused (freelist reuse).
    pub fn invalidate_page(&mut self, page_id: PageId) {
        let stale: Vec<CacheKey> = self
            .index
            .keys()
            .filter(|k| k.page_id == page_id)
            .copied()
            .collect();
        for key in stale {
            self.index.remove(&key);
            self.t1.remove(key);
            self.t2.remove(key);
            self.b1.remove(key);
            self.b2.remove(key);
        }
    }

    #[cfg(test)]
    fn in_t1(&self, key: CacheKey) -> bool {
        self.t1.contains(key)
    }

    #[cfg(test)]
    fn in_t2(&self, key: CacheKey) -> bool {
        self.t2.contains(key)
    }

    #[cfg(test)]
    fn in_b1(&self, key: CacheKey) -> bool {
        self.b1.contains(key)
    }

    #[cfg(test)]
    fn in_b2(&self, key: CacheKey) -> bool {
        self.b2.contains(key)
    }

    pub fn access(&mut self, key: CacheKey) -> bool {
        if !self.index.contains_key(&key) {
            return false;
        }
        self.promote_hit(key);
        true
    }

    pub fn access_or_insert(&mut self, page: CachedPage) -> AccessOutcome {
        let key = page.key;
        if self.index.contains_key(&key) {
            self.promote_hit(key);
            return AccessOutcome::Hit;
        }

        let from_b1 = self.b1.contains(key);
        let from_b2 = self.b2.contains(key);

        if from_b1 {
            self.raise_p();
            let _ = self.b1.remove(key);
        } else if from_b2 {
            self.lower_p();
            let _ = self.b2.remove(key);
        }

        if !self.ensure_room(page.byte_size, from_b2) {
            return AccessOutcome::MissDroppedAllPinned;
        }

        if from_b1 || from_b2 {
            self.t2.push_back(key);
        } else {
            self.t1.push_back(key);
        }

        self.total_bytes += page.byte_size;
        let previous = self.index.insert(key, page);
        debug_assert!(
            previous.is_none(),
            "new miss should not replace existing key"
        );
        AccessOutcome::MissInserted
    }

    fn promote_hit(&mut self, key: CacheKey) {
        if self.t1.contains(key) {
            let _ = self.t1.remove(key);
            self.t2.push_back(key);
            return;
        }
        let _ = self.t2.move_to_back(key);
    }

    fn raise_p(&mut self) {
        let delta = if self.b1.is_empty() {
            1
        } else {
            std::cmp::max(1, self.b2.len() / self.b1.len())
        };
        self.p = self.capacity.min(self.p.saturating_add(delta));
    }

    fn lower_p(&mut self) {
        let delta = if self.b2.is_empty() {
            1
        } else {
            std::cmp::max(1, self.b1.len() / self.b2.len())
        };
        self.p = self.p.saturating_sub(delta);
    }

    fn ensure_room(&mut self, incoming_bytes: usize, from_b2: bool) -> bool {
        let mut b2_bias = from_b2;
        while self.index.len() >= self.capacity
            || self.total_bytes.saturating_add(incoming_bytes) > self.max_bytes
        {
            if !self.replace(b2_bias) {
                return false;
            }
            b2_bias = false;
        }
        true
    }

    fn replace(&mut self, incoming_from_b2: bool) -> bool {
        let prefer_t1 = !self.t1.is_empty()
            && (self.t1.len() > self.p || (incoming_from_b2 && self.t1.len() == self.p));

        if prefer_t1 {
            if self.evict_from(ListKind::T1) {
                return true;
            }
            return self.evict_from(ListKind::T2);
        }

        if self.evict_from(ListKind::T2) {
            return true;
        }
        self.evict_from(ListKind::T1)
    }

    fn evict_from(&mut self, list: ListKind) -> bool {
        if self.list(list).is_empty() {
            return false;
        }

        if let Some(key) = self.pick_candidate(list, true) {
            self.finish_eviction(list, key);
            return true;
        }

        if let Some(key) = self.pick_candidate(list, false) {
            self.finish_eviction(list, key);
            return true;
        }

        false
    }

    fn pick_candidate(&mut self, list: ListKind, require_superseded: bool) -> Option<CacheKey> {
        let candidate = {
            self.list(list).ordered_keys().find(|key| {
                self.is_evictable(*key) && (!require_superseded || self.is_superseded(*key))
            })
        }?;
        let _ = self.list_mut(list).remove(candidate);
        Some(candidate)
    }

    fn is_evictable(&self, key: CacheKey) -> bool {
        self.index.get(&key).is_some_and(|page| !page.is_pinned())
    }

    fn is_superseded(&self, key: CacheKey) -> bool {
        self.index.keys().any(|candidate| {
            candidate.page_id == key.page_id && candidate.generation > key.generation
        })
    }

    fn finish_eviction(&mut self, list: ListKind, key: CacheKey) {
        let evicted = self.index.remove(&key);
        if let Some(page) = evicted {
            self.total_bytes = self.total_bytes.saturating_sub(page.byte_size);
            self.evictions = self.evictions.saturating_add(1);
            match list {
                ListKind::T1 => self.b1.push_back(key),
                ListKind::T2 => self.b2.push_back(key),
            }
            self.trim_ghosts();
        }
    }

    fn trim_ghosts(&mut self) {
        while self.b1.len() > self.capacity {
            let _ = self.b1.pop_front();
        }
        while self.b2.len() > self.capacity {
            let _ = self.b2.pop_front();
        }
    }

    fn list(&self, list: ListKind) -> &Store {
        match list {
            ListKind::T1 => &self.t1,
            ListKind::T2 => &self.t2,
        }
    }

    fn list_mut(&mut self, list: ListKind) -> &mut Store {
        match list {
            ListKind::T1 => &mut self.t1,
            ListKind::T2 => &mut self.t2,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use quilldb_types::PageSize;

    use super::{AccessOutcome, ArcCache, CacheKey, CachedPage};

    fn key(page_id: u32, generation: u64) -> CacheKey {
        CacheKey::new(PageId::new(page_id), Lsn::new(generation))
    }

    use quilldb_types::{Lsn, PageId};

    fn page(key: CacheKey, page_size: PageSize, seed: u8) -> CachedPage {
        let mut data = PageBuf::new(page_size);
        data.as_mut_slice().fill(seed);
        CachedPage::new(key, data)
    }

    #[test]
    fn cache_key_is_mvcc_aware() {
        let pg = PageId::new(7);
        let k1 = CacheKey::new(pg, Lsn::new(1));
        let k2 = CacheKey::new(pg, Lsn::new(2));
        assert_ne!(k1, k2);

        let mut seen = HashSet::new();
        assert!(seen.insert(k1));
        assert!(seen.insert(k2));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn t1_promotes_to_t2_on_second_access() {
        let mut cache = ArcCache::new(4, 4 * 4096);
        let target = key(1, 0);
        assert_eq!(
            cache.access_or_insert(page(target, PageSize::DEFAULT, 0xAA)),
            AccessOutcome::MissInserted
        );
        assert!(cache.in_t1(target));
        assert!(!cache.in_t2(target));

        assert!(cache.access(target));
        assert!(!cache.in_t1(target));
        assert!(cache.in_t2(target));
    }

    #[test]
    fn ghost_hit_in_b1_raises_p_and_promotes() {
        let mut cache = ArcCache::new(2, 2 * 4096);
        let a = key(1, 0);
        let b = key(2, 0);
        let c = key(3, 0);

        let _ = cache.access_or_insert(page(a, PageSize::DEFAULT, 1));
        let _ = cache.access_or_insert(page(b, PageSize::DEFAULT, 2));
        let _ = cache.access_or_insert(page(c, PageSize::DEFAULT, 3));
        assert!(cache.in_b1(a));

        let p_before = cache.p_target();
        let _ = cache.access_or_insert(page(a, PageSize::DEFAULT, 4));
        assert!(cache.p_target() > p_before);
        assert!(cache.in_t2(a));
    }

    #[test]
    fn ghost_hit_in_b2_lowers_p() {
        let mut cache = ArcCache::new(1, 4096);
        let a = key(1, 0);
        let b = key(2, 0);
        let c = key(3, 0);

        let _ = cache.access_or_insert(page(a, PageSize::DEFAULT, 1));
        let _ = cache.access_or_insert(page(b, PageSize::DEFAULT, 2));
        assert!(cache.in_b1(a));

        let _ = cache.access_or_insert(page(a, PageSize::DEFAULT, 3));
        assert_eq!(cache.p_target(), 1);

        let _ = cache.access_or_insert(page(c, PageSize::DEFAULT, 4));
        assert!(cache.in_b2(a));

        let p_before = cache.p_target();
        let _ = cache.access_or_insert(page(a, PageSize::DEFAULT, 5));
        assert!(cache.p_target() < p_before);
    }

    #[test]
    fn pinned_page_is_not_evicted() {
        let mut cache = ArcCache::new(1, 4096);
        let pinned = key(1, 0);
        let next = key(2, 0);

        let _ = cache.access_or_insert(page(pinned, PageSize::DEFAULT, 0x11));
        cache.get(pinned).expect("pinned page should exist").pin();

        let outcome = cache.access_or_insert(page(next, PageSize::DEFAULT, 0x22));
        assert_eq!(outcome, AccessOutcome::MissDroppedAllPinned);
        assert!(cache.contains(pinned));
        assert!(!cache.contains(next));
    }

    #[test]
    fn eviction_never_performs_io() {
        let mut cache = ArcCache::new(2, 2 * 4096);
        for page_id in 1..=8 {
            let k = key(page_id, 0);
            let _ = cache.access_or_insert(page(
                k,
                PageSize::DEFAULT,
                u8::try_from(page_id).unwrap(),
            ));
        }
        assert!(cache.evictions() > 0);
        assert_eq!(cache.io_writes(), 0);
    }

    #[test]
    fn newest_generation_is_preferred_over_older() {
        let mut cache = ArcCache::new(2, 2 * 4096);
        let older = key(7, 1);
        let newer = key(7, 2);
        let other = key(8, 1);

        let _ = cache.access_or_insert(page(older, PageSize::DEFAULT, 0x31));
        let _ = cache.access_or_insert(page(newer, PageSize::DEFAULT, 0x32));
        let _ = cache.access_or_insert(page(other, PageSize::DEFAULT, 0x33));

        assert!(!cache.contains(older));
        assert!(cache.contains(newer));
        assert!(cache.contains(other));
    }

    #[test]
    fn byte_budget_is_respected() {
        let tiny = PageSize::new(512).unwrap();
        let mut cache = ArcCache::new(2, 1024);
        let a = key(1, 0);
        let b = key(2, 0);
        let c = key(3, 0);

        let _ = cache.access_or_insert(page(a, tiny, 1));
        assert_eq!(cache.total_bytes(), 512);

        let _ = cache.access_or_insert(page(b, tiny, 2));
        assert_eq!(cache.total_bytes(), 1024);

        let _ = cache.access_or_insert(page(c, tiny, 3));
        assert!(cache.total_bytes() <= 1024);
    }

    #[test]
    fn get_visible_returns_newest_generation_at_or_before_snapshot() {
        let mut cache = ArcCache::new(4, 4 * 4096);
        let v1 = key(5, 1);
        let v2 = key(5, 3);
        let _ = cache.access_or_insert(page(v1, PageSize::DEFAULT, 1));
        let _ = cache.access_or_insert(page(v2, PageSize::DEFAULT, 2));

        let visible = cache
            .get_visible(PageId::new(5), Lsn::new(2))
            .expect("v1 visible at snapshot 2");
        assert_eq!(visible.key, v1);

        let visible_later = cache
            .get_visible(PageId::new(5), Lsn::new(5))
            .expect("v2 visible at snapshot 5");
        assert_eq!(visible_later.key, v2);
    }

    #[test]
    fn invalidate_page_drops_every_generation() {
        let mut cache = ArcCache::new(4, 4 * 4096);
        let v1 = key(9, 1);
        let v2 = key(9, 2);
        let _ = cache.access_or_insert(page(v1, PageSize::DEFAULT, 1));
        let _ = cache.access_or_insert(page(v2, PageSize::DEFAULT, 2));
        cache.invalidate_page(PageId::new(9));
        assert!(!cache.contains(v1));
        assert!(!cache.contains(v2));
    }
}
