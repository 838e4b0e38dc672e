//! The in-memory WAL index (§3, §4.4): `map<page_id, list<frame_offset, lsn,
//! commit_flag>>`.
//!
//! Only frames whose commit record has been observed are published here —
//! see [`WalIndex::publish`]. Lookups return the newest frame whose `lsn` is
//! `<=` a reader's snapshot, which is exactly the visibility rule spec.md
//! §4.3's "read path" describes.
//!
//! A single-process engine has no need for SQLite's cross-process shared
//! memory hash table; spec.md's Non-goals explicitly exclude multi-process
//! concurrency on one file, so this is a plain in-process `HashMap`, not a
//! `mmap`-based segment layout.

use hashbrown::HashMap;
use quilldb_types::{Lsn, PageId};

/// Where a committed frame lives in the WAL file, and at what LSN it became
/// visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLocation {
    pub offset: u64,
    pub lsn: Lsn,
}

/// The WAL index: per-page, LSN-ordered list of committed frame locations.
#[derive(Debug, Default)]
pub struct WalIndex {
    pages: HashMap<PageId, Vec<FrameLocation>>,
    last_durable_lsn: Lsn,
}

impl WalIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn last_durable_lsn(&self) -> Lsn {
        self.last_durable_lsn
    }

    /// Publishes a batch of frames (one transaction's worth) at `lsn`,
    /// atomically with respect to readers in the sense that no lookup can
    /// observe a partial batch: call this only after the commit frame has
    /// been fsynced (step 4 of the commit protocol in spec.md §4.4).
    pub fn publish(&mut self, lsn: Lsn, frames: &[(PageId, u64)]) {
        for &(page_id, offset) in frames {
            self.pages
                .entry(page_id)
                .or_default()
                .push(FrameLocation { offset, lsn });
        }
        if lsn > self.last_durable_lsn {
            self.last_durable_lsn = lsn;
        }
    }

    /// Returns the newest frame for `page_id` visible at `snapshot`, i.e.
    /// the one with the largest `lsn <= snapshot`.
    #[must_use]
    pub fn lookup(&self, page_id: PageId, snapshot: Lsn) -> Option<FrameLocation> {
        self.pages.get(&page_id).and_then(|locations| {
            locations
                .iter()
                .filter(|loc| loc.lsn <= snapshot)
                .max_by_key(|loc| loc.lsn)
                .copied()
        })
    }

    /// All page ids with at least one committed frame.
    pub fn page_ids(&self) -> impl Iterator<Item = PageId> + '_ {
        self.pages.keys().copied()
    }

    /// The newest committed frame for `page_id`, regardless of snapshot.
    #[must_use]
    pub fn latest(&self, page_id: PageId) -> Option<FrameLocation> {
        self.pages
            .get(&page_id)
            .and_then(|locations| locations.iter().max_by_key(|loc| loc.lsn))
            .copied()
    }

    /// Drops every frame with `lsn <= retire_through` for every page,
    /// leaving only entries still needed by a reader whose snapshot could be
    /// newer (used by checkpoint after those pages have been written
    /// through to the main file — see spec.md §4.4's checkpoint semantics).
    /// Returns `true` if the index is now fully empty (meaning the WAL file
    /// can be truncated back to its header).
    pub fn retire_through(&mut self, retire_through: Lsn) -> bool {
        self.pages.retain(|_, locations| {
            locations.retain(|loc| loc.lsn > retire_through);
            !locations.is_empty()
        });
        self.pages.is_empty()
    }

    /// Clears the index entirely (used after a full checkpoint truncates the
    /// WAL file, or when recovery starts over).
    pub fn reset(&mut self) {
        self.pages.clear();
    }

    pub fn set_last_durable_lsn(&mut self, lsn: Lsn) {
        self.last_durable_lsn = lsn;
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.pages.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_returns_newest_visible_frame() {
        let mut index = WalIndex::new();
        let page = PageId::new(5);
        index.publish(Lsn::new(1), &[(page, 100)]);
        index.publish(Lsn::new(2), &[(page, 200)]);
        index.publish(Lsn::new(3), &[(page, 300)]);

        assert_eq!(index.lookup(page, Lsn::new(1)).unwrap().offset, 100);
        assert_eq!(index.lookup(page, Lsn::new(2)).unwrap().offset, 200);
        assert_eq!(index.lookup(page, Lsn::new(10)).unwrap().offset, 300);
        assert!(index.lookup(page, Lsn::ZERO).is_none());
    }

    #[test]
    fn lookup_missing_page_is_none() {
        let index = WalIndex::new();
        assert!(index.lookup(PageId::new(1), Lsn::new(99)).is_none());
    }

    #[test]
    fn retire_through_drops_old_entries_keeps_newer() {
        let mut index = WalIndex::new();
        let page = PageId::new(1);
        index.publish(Lsn::new(1), &[(page, 1)]);
        index.publish(Lsn::new(5), &[(page, 2)]);
        let emptied = index.retire_through(Lsn::new(3));
        assert!(!emptied);
        assert!(index.lookup(page, Lsn::new(3)).is_none());
        assert_eq!(index.lookup(page, Lsn::new(5)).unwrap().offset, 2);
    }

    #[test]
    fn retire_through_everything_reports_empty() {
        let mut index = WalIndex::new();
        let page = PageId::new(1);
        index.publish(Lsn::new(1), &[(page, 1)]);
        let emptied = index.retire_through(Lsn::new(100));
        assert!(emptied);
        assert!(index.is_empty());
    }

    #[test]
    fn publish_tracks_last_durable_lsn_monotonically() {
        let mut index = WalIndex::new();
        index.publish(Lsn::new(3), &[(PageId::new(1), 0)]);
        index.publish(Lsn::new(2), &[(PageId::new(2), 10)]);
        assert_eq!(index.last_durable_lsn(), Lsn::new(3));
    }
}
