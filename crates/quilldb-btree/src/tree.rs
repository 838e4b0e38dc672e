//! The B+Tree itself (C7): point lookup, insert/update/delete, a
//! forward-only cursor, and the bulk-load/rebuild path used for index and
//! table compaction. Internal pages route by "first cell whose key is >=
//! the search key, else the right child"; leaf pages hold the data (or an
//! overflow-chain root for oversized values) per spec.md §3/§4.6/§4.7.

use quilldb_error::{QuillError, Result};
use quilldb_types::{PageId, PageSize};

use crate::overflow;
use crate::page_codec::{
    DecodedInternal, DecodedLeaf, InternalCell, LeafCell, decode_internal, decode_leaf, encode_internal,
    encode_leaf, internal_encoded_size, is_leaf_page, leaf_encoded_size,
};
use crate::store::{PageRead, PageStore};

/// Outcome of a page-level mutation that may have split the page.
type Split = Option<(u64, PageId)>;

// A cell's key is the smallest key stored anywhere in the subtree to its
// right; its own child holds every key strictly less than that. So the
// child for `key` is the first cell whose key is > `key`, or `right_child`
// if `key` is >= every separator.

fn locate_child(internal: &DecodedInternal, key: u64) -> PageId {
    match internal.cells.iter().position(|c| c.key > key) {
        Some(idx) => internal.cells[idx].child,
        None => internal.right_child,
    }
}

/// Index of the cell whose child was (or would be) chosen for `key`; equal
/// to `internal.cells.len()` when the right child is the answer.
fn child_index(internal: &DecodedInternal, key: u64) -> usize {
    internal.cells.iter().position(|c| c.key > key).unwrap_or(internal.cells.len())
}

fn descend_to_leaf(store: &mut impl PageRead, root: PageId, key: u64) -> Result<(PageId, DecodedLeaf)> {
    let mut page_id = root;
    loop {
        let buf = store.read(page_id)?;
        if is_leaf_page(&buf) {
            return Ok((page_id, decode_leaf(&buf)?));
        }
        let internal = decode_internal(&buf)?;
        page_id = locate_child(&internal, key);
    }
}

fn leftmost_leaf(store: &mut impl PageRead, root: PageId) -> Result<(PageId, DecodedLeaf)> {
    let mut page_id = root;
    loop {
        let buf = store.read(page_id)?;
        if is_leaf_page(&buf) {
            return Ok((page_id, decode_leaf(&buf)?));
        }
        let internal = decode_internal(&buf)?;
        page_id = internal.cells.first().map_or(internal.right_child, |c| c.child);
    }
}

/// Finds the smallest split index such that both halves fit in a page,
/// preferring a split point that doesn't separate cells sharing a key
/// (duplicate-key runs stay on one leaf so `find`/`delete_key_value` only
/// ever need to look at a single page). Falls back to ignoring that
/// preference if no such split exists.
fn find_leaf_split(cells: &[LeafCell], page_size: PageSize) -> Option<usize> {
    let limit = page_size.as_usize();
    let mut fallback = None;
    for idx in 1..cells.len() {
        if leaf_encoded_size(&cells[..idx]) > limit || leaf_encoded_size(&cells[idx..]) > limit {
            continue;
        }
        if fallback.is_none() {
            fallback = Some(idx);
        }
        if cells[idx - 1].key != cells[idx].key {
            return Some(idx);
        }
    }
    fallback
}

fn write_leaf_with_possible_split(
    store: &mut impl PageStore,
    page_id: PageId,
    leaf: DecodedLeaf,
) -> Result<Split> {
    let page_size = store.page_size();
    if leaf_encoded_size(&leaf.cells) <= page_size.as_usize() {
        store.write(page_id, encode_leaf(page_size, &leaf.cells, leaf.next_leaf)?)?;
        return Ok(None);
    }
    let split_at = find_leaf_split(&leaf.cells, page_size).ok_or_else(|| {
        QuillError::corruption("leaf split", "no cell boundary keeps both halves within page_size")
    })?;
    let new_right = store.alloc()?;
    let (left_cells, right_cells) = leaf.cells.split_at(split_at);
    let promoted_key = right_cells[0].key;
    store.write(page_id, encode_leaf(page_size, left_cells, new_right)?)?;
    store.write(new_right, encode_leaf(page_size, right_cells, leaf.next_leaf)?)?;
    Ok(Some((promoted_key, new_right)))
}

fn find_internal_split(cells: &[InternalCell], page_size: PageSize) -> Option<usize> {
    let limit = page_size.as_usize();
    for m in 0..cells.len() {
        if internal_encoded_size(&cells[..m]) <= limit && internal_encoded_size(&cells[m + 1..]) <= limit {
            return Some(m);
        }
    }
    None
}

fn write_internal_with_possible_split(
    store: &mut impl PageStore,
    page_id: PageId,
    internal: DecodedInternal,
) -> Result<Split> {
    let page_size = store.page_size();
    if internal_encoded_size(&internal.cells) <= page_size.as_usize() {
        store.write(page_id, encode_internal(page_size, &internal.cells, internal.right_child)?)?;
        return Ok(None);
    }
    let m = find_internal_split(&internal.cells, page_size).ok_or_else(|| {
        QuillError::corruption("internal split", "no cell boundary keeps both halves within page_size")
    })?;
    let promoted_key = internal.cells[m].key;
    let new_right = store.alloc()?;
    let left_right_child = internal.cells[m].child;
    let right_cells = internal.cells[m + 1..].to_vec();
    let right_right_child = internal.right_child;
    let mut left_cells = internal.cells;
    left_cells.truncate(m);
    store.write(page_id, encode_internal(page_size, &left_cells, left_right_child)?)?;
    store.write(new_right, encode_internal(page_size, &right_cells, right_right_child)?)?;
    Ok(Some((promoted_key, new_right)))
}

fn make_leaf_cell(store: &mut impl PageStore, key: u64, value: &[u8]) -> Result<LeafCell> {
    let limit = store.page_size().leaf_inline_limit();
    if value.len() > limit {
        let root = overflow::write_chain(store, value)?;
        Ok(LeafCell { key, value: Vec::new(), overflow_root: Some(root) })
    } else {
        Ok(LeafCell { key, value: value.to_vec(), overflow_root: None })
    }
}

fn insert_into(
    store: &mut impl PageStore,
    page_id: PageId,
    key: u64,
    new_cell: LeafCell,
    unique: bool,
) -> Result<Split> {
    let buf = store.read(page_id)?;
    if is_leaf_page(&buf) {
        let mut leaf = decode_leaf(&buf)?;
        let pos = leaf.cells.partition_point(|c| c.key < key);
        if unique && leaf.cells.get(pos).is_some_and(|c| c.key == key) {
            return Err(QuillError::constraint(key));
        }
        let insert_pos = if unique { pos } else { leaf.cells.partition_point(|c| c.key <= key) };
        leaf.cells.insert(insert_pos, new_cell);
        write_leaf_with_possible_split(store, page_id, leaf)
    } else {
        let internal = decode_internal(&buf)?;
        let idx = child_index(&internal, key);
        let child_id = if idx < internal.cells.len() { internal.cells[idx].child } else { internal.right_child };
        match insert_into(store, child_id, key, new_cell, unique)? {
            None => Ok(None),
            Some((promoted_key, new_right)) => {
                let mut internal = internal;
                propagate_split(&mut internal, idx, promoted_key, new_right);
                write_internal_with_possible_split(store, page_id, internal)
            }
        }
    }
}

fn propagate_split(internal: &mut DecodedInternal, idx: usize, promoted_key: u64, new_right: PageId) {
    if idx < internal.cells.len() {
        let old_child = internal.cells[idx].child;
        internal.cells[idx].child = new_right;
        internal.cells.insert(idx, InternalCell { key: promoted_key, child: old_child });
    } else {
        let old_right = internal.right_child;
        internal.right_child = new_right;
        internal.cells.push(InternalCell { key: promoted_key, child: old_right });
    }
}

/// Inserts `(key, value)`, returning the tree's (possibly new) root page id.
/// `unique` gates the uniqueness check a table's primary key or a unique
/// index needs; set false for a plain non-unique index.
pub fn insert(store: &mut impl PageStore, root: PageId, key: u64, value: &[u8], unique: bool) -> Result<PageId> {
    let new_cell = make_leaf_cell(store, key, value)?;
    match insert_into(store, root, key, new_cell, unique)? {
        None => Ok(root),
        Some((promoted_key, new_right)) => {
            let new_root = store.alloc()?;
            let cells = vec![InternalCell { key: promoted_key, child: root }];
            let buf = encode_internal(store.page_size(), &cells, new_right)?;
            store.write(new_root, buf)?;
            Ok(new_root)
        }
    }
}

/// Finds `key`'s first matching value, reading through its overflow chain
/// if one is present.
pub fn find(store: &mut impl PageRead, root: PageId, key: u64) -> Result<Option<Vec<u8>>> {
    let (_, leaf) = descend_to_leaf(store, root, key)?;
    match leaf.cells.iter().find(|c| c.key == key) {
        None => Ok(None),
        Some(cell) => match cell.overflow_root {
            Some(ov) => Ok(Some(overflow::read_chain_all(store, ov)?)),
            None => Ok(Some(cell.value.clone())),
        },
    }
}

pub fn contains(store: &mut impl PageRead, root: PageId, key: u64) -> Result<bool> {
    Ok(find(store, root, key)?.is_some())
}

fn update_recursive(
    store: &mut impl PageStore,
    page_id: PageId,
    key: u64,
    value: &[u8],
) -> Result<Option<Split>> {
    let buf = store.read(page_id)?;
    if is_leaf_page(&buf) {
        let mut leaf = decode_leaf(&buf)?;
        let Some(idx) = leaf.cells.iter().position(|c| c.key == key) else {
            return Ok(None);
        };
        if let Some(old_overflow) = leaf.cells[idx].overflow_root {
            overflow::free_chain(store, old_overflow)?;
        }
        leaf.cells[idx] = make_leaf_cell(store, key, value)?;
        Ok(Some(write_leaf_with_possible_split(store, page_id, leaf)?))
    } else {
        let internal = decode_internal(&buf)?;
        let idx = child_index(&internal, key);
        let child_id = if idx < internal.cells.len() { internal.cells[idx].child } else { internal.right_child };
        match update_recursive(store, child_id, key, value)? {
            None => Ok(None),
            Some(None) => Ok(Some(None)),
            Some(Some((promoted_key, new_right))) => {
                let mut internal = internal;
                propagate_split(&mut internal, idx, promoted_key, new_right);
                Ok(Some(write_internal_with_possible_split(store, page_id, internal)?))
            }
        }
    }
}

/// Replaces the value stored for `key`, returning `false` if `key` is
/// absent. Assumes `key` identifies at most one cell in the tree (the
/// table/unique-index usage this is meant for).
pub fn update(store: &mut impl PageStore, root: PageId, key: u64, value: &[u8]) -> Result<bool> {
    match update_recursive(store, root, key, value)? {
        None => Ok(false),
        Some(_) => Ok(true),
    }
}

/// Removes `key`'s first matching cell. Deletion never merges underfull
/// leaves back together; callers needing compaction should watch
/// [`needs_compaction`] and rebuild via [`bulk_build_from_sorted`].
pub fn delete(store: &mut impl PageStore, root: PageId, key: u64) -> Result<bool> {
    let (page_id, mut leaf) = descend_to_leaf(store, root, key)?;
    let Some(idx) = leaf.cells.iter().position(|c| c.key == key) else {
        return Ok(false);
    };
    if let Some(ov) = leaf.cells[idx].overflow_root {
        overflow::free_chain(store, ov)?;
    }
    leaf.cells.remove(idx);
    store.write(page_id, encode_leaf(store.page_size(), &leaf.cells, leaf.next_leaf)?)?;
    Ok(true)
}

/// Removes the cell matching both `key` and `value` exactly, for
/// non-unique indexes where several rows share a key.
pub fn delete_key_value(store: &mut impl PageStore, root: PageId, key: u64, value: &[u8]) -> Result<bool> {
    let (page_id, mut leaf) = descend_to_leaf(store, root, key)?;
    let mut found = None;
    for (i, cell) in leaf.cells.iter().enumerate() {
        if cell.key != key {
            continue;
        }
        let matches = match cell.overflow_root {
            Some(ov) => overflow::read_chain_all(store, ov)? == value,
            None => cell.value == value,
        };
        if matches {
            found = Some(i);
            break;
        }
    }
    let Some(idx) = found else {
        return Ok(false);
    };
    if let Some(ov) = leaf.cells[idx].overflow_root {
        overflow::free_chain(store, ov)?;
    }
    leaf.cells.remove(idx);
    store.write(page_id, encode_leaf(store.page_size(), &leaf.cells, leaf.next_leaf)?)?;
    Ok(true)
}

/// Forward-only cursor over `(key, value)` pairs in ascending leaf order.
pub struct Cursor<'s, S: PageRead> {
    store: &'s mut S,
    leaf: DecodedLeaf,
    idx: usize,
}

impl<'s, S: PageRead> Cursor<'s, S> {
    /// Returns the next pair, reading through an overflow chain when needed.
    pub fn next(&mut self) -> Result<Option<(u64, Vec<u8>)>> {
        loop {
            if self.idx < self.leaf.cells.len() {
                let cell = self.leaf.cells[self.idx].clone();
                self.idx += 1;
                let value = match cell.overflow_root {
                    Some(ov) => overflow::read_chain_all(self.store, ov)?,
                    None => cell.value,
                };
                return Ok(Some((cell.key, value)));
            }
            if self.leaf.next_leaf.is_header() {
                return Ok(None);
            }
            let buf = self.store.read(self.leaf.next_leaf)?;
            self.leaf = decode_leaf(&buf)?;
            self.idx = 0;
        }
    }
}

/// Opens a cursor at the leftmost key in the tree.
pub fn open_cursor<S: PageRead>(store: &mut S, root: PageId) -> Result<Cursor<'_, S>> {
    let (_, leaf) = leftmost_leaf(store, root)?;
    Ok(Cursor { store, leaf, idx: 0 })
}

/// Opens a cursor positioned at the first cell with `key >= start`.
pub fn open_cursor_at<S: PageRead>(store: &mut S, root: PageId, start: u64) -> Result<Cursor<'_, S>> {
    let (_, leaf) = descend_to_leaf(store, root, start)?;
    let idx = leaf.cells.partition_point(|c| c.key < start);
    Ok(Cursor { store, leaf, idx })
}

fn pack_leaves(store: &mut impl PageStore, entries: &[(u64, Vec<u8>)]) -> Result<Vec<(PageId, u64)>> {
    let page_size = store.page_size();
    let mut groups: Vec<Vec<LeafCell>> = Vec::new();
    let mut current: Vec<LeafCell> = Vec::new();
    for (key, value) in entries {
        let cell = make_leaf_cell(store, *key, value)?;
        let mut trial = current.clone();
        trial.push(cell.clone());
        if leaf_encoded_size(&trial) > page_size.as_usize() && !current.is_empty() {
            groups.push(std::mem::take(&mut current));
            current.push(cell);
        } else {
            current = trial;
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }

    let ids = groups.iter().map(|_| store.alloc()).collect::<Result<Vec<_>>>()?;
    for (i, group) in groups.iter().enumerate() {
        let next = ids.get(i + 1).copied().unwrap_or(PageId::HEADER);
        store.write(ids[i], encode_leaf(page_size, group, next)?)?;
    }
    // Pair each leaf with its own minimum key: separators encode "this
    // child holds keys strictly less than the next child's minimum", the
    // same convention `insert`'s split path produces.
    Ok(ids
        .iter()
        .zip(groups.iter())
        .map(|(id, group)| (*id, group.first().map(|c| c.key).unwrap_or(0)))
        .collect())
}

/// Rebuilds a tree from a key-sorted `(key, value)` stream: packs leaves to
/// capacity, then builds internal levels bottom-up with a fan-out of
/// roughly `(page_size - 8) / 15` (the approximate byte cost of one
/// internal cell), returning the new root page id.
pub fn bulk_build_from_sorted(store: &mut impl PageStore, entries: &[(u64, Vec<u8>)]) -> Result<PageId> {
    if entries.is_empty() {
        let id = store.alloc()?;
        store.write(id, encode_leaf(store.page_size(), &[], PageId::HEADER)?)?;
        return Ok(id);
    }
    // Each level entry is `(page_id, min_key)`; min_key propagates a node's
    // own minimum up from its first child, since that's also the minimum
    // of the node's whole subtree.
    let mut level = pack_leaves(store, entries)?;
    let fanout = ((store.page_size().as_usize().saturating_sub(8)) / 15).max(2);
    while level.len() > 1 {
        let mut next_level = Vec::with_capacity(level.len().div_ceil(fanout));
        for chunk in level.chunks(fanout) {
            let cells: Vec<InternalCell> = (0..chunk.len() - 1)
                .map(|i| InternalCell { key: chunk[i + 1].1, child: chunk[i].0 })
                .collect();
            let right_child = chunk.last().unwrap().0;
            let id = store.alloc()?;
            store.write(id, encode_internal(store.page_size(), &cells, right_child)?)?;
            next_level.push((id, chunk[0].1));
        }
        level = next_level;
    }
    Ok(level[0].0)
}

/// Average fraction of each page's capacity in use across the whole tree,
/// in `[0.0, 1.0]`. Cheap proxy for "should this be rebuilt".
pub fn utilization(store: &mut impl PageRead, root: PageId) -> Result<f64> {
    let page_size = store.page_size().as_usize() as f64;
    let mut total_used = 0_u64;
    let mut total_pages = 0_u64;
    let mut stack = vec![root];
    while let Some(page_id) = stack.pop() {
        let buf = store.read(page_id)?;
        if is_leaf_page(&buf) {
            let leaf = decode_leaf(&buf)?;
            total_used += leaf_encoded_size(&leaf.cells) as u64;
        } else {
            let internal = decode_internal(&buf)?;
            total_used += internal_encoded_size(&internal.cells) as u64;
            stack.extend(internal.cells.iter().map(|c| c.child));
            stack.push(internal.right_child);
        }
        total_pages += 1;
    }
    if total_pages == 0 {
        return Ok(0.0);
    }
    Ok(total_used as f64 / (total_pages as f64 * page_size))
}

/// Does the tree's utilization fall below `threshold` (e.g. `0.5` for 50%)?
pub fn needs_compaction(store: &mut impl PageRead, root: PageId, threshold: f64) -> Result<bool> {
    Ok(utilization(store, root)? < threshold)
}

/// Frees every page reachable from `root` except `root` itself, including
/// overflow chains hanging off any leaf. Used before a caller replaces
/// `root`'s contents wholesale (e.g. an index rebuild) so the old tree
/// doesn't leak pages.
pub fn free_all_except_root(store: &mut impl PageStore, root: PageId) -> Result<()> {
    let buf = store.read(root)?;
    let mut stack: Vec<PageId> = if is_leaf_page(&buf) {
        let leaf = decode_leaf(&buf)?;
        for cell in &leaf.cells {
            if let Some(ov) = cell.overflow_root {
                overflow::free_chain(store, ov)?;
            }
        }
        Vec::new()
    } else {
        let internal = decode_internal(&buf)?;
        let mut children: Vec<PageId> = internal.cells.iter().map(|c| c.child).collect();
        children.push(internal.right_child);
        children
    };

    while let Some(page_id) = stack.pop() {
        let buf = store.read(page_id)?;
        if is_leaf_page(&buf) {
            let leaf = decode_leaf(&buf)?;
            for cell in &leaf.cells {
                if let Some(ov) = cell.overflow_root {
                    overflow::free_chain(store, ov)?;
                }
            }
        } else {
            let internal = decode_internal(&buf)?;
            stack.extend(internal.cells.iter().map(|c| c.child));
            stack.push(internal.right_child);
        }
        store.free(page_id)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashbrown::HashMap;
    use quilldb_types::PageBuf;

    struct FakeStore {
        pages: HashMap<PageId, PageBuf>,
        next_id: u32,
        page_size: PageSize,
    }

    impl FakeStore {
        fn new(page_size: PageSize) -> Self {
            let mut store = Self { pages: HashMap::new(), next_id: 1, page_size };
            let root = PageId::new(store.next_id);
            store.next_id += 1;
            store.pages.insert(root, encode_leaf(page_size, &[], PageId::HEADER).unwrap());
            store
        }

        fn root(&self) -> PageId {
            PageId::new(1)
        }
    }

    impl PageRead for FakeStore {
        fn read(&mut self, page_id: PageId) -> Result<PageBuf> {
            Ok(self.pages[&page_id].clone())
        }

        fn page_size(&self) -> PageSize {
            self.page_size
        }
    }

    impl PageStore for FakeStore {
        fn alloc(&mut self) -> Result<PageId> {
            let id = PageId::new(self.next_id);
            self.next_id += 1;
            Ok(id)
        }

        fn write(&mut self, page_id: PageId, data: PageBuf) -> Result<()> {
            self.pages.insert(page_id, data);
            Ok(())
        }

        fn free(&mut self, page_id: PageId) -> Result<()> {
            self.pages.remove(&page_id);
            Ok(())
        }
    }

    #[test]
    fn insert_and_find_round_trip() {
        let page_size = PageSize::new(2048).unwrap();
        let mut store = FakeStore::new(page_size);
        let mut root = store.root();
        for i in 0..200_u64 {
            root = insert(&mut store, root, i, format!("value-{i}").as_bytes(), true).unwrap();
        }
        for i in 0..200_u64 {
            let value = find(&mut store, root, i).unwrap().unwrap();
            assert_eq!(value, format!("value-{i}").into_bytes());
        }
        assert!(find(&mut store, root, 5000).unwrap().is_none());
    }

    #[test]
    fn unique_insert_rejects_duplicate_key() {
        let page_size = PageSize::new(2048).unwrap();
        let mut store = FakeStore::new(page_size);
        let root = insert(&mut store, store.root(), 1, b"a", true).unwrap();
        assert!(insert(&mut store, root, 1, b"b", true).is_err());
    }

    #[test]
    fn non_unique_insert_keeps_all_duplicates() {
        let page_size = PageSize::new(2048).unwrap();
        let mut store = FakeStore::new(page_size);
        let mut root = store.root();
        root = insert(&mut store, root, 1, b"a", false).unwrap();
        root = insert(&mut store, root, 1, b"b", false).unwrap();
        root = insert(&mut store, root, 1, b"c", false).unwrap();
        let mut cursor = open_cursor(&mut store, root).unwrap();
        let mut values = Vec::new();
        while let Some((k, v)) = cursor.next().unwrap() {
            assert_eq!(k, 1);
            values.push(v);
        }
        assert_eq!(values, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn insert_causes_split_and_still_finds_everything() {
        let page_size = PageSize::new(2048).unwrap();
        let mut store = FakeStore::new(page_size);
        let mut root = store.root();
        for i in 0..2000_u64 {
            root = insert(&mut store, root, i, &i.to_le_bytes(), true).unwrap();
        }
        assert!(store.pages.len() > 2);
        for i in 0..2000_u64 {
            let value = find(&mut store, root, i).unwrap().unwrap();
            assert_eq!(value, i.to_le_bytes().to_vec());
        }
    }

    #[test]
    fn cursor_yields_keys_in_ascending_order() {
        let page_size = PageSize::new(2048).unwrap();
        let mut store = FakeStore::new(page_size);
        let mut root = store.root();
        let mut keys: Vec<u64> = (0..500).collect();
        keys.reverse();
        for &k in &keys {
            root = insert(&mut store, root, k, &k.to_le_bytes(), true).unwrap();
        }
        let mut cursor = open_cursor(&mut store, root).unwrap();
        let mut seen = Vec::new();
        while let Some((k, _)) = cursor.next().unwrap() {
            seen.push(k);
        }
        let mut expected: Vec<u64> = (0..500).collect();
        expected.sort_unstable();
        assert_eq!(seen, expected);
    }

    #[test]
    fn open_cursor_at_skips_lower_keys() {
        let page_size = PageSize::new(2048).unwrap();
        let mut store = FakeStore::new(page_size);
        let mut root = store.root();
        for i in 0..100_u64 {
            root = insert(&mut store, root, i, &i.to_le_bytes(), true).unwrap();
        }
        let mut cursor = open_cursor_at(&mut store, root, 50).unwrap();
        let (first, _) = cursor.next().unwrap().unwrap();
        assert_eq!(first, 50);
    }

    #[test]
    fn update_replaces_value_without_changing_key_count() {
        let page_size = PageSize::new(2048).unwrap();
        let mut store = FakeStore::new(page_size);
        let root = insert(&mut store, store.root(), 1, b"old", true).unwrap();
        assert!(update(&mut store, root, 1, b"new-value").unwrap());
        assert_eq!(find(&mut store, root, 1).unwrap().unwrap(), b"new-value".to_vec());
        assert!(!update(&mut store, root, 999, b"nope").unwrap());
    }

    #[test]
    fn update_to_oversized_value_spills_to_overflow() {
        let page_size = PageSize::new(2048).unwrap();
        let mut store = FakeStore::new(page_size);
        let root = insert(&mut store, store.root(), 1, b"short", true).unwrap();
        let big = vec![0x42_u8; page_size.as_usize() * 3];
        assert!(update(&mut store, root, 1, &big).unwrap());
        assert_eq!(find(&mut store, root, 1).unwrap().unwrap(), big);
    }

    #[test]
    fn delete_removes_key_and_frees_overflow() {
        let page_size = PageSize::new(2048).unwrap();
        let mut store = FakeStore::new(page_size);
        let big = vec![0x11_u8; page_size.as_usize() * 2];
        let root = insert(&mut store, store.root(), 1, &big, true).unwrap();
        let pages_before = store.pages.len();
        assert!(delete(&mut store, root, 1).unwrap());
        assert!(find(&mut store, root, 1).unwrap().is_none());
        assert!(store.pages.len() < pages_before);
        assert!(!delete(&mut store, root, 1).unwrap());
    }

    #[test]
    fn delete_key_value_targets_matching_duplicate_only() {
        let page_size = PageSize::new(2048).unwrap();
        let mut store = FakeStore::new(page_size);
        let mut root = store.root();
        root = insert(&mut store, root, 1, b"a", false).unwrap();
        root = insert(&mut store, root, 1, b"b", false).unwrap();
        assert!(delete_key_value(&mut store, root, 1, b"a").unwrap());
        let mut cursor = open_cursor(&mut store, root).unwrap();
        let mut values = Vec::new();
        while let Some((_, v)) = cursor.next().unwrap() {
            values.push(v);
        }
        assert_eq!(values, vec![b"b".to_vec()]);
    }

    #[test]
    fn bulk_build_from_sorted_produces_queryable_tree() {
        let page_size = PageSize::new(2048).unwrap();
        let mut store = FakeStore::new(page_size);
        let entries: Vec<(u64, Vec<u8>)> = (0..3000_u64).map(|i| (i, format!("row-{i}").into_bytes())).collect();
        let root = bulk_build_from_sorted(&mut store, &entries).unwrap();
        for i in (0..3000_u64).step_by(137) {
            assert_eq!(find(&mut store, root, i).unwrap().unwrap(), format!("row-{i}").into_bytes());
        }
        let mut cursor = open_cursor(&mut store, root).unwrap();
        let mut count = 0;
        while cursor.next().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 3000);
    }

    #[test]
    fn bulk_build_from_empty_produces_empty_tree() {
        let page_size = PageSize::new(2048).unwrap();
        let mut store = FakeStore::new(page_size);
        let root = bulk_build_from_sorted(&mut store, &[]).unwrap();
        assert!(find(&mut store, root, 1).unwrap().is_none());
    }

    #[test]
    fn utilization_reports_full_after_bulk_build() {
        let page_size = PageSize::new(2048).unwrap();
        let mut store = FakeStore::new(page_size);
        let entries: Vec<(u64, Vec<u8>)> = (0..1000_u64).map(|i| (i, vec![0_u8; 20])).collect();
        let root = bulk_build_from_sorted(&mut store, &entries).unwrap();
        let util = utilization(&mut store, root).unwrap();
        assert!(util > 0.5, "expected high utilization after bulk build, got {util}");
        assert!(!needs_compaction(&mut store, root, 0.5).unwrap());
    }

    #[test]
    fn free_all_except_root_reclaims_every_other_page() {
        let page_size = PageSize::new(2048).unwrap();
        let mut store = FakeStore::new(page_size);
        let entries: Vec<(u64, Vec<u8>)> = (0..2000_u64).map(|i| (i, format!("row-{i}").into_bytes())).collect();
        let root = bulk_build_from_sorted(&mut store, &entries).unwrap();
        assert!(store.pages.len() > 1);
        free_all_except_root(&mut store, root).unwrap();
        assert_eq!(store.pages.len(), 1);
        assert!(store.pages.contains_key(&root));
    }
}
