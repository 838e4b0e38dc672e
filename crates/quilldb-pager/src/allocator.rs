//! Page allocator and freelist (C2).
//!
//! The freelist is a singly linked list of pages rooted at `freelist_head`;
//! each freelist page stores a next-pointer and an array of freed page ids
//! (§3). Allocation pops from the freelist when non-empty (reusing the
//! freelist page itself once its id array is drained); otherwise it extends
//! the file by one page. These operations only make sense inside a write
//! transaction, so they take an injected [`PageSource`] rather than owning
//! any file handle themselves — the caller (the transaction) supplies
//! WAL-journaled page reads/writes.

use quilldb_error::Result;
use quilldb_types::{Cx, PageBuf, PageId, PageSize};

/// What the allocator needs from its caller: read a page's current image,
/// stage a new image for the page, or grow the database by one page.
/// A write transaction implements this over its dirty overlay plus WAL.
pub trait PageSource {
    fn get_page(&mut self, cx: Cx, page_id: PageId) -> Result<PageBuf>;
    fn put_page(&mut self, cx: Cx, page_id: PageId, data: PageBuf) -> Result<()>;
    fn extend(&mut self, cx: Cx) -> Result<PageId>;
}

const NEXT_OFFSET: usize = 0;
const COUNT_OFFSET: usize = 4;
const IDS_OFFSET: usize = 6;

fn max_ids_per_page(page_size: PageSize) -> usize {
    (page_size.as_usize() - IDS_OFFSET) / 4
}

fn decode_next(page: &PageBuf) -> PageId {
    let raw = u32::from_le_bytes(page.as_slice()[NEXT_OFFSET..NEXT_OFFSET + 4].try_into().unwrap());
    PageId::new(raw)
}

fn decode_count(page: &PageBuf) -> u16 {
    u16::from_le_bytes(page.as_slice()[COUNT_OFFSET..COUNT_OFFSET + 2].try_into().unwrap())
}

fn decode_ids(page: &PageBuf, count: u16) -> Vec<PageId> {
    let mut ids = Vec::with_capacity(count as usize);
    let bytes = page.as_slice();
    for i in 0..count as usize {
        let off = IDS_OFFSET + i * 4;
        let raw = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
        ids.push(PageId::new(raw));
    }
    ids
}

fn encode_freelist_page(page_size: PageSize, next: PageId, ids: &[PageId]) -> PageBuf {
    let mut buf = PageBuf::new(page_size);
    let bytes = buf.as_mut_slice();
    bytes[NEXT_OFFSET..NEXT_OFFSET + 4].copy_from_slice(&next.get().to_le_bytes());
    let count = u16::try_from(ids.len()).expect("freelist id count fits in u16");
    bytes[COUNT_OFFSET..COUNT_OFFSET + 2].copy_from_slice(&count.to_le_bytes());
    for (i, id) in ids.iter().enumerate() {
        let off = IDS_OFFSET + i * 4;
        bytes[off..off + 4].copy_from_slice(&id.get().to_le_bytes());
    }
    buf
}

/// Allocates a fresh page, reusing a freed one if the freelist is non-empty.
/// Returns the allocated page id and the freelist head to persist in the DB
/// header afterward.
pub fn allocate(
    cx: Cx,
    source: &mut impl PageSource,
    page_size: PageSize,
    freelist_head: PageId,
) -> Result<(PageId, PageId)> {
    if freelist_head.is_header() {
        let fresh = source.extend(cx)?;
        return Ok((fresh, freelist_head));
    }

    let head_page = source.get_page(cx, freelist_head)?;
    let next = decode_next(&head_page);
    let count = decode_count(&head_page);
    let mut ids = decode_ids(&head_page, count);

    if let Some(reused) = ids.pop() {
        let rewritten = encode_freelist_page(page_size, next, &ids);
        source.put_page(cx, freelist_head, rewritten)?;
        Ok((reused, freelist_head))
    } else {
        // The array is empty; the head page itself becomes the allocation.
        Ok((freelist_head, next))
    }
}

/// Pushes `page_id` onto the freelist, returning the new freelist head to
/// persist in the DB header.
pub fn free(
    cx: Cx,
    source: &mut impl PageSource,
    page_size: PageSize,
    freelist_head: PageId,
    page_id: PageId,
) -> Result<PageId> {
    if page_id.is_header() {
        return Err(quilldb_error::QuillError::internal(
            "the header page can never be freed",
        ));
    }

    if freelist_head.is_header() {
        let page = encode_freelist_page(page_size, PageId::HEADER, &[]);
        source.put_page(cx, page_id, page)?;
        return Ok(page_id);
    }

    let head_page = source.get_page(cx, freelist_head)?;
    let next = decode_next(&head_page);
    let count = decode_count(&head_page);
    let mut ids = decode_ids(&head_page, count);

    if ids.len() < max_ids_per_page(page_size) {
        ids.push(page_id);
        let rewritten = encode_freelist_page(page_size, next, &ids);
        source.put_page(cx, freelist_head, rewritten)?;
        Ok(freelist_head)
    } else {
        let page = encode_freelist_page(page_size, freelist_head, &[]);
        source.put_page(cx, page_id, page)?;
        Ok(page_id)
    }
}
