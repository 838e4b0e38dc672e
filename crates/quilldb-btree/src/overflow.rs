//! Overflow chains (C6): values larger than the leaf inline limit are
//! stored as a linked list of pages, each `{next_page: u32, payload_len: u32,
//! payload: [u8]}`, per spec.md §3/§4.5.

use quilldb_error::{QuillError, Result};
use quilldb_types::{PageBuf, PageId};

use crate::store::{PageRead, PageStore};

const NEXT_OFFSET: usize = 0;
const LEN_OFFSET: usize = 4;
const PAYLOAD_OFFSET: usize = 8;

fn payload_capacity(page_size: quilldb_types::PageSize) -> usize {
    page_size.as_usize() - PAYLOAD_OFFSET
}

/// Writes `value` across newly allocated overflow pages, returning the root
/// page id. Concatenating each page's payload in chain order reconstructs
/// `value` exactly.
pub fn write_chain(store: &mut impl PageStore, value: &[u8]) -> Result<PageId> {
    let capacity = payload_capacity(store.page_size());
    let mut chunks: Vec<&[u8]> = value.chunks(capacity).collect();
    if chunks.is_empty() {
        chunks.push(&[]);
    }

    let mut page_ids = Vec::with_capacity(chunks.len());
    for _ in &chunks {
        page_ids.push(store.alloc()?);
    }

    for (i, chunk) in chunks.iter().enumerate() {
        let next = if i + 1 < page_ids.len() {
            page_ids[i + 1]
        } else {
            PageId::HEADER
        };
        let mut buf = PageBuf::new(store.page_size());
        let bytes = buf.as_mut_slice();
        bytes[NEXT_OFFSET..NEXT_OFFSET + 4].copy_from_slice(&next.get().to_le_bytes());
        let len = u32::try_from(chunk.len())
            .map_err(|_| QuillError::internal("overflow chunk exceeds u32 length"))?;
        bytes[LEN_OFFSET..LEN_OFFSET + 4].copy_from_slice(&len.to_le_bytes());
        bytes[PAYLOAD_OFFSET..PAYLOAD_OFFSET + chunk.len()].copy_from_slice(chunk);
        store.write(page_ids[i], buf)?;
    }

    Ok(page_ids[0])
}

/// Reads and concatenates every page in the chain rooted at `root`.
pub fn read_chain_all(store: &mut impl PageStore, root: PageId) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut current = root;
    loop {
        let page = store.read(current)?;
        let bytes = page.as_slice();
        let next = PageId::new(u32::from_le_bytes(bytes[NEXT_OFFSET..NEXT_OFFSET + 4].try_into().unwrap()));
        let len = u32::from_le_bytes(bytes[LEN_OFFSET..LEN_OFFSET + 4].try_into().unwrap()) as usize;
        let capacity = payload_capacity(store.page_size());
        if len > capacity {
            return Err(QuillError::corruption(
                "overflow payload length",
                format!("page {current}: len={len} exceeds capacity {capacity}"),
            ));
        }
        out.extend_from_slice(&bytes[PAYLOAD_OFFSET..PAYLOAD_OFFSET + len]);
        if next.is_header() {
            break;
        }
        current = next;
    }
    Ok(out)
}

/// Frees every page in the chain rooted at `root`.
pub fn free_chain(store: &mut impl PageStore, root: PageId) -> Result<()> {
    let mut current = root;
    loop {
        let page = store.read(current)?;
        let bytes = page.as_slice();
        let next = PageId::new(u32::from_le_bytes(bytes[NEXT_OFFSET..NEXT_OFFSET + 4].try_into().unwrap()));
        store.free(current)?;
        if next.is_header() {
            break;
        }
        current = next;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashbrown::HashMap;
    use quilldb_types::PageSize;

    struct FakeStore {
        pages: HashMap<PageId, PageBuf>,
        next_id: u32,
        page_size: PageSize,
        freed: Vec<PageId>,
    }

    impl FakeStore {
        fn new(page_size: PageSize) -> Self {
            Self {
                pages: HashMap::new(),
                next_id: 1,
                page_size,
                freed: Vec::new(),
            }
        }
    }

    impl crate::store::PageRead for FakeStore {
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
            self.freed.push(page_id);
            self.pages.remove(&page_id);
            Ok(())
        }
    }

    #[test]
    fn small_value_round_trips_in_one_page() {
        let mut store = FakeStore::new(PageSize::new(2048).unwrap());
        let value = b"hello overflow world".to_vec();
        let root = write_chain(&mut store, &value).unwrap();
        let read_back = read_chain_all(&mut store, root).unwrap();
        assert_eq!(read_back, value);
    }

    #[test]
    fn large_value_spans_many_pages_and_round_trips() {
        let page_size = PageSize::new(2048).unwrap();
        let mut store = FakeStore::new(page_size);
        let value: Vec<u8> = (0..page_size.as_usize() * 10).map(|i| (i % 251) as u8).collect();
        let root = write_chain(&mut store, &value).unwrap();
        let read_back = read_chain_all(&mut store, root).unwrap();
        assert_eq!(read_back, value);
        assert!(store.pages.len() > 1);
    }

    #[test]
    fn free_chain_removes_every_page() {
        let page_size = PageSize::new(2048).unwrap();
        let mut store = FakeStore::new(page_size);
        let value: Vec<u8> = vec![0xAA; page_size.as_usize() * 3];
        let root = write_chain(&mut store, &value).unwrap();
        let chain_len = store.pages.len();
        free_chain(&mut store, root).unwrap();
        assert_eq!(store.freed.len(), chain_len);
        assert!(store.pages.is_empty());
    }
}
