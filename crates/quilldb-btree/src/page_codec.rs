//! B+Tree page byte layout (§3, §6):
//!
//! ```text
//! byte 0      page type: 1 = internal, 2 = leaf
//! byte 1      reserved
//! bytes 2..4  u16 cell count
//! bytes 4..8  u32 next_leaf (leaf) / right_child (internal)
//! bytes 8..   cells
//! ```
//!
//! Internal cell: `{varint key, varint child_page}`.
//! Leaf cell: `{varint key, varint control, value_bytes?}` where
//! `control = (payload << 1) | overflow_bit`; `overflow_bit = 0` means
//! `payload` is the inline value length, `overflow_bit = 1` means `payload`
//! is the overflow chain's root page id.

use quilldb_error::{QuillError, Result};
use quilldb_types::{PageBuf, PageId, PageSize, decode_varint, encode_varint_into};

pub const PAGE_TYPE_INTERNAL: u8 = 1;
pub const PAGE_TYPE_LEAF: u8 = 2;
pub const PAGE_HEADER_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafCell {
    pub key: u64,
    pub value: Vec<u8>,
    pub overflow_root: Option<PageId>,
}

impl LeafCell {
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let mut key_buf = Vec::new();
        let key_len = encode_varint_into(self.key, &mut key_buf);
        let control = self.control();
        let mut control_buf = Vec::new();
        let control_len = encode_varint_into(control, &mut control_buf);
        let value_len = if self.overflow_root.is_some() { 0 } else { self.value.len() };
        key_len + control_len + value_len
    }

    fn control(&self) -> u64 {
        match self.overflow_root {
            Some(root) => (u64::from(root.get()) << 1) | 1,
            None => (self.value.len() as u64) << 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalCell {
    pub key: u64,
    pub child: PageId,
}

impl InternalCell {
    #[must_use]
    pub fn encoded_len(self) -> usize {
        let mut key_buf = Vec::new();
        let key_len = encode_varint_into(self.key, &mut key_buf);
        let mut child_buf = Vec::new();
        let child_len = encode_varint_into(u64::from(self.child.get()), &mut child_buf);
        key_len + child_len
    }
}

#[derive(Debug, Clone)]
pub struct DecodedLeaf {
    pub cells: Vec<LeafCell>,
    pub next_leaf: PageId,
}

#[derive(Debug, Clone)]
pub struct DecodedInternal {
    pub cells: Vec<InternalCell>,
    pub right_child: PageId,
}

/// Total encoded size of a leaf page body (header + all cells).
#[must_use]
pub fn leaf_encoded_size(cells: &[LeafCell]) -> usize {
    PAGE_HEADER_LEN + cells.iter().map(LeafCell::encoded_len).sum::<usize>()
}

/// Total encoded size of an internal page body.
#[must_use]
pub fn internal_encoded_size(cells: &[InternalCell]) -> usize {
    PAGE_HEADER_LEN + cells.iter().map(|c| c.encoded_len()).sum::<usize>()
}

pub fn encode_leaf(page_size: PageSize, cells: &[LeafCell], next_leaf: PageId) -> Result<PageBuf> {
    let total = leaf_encoded_size(cells);
    if total > page_size.as_usize() {
        return Err(QuillError::corruption(
            "leaf page overflow",
            format!("encoded size {total} exceeds page size {}", page_size.as_usize()),
        ));
    }
    let mut buf = PageBuf::new(page_size);
    {
        let bytes = buf.as_mut_slice();
        bytes[0] = PAGE_TYPE_LEAF;
        let count = u16::try_from(cells.len())
            .map_err(|_| QuillError::internal("leaf cell count exceeds u16"))?;
        bytes[2..4].copy_from_slice(&count.to_le_bytes());
        bytes[4..8].copy_from_slice(&next_leaf.get().to_le_bytes());
    }
    let mut body = Vec::with_capacity(total - PAGE_HEADER_LEN);
    for cell in cells {
        encode_varint_into(cell.key, &mut body);
        let control = cell.control();
        encode_varint_into(control, &mut body);
        if cell.overflow_root.is_none() {
            body.extend_from_slice(&cell.value);
        }
    }
    buf.as_mut_slice()[PAGE_HEADER_LEN..PAGE_HEADER_LEN + body.len()].copy_from_slice(&body);
    Ok(buf)
}

pub fn decode_leaf(buf: &PageBuf) -> Result<DecodedLeaf> {
    let bytes = buf.as_slice();
    if bytes[0] != PAGE_TYPE_LEAF {
        return Err(QuillError::corruption("leaf page type", bytes[0]));
    }
    let count = u16::from_le_bytes(bytes[2..4].try_into().unwrap()) as usize;
    let next_leaf = PageId::new(u32::from_le_bytes(bytes[4..8].try_into().unwrap()));

    let mut cells = Vec::with_capacity(count);
    let mut cursor = PAGE_HEADER_LEN;
    for _ in 0..count {
        let (key, n) = decode_varint(&bytes[cursor..])
            .ok_or_else(|| QuillError::corruption("leaf cell key varint", "truncated"))?;
        cursor += n;
        let (control, n) = decode_varint(&bytes[cursor..])
            .ok_or_else(|| QuillError::corruption("leaf cell control varint", "truncated"))?;
        cursor += n;
        let payload = control >> 1;
        if control & 1 == 1 {
            let root = PageId::new(u32::try_from(payload).map_err(|_| {
                QuillError::corruption("leaf overflow root", "does not fit u32")
            })?);
            cells.push(LeafCell {
                key,
                value: Vec::new(),
                overflow_root: Some(root),
            });
        } else {
            let len = usize::try_from(payload)
                .map_err(|_| QuillError::corruption("leaf inline length", "does not fit usize"))?;
            if cursor + len > bytes.len() {
                return Err(QuillError::corruption("leaf inline value", "truncated"));
            }
            cells.push(LeafCell {
                key,
                value: bytes[cursor..cursor + len].to_vec(),
                overflow_root: None,
            });
            cursor += len;
        }
    }
    Ok(DecodedLeaf { cells, next_leaf })
}

pub fn encode_internal(page_size: PageSize, cells: &[InternalCell], right_child: PageId) -> Result<PageBuf> {
    let total = internal_encoded_size(cells);
    if total > page_size.as_usize() {
        return Err(QuillError::corruption(
            "internal page overflow",
            format!("encoded size {total} exceeds page size {}", page_size.as_usize()),
        ));
    }
    let mut buf = PageBuf::new(page_size);
    {
        let bytes = buf.as_mut_slice();
        bytes[0] = PAGE_TYPE_INTERNAL;
        let count = u16::try_from(cells.len())
            .map_err(|_| QuillError::internal("internal cell count exceeds u16"))?;
        bytes[2..4].copy_from_slice(&count.to_le_bytes());
        bytes[4..8].copy_from_slice(&right_child.get().to_le_bytes());
    }
    let mut body = Vec::with_capacity(total - PAGE_HEADER_LEN);
    for cell in cells {
        encode_varint_into(cell.key, &mut body);
        encode_varint_into(u64::from(cell.child.get()), &mut body);
    }
    buf.as_mut_slice()[PAGE_HEADER_LEN..PAGE_HEADER_LEN + body.len()].copy_from_slice(&body);
    Ok(buf)
}

pub fn decode_internal(buf: &PageBuf) -> Result<DecodedInternal> {
    let bytes = buf.as_slice();
    if bytes[0] != PAGE_TYPE_INTERNAL {
        return Err(QuillError::corruption("internal page type", bytes[0]));
    }
    let count = u16::from_le_bytes(bytes[2..4].try_into().unwrap()) as usize;
    let right_child = PageId::new(u32::from_le_bytes(bytes[4..8].try_into().unwrap()));

    let mut cells = Vec::with_capacity(count);
    let mut cursor = PAGE_HEADER_LEN;
    for _ in 0..count {
        let (key, n) = decode_varint(&bytes[cursor..])
            .ok_or_else(|| QuillError::corruption("internal cell key varint", "truncated"))?;
        cursor += n;
        let (child, n) = decode_varint(&bytes[cursor..])
            .ok_or_else(|| QuillError::corruption("internal cell child varint", "truncated"))?;
        cursor += n;
        let child = u32::try_from(child)
            .map_err(|_| QuillError::corruption("internal cell child", "does not fit u32"))?;
        cells.push(InternalCell {
            key,
            child: PageId::new(child),
        });
    }
    Ok(DecodedInternal { cells, right_child })
}

/// Is `buf` a leaf page (byte 0 == 2)? Used to dispatch without a full decode.
#[must_use]
pub fn is_leaf_page(buf: &PageBuf) -> bool {
    buf.as_slice()[0] == PAGE_TYPE_LEAF
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn leaf_round_trips_inline_and_overflow_cells() {
        let page_size = PageSize::DEFAULT;
        let cells = vec![
            LeafCell {
                key: 1,
                value: b"abc".to_vec(),
                overflow_root: None,
            },
            LeafCell {
                key: 2,
                value: Vec::new(),
                overflow_root: Some(PageId::new(77)),
            },
        ];
        let buf = encode_leaf(page_size, &cells, PageId::new(9)).unwrap();
        let decoded = decode_leaf(&buf).unwrap();
        assert_eq!(decoded.next_leaf, PageId::new(9));
        assert_eq!(decoded.cells, cells);
        assert!(is_leaf_page(&buf));
    }

    #[test]
    fn internal_round_trips() {
        let page_size = PageSize::DEFAULT;
        let cells = vec![
            InternalCell { key: 10, child: PageId::new(1) },
            InternalCell { key: 20, child: PageId::new(2) },
        ];
        let buf = encode_internal(page_size, &cells, PageId::new(3)).unwrap();
        let decoded = decode_internal(&buf).unwrap();
        assert_eq!(decoded.right_child, PageId::new(3));
        assert_eq!(decoded.cells, cells);
    }

    #[test]
    fn oversized_leaf_page_rejected() {
        let page_size = PageSize::new(2048).unwrap();
        let cells = vec![LeafCell {
            key: 1,
            value: vec![0_u8; 4000],
            overflow_root: None,
        }];
        assert!(encode_leaf(page_size, &cells, PageId::HEADER).is_err());
    }

    proptest! {
        /// Invariant 2: encoding then decoding any legal leaf cell set
        /// returns the original keys, values and overflow roots.
        #[test]
        fn leaf_cells_round_trip(
            keys in prop::collection::vec(0_u64..1_000_000, 0..12),
            overflow_flags in prop::collection::vec(any::<bool>(), 0..12),
        ) {
            let page_size = PageSize::DEFAULT;
            let mut sorted_keys = keys;
            sorted_keys.sort_unstable();
            sorted_keys.dedup();
            let cells: Vec<LeafCell> = sorted_keys
                .iter()
                .enumerate()
                .map(|(i, &key)| {
                    if overflow_flags.get(i).copied().unwrap_or(false) {
                        LeafCell { key, value: Vec::new(), overflow_root: Some(PageId::new(i as u32 + 1)) }
                    } else {
                        LeafCell { key, value: vec![(i % 256) as u8; i % 20], overflow_root: None }
                    }
                })
                .collect();
            if leaf_encoded_size(&cells) > page_size.as_usize() {
                return Ok(());
            }
            let buf = encode_leaf(page_size, &cells, PageId::new(1)).unwrap();
            let decoded = decode_leaf(&buf).unwrap();
            prop_assert_eq!(decoded.cells, cells);
        }

        /// Invariant 2, internal variant: same round-trip guarantee for
        /// internal cells (key, child id pairs) plus the right-child pointer.
        #[test]
        fn internal_cells_round_trip(
            keys in prop::collection::vec(0_u64..1_000_000, 0..20),
            right_child in 1_u32..1000,
        ) {
            let page_size = PageSize::DEFAULT;
            let mut sorted_keys = keys;
            sorted_keys.sort_unstable();
            sorted_keys.dedup();
            let cells: Vec<InternalCell> = sorted_keys
                .iter()
                .enumerate()
                .map(|(i, &key)| InternalCell { key, child: PageId::new(i as u32 + 1) })
                .collect();
            if internal_encoded_size(&cells) > page_size.as_usize() {
                return Ok(());
            }
            let buf = encode_internal(page_size, &cells, PageId::new(right_child)).unwrap();
            let decoded = decode_internal(&buf).unwrap();
            prop_assert_eq!(decoded.cells, cells);
            prop_assert_eq!(decoded.right_child, PageId::new(right_child));
        }
    }
}
