//! The on-disk B+Tree (C5/C6/C7): the DB header layout, overflow chains for
//! oversized values, the internal/leaf page byte codec, and the tree
//! operations built on top of them, per spec.md §3/§4.5/§4.6/§4.7.

mod header;
mod overflow;
mod page_codec;
mod store;
mod tree;

pub use header::{DbHeader, DB_MAGIC, FORMAT_VERSION, HEADER_CHECKSUM_SPAN};
pub use overflow::{free_chain, read_chain_all, write_chain};
pub use page_codec::{
    DecodedInternal, DecodedLeaf, InternalCell, LeafCell, PAGE_HEADER_LEN, PAGE_TYPE_INTERNAL, PAGE_TYPE_LEAF,
    decode_internal, decode_leaf, encode_internal, encode_leaf, internal_encoded_size, is_leaf_page,
    leaf_encoded_size,
};
pub use store::{PageRead, PageStore};
pub use tree::{
    Cursor, bulk_build_from_sorted, contains, delete, delete_key_value, find, free_all_except_root, insert,
    needs_compaction, open_cursor, open_cursor_at, update, utilization,
};
