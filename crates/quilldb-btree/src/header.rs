//! DB header codec (C5): the fixed page-0 layout from spec.md §3/§6.
//!
//! ```text
//! offset  size  field
//! 0       8     magic
//! 8       2     format version
//! 10      2     page size
//! 12      4     freelist head page id (0 = none)
//! 16      4     catalog B+Tree root page id
//! 20      4     schema cookie
//! 24      8     last durable commit LSN
//! 32      4     header CRC32C
//! 36      ...   reserved, zero
//! ```
//!
//! Lives in `quilldb-btree` rather than `quilldb-pager` for locality with
//! the catalog B+Tree that roots from `catalog_root`, per SPEC_FULL's
//! workspace-layout table.

use quilldb_error::{QuillError, Result};
use quilldb_types::{Lsn, PageBuf, PageId, PageSize};

pub const DB_MAGIC: [u8; 8] = *b"QUILLDB1";
pub const FORMAT_VERSION: u16 = 1;

const OFF_MAGIC: usize = 0;
const OFF_VERSION: usize = 8;
const OFF_PAGE_SIZE: usize = 10;
const OFF_FREELIST_HEAD: usize = 12;
const OFF_CATALOG_ROOT: usize = 16;
const OFF_SCHEMA_COOKIE: usize = 20;
const OFF_LAST_LSN: usize = 24;
const OFF_CHECKSUM: usize = 32;
pub const HEADER_CHECKSUM_SPAN: usize = OFF_CHECKSUM;

/// The decoded contents of page 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbHeader {
    pub page_size: PageSize,
    pub freelist_head: PageId,
    pub catalog_root: PageId,
    pub schema_cookie: u32,
    pub last_durable_lsn: Lsn,
}

impl DbHeader {
    #[must_use]
    pub const fn new(page_size: PageSize) -> Self {
        Self {
            page_size,
            freelist_head: PageId::HEADER,
            catalog_root: PageId::HEADER,
            schema_cookie: 0,
            last_durable_lsn: Lsn::ZERO,
        }
    }

    #[must_use]
    pub fn encode(self) -> PageBuf {
        let mut buf = PageBuf::new(self.page_size);
        let bytes = buf.as_mut_slice();
        bytes[OFF_MAGIC..OFF_MAGIC + 8].copy_from_slice(&DB_MAGIC);
        bytes[OFF_VERSION..OFF_VERSION + 2].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes[OFF_PAGE_SIZE..OFF_PAGE_SIZE + 2]
            .copy_from_slice(&(self.page_size.as_u32() as u16).to_le_bytes());
        bytes[OFF_FREELIST_HEAD..OFF_FREELIST_HEAD + 4]
            .copy_from_slice(&self.freelist_head.get().to_le_bytes());
        bytes[OFF_CATALOG_ROOT..OFF_CATALOG_ROOT + 4]
            .copy_from_slice(&self.catalog_root.get().to_le_bytes());
        bytes[OFF_SCHEMA_COOKIE..OFF_SCHEMA_COOKIE + 4]
            .copy_from_slice(&self.schema_cookie.to_le_bytes());
        bytes[OFF_LAST_LSN..OFF_LAST_LSN + 8].copy_from_slice(&self.last_durable_lsn.get().to_le_bytes());

        let checksum = crc32c::crc32c(&bytes[..OFF_CHECKSUM]);
        bytes[OFF_CHECKSUM..OFF_CHECKSUM + 4].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Decodes and validates page 0 against `expected_page_size` (the
    /// runtime-configured size from `open()`'s options). Magic, version,
    /// page size agreement, and checksum are all load-bearing per spec.md
    /// §3's header invariants.
    pub fn decode(buf: &PageBuf, expected_page_size: PageSize) -> Result<Self> {
        let bytes = buf.as_slice();
        if bytes.len() < 36 {
            return Err(QuillError::corruption("db header truncated", bytes.len()));
        }
        if bytes[OFF_MAGIC..OFF_MAGIC + 8] != DB_MAGIC {
            return Err(QuillError::corruption("db header magic", "bad magic bytes"));
        }
        let version = u16::from_le_bytes(bytes[OFF_VERSION..OFF_VERSION + 2].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(QuillError::corruption("db header version", version));
        }
        let raw_page_size = u16::from_le_bytes(bytes[OFF_PAGE_SIZE..OFF_PAGE_SIZE + 2].try_into().unwrap());
        let page_size = PageSize::new(u32::from(raw_page_size))
            .ok_or_else(|| QuillError::corruption("db header page size", raw_page_size))?;
        if page_size.as_u32() != expected_page_size.as_u32() {
            return Err(QuillError::corruption(
                "db header page size mismatch",
                format!("file={}, requested={}", page_size.as_u32(), expected_page_size.as_u32()),
            ));
        }

        let stored_checksum =
            u32::from_le_bytes(bytes[OFF_CHECKSUM..OFF_CHECKSUM + 4].try_into().unwrap());
        let computed = crc32c::crc32c(&bytes[..OFF_CHECKSUM]);
        if stored_checksum != computed {
            return Err(QuillError::corruption(
                "db header checksum",
                format!("stored={stored_checksum:#x}, computed={computed:#x}"),
            ));
        }

        let freelist_head =
            PageId::new(u32::from_le_bytes(bytes[OFF_FREELIST_HEAD..OFF_FREELIST_HEAD + 4].try_into().unwrap()));
        let catalog_root =
            PageId::new(u32::from_le_bytes(bytes[OFF_CATALOG_ROOT..OFF_CATALOG_ROOT + 4].try_into().unwrap()));
        let schema_cookie =
            u32::from_le_bytes(bytes[OFF_SCHEMA_COOKIE..OFF_SCHEMA_COOKIE + 4].try_into().unwrap());
        let last_durable_lsn =
            Lsn::new(u64::from_le_bytes(bytes[OFF_LAST_LSN..OFF_LAST_LSN + 8].try_into().unwrap()));

        Ok(Self {
            page_size,
            freelist_head,
            catalog_root,
            schema_cookie,
            last_durable_lsn,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let mut header = DbHeader::new(PageSize::DEFAULT);
        header.freelist_head = PageId::new(3);
        header.catalog_root = PageId::new(2);
        header.schema_cookie = 7;
        header.last_durable_lsn = Lsn::new(99);

        let encoded = header.encode();
        let decoded = DbHeader::decode(&encoded, PageSize::DEFAULT).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn rejects_page_size_mismatch() {
        let header = DbHeader::new(PageSize::DEFAULT);
        let encoded = header.encode();
        assert!(DbHeader::decode(&encoded, PageSize::new(8192).unwrap()).is_err());
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let header = DbHeader::new(PageSize::DEFAULT);
        let mut encoded = header.encode();
        encoded.as_mut_slice()[0] ^= 0xFF;
        assert!(DbHeader::decode(&encoded, PageSize::DEFAULT).is_err());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut encoded = PageBuf::new(PageSize::DEFAULT);
        encoded.as_mut_slice()[0..8].copy_from_slice(b"NOTAQDB!");
        assert!(DbHeader::decode(&encoded, PageSize::DEFAULT).is_err());
    }
}
