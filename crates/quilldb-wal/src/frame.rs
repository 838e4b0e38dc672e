//! On-disk layout for the WAL header and per-page frames (§3, §6).
//!
//! ```text
//! WAL header : { magic[8], page_size: u16, initial_lsn: u64, salt: u64 }
//! frame      : { page_id: u32, lsn: u64, flags: u8, checksum: u32, image: [u8; page_size] }
//! ```
//!
//! The checksum chains: each frame's checksum is `crc32c_append(prev, header
//! || image)`, so corrupting or truncating any single frame invalidates the
//! checksum of every frame after it, which is exactly the "torn write
//! detection" property spec.md §4.4 requires.

use quilldb_error::{QuillError, Result};
use quilldb_types::{Lsn, PageBuf, PageId, PageSize};

pub const WAL_MAGIC: [u8; 8] = *b"QUILLWAL";
pub const WAL_HEADER_LEN: usize = 8 + 2 + 8 + 8;

/// Bit set on a frame that terminates a transaction's batch.
pub const FLAG_COMMIT: u8 = 0b0000_0001;

/// Fixed-size frame header; the page image follows immediately after in the
/// file but is kept out of this struct to avoid copying a whole page just to
/// inspect metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub page_id: PageId,
    pub lsn: Lsn,
    pub commit: bool,
    pub checksum: u32,
}

pub const FRAME_HEADER_LEN: usize = 4 + 8 + 1 + 4;

impl FrameHeader {
    #[must_use]
    pub fn frame_len(page_size: PageSize) -> usize {
        FRAME_HEADER_LEN + page_size.as_usize()
    }

    fn encode_prefix(self) -> [u8; FRAME_HEADER_LEN - 4] {
        let mut buf = [0_u8; FRAME_HEADER_LEN - 4];
        buf[0..4].copy_from_slice(&self.page_id.get().to_le_bytes());
        buf[4..12].copy_from_slice(&self.lsn.get().to_le_bytes());
        buf[12] = u8::from(self.commit);
        buf
    }

    /// Encodes the frame (header + image) into `out`, computing the chained
    /// checksum from `prev_checksum`. Returns the checksum written.
    pub fn encode_into(self, out: &mut Vec<u8>, image: &[u8], prev_checksum: u32) -> u32 {
        let prefix = self.encode_prefix();
        let mut checksum = crc32c::crc32c_append(prev_checksum, &prefix);
        checksum = crc32c::crc32c_append(checksum, image);

        out.extend_from_slice(&prefix);
        out.extend_from_slice(&checksum.to_le_bytes());
        out.extend_from_slice(image);
        checksum
    }

    /// Parses a frame at the front of `bytes` (which must be at least
    /// `frame_len(page_size)` long), verifying the checksum chain against
    /// `prev_checksum`. Returns the header and the page image slice.
    pub fn decode<'a>(
        bytes: &'a [u8],
        page_size: PageSize,
        prev_checksum: u32,
    ) -> Result<(Self, &'a [u8])> {
        let total = Self::frame_len(page_size);
        if bytes.len() < total {
            return Err(QuillError::corruption(
                "wal frame truncated",
                format!("need {total} bytes, have {}", bytes.len()),
            ));
        }
        let page_id = PageId::new(u32::from_le_bytes(bytes[0..4].try_into().unwrap()));
        let lsn = Lsn::new(u64::from_le_bytes(bytes[4..12].try_into().unwrap()));
        let commit = bytes[12] & FLAG_COMMIT != 0;
        let stored_checksum = u32::from_le_bytes(bytes[13..17].try_into().unwrap());
        let image = &bytes[FRAME_HEADER_LEN..total];

        let mut checksum = crc32c::crc32c_append(prev_checksum, &bytes[0..13]);
        checksum = crc32c::crc32c_append(checksum, image);
        if checksum != stored_checksum {
            return Err(QuillError::corruption(
                "wal frame checksum",
                format!("page {page_id} lsn {lsn}: computed {checksum:#x}, stored {stored_checksum:#x}"),
            ));
        }

        Ok((
            Self {
                page_id,
                lsn,
                commit,
                checksum,
            },
            image,
        ))
    }
}

/// The WAL file's leading header, written once when the WAL is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalHeader {
    pub page_size: PageSize,
    pub initial_lsn: Lsn,
    pub salt: u64,
}

impl WalHeader {
    #[must_use]
    pub fn new(page_size: PageSize, initial_lsn: Lsn, salt: u64) -> Self {
        Self {
            page_size,
            initial_lsn,
            salt,
        }
    }

    #[must_use]
    pub fn encode(self) -> [u8; WAL_HEADER_LEN] {
        let mut buf = [0_u8; WAL_HEADER_LEN];
        buf[0..8].copy_from_slice(&WAL_MAGIC);
        buf[8..10].copy_from_slice(&(self.page_size.as_u32() as u16).to_le_bytes());
        buf[10..18].copy_from_slice(&self.initial_lsn.get().to_le_bytes());
        buf[18..26].copy_from_slice(&self.salt.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < WAL_HEADER_LEN {
            return Err(QuillError::corruption(
                "wal header truncated",
                format!("need {WAL_HEADER_LEN} bytes, have {}", bytes.len()),
            ));
        }
        if bytes[0..8] != WAL_MAGIC {
            return Err(QuillError::corruption("wal magic mismatch", "bad magic bytes"));
        }
        let raw_page_size = u16::from_le_bytes(bytes[8..10].try_into().unwrap());
        let page_size = PageSize::new(u32::from(raw_page_size))
            .ok_or_else(|| QuillError::corruption("wal page size", format!("{raw_page_size}")))?;
        let initial_lsn = Lsn::new(u64::from_le_bytes(bytes[10..18].try_into().unwrap()));
        let salt = u64::from_le_bytes(bytes[18..26].try_into().unwrap());
        Ok(Self {
            page_size,
            initial_lsn,
            salt,
        })
    }
}

/// Owning decoded frame: a header plus its page image, used by recovery and
/// checkpoint once a frame has been read off disk.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub header: FrameHeader,
    pub image: PageBuf,
}
