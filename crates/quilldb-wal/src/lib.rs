//! Write-ahead logging (C4): framed page images with chained checksums, the
//! in-memory WAL index, and the commit/rollback/checkpoint/recovery
//! protocols from spec.md §4.4.

mod frame;
mod wal_file;
mod wal_index;

pub use frame::{DecodedFrame, FrameHeader, WalHeader, FRAME_HEADER_LEN, WAL_HEADER_LEN, WAL_MAGIC};
pub use wal_file::{CheckpointStats, WalFile, WriteBatch};
pub use wal_index::{FrameLocation, WalIndex};
