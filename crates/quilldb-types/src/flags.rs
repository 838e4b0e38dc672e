//! Bitflags for VFS open modes and durability sync levels (§4.1, §6).

use bitflags::bitflags;

bitflags! {
    /// Flags passed to `Vfs::open`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VfsOpenFlags: u32 {
        const READ       = 0b0000_0001;
        const WRITE      = 0b0000_0010;
        const CREATE     = 0b0000_0100;
        /// Fail `open` if the file already exists; only meaningful with `CREATE`.
        const EXCLUSIVE  = 0b0000_1000;
    }
}

impl VfsOpenFlags {
    #[must_use]
    pub const fn read_write_create() -> Self {
        Self::READ.union(Self::WRITE).union(Self::CREATE)
    }
}

bitflags! {
    /// Durability level requested from `VfsFile::sync`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SyncFlags: u32 {
        /// Flush file data to stable storage.
        const DATA_ONLY = 0b0000_0001;
        /// Flush data and metadata (size, mtime, ...).
        const FULL      = 0b0000_0010;
    }
}
