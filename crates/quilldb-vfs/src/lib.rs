//! The virtual filesystem abstraction (C1): `open`/`read`/`write`/`fsync`/
//! `truncate`/`close`, with absolute offsets on every call (no shared
//! cursors) and per-file internal serialization.
//!
//! Three implementations ship: [`MemoryVfs`] for unit tests, [`OsVfs`] for
//! real files, and [`FaultyVfs`] which wraps either and injects short
//! writes, torn writes, or induced errors for crash-recovery testing.

mod faulty;
mod memory;
mod os;

pub use faulty::{FaultPlan, FaultyVfs};
pub use memory::MemoryVfs;
pub use os::OsVfs;

use std::path::Path;

use quilldb_error::Result;
use quilldb_types::{Cx, SyncFlags, VfsOpenFlags};

/// A filesystem that can open files for the pager and WAL.
pub trait Vfs: Send + Sync {
    type File: VfsFile;

    /// Opens (and creates, per `flags`) the file at `path`.
    fn open(&self, cx: Cx, path: &Path, flags: VfsOpenFlags) -> Result<Self::File>;

    /// Removes the file at `path` if present. Missing files are not an error.
    fn remove(&self, cx: Cx, path: &Path) -> Result<()>;

    /// Reports whether a file exists at `path`.
    fn exists(&self, cx: Cx, path: &Path) -> Result<bool>;
}

/// A single open file. Every operation takes an absolute offset; there is no
/// shared cursor. Implementations serialize concurrent calls on one handle
/// under a per-file lock.
pub trait VfsFile: Send + Sync {
    /// Reads into `buf` starting at `offset`, returning the number of bytes
    /// actually read (short reads at EOF are not an error).
    fn read_at(&self, cx: Cx, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Writes `buf` starting at `offset`, returning the number of bytes
    /// actually written.
    fn write_at(&self, cx: Cx, offset: u64, buf: &[u8]) -> Result<usize>;

    /// Flushes data (and, with `SyncFlags::FULL`, metadata) to stable storage.
    fn sync(&self, cx: Cx, flags: SyncFlags) -> Result<()>;

    /// Resizes the file, truncating or zero-extending as needed.
    fn truncate(&self, cx: Cx, size: u64) -> Result<()>;

    /// Returns the current file length in bytes.
    fn len(&self, cx: Cx) -> Result<u64>;
}

/// Convenience: writes `buf` fully at `offset`, returning `Corruption` if the
/// underlying file only accepted a short write (which a real disk never
/// does, but a fault-injecting VFS can simulate).
pub fn write_at_exact(file: &impl VfsFile, cx: Cx, offset: u64, buf: &[u8]) -> Result<()> {
    let written = file.write_at(cx, offset, buf)?;
    if written != buf.len() {
        return Err(quilldb_error::QuillError::corruption(
            "short write",
            format!("wrote {written} of {} bytes at offset {offset}", buf.len()),
        ));
    }
    Ok(())
}

/// Convenience: reads exactly `buf.len()` bytes at `offset`, returning
/// `Corruption` if the file is shorter than requested.
pub fn read_at_exact(file: &impl VfsFile, cx: Cx, offset: u64, buf: &mut [u8]) -> Result<()> {
    let read = file.read_at(cx, offset, buf)?;
    if read != buf.len() {
        return Err(quilldb_error::QuillError::corruption(
            "short read",
            format!("read {read} of {} bytes at offset {offset}", buf.len()),
        ));
    }
    Ok(())
}
