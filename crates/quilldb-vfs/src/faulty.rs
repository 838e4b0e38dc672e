use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use quilldb_error::{QuillError, Result};
use quilldb_types::{Cx, SyncFlags, VfsOpenFlags};

use crate::{Vfs, VfsFile};

/// A scripted fault to inject into a [`FaultyVfs`]-wrapped file.
#[derive(Debug, Clone, Copy)]
pub enum FaultPlan {
    /// No faults; behaves like the wrapped VFS.
    None,
    /// The `n`th `write_at` call (1-based) only writes `truncate_to` bytes of
    /// whatever buffer was given, simulating a torn/short write.
    ShortWriteOnCall { call: u64, truncate_to: usize },
    /// The `n`th `write_at` call (1-based) fails outright, simulating a disk
    /// error mid-transaction.
    ErrOnCall { call: u64 },
    /// Every `sync` call after (and including) the `n`th one is swallowed
    /// without actually flushing, simulating power loss before fsync.
    DropSyncFromCall { call: u64 },
}

/// Wraps any [`Vfs`] and injects faults on `write_at`/`sync`, exactly the
/// "faulty VFS" testability hook spec.md §4.1 calls for.
pub struct FaultyVfs<V: Vfs> {
    inner: V,
    plan: FaultPlan,
}

impl<V: Vfs> FaultyVfs<V> {
    #[must_use]
    pub const fn new(inner: V, plan: FaultPlan) -> Self {
        Self { inner, plan }
    }
}

impl<V: Vfs> Vfs for FaultyVfs<V> {
    type File = FaultyFile<V::File>;

    fn open(&self, cx: Cx, path: &Path, flags: VfsOpenFlags) -> Result<Self::File> {
        let inner = self.inner.open(cx, path, flags)?;
        Ok(FaultyFile {
            inner,
            plan: self.plan,
            write_calls: AtomicU64::new(0),
            sync_calls: AtomicU64::new(0),
            synced_once_dropped: Mutex::new(false),
        })
    }

    fn remove(&self, cx: Cx, path: &Path) -> Result<()> {
        self.inner.remove(cx, path)
    }

    fn exists(&self, cx: Cx, path: &Path) -> Result<bool> {
        self.inner.exists(cx, path)
    }
}

pub struct FaultyFile<F: VfsFile> {
    inner: F,
    plan: FaultPlan,
    write_calls: AtomicU64,
    sync_calls: AtomicU64,
    synced_once_dropped: Mutex<bool>,
}

impl<F: VfsFile> VfsFile for FaultyFile<F> {
    fn read_at(&self, cx: Cx, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.inner.read_at(cx, offset, buf)
    }

    fn write_at(&self, cx: Cx, offset: u64, buf: &[u8]) -> Result<usize> {
        let call = self.write_calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.plan {
            FaultPlan::ErrOnCall { call: target } if call == target => {
                Err(QuillError::io(
                    "faulty-vfs",
                    "write_at",
                    std::io::Error::other("injected write fault"),
                ))
            }
            FaultPlan::ShortWriteOnCall {
                call: target,
                truncate_to,
            } if call == target => {
                let n = truncate_to.min(buf.len());
                self.inner.write_at(cx, offset, &buf[..n])
            }
            _ => self.inner.write_at(cx, offset, buf),
        }
    }

    fn sync(&self, cx: Cx, flags: SyncFlags) -> Result<()> {
        let call = self.sync_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let FaultPlan::DropSyncFromCall { call: target } = self.plan {
            if call >= target {
                *self.synced_once_dropped.lock() = true;
                return Ok(());
            }
        }
        self.inner.sync(cx, flags)
    }

    fn truncate(&self, cx: Cx, size: u64) -> Result<()> {
        self.inner.truncate(cx, size)
    }

    fn len(&self, cx: Cx) -> Result<u64> {
        self.inner.len(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryVfs;

    #[test]
    fn short_write_truncates_payload() {
        let vfs = FaultyVfs::new(
            MemoryVfs::new(),
            FaultPlan::ShortWriteOnCall {
                call: 1,
                truncate_to: 2,
            },
        );
        let cx = Cx::new();
        let file = vfs
            .open(cx, Path::new("/db"), VfsOpenFlags::read_write_create())
            .unwrap();
        let n = file.write_at(cx, 0, b"hello").unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn err_on_call_fails_that_call_only() {
        let vfs = FaultyVfs::new(MemoryVfs::new(), FaultPlan::ErrOnCall { call: 2 });
        let cx = Cx::new();
        let file = vfs
            .open(cx, Path::new("/db"), VfsOpenFlags::read_write_create())
            .unwrap();
        assert!(file.write_at(cx, 0, b"a").is_ok());
        assert!(file.write_at(cx, 1, b"b").is_err());
        assert!(file.write_at(cx, 2, b"c").is_ok());
    }

    #[test]
    fn dropped_sync_does_not_error() {
        let vfs = FaultyVfs::new(MemoryVfs::new(), FaultPlan::DropSyncFromCall { call: 1 });
        let cx = Cx::new();
        let file = vfs
            .open(cx, Path::new("/db"), VfsOpenFlags::read_write_create())
            .unwrap();
        assert!(file.sync(cx, SyncFlags::FULL).is_ok());
    }
}
