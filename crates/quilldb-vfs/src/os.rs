use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::FileExt;

use parking_lot::Mutex;
use quilldb_error::Result;
use quilldb_types::{Cx, SyncFlags, VfsOpenFlags};

use crate::{Vfs, VfsFile};

/// A VFS backed by real files via `std::fs`, using positional I/O
/// (`pread`/`pwrite` on Unix) so concurrent handles never share a cursor.
#[derive(Debug, Default)]
pub struct OsVfs;

impl OsVfs {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// An open OS file. Calls are serialized under a mutex per spec.md §4.1,
/// even though `pread`/`pwrite` themselves don't require it, so that
/// `truncate` can never interleave with a read/write on the same handle.
pub struct OsFile {
    path: PathBuf,
    file: Mutex<File>,
}

impl Vfs for OsVfs {
    type File = OsFile;

    fn open(&self, _cx: Cx, path: &Path, flags: VfsOpenFlags) -> Result<Self::File> {
        let mut opts = OpenOptions::new();
        opts.read(flags.contains(VfsOpenFlags::READ));
        opts.write(flags.contains(VfsOpenFlags::WRITE));
        opts.create(flags.contains(VfsOpenFlags::CREATE));
        opts.create_new(flags.contains(VfsOpenFlags::CREATE | VfsOpenFlags::EXCLUSIVE));
        let file = opts
            .open(path)
            .map_err(|e| quilldb_error::QuillError::io(path, "open", e))?;
        Ok(OsFile {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    fn remove(&self, _cx: Cx, path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) | Err(_) if !path.exists() => Ok(()),
            Err(e) => Err(quilldb_error::QuillError::io(path, "remove", e)),
        }
    }

    fn exists(&self, _cx: Cx, path: &Path) -> Result<bool> {
        Ok(path.exists())
    }
}

impl VfsFile for OsFile {
    #[cfg(unix)]
    fn read_at(&self, _cx: Cx, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let file = self.file.lock();
        let mut total = 0;
        loop {
            match file.read_at(&mut buf[total..], offset + total as u64) {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    if total == buf.len() {
                        break;
                    }
                }
                Err(e) => return Err(quilldb_error::QuillError::io(&self.path, "read_at", e)),
            }
        }
        Ok(total)
    }

    #[cfg(unix)]
    fn write_at(&self, _cx: Cx, offset: u64, buf: &[u8]) -> Result<usize> {
        let file = self.file.lock();
        file.write_at(buf, offset)
            .map_err(|e| quilldb_error::QuillError::io(&self.path, "write_at", e))
    }

    fn sync(&self, _cx: Cx, flags: SyncFlags) -> Result<()> {
        let file = self.file.lock();
        let result = if flags.contains(SyncFlags::FULL) {
            file.sync_all()
        } else {
            file.sync_data()
        };
        result.map_err(|e| quilldb_error::QuillError::io(&self.path, "sync", e))
    }

    fn truncate(&self, _cx: Cx, size: u64) -> Result<()> {
        let file = self.file.lock();
        file.set_len(size)
            .map_err(|e| quilldb_error::QuillError::io(&self.path, "truncate", e))
    }

    fn len(&self, _cx: Cx) -> Result<u64> {
        let file = self.file.lock();
        file.metadata()
            .map(|m| m.len())
            .map_err(|e| quilldb_error::QuillError::io(&self.path, "len", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.quill");
        let vfs = OsVfs::new();
        let cx = Cx::new();
        let file = vfs
            .open(cx, &path, VfsOpenFlags::read_write_create())
            .unwrap();
        file.write_at(cx, 4096, b"hello").unwrap();
        let mut buf = [0_u8; 5];
        file.read_at(cx, 4096, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn truncate_changes_len() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.quill");
        let vfs = OsVfs::new();
        let cx = Cx::new();
        let file = vfs
            .open(cx, &path, VfsOpenFlags::read_write_create())
            .unwrap();
        file.truncate(cx, 8192).unwrap();
        assert_eq!(file.len(cx).unwrap(), 8192);
    }

    #[test]
    fn open_without_create_fails_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.quill");
        let vfs = OsVfs::new();
        let cx = Cx::new();
        assert!(vfs.open(cx, &path, VfsOpenFlags::READ).is_err());
    }
}
