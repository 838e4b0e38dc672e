use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use quilldb_error::Result;
use quilldb_types::{Cx, SyncFlags, VfsOpenFlags};

use crate::{Vfs, VfsFile};

/// An in-memory VFS backed by `Vec<u8>` buffers keyed by path. Every open
/// handle to the same path shares the same buffer, matching how two handles
/// to the same real file observe each other's writes.
#[derive(Debug, Default)]
pub struct MemoryVfs {
    files: Mutex<HashMap<PathBuf, Arc<Mutex<Vec<u8>>>>>,
}

impl MemoryVfs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// A handle into one of [`MemoryVfs`]'s shared buffers.
#[derive(Debug, Clone)]
pub struct MemoryFile {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl Vfs for MemoryVfs {
    type File = MemoryFile;

    fn open(&self, _cx: Cx, path: &Path, flags: VfsOpenFlags) -> Result<Self::File> {
        let mut files = self.files.lock();
        if let Some(existing) = files.get(path) {
            if flags.contains(VfsOpenFlags::EXCLUSIVE) && flags.contains(VfsOpenFlags::CREATE) {
                return Err(quilldb_error::QuillError::io(
                    path,
                    "open",
                    std::io::Error::new(std::io::ErrorKind::AlreadyExists, "file exists"),
                ));
            }
            return Ok(MemoryFile {
                buf: existing.clone(),
            });
        }
        if !flags.contains(VfsOpenFlags::CREATE) {
            return Err(quilldb_error::QuillError::io(
                path,
                "open",
                std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
            ));
        }
        let buf = Arc::new(Mutex::new(Vec::new()));
        files.insert(path.to_path_buf(), buf.clone());
        Ok(MemoryFile { buf })
    }

    fn remove(&self, _cx: Cx, path: &Path) -> Result<()> {
        self.files.lock().remove(path);
        Ok(())
    }

    fn exists(&self, _cx: Cx, path: &Path) -> Result<bool> {
        Ok(self.files.lock().contains_key(path))
    }
}

impl VfsFile for MemoryFile {
    fn read_at(&self, _cx: Cx, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let data = self.buf.lock();
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&self, _cx: Cx, offset: u64, buf: &[u8]) -> Result<usize> {
        let mut data = self.buf.lock();
        let offset = offset as usize;
        let needed = offset + buf.len();
        if data.len() < needed {
            data.resize(needed, 0);
        }
        data[offset..needed].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn sync(&self, _cx: Cx, _flags: SyncFlags) -> Result<()> {
        Ok(())
    }

    fn truncate(&self, _cx: Cx, size: u64) -> Result<()> {
        self.buf.lock().resize(size as usize, 0);
        Ok(())
    }

    fn len(&self, _cx: Cx) -> Result<u64> {
        Ok(self.buf.lock().len() as u64)
    }
}
