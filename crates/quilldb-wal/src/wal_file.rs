//! The WAL file itself (C4): append-only frame storage plus the commit,
//! rollback, checkpoint and recovery protocols from spec.md §4.4.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use quilldb_error::{QuillError, Result};
use quilldb_types::{Cx, Lsn, PageBuf, PageId, PageSize, SyncFlags, VfsOpenFlags};
use quilldb_vfs::{Vfs, VfsFile};
use tracing::{debug, info, trace, warn};

use crate::frame::{FrameHeader, WalHeader, FRAME_HEADER_LEN, WAL_HEADER_LEN};
use crate::wal_index::WalIndex;

/// Result of a checkpoint pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointStats {
    pub pages_written: usize,
    pub wal_truncated: bool,
}

/// A checkpoint-in-progress transaction's write batch: the pending (not yet
/// committed) frame offsets, plus enough state to roll back to exactly
/// where the WAL stood before it started.
#[derive(Debug, Clone)]
pub struct WriteBatch {
    pending: Vec<(PageId, u64)>,
    start_offset: u64,
    start_checksum: u32,
}

impl WriteBatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// The write-ahead log for one database file.
pub struct WalFile<F: VfsFile> {
    file: F,
    path: PathBuf,
    header: WalHeader,
    write_offset: u64,
    tail_checksum: u32,
    index: WalIndex,
}

fn gen_salt() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos() as u64);
    nanos ^ (std::process::id() as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

impl<F: VfsFile> WalFile<F> {
    /// Opens the WAL sibling file at `path`, creating and initializing it if
    /// absent or empty, and replaying any surviving frames otherwise.
    pub fn open<V: Vfs<File = F>>(vfs: &V, path: &Path, page_size: PageSize) -> Result<Self> {
        let cx = Cx::new();
        let file = vfs.open(cx, path, VfsOpenFlags::read_write_create())?;
        let len = file.len(cx)?;

        if len == 0 {
            let header = WalHeader::new(page_size, Lsn::ZERO, gen_salt());
            let encoded = header.encode();
            quilldb_vfs::write_at_exact(&file, cx, 0, &encoded)?;
            file.sync(cx, SyncFlags::FULL)?;
            info!(path = %path.display(), "created new WAL file");
            return Ok(Self {
                file,
                path: path.to_path_buf(),
                header,
                write_offset: WAL_HEADER_LEN as u64,
                tail_checksum: 0,
                index: WalIndex::new(),
            });
        }

        let mut header_buf = [0_u8; WAL_HEADER_LEN];
        quilldb_vfs::read_at_exact(&file, cx, 0, &mut header_buf)?;
        let header = WalHeader::decode(&header_buf)?;
        if header.page_size.as_u32() != page_size.as_u32() {
            return Err(QuillError::corruption(
                "wal page size mismatch",
                format!("wal={}, db={}", header.page_size.as_u32(), page_size.as_u32()),
            ));
        }

        let mut wal = Self {
            file,
            path: path.to_path_buf(),
            header,
            write_offset: WAL_HEADER_LEN as u64,
            tail_checksum: 0,
            index: WalIndex::new(),
        };
        wal.recover()?;
        Ok(wal)
    }

    #[must_use]
    pub const fn last_durable_lsn(&self) -> Lsn {
        self.index.last_durable_lsn()
    }

    #[must_use]
    pub fn index(&self) -> &WalIndex {
        &self.index
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.index.frame_count()
    }

    /// Replays frames from right after the header, accepting them only
    /// while the checksum chain holds and a commit frame eventually closes
    /// each group (spec.md §4.4 "Recovery"). The main file is never
    /// touched here; recovered state is visible only through the WAL
    /// overlay until the next checkpoint.
    fn recover(&mut self) -> Result<()> {
        let cx = Cx::new();
        let frame_len = FrameHeader::frame_len(self.header.page_size) as u64;
        let file_len = self.file.len(cx)?;

        let mut offset = WAL_HEADER_LEN as u64;
        let mut chain = 0_u32;
        let mut pending: Vec<(PageId, u64, Lsn)> = Vec::new();

        while offset + frame_len <= file_len {
            let mut buf = vec![0_u8; frame_len as usize];
            quilldb_vfs::read_at_exact(&self.file, cx, offset, &mut buf)?;

            let decoded = FrameHeader::decode(&buf, self.header.page_size, chain);
            let (frame, _image) = match decoded {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(%err, offset, "WAL recovery stopped at corrupt/torn frame");
                    break;
                }
            };

            chain = frame.checksum;
            pending.push((frame.page_id, offset, frame.lsn));
            offset += frame_len;

            if frame.commit {
                let located: Vec<(PageId, u64)> =
                    pending.iter().map(|&(pid, off, _)| (pid, off)).collect();
                self.index.publish(frame.lsn, &located);
                debug!(lsn = %frame.lsn, frames = located.len(), "recovered committed transaction");
                pending.clear();
            }
        }

        if !pending.is_empty() {
            warn!(
                dropped = pending.len(),
                "WAL recovery discarded an uncommitted trailing transaction"
            );
        }

        self.write_offset = offset;
        self.tail_checksum = chain;
        Ok(())
    }

    /// Starts a new write batch, recording the WAL's current tail so
    /// `rollback` can cut cleanly back to it.
    #[must_use]
    pub fn begin_batch(&self) -> WriteBatch {
        WriteBatch {
            pending: Vec::new(),
            start_offset: self.write_offset,
            start_checksum: self.tail_checksum,
        }
    }

    /// Appends a non-commit frame for `page_id` carrying `image`, the new
    /// page content. Not yet durable or visible to readers.
    pub fn append_page(&mut self, batch: &mut WriteBatch, page_id: PageId, lsn: Lsn, image: &PageBuf) -> Result<()> {
        self.append_frame(batch, page_id, lsn, image, false)
    }

    fn append_frame(
        &mut self,
        batch: &mut WriteBatch,
        page_id: PageId,
        lsn: Lsn,
        image: &PageBuf,
        commit: bool,
    ) -> Result<()> {
        let cx = Cx::new();
        let header = FrameHeader {
            page_id,
            lsn,
            commit,
            checksum: 0,
        };
        let mut encoded = Vec::with_capacity(FRAME_HEADER_LEN + image.len());
        let checksum = header.encode_into(&mut encoded, image.as_slice(), self.tail_checksum);

        let offset = self.write_offset;
        quilldb_vfs::write_at_exact(&self.file, cx, offset, &encoded)?;

        self.write_offset += encoded.len() as u64;
        self.tail_checksum = checksum;
        batch.pending.push((page_id, offset));
        trace!(%page_id, %lsn, offset, "appended wal frame");
        Ok(())
    }

    /// Commit protocol steps 2-4 from spec.md §4.4: append the commit frame,
    /// fsync the WAL, then publish the batch's frames into the index at
    /// `lsn`. A crash before `fsync` returns leaves the pre-transaction
    /// state intact on the next recovery; a crash after is durable even if
    /// this in-memory publish step never runs.
    pub fn commit(&mut self, mut batch: WriteBatch, lsn: Lsn, commit_page: PageId, commit_image: &PageBuf) -> Result<()> {
        let cx = Cx::new();
        self.append_frame(&mut batch, commit_page, lsn, commit_image, true)?;
        self.file.sync(cx, SyncFlags::FULL)?;
        self.index.publish(lsn, &batch.pending);
        info!(%lsn, frames = batch.pending.len(), "wal transaction committed");
        Ok(())
    }

    /// Discards the dirty buffers logically (the caller owns those) and
    /// truncates the WAL back to the pre-transaction tail. Per spec.md
    /// §4.4, rollback never needs to fsync: if the process crashes mid
    /// rollback, recovery will stop at the last valid commit anyway.
    pub fn rollback(&mut self, batch: WriteBatch) -> Result<()> {
        let cx = Cx::new();
        if batch.start_offset < self.write_offset {
            self.file.truncate(cx, batch.start_offset)?;
        }
        self.write_offset = batch.start_offset;
        self.tail_checksum = batch.start_checksum;
        debug!(restored_offset = batch.start_offset, "wal transaction rolled back");
        Ok(())
    }

    fn read_image_at(&self, offset: u64) -> Result<PageBuf> {
        let cx = Cx::new();
        let mut image = PageBuf::new(self.header.page_size);
        quilldb_vfs::read_at_exact(&self.file, cx, offset + FRAME_HEADER_LEN as u64, image.as_mut_slice())?;
        Ok(image)
    }

    /// Reads the page image stored at a located frame (as returned by
    /// [`WalIndex::lookup`]). This is the read-side counterpart to
    /// `checkpoint`'s internal use of `read_image_at`: `quilldb-core` calls
    /// this to materialize a page that the WAL index says is newer than the
    /// pager's main-file image for a given snapshot.
    pub fn read_frame_image(&self, location: crate::wal_index::FrameLocation) -> Result<PageBuf> {
        self.read_image_at(location.offset)
    }

    /// Checkpoint (§4.4): writes every page whose newest frame has
    /// `lsn <= retire_through` into the main file via `write_main`, fsyncs
    /// the main file, then retires those frames from the index. If nothing
    /// newer than `retire_through` remains, the WAL file itself is
    /// truncated back to its header and the index is fully reset.
    ///
    /// `retire_through` must be the minimum of the last durable LSN and the
    /// oldest active reader's snapshot (spec.md §4.4's checkpoint
    /// invariant); the caller (the transaction controller, which consults
    /// the reader registry) computes that bound.
    pub fn checkpoint(
        &mut self,
        retire_through: Lsn,
        mut write_main: impl FnMut(PageId, &PageBuf) -> Result<()>,
        mut sync_main: impl FnMut() -> Result<()>,
    ) -> Result<CheckpointStats> {
        let page_ids: Vec<PageId> = self.index.page_ids().collect();
        let mut pages_written = 0_usize;

        for page_id in page_ids {
            if let Some(location) = self.index.lookup(page_id, retire_through) {
                let image = self.read_image_at(location.offset)?;
                write_main(page_id, &image)?;
                pages_written += 1;
            }
        }

        if pages_written > 0 {
            sync_main()?;
        }

        let fully_empty = self.index.retire_through(retire_through);
        let mut wal_truncated = false;
        if fully_empty {
            let cx = Cx::new();
            self.file.truncate(cx, WAL_HEADER_LEN as u64)?;
            self.write_offset = WAL_HEADER_LEN as u64;
            self.tail_checksum = 0;
            self.index.reset();
            wal_truncated = true;
        }

        info!(
            pages_written,
            wal_truncated,
            %retire_through,
            "checkpoint complete"
        );
        Ok(CheckpointStats {
            pages_written,
            wal_truncated,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn byte_len(&self) -> u64 {
        self.write_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quilldb_vfs::MemoryVfs;

    fn page(byte: u8, page_size: PageSize) -> PageBuf {
        PageBuf::from_vec(vec![byte; page_size.as_usize()], page_size)
    }

    #[test]
    fn fresh_wal_has_header_only() {
        let vfs = MemoryVfs::new();
        let wal: WalFile<_> = WalFile::open(&vfs, Path::new("/db-wal"), PageSize::DEFAULT).unwrap();
        assert_eq!(wal.byte_len(), WAL_HEADER_LEN as u64);
        assert!(wal.index().is_empty());
    }

    #[test]
    fn commit_publishes_frames_visible_at_commit_lsn() {
        let vfs = MemoryVfs::new();
        let mut wal: WalFile<_> = WalFile::open(&vfs, Path::new("/db-wal"), PageSize::DEFAULT).unwrap();
        let mut batch = wal.begin_batch();
        let p1 = page(1, PageSize::DEFAULT);
        wal.append_page(&mut batch, PageId::new(1), Lsn::new(1), &p1).unwrap();
        let commit_image = page(9, PageSize::DEFAULT);
        wal.commit(batch, Lsn::new(1), PageId::new(2), &commit_image).unwrap();

        assert!(wal.index().lookup(PageId::new(1), Lsn::new(1)).is_some());
        assert!(wal.index().lookup(PageId::new(2), Lsn::new(1)).is_some());
        assert_eq!(wal.last_durable_lsn(), Lsn::new(1));
    }

    #[test]
    fn rollback_truncates_uncommitted_frames() {
        let vfs = MemoryVfs::new();
        let mut wal: WalFile<_> = WalFile::open(&vfs, Path::new("/db-wal"), PageSize::DEFAULT).unwrap();
        let start = wal.byte_len();
        let mut batch = wal.begin_batch();
        let p1 = page(1, PageSize::DEFAULT);
        wal.append_page(&mut batch, PageId::new(1), Lsn::new(1), &p1).unwrap();
        wal.rollback(batch).unwrap();
        assert_eq!(wal.byte_len(), start);
        assert!(wal.index().is_empty());
    }

    #[test]
    fn recovery_replays_committed_and_drops_uncommitted_tail() {
        let vfs = MemoryVfs::new();
        let path = Path::new("/db-wal");
        {
            let mut wal: WalFile<_> = WalFile::open(&vfs, path, PageSize::DEFAULT).unwrap();
            let mut batch = wal.begin_batch();
            let p1 = page(7, PageSize::DEFAULT);
            wal.append_page(&mut batch, PageId::new(1), Lsn::new(1), &p1).unwrap();
            let commit_image = page(8, PageSize::DEFAULT);
            wal.commit(batch, Lsn::new(1), PageId::new(1), &commit_image).unwrap();

            // Start a second, never-committed transaction and "crash" by
            // dropping the batch without calling commit or rollback.
            let mut batch2 = wal.begin_batch();
            let p2 = page(99, PageSize::DEFAULT);
            wal.append_page(&mut batch2, PageId::new(2), Lsn::new(2), &p2).unwrap();
        }

        let wal2: WalFile<_> = WalFile::open(&vfs, path, PageSize::DEFAULT).unwrap();
        assert!(wal2.index().lookup(PageId::new(1), Lsn::new(1)).is_some());
        assert!(wal2.index().lookup(PageId::new(2), Lsn::new(2)).is_none());
        assert_eq!(wal2.last_durable_lsn(), Lsn::new(1));
    }

    #[test]
    fn checkpoint_writes_through_and_truncates_when_fully_safe() {
        let vfs = MemoryVfs::new();
        let mut wal: WalFile<_> = WalFile::open(&vfs, Path::new("/db-wal"), PageSize::DEFAULT).unwrap();
        let mut batch = wal.begin_batch();
        let p1 = page(5, PageSize::DEFAULT);
        wal.append_page(&mut batch, PageId::new(1), Lsn::new(1), &p1).unwrap();
        let commit_image = page(6, PageSize::DEFAULT);
        wal.commit(batch, Lsn::new(1), PageId::new(2), &commit_image).unwrap();

        let mut written = Vec::new();
        let stats = wal
            .checkpoint(
                Lsn::new(1),
                |page_id, image| {
                    written.push((page_id, image.clone()));
                    Ok(())
                },
                || Ok(()),
            )
            .unwrap();
        assert_eq!(stats.pages_written, 2);
        assert!(stats.wal_truncated);
        assert!(wal.index().is_empty());
        assert_eq!(wal.byte_len(), WAL_HEADER_LEN as u64);
    }

    #[test]
    fn checkpoint_keeps_frames_newer_than_retire_point() {
        let vfs = MemoryVfs::new();
        let mut wal: WalFile<_> = WalFile::open(&vfs, Path::new("/db-wal"), PageSize::DEFAULT).unwrap();

        let mut batch1 = wal.begin_batch();
        let p1 = page(1, PageSize::DEFAULT);
        wal.append_page(&mut batch1, PageId::new(1), Lsn::new(1), &p1).unwrap();
        wal.commit(batch1, Lsn::new(1), PageId::new(1), &p1).unwrap();

        let mut batch2 = wal.begin_batch();
        let p2 = page(2, PageSize::DEFAULT);
        wal.append_page(&mut batch2, PageId::new(1), Lsn::new(2), &p2).unwrap();
        wal.commit(batch2, Lsn::new(2), PageId::new(1), &p2).unwrap();

        let stats = wal
            .checkpoint(Lsn::new(1), |_, _| Ok(()), || Ok(()))
            .unwrap();
        assert_eq!(stats.pages_written, 1);
        assert!(!stats.wal_truncated);
        assert!(wal.index().lookup(PageId::new(1), Lsn::new(2)).is_some());
    }
}
