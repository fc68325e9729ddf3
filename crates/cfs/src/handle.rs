//! Open-file handles.
//!
//! A handle owns its node's reader or writer lock from open to close;
//! `close` is idempotent and dropping a handle closes it. `HandleDisk`
//! adapts a write-locked handle to `DiskAccess`, which is how a volume
//! mounts inside a file of another volume.

use cfs_core::{FileNode, FileState, MasterRecord, NodeReadGuard, NodeWriteGuard};
use cfs_disk::DiskAccess;
use cfs_error::{Result, VfsError};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::trace;

/// Origin for `FileHandle::set_position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    Begin,
    Current,
    End,
}

pub(crate) enum HandleGuard {
    Read(NodeReadGuard<FileState>),
    Write(NodeWriteGuard<FileState>),
    Released,
}

/// An open file. Holds the node lock until closed.
pub struct FileHandle {
    disk: Arc<dyn DiskAccess>,
    master: Arc<MasterRecord>,
    node: Arc<FileNode>,
    guard: HandleGuard,
    position: u64,
}

impl FileHandle {
    pub(crate) fn new(
        disk: Arc<dyn DiskAccess>,
        master: Arc<MasterRecord>,
        node: Arc<FileNode>,
        guard: HandleGuard,
    ) -> Self {
        Self {
            disk,
            master,
            node,
            guard,
            position: 0,
        }
    }

    fn state(&self) -> Result<&FileState> {
        match &self.guard {
            HandleGuard::Read(guard) => Ok(&**guard),
            HandleGuard::Write(guard) => Ok(&**guard),
            HandleGuard::Released => Err(VfsError::Closed),
        }
    }

    fn state_mut(&mut self) -> Result<&mut FileState> {
        match &mut self.guard {
            HandleGuard::Write(guard) => Ok(&mut **guard),
            HandleGuard::Read(_) => Err(VfsError::ReadOnly),
            HandleGuard::Released => Err(VfsError::Closed),
        }
    }

    /// Read up to `count` bytes from the current position, advancing it.
    /// Short at end of file, empty beyond.
    pub fn read_data(&mut self, count: usize) -> Result<Vec<u8>> {
        let position = self.position;
        let disk = Arc::clone(&self.disk);
        let state = self.state()?;
        let mut buf = vec![0_u8; count];
        let read = state.read_data(disk.as_ref(), position, &mut buf)?;
        buf.truncate(read);
        self.position += read as u64;
        Ok(buf)
    }

    /// Write at the current position, growing the file as needed.
    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        let position = self.position;
        let disk = Arc::clone(&self.disk);
        let master = Arc::clone(&self.master);
        let state = self.state_mut()?;
        state.write_data(disk.as_ref(), master.as_ref(), position, data)?;
        self.position += data.len() as u64;
        Ok(())
    }

    /// Grow or truncate. On truncation the position clamps to the new end.
    pub fn set_file_size(&mut self, new_size: u64) -> Result<()> {
        let disk = Arc::clone(&self.disk);
        let master = Arc::clone(&self.master);
        let state = self.state_mut()?;
        state.set_file_size(disk.as_ref(), master.as_ref(), new_size)?;
        if self.position > new_size {
            self.position = new_size;
        }
        Ok(())
    }

    /// Move the position. Seek-from-end computes `file_size - offset`
    /// and clamps to `[0, file_size]`; the other origins clamp at zero.
    /// Positions past the end are allowed (writes there grow the file).
    pub fn set_position(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64> {
        let size = self.file_size()?;
        let target: i128 = match origin {
            SeekOrigin::Begin => i128::from(offset),
            SeekOrigin::Current => i128::from(self.position) + i128::from(offset),
            SeekOrigin::End => i128::from(size) - i128::from(offset),
        };
        let target = match origin {
            SeekOrigin::End => target.clamp(0, i128::from(size)),
            SeekOrigin::Begin | SeekOrigin::Current => target.max(0),
        };
        self.position = u64::try_from(target).unwrap_or(u64::MAX);
        Ok(self.position)
    }

    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn file_size(&self) -> Result<u64> {
        self.state().map(FileState::size)
    }

    pub fn creation_time(&self) -> Result<SystemTime> {
        self.state().map(|s| s.created().to_system_time())
    }

    pub fn modification_time(&self) -> Result<SystemTime> {
        self.state().map(|s| s.modified().to_system_time())
    }

    #[must_use]
    pub fn can_write(&self) -> bool {
        matches!(self.guard, HandleGuard::Write(_))
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self.guard, HandleGuard::Released)
    }

    /// Release the node lock. Idempotent.
    pub fn close(&mut self) {
        if !self.is_closed() {
            trace!(target: "cfs::facade", event = "handle_close", node = %self.node.address());
        }
        self.guard = HandleGuard::Released;
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Recursive mount adapter ─────────────────────────────────────────────────

/// `DiskAccess` over a write-locked file handle in a host volume.
///
/// The host node's write lock is held for the entire life of the inner
/// mount; all inner-volume I/O serialises through this one handle.
pub struct HandleDisk {
    inner: Mutex<FileHandle>,
}

impl HandleDisk {
    pub fn new(handle: FileHandle) -> Result<Self> {
        if !handle.can_write() {
            return Err(VfsError::ReadOnly);
        }
        Ok(Self {
            inner: Mutex::new(handle),
        })
    }

    fn seek_to(handle: &mut FileHandle, offset: u64) -> Result<()> {
        let offset = i64::try_from(offset)
            .map_err(|_| VfsError::corruption(offset, "offset exceeds the seek range"))?;
        handle.set_position(offset, SeekOrigin::Begin)?;
        Ok(())
    }
}

impl DiskAccess for HandleDisk {
    fn len_bytes(&self) -> u64 {
        self.inner.lock().file_size().unwrap_or(0)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut handle = self.inner.lock();
        Self::seek_to(&mut handle, offset)?;
        let data = handle.read_data(buf.len())?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let read = self.read_at(offset, buf)?;
        if read < buf.len() {
            return Err(VfsError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "read out of bounds: offset={offset} len={} file_len={}",
                    buf.len(),
                    self.len_bytes()
                ),
            )));
        }
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut handle = self.inner.lock();
        Self::seek_to(&mut handle, offset)?;
        handle.write_data(buf)
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
