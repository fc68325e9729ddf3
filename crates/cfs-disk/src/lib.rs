#![forbid(unsafe_code)]
//! Positional disk access.
//!
//! `DiskAccess` is a thread-safe, stateless pread/pwrite interface over a
//! byte-addressable backing store, with little-endian cursor-advancing
//! primitives layered on top. Implementations serialise every operation
//! on a single lock; callers batch their own access.

use cfs_error::{Result, VfsError};
use cfs_types::Address;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use tracing::trace;

fn advance(pos: &mut Address, bytes: u64) -> Result<()> {
    *pos = pos
        .checked_add(bytes)
        .ok_or_else(|| VfsError::corruption(pos.0, "address overflow"))?;
    Ok(())
}

/// Thread-safe positional random access over a byte-addressable store.
///
/// All integers are little-endian. The cursor-advancing primitives move
/// the caller-held offset by exactly the bytes transferred.
pub trait DiskAccess: Send + Sync {
    /// Current length of the backing store.
    fn len_bytes(&self) -> u64;

    /// Read up to `buf.len()` bytes from `offset`, returning the count.
    /// A short read at the end of the store is a truncation, not an error.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Read exactly `buf.len()` bytes from `offset`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all bytes in `buf` at `offset`. Writing beyond the current
    /// end extends the store when the underlying surface allows it.
    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn flush(&self) -> Result<()>;

    fn read_u8(&self, pos: &mut Address) -> Result<u8> {
        let mut buf = [0_u8; 1];
        self.read_exact_at(pos.0, &mut buf)?;
        advance(pos, 1)?;
        Ok(buf[0])
    }

    fn read_u32(&self, pos: &mut Address) -> Result<u32> {
        let mut buf = [0_u8; 4];
        self.read_exact_at(pos.0, &mut buf)?;
        advance(pos, 4)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&self, pos: &mut Address) -> Result<u64> {
        let mut buf = [0_u8; 8];
        self.read_exact_at(pos.0, &mut buf)?;
        advance(pos, 8)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_i64(&self, pos: &mut Address) -> Result<i64> {
        let mut buf = [0_u8; 8];
        self.read_exact_at(pos.0, &mut buf)?;
        advance(pos, 8)?;
        Ok(i64::from_le_bytes(buf))
    }

    /// Read into `buf`, advancing the cursor by the bytes actually read.
    fn read_bytes(&self, pos: &mut Address, buf: &mut [u8]) -> Result<usize> {
        let read = self.read_at(pos.0, buf)?;
        advance(pos, read as u64)?;
        Ok(read)
    }

    fn write_u8(&self, pos: &mut Address, value: u8) -> Result<()> {
        self.write_all_at(pos.0, &[value])?;
        advance(pos, 1)
    }

    fn write_u32(&self, pos: &mut Address, value: u32) -> Result<()> {
        self.write_all_at(pos.0, &value.to_le_bytes())?;
        advance(pos, 4)
    }

    fn write_u64(&self, pos: &mut Address, value: u64) -> Result<()> {
        self.write_all_at(pos.0, &value.to_le_bytes())?;
        advance(pos, 8)
    }

    fn write_i64(&self, pos: &mut Address, value: i64) -> Result<()> {
        self.write_all_at(pos.0, &value.to_le_bytes())?;
        advance(pos, 8)
    }

    fn write_bytes(&self, pos: &mut Address, buf: &[u8]) -> Result<()> {
        self.write_all_at(pos.0, buf)?;
        advance(pos, buf.len() as u64)
    }
}

fn short_read(offset: u64, wanted: usize, len: u64) -> VfsError {
    VfsError::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("read out of bounds: offset={offset} len={wanted} store_len={len}"),
    ))
}

// ── File-backed disk ────────────────────────────────────────────────────────

struct FileDiskInner {
    file: File,
    len: u64,
}

/// A volume container backed by a host file.
///
/// Every operation serialises on one mutex; positional I/O inside the
/// lock never touches a shared seek position.
pub struct FileDisk {
    inner: Mutex<FileDiskInner>,
}

impl FileDisk {
    /// Create (or truncate) a container file pre-sized to `size` bytes.
    pub fn create(path: impl AsRef<Path>, size: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        file.set_len(size)?;
        trace!(
            target: "cfs::disk",
            event = "file_create",
            path = %path.as_ref().display(),
            size
        );
        Ok(Self {
            inner: Mutex::new(FileDiskInner { file, len: size }),
        })
    }

    /// Open an existing container file read-write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        let len = file.metadata()?.len();
        trace!(
            target: "cfs::disk",
            event = "file_open",
            path = %path.as_ref().display(),
            len
        );
        Ok(Self {
            inner: Mutex::new(FileDiskInner { file, len }),
        })
    }
}

impl DiskAccess for FileDisk {
    fn len_bytes(&self) -> u64 {
        self.inner.lock().len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let inner = self.inner.lock();
        if offset >= inner.len {
            return Ok(0);
        }
        let available = inner.len - offset;
        let n = buf.len().min(usize::try_from(available).unwrap_or(usize::MAX));
        inner.file.read_exact_at(&mut buf[..n], offset)?;
        Ok(n)
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let inner = self.inner.lock();
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or_else(|| VfsError::corruption(offset, "read range overflow"))?;
        if end > inner.len {
            return Err(short_read(offset, buf.len(), inner.len));
        }
        inner.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or_else(|| VfsError::corruption(offset, "write range overflow"))?;
        inner.file.write_all_at(buf, offset)?;
        if end > inner.len {
            inner.len = end;
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}

// ── In-memory disk ──────────────────────────────────────────────────────────

/// A volume container held in memory. Grows on writes past the end.
pub struct MemDisk {
    bytes: Mutex<Vec<u8>>,
}

impl MemDisk {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            bytes: Mutex::new(vec![0_u8; len]),
        }
    }

    /// Copy out the full contents (test helper).
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }
}

impl DiskAccess for MemDisk {
    fn len_bytes(&self) -> u64 {
        self.bytes.lock().len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let bytes = self.bytes.lock();
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= bytes.len() {
            return Ok(0);
        }
        let n = buf.len().min(bytes.len() - start);
        buf[..n].copy_from_slice(&bytes[start..start + n]);
        Ok(n)
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let bytes = self.bytes.lock();
        let start = usize::try_from(offset)
            .map_err(|_| VfsError::corruption(offset, "offset exceeds address space"))?;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| VfsError::corruption(offset, "read range overflow"))?;
        if end > bytes.len() {
            return Err(short_read(offset, buf.len(), bytes.len() as u64));
        }
        buf.copy_from_slice(&bytes[start..end]);
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut bytes = self.bytes.lock();
        let start = usize::try_from(offset)
            .map_err(|_| VfsError::corruption(offset, "offset exceeds address space"))?;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| VfsError::corruption(offset, "write range overflow"))?;
        if end > bytes.len() {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_disk_round_trip() {
        let disk = MemDisk::new(64);
        disk.write_all_at(10, &[1, 2, 3]).unwrap();
        let mut buf = [0_u8; 3];
        disk.read_exact_at(10, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn mem_disk_short_read_at_end() {
        let disk = MemDisk::new(8);
        let mut buf = [0_u8; 16];
        assert_eq!(disk.read_at(4, &mut buf).unwrap(), 4);
        assert_eq!(disk.read_at(8, &mut buf).unwrap(), 0);
        assert!(disk.read_exact_at(4, &mut buf).is_err());
    }

    #[test]
    fn mem_disk_grows_on_write_past_end() {
        let disk = MemDisk::new(4);
        disk.write_all_at(10, &[9, 9]).unwrap();
        assert_eq!(disk.len_bytes(), 12);
        let mut buf = [0_u8; 2];
        disk.read_exact_at(10, &mut buf).unwrap();
        assert_eq!(buf, [9, 9]);
    }

    #[test]
    fn cursor_primitives_advance() {
        let disk = MemDisk::new(64);
        let mut pos = Address(0);
        disk.write_u8(&mut pos, 0xAB).unwrap();
        disk.write_u32(&mut pos, 0xDEAD_BEEF).unwrap();
        disk.write_u64(&mut pos, 42).unwrap();
        disk.write_i64(&mut pos, -7).unwrap();
        disk.write_bytes(&mut pos, b"xyz").unwrap();
        assert_eq!(pos, Address(1 + 4 + 8 + 8 + 3));

        let mut pos = Address(0);
        assert_eq!(disk.read_u8(&mut pos).unwrap(), 0xAB);
        assert_eq!(disk.read_u32(&mut pos).unwrap(), 0xDEAD_BEEF);
        assert_eq!(disk.read_u64(&mut pos).unwrap(), 42);
        assert_eq!(disk.read_i64(&mut pos).unwrap(), -7);
        let mut name = [0_u8; 3];
        assert_eq!(disk.read_bytes(&mut pos, &mut name).unwrap(), 3);
        assert_eq!(&name, b"xyz");
        assert_eq!(pos, Address(24));
    }

    #[test]
    fn file_disk_create_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("container.cfs");

        let disk = FileDisk::create(&path, 8192).unwrap();
        assert_eq!(disk.len_bytes(), 8192);
        disk.write_all_at(4096, &[7_u8; 16]).unwrap();
        disk.flush().unwrap();
        drop(disk);

        let disk = FileDisk::open(&path).unwrap();
        assert_eq!(disk.len_bytes(), 8192);
        let mut buf = [0_u8; 16];
        disk.read_exact_at(4096, &mut buf).unwrap();
        assert_eq!(buf, [7_u8; 16]);
    }

    #[test]
    fn file_disk_extends_on_write_past_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grow.cfs");
        let disk = FileDisk::create(&path, 100).unwrap();
        disk.write_all_at(200, &[1]).unwrap();
        assert_eq!(disk.len_bytes(), 201);
    }
}
