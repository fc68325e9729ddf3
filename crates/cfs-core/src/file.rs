//! File nodes: a byte-stream payload over the node's block-address
//! storage. Grows and shrinks through `set_file_size`.

use crate::baddr::{BlockAddressStorage, BlockAllocator};
use crate::node::{save_header, NodeHeader, NodeKind, NodeLock};
use crate::sparse;
use cfs_disk::DiskAccess;
use cfs_error::{Result, VfsError};
use cfs_types::{Address, Ticks, BLOCK_SIZE_BYTES, MAX_FILE_BLOCKS};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::trace;

/// A file node. Payload state lives behind the node's reader/writer lock.
pub struct FileNode {
    address: Address,
    state: NodeLock<FileState>,
}

impl FileNode {
    #[must_use]
    pub fn from_header(address: Address, header: NodeHeader) -> Arc<Self> {
        Arc::new(Self {
            address,
            state: Arc::new(RwLock::new(FileState {
                size: header.size,
                created: header.created,
                modified: header.modified,
                storage: header.storage,
            })),
        })
    }

    #[must_use]
    pub fn new_empty(address: Address, blocks_start: Address, now: Ticks) -> Arc<Self> {
        Arc::new(Self {
            address,
            state: Arc::new(RwLock::new(FileState {
                size: 0,
                created: now,
                modified: now,
                storage: BlockAddressStorage::new_empty(address, blocks_start),
            })),
        })
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    #[must_use]
    pub fn state(&self) -> &NodeLock<FileState> {
        &self.state
    }
}

/// Mutable file metadata and payload addressing; guarded by the node lock.
pub struct FileState {
    size: u64,
    created: Ticks,
    modified: Ticks,
    storage: BlockAddressStorage,
}

impl FileState {
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn created(&self) -> Ticks {
        self.created
    }

    #[must_use]
    pub fn modified(&self) -> Ticks {
        self.modified
    }

    #[must_use]
    pub fn storage_mut(&mut self) -> &mut BlockAddressStorage {
        &mut self.storage
    }

    /// Read up to `buf.len()` bytes at `position`. Reads are bounded by
    /// the file size; a short read at end of file is a truncation.
    #[expect(clippy::cast_possible_truncation)] // per-block spans fit usize
    pub fn read_data(&self, disk: &dyn DiskAccess, position: u64, buf: &mut [u8]) -> Result<usize> {
        if position >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let end = self.size.min(
            position
                .checked_add(buf.len() as u64)
                .ok_or(VfsError::MaxFileSize)?,
        );
        let mut copied = 0_usize;
        let mut pos = position;
        while pos < end {
            let block_index = (pos / BLOCK_SIZE_BYTES) as u32;
            let in_block = pos % BLOCK_SIZE_BYTES;
            let span = ((BLOCK_SIZE_BYTES - in_block).min(end - pos)) as usize;
            let block = self.storage.block_address(disk, block_index)?;
            disk.read_exact_at(block.0 + in_block, &mut buf[copied..copied + span])?;
            copied += span;
            pos += span as u64;
        }
        Ok(copied)
    }

    /// Write `data` at `position`, growing the file first when the write
    /// extends past the current end.
    #[expect(clippy::cast_possible_truncation)] // in-block offsets fit usize
    pub fn write_data(
        &mut self,
        disk: &dyn DiskAccess,
        alloc: &dyn BlockAllocator,
        position: u64,
        data: &[u8],
    ) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let end = position
            .checked_add(data.len() as u64)
            .ok_or(VfsError::MaxFileSize)?;
        if end > self.size {
            self.set_file_size(disk, alloc, end)?;
        }

        let first_block = (position / BLOCK_SIZE_BYTES) as u32;
        let offset = (position % BLOCK_SIZE_BYTES) as usize;
        let needed = sparse::blocks_required(data.len(), offset);
        let mut blocks = Vec::with_capacity(needed);
        for i in 0..needed {
            blocks.push(self.storage.block_address(disk, first_block + i as u32)?);
        }
        sparse::write_sparse(disk, data, &blocks, offset)?;

        self.modified = Ticks::now();
        self.save(disk)
    }

    /// Grow or truncate so that exactly `ceil(new_size / block_size)`
    /// blocks back the file. New blocks are zero-filled.
    #[expect(clippy::cast_possible_truncation)] // block counts bounded by MAX_FILE_BLOCKS
    pub fn set_file_size(
        &mut self,
        disk: &dyn DiskAccess,
        alloc: &dyn BlockAllocator,
        new_size: u64,
    ) -> Result<()> {
        let new_blocks = new_size.div_ceil(BLOCK_SIZE_BYTES);
        if new_blocks > MAX_FILE_BLOCKS {
            return Err(VfsError::MaxFileSize);
        }
        let new_blocks = new_blocks as u32;
        let current = self.storage.num_blocks();

        if new_blocks > current {
            self.storage.add_blocks(disk, alloc, new_blocks - current)?;
            let zero = vec![0_u8; BLOCK_SIZE_BYTES as usize];
            for index in current..new_blocks {
                let block = self.storage.block_address(disk, index)?;
                disk.write_all_at(block.0, &zero)?;
            }
        } else if new_blocks < current {
            self.storage
                .free_last_blocks(disk, alloc, current - new_blocks)?;
        }

        // Keep the invariant that bytes past the size in allocated
        // blocks read as zero: a later grow must not resurrect them.
        if new_size < self.size {
            let tail = new_size % BLOCK_SIZE_BYTES;
            if tail != 0 {
                let block = self.storage.block_address(disk, new_blocks - 1)?;
                let zeros = vec![0_u8; (BLOCK_SIZE_BYTES - tail) as usize];
                disk.write_all_at(block.0 + tail, &zeros)?;
            }
        }

        trace!(
            target: "cfs::file",
            event = "resize",
            node = %self.storage.node_address(),
            old_size = self.size,
            new_size
        );
        self.size = new_size;
        self.modified = Ticks::now();
        self.save(disk)
    }

    /// Persist the 128-byte header.
    pub fn save(&self, disk: &dyn DiskAccess) -> Result<()> {
        save_header(
            disk,
            NodeKind::File,
            self.size,
            self.created,
            self.modified,
            &self.storage,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baddr::tests_support::SequentialAllocator;
    use cfs_disk::MemDisk;

    fn fixture() -> (MemDisk, SequentialAllocator, Arc<FileNode>) {
        let disk = MemDisk::new(64 * 4096);
        let alloc = SequentialAllocator::new();
        let node = FileNode::new_empty(Address(64), Address(0), Ticks(100));
        (disk, alloc, node)
    }

    #[test]
    fn write_read_round_trip_single_block() {
        let (disk, alloc, node) = fixture();
        let mut state = node.state().write();
        state.write_data(&disk, &alloc, 0, &[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(state.size(), 5);

        let mut buf = [0_u8; 5];
        assert_eq!(state.read_data(&disk, 0, &mut buf).unwrap(), 5);
        assert_eq!(buf, [1, 2, 3, 4, 5]);
    }

    #[test]
    fn write_read_round_trip_across_blocks() {
        let (disk, alloc, node) = fixture();
        let mut state = node.state().write();
        let data: Vec<u8> = (0..10_000).map(|i| (i % 251) as u8).collect();
        state.write_data(&disk, &alloc, 100, &data).unwrap();
        assert_eq!(state.size(), 10_100);

        let mut buf = vec![0_u8; data.len()];
        assert_eq!(state.read_data(&disk, 100, &mut buf).unwrap(), data.len());
        assert_eq!(buf, data);

        // The grown head of the file reads as zeroes.
        let mut head = [9_u8; 100];
        state.read_data(&disk, 0, &mut head).unwrap();
        assert_eq!(head, [0_u8; 100]);
    }

    #[test]
    fn short_read_at_eof_and_empty_beyond() {
        let (disk, alloc, node) = fixture();
        let mut state = node.state().write();
        state.write_data(&disk, &alloc, 0, &[7_u8; 10]).unwrap();

        let mut buf = [0_u8; 64];
        assert_eq!(state.read_data(&disk, 4, &mut buf).unwrap(), 6);
        assert_eq!(state.read_data(&disk, 10, &mut buf).unwrap(), 0);
        assert_eq!(state.read_data(&disk, 900, &mut buf).unwrap(), 0);
    }

    #[test]
    fn truncate_composes_to_minimum() {
        let (disk, alloc, node) = fixture();
        let mut state = node.state().write();
        state.write_data(&disk, &alloc, 0, &[1_u8; 9000]).unwrap();

        state.set_file_size(&disk, &alloc, 5000).unwrap();
        state.set_file_size(&disk, &alloc, 8000).unwrap();
        assert_eq!(state.size(), 8000);

        // Regrowth past a truncation point reads zeroes, not old bytes.
        let mut regrown = vec![9_u8; 3000];
        state.read_data(&disk, 5000, &mut regrown).unwrap();
        assert!(regrown.iter().all(|b| *b == 0));

        state.set_file_size(&disk, &alloc, 3000).unwrap();
        assert_eq!(state.size(), 3000);
        assert_eq!(state.storage.num_blocks(), 1);

        // Bytes within the surviving range are intact.
        let mut buf = [0_u8; 10];
        state.read_data(&disk, 0, &mut buf).unwrap();
        assert_eq!(buf, [1_u8; 10]);
    }

    #[test]
    fn growth_zero_fills_new_blocks() {
        let (disk, alloc, node) = fixture();
        let mut state = node.state().write();
        state.set_file_size(&disk, &alloc, 6000).unwrap();

        let mut buf = vec![9_u8; 6000];
        assert_eq!(state.read_data(&disk, 0, &mut buf).unwrap(), 6000);
        assert!(buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn truncate_frees_blocks_back() {
        let (disk, alloc, node) = fixture();
        let mut state = node.state().write();
        state.write_data(&disk, &alloc, 0, &[2_u8; 20_000]).unwrap();
        let held = alloc.outstanding();
        assert!(held >= 5);

        state.set_file_size(&disk, &alloc, 0).unwrap();
        assert_eq!(alloc.outstanding(), 0);
        assert_eq!(state.size(), 0);
    }

    #[test]
    fn header_persists_after_write() {
        let (disk, alloc, node) = fixture();
        {
            let mut state = node.state().write();
            state.write_data(&disk, &alloc, 0, &[3_u8; 123]).unwrap();
        }
        let header = crate::node::load_header(&disk, Address(64), Address(0)).unwrap();
        assert_eq!(header.kind, NodeKind::File);
        assert_eq!(header.size, 123);
        assert_eq!(header.created, Ticks(100));
        assert_eq!(header.storage.num_blocks(), 1);
    }
}
