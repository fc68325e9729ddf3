//! Per-node block addressing: 12 direct pointers, one indirect page and
//! one double-indirect page of 32-bit block indices.
//!
//! Pointer blocks come from the same pool as data blocks, are allocated
//! lazily on first use, and are freed as soon as their last referent
//! goes away. Every slot mutation persists immediately at its fixed
//! offset inside the owning node's 128-byte header.

use cfs_disk::DiskAccess;
use cfs_error::{Result, VfsError};
use cfs_types::{
    read_le_u32, Address, BLOCK_SIZE_BYTES, DIRECT_BLOCKS, MAX_FILE_BLOCKS, NODE_STORAGE_OFFSET,
    POINTERS_PER_BLOCK,
};
use tracing::warn;

/// Volume-wide block allocation seam, implemented by the master record.
pub trait BlockAllocator: Send + Sync {
    /// Allocate `count` blocks in one call. All-or-nothing.
    fn allocate_blocks(&self, count: u32) -> Result<Vec<Address>>;

    /// Return blocks to their groups.
    fn free_blocks(&self, addresses: &[Address]) -> Result<()>;
}

const COUNT_OFFSET: u64 = NODE_STORAGE_OFFSET;
const DIRECT_OFFSET: u64 = COUNT_OFFSET + 4;
const INDIRECT_OFFSET: u64 = DIRECT_OFFSET + 4 * DIRECT_BLOCKS as u64;
const DOUBLE_OFFSET: u64 = INDIRECT_OFFSET + 4;

/// Flat indexed view of one node's data blocks.
///
/// Index 0 of the global block-index space is group 0's own bitmap block
/// (reserved, never handed out), so 0 doubles as the empty-slot sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockAddressStorage {
    node_address: Address,
    blocks_start: Address,
    num_blocks: u32,
    direct: [u32; DIRECT_BLOCKS as usize],
    indirect: u32,
    double_indirect: u32,
}

impl BlockAddressStorage {
    #[must_use]
    pub fn new_empty(node_address: Address, blocks_start: Address) -> Self {
        Self {
            node_address,
            blocks_start,
            num_blocks: 0,
            direct: [0; DIRECT_BLOCKS as usize],
            indirect: 0,
            double_indirect: 0,
        }
    }

    /// Parse the storage record out of a raw 128-byte node header.
    pub fn parse(node_address: Address, blocks_start: Address, header: &[u8]) -> Result<Self> {
        let base = NODE_STORAGE_OFFSET as usize;
        let mut storage = Self::new_empty(node_address, blocks_start);
        storage.num_blocks = read_le_u32(header, base)
            .map_err(|e| VfsError::corruption(node_address.0, e.to_string()))?;
        for (i, slot) in storage.direct.iter_mut().enumerate() {
            *slot = read_le_u32(header, base + 4 + 4 * i)
                .map_err(|e| VfsError::corruption(node_address.0, e.to_string()))?;
        }
        storage.indirect = read_le_u32(header, base + 4 + 4 * DIRECT_BLOCKS as usize)
            .map_err(|e| VfsError::corruption(node_address.0, e.to_string()))?;
        storage.double_indirect = read_le_u32(header, base + 4 + 4 * (DIRECT_BLOCKS as usize + 1))
            .map_err(|e| VfsError::corruption(node_address.0, e.to_string()))?;
        Ok(storage)
    }

    /// Serialise the storage record into a raw node header buffer.
    pub fn write_into(&self, header: &mut [u8]) {
        let base = NODE_STORAGE_OFFSET as usize;
        header[base..base + 4].copy_from_slice(&self.num_blocks.to_le_bytes());
        for (i, slot) in self.direct.iter().enumerate() {
            let at = base + 4 + 4 * i;
            header[at..at + 4].copy_from_slice(&slot.to_le_bytes());
        }
        let at = base + 4 + 4 * DIRECT_BLOCKS as usize;
        header[at..at + 4].copy_from_slice(&self.indirect.to_le_bytes());
        let at = at + 4;
        header[at..at + 4].copy_from_slice(&self.double_indirect.to_le_bytes());
    }

    #[must_use]
    pub fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    #[must_use]
    pub fn node_address(&self) -> Address {
        self.node_address
    }

    /// Address of the data block at logical `index`.
    pub fn block_address(&self, disk: &dyn DiskAccess, index: u32) -> Result<Address> {
        if index >= self.num_blocks {
            return Err(VfsError::BlockIndexOutOfRange {
                index,
                allocated: self.num_blocks,
            });
        }
        let data_index = if index < DIRECT_BLOCKS {
            self.direct[index as usize]
        } else {
            let li = index - DIRECT_BLOCKS;
            if li < POINTERS_PER_BLOCK {
                self.read_page_entry(disk, self.indirect, li)?
            } else {
                let dj = li - POINTERS_PER_BLOCK;
                let page =
                    self.read_page_entry(disk, self.double_indirect, dj / POINTERS_PER_BLOCK)?;
                self.read_page_entry(disk, page, dj % POINTERS_PER_BLOCK)?
            }
        };
        Ok(self.address_of(data_index))
    }

    /// Grow the store by `count` data blocks, requested from the
    /// allocator in a single call and appended in order.
    ///
    /// A pointer-page allocation failure midway returns the unappended
    /// remainder to the allocator; the store stays consistent, grown as
    /// far as it got.
    pub fn add_blocks(
        &mut self,
        disk: &dyn DiskAccess,
        alloc: &dyn BlockAllocator,
        count: u32,
    ) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let new_total = u64::from(self.num_blocks) + u64::from(count);
        if new_total > MAX_FILE_BLOCKS {
            return Err(VfsError::MaxFileSize);
        }

        let addresses = alloc.allocate_blocks(count)?;
        for (i, address) in addresses.iter().enumerate() {
            let data_index = self.index_of(*address)?;
            if let Err(err) = self.append_block(disk, alloc, data_index) {
                if alloc.free_blocks(&addresses[i..]).is_err() {
                    warn!(
                        target: "cfs::baddr",
                        event = "grow_rollback_failed",
                        node = %self.node_address,
                        unappended = addresses.len() - i
                    );
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn append_block(
        &mut self,
        disk: &dyn DiskAccess,
        alloc: &dyn BlockAllocator,
        data_index: u32,
    ) -> Result<()> {
        let index = self.num_blocks;
        if index < DIRECT_BLOCKS {
            self.direct[index as usize] = data_index;
            self.persist_direct_slot(disk, index)?;
        } else {
            let li = index - DIRECT_BLOCKS;
            if li < POINTERS_PER_BLOCK {
                if li == 0 {
                    self.indirect = self.allocate_page(disk, alloc)?;
                    self.persist_pointer_slot(disk, INDIRECT_OFFSET, self.indirect)?;
                }
                self.write_page_entry(disk, self.indirect, li, data_index)?;
            } else {
                let dj = li - POINTERS_PER_BLOCK;
                let page_no = dj / POINTERS_PER_BLOCK;
                let slot = dj % POINTERS_PER_BLOCK;
                if dj == 0 {
                    self.double_indirect = self.allocate_page(disk, alloc)?;
                    self.persist_pointer_slot(disk, DOUBLE_OFFSET, self.double_indirect)?;
                }
                let page = if slot == 0 {
                    let page = self.allocate_page(disk, alloc)?;
                    self.write_page_entry(disk, self.double_indirect, page_no, page)?;
                    page
                } else {
                    self.read_page_entry(disk, self.double_indirect, page_no)?
                };
                self.write_page_entry(disk, page, slot, data_index)?;
            }
        }
        self.num_blocks += 1;
        self.persist_count(disk)
    }

    /// Shrink the store by `count` blocks from the top, freeing pointer
    /// pages as their last referent goes.
    pub fn free_last_blocks(
        &mut self,
        disk: &dyn DiskAccess,
        alloc: &dyn BlockAllocator,
        count: u32,
    ) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        if count > self.num_blocks {
            return Err(VfsError::BlockIndexOutOfRange {
                index: count,
                allocated: self.num_blocks,
            });
        }

        let mut to_free: Vec<Address> = Vec::with_capacity(count as usize + 4);
        for _ in 0..count {
            let index = self.num_blocks - 1;
            if index < DIRECT_BLOCKS {
                to_free.push(self.address_of(self.direct[index as usize]));
                self.direct[index as usize] = 0;
                self.persist_direct_slot(disk, index)?;
            } else {
                let li = index - DIRECT_BLOCKS;
                if li < POINTERS_PER_BLOCK {
                    let page_address = self.address_of(self.indirect);
                    let data_index = self.read_page_entry(disk, self.indirect, li)?;
                    to_free.push(self.address_of(data_index));
                    if li == 0 {
                        to_free.push(page_address);
                        self.indirect = 0;
                        self.persist_pointer_slot(disk, INDIRECT_OFFSET, 0)?;
                    } else {
                        self.write_page_entry(disk, self.indirect, li, 0)?;
                    }
                } else {
                    let dj = li - POINTERS_PER_BLOCK;
                    let page_no = dj / POINTERS_PER_BLOCK;
                    let slot = dj % POINTERS_PER_BLOCK;
                    let page = self.read_page_entry(disk, self.double_indirect, page_no)?;
                    let data_index = self.read_page_entry(disk, page, slot)?;
                    to_free.push(self.address_of(data_index));
                    if slot == 0 {
                        to_free.push(self.address_of(page));
                        if dj == 0 {
                            to_free.push(self.address_of(self.double_indirect));
                            self.double_indirect = 0;
                            self.persist_pointer_slot(disk, DOUBLE_OFFSET, 0)?;
                        } else {
                            self.write_page_entry(disk, self.double_indirect, page_no, 0)?;
                        }
                    } else {
                        self.write_page_entry(disk, page, slot, 0)?;
                    }
                }
            }
            self.num_blocks -= 1;
        }
        self.persist_count(disk)?;
        alloc.free_blocks(&to_free)
    }

    // ── Index/address conversion ────────────────────────────────────────

    fn address_of(&self, data_index: u32) -> Address {
        Address(self.blocks_start.0 + u64::from(data_index) * BLOCK_SIZE_BYTES)
    }

    #[expect(clippy::cast_possible_truncation)] // index space is 32-bit by format
    fn index_of(&self, address: Address) -> Result<u32> {
        let rel = address
            .0
            .checked_sub(self.blocks_start.0)
            .filter(|rel| rel % BLOCK_SIZE_BYTES == 0)
            .ok_or_else(|| {
                VfsError::corruption(address.0, "allocated block outside the index space")
            })?;
        let index = rel / BLOCK_SIZE_BYTES;
        if index > u64::from(u32::MAX) {
            return Err(VfsError::corruption(address.0, "block index exceeds 32 bits"));
        }
        Ok(index as u32)
    }

    // ── Pointer-page I/O ────────────────────────────────────────────────

    fn read_page_entry(&self, disk: &dyn DiskAccess, page: u32, entry: u32) -> Result<u32> {
        let mut buf = [0_u8; 4];
        let at = self.address_of(page).0 + u64::from(entry) * 4;
        disk.read_exact_at(at, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn write_page_entry(
        &self,
        disk: &dyn DiskAccess,
        page: u32,
        entry: u32,
        value: u32,
    ) -> Result<()> {
        let at = self.address_of(page).0 + u64::from(entry) * 4;
        disk.write_all_at(at, &value.to_le_bytes())
    }

    fn allocate_page(&self, disk: &dyn DiskAccess, alloc: &dyn BlockAllocator) -> Result<u32> {
        let addresses = alloc.allocate_blocks(1)?;
        let address = addresses
            .first()
            .copied()
            .ok_or(VfsError::DiskFull)?;
        let index = self.index_of(address)?;
        disk.write_all_at(address.0, &[0_u8; BLOCK_SIZE_BYTES as usize])?;
        Ok(index)
    }

    // ── Slot persistence ────────────────────────────────────────────────

    fn persist_count(&self, disk: &dyn DiskAccess) -> Result<()> {
        disk.write_all_at(
            self.node_address.0 + COUNT_OFFSET,
            &self.num_blocks.to_le_bytes(),
        )
    }

    fn persist_direct_slot(&self, disk: &dyn DiskAccess, index: u32) -> Result<()> {
        disk.write_all_at(
            self.node_address.0 + DIRECT_OFFSET + u64::from(index) * 4,
            &self.direct[index as usize].to_le_bytes(),
        )
    }

    fn persist_pointer_slot(&self, disk: &dyn DiskAccess, offset: u64, value: u32) -> Result<()> {
        disk.write_all_at(self.node_address.0 + offset, &value.to_le_bytes())
    }
}

/// In-memory allocator for unit tests across the crate.
#[cfg(test)]
pub(crate) mod tests_support {
    use super::{Address, BlockAllocator, Result, BLOCK_SIZE_BYTES};
    use parking_lot::Mutex;
    use std::collections::BTreeSet;

    /// Hands out sequential block indices starting at 1 and tracks the
    /// outstanding balance.
    pub(crate) struct SequentialAllocator {
        state: Mutex<(u32, BTreeSet<u64>)>,
    }

    impl SequentialAllocator {
        pub(crate) fn new() -> Self {
            Self {
                state: Mutex::new((1, BTreeSet::new())),
            }
        }

        pub(crate) fn outstanding(&self) -> usize {
            self.state.lock().1.len()
        }
    }

    impl BlockAllocator for SequentialAllocator {
        fn allocate_blocks(&self, count: u32) -> Result<Vec<Address>> {
            let mut state = self.state.lock();
            let mut out = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let index = state.0;
                state.0 += 1;
                let address = u64::from(index) * BLOCK_SIZE_BYTES;
                state.1.insert(address);
                out.push(Address(address));
            }
            Ok(out)
        }

        fn free_blocks(&self, addresses: &[Address]) -> Result<()> {
            let mut state = self.state.lock();
            for address in addresses {
                assert!(state.1.remove(&address.0), "double free of {address}");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::SequentialAllocator;
    use super::*;
    use cfs_disk::MemDisk;

    /// Refuses every allocation.
    struct FullAllocator;

    impl BlockAllocator for FullAllocator {
        fn allocate_blocks(&self, _count: u32) -> Result<Vec<Address>> {
            Err(VfsError::DiskFull)
        }

        fn free_blocks(&self, _addresses: &[Address]) -> Result<()> {
            Ok(())
        }
    }

    // Inside block 0, which the mock allocator never hands out.
    const NODE_ADDR: Address = Address(64);

    fn storage() -> BlockAddressStorage {
        BlockAddressStorage::new_empty(NODE_ADDR, Address(0))
    }

    #[test]
    fn direct_blocks_only() {
        let disk = MemDisk::new(64 * 4096);
        let alloc = SequentialAllocator::new();
        let mut st = storage();

        st.add_blocks(&disk, &alloc, 3).unwrap();
        assert_eq!(st.num_blocks(), 3);
        assert_eq!(st.block_address(&disk, 0).unwrap(), Address(4096));
        assert_eq!(st.block_address(&disk, 2).unwrap(), Address(3 * 4096));
        assert_eq!(alloc.outstanding(), 3);

        st.free_last_blocks(&disk, &alloc, 3).unwrap();
        assert_eq!(st.num_blocks(), 0);
        assert_eq!(alloc.outstanding(), 0);
    }

    #[test]
    fn grows_through_indirect_and_double_indirect() {
        let disk = MemDisk::new(2100 * 4096);
        let alloc = SequentialAllocator::new();
        let mut st = storage();

        st.add_blocks(&disk, &alloc, 2000).unwrap();
        assert_eq!(st.num_blocks(), 2000);

        // 2000 data blocks + indirect page + double page + 1 sub-page.
        assert_eq!(alloc.outstanding(), 2003);

        st.block_address(&disk, 12).unwrap();
        st.block_address(&disk, 1024).unwrap();
        st.block_address(&disk, 1036).unwrap();
        st.block_address(&disk, 1999).unwrap();
        assert!(matches!(
            st.block_address(&disk, 2000),
            Err(VfsError::BlockIndexOutOfRange {
                index: 2000,
                allocated: 2000
            })
        ));

        st.free_last_blocks(&disk, &alloc, 2000).unwrap();
        assert_eq!(st.num_blocks(), 0);
        assert_eq!(alloc.outstanding(), 0);
    }

    #[test]
    fn logical_order_survives_interleaved_growth() {
        let disk = MemDisk::new(64 * 4096);
        let alloc = SequentialAllocator::new();
        let mut st = storage();

        st.add_blocks(&disk, &alloc, 14).unwrap();
        let addr13 = st.block_address(&disk, 13).unwrap();
        st.free_last_blocks(&disk, &alloc, 1).unwrap();
        st.add_blocks(&disk, &alloc, 1).unwrap();
        // Slot 13 was re-filled with a fresh block.
        assert_ne!(st.block_address(&disk, 13).unwrap(), addr13);
        // Lower slots are untouched.
        assert_eq!(st.block_address(&disk, 0).unwrap(), Address(4096));
    }

    #[test]
    fn indirect_page_freed_eagerly() {
        let disk = MemDisk::new(64 * 4096);
        let alloc = SequentialAllocator::new();
        let mut st = storage();

        st.add_blocks(&disk, &alloc, 13).unwrap();
        assert_eq!(alloc.outstanding(), 14); // 13 data + indirect page
        st.free_last_blocks(&disk, &alloc, 1).unwrap();
        assert_eq!(alloc.outstanding(), 12); // page went with its last entry
        assert_eq!(st.num_blocks(), 12);
    }

    #[test]
    fn refuses_growth_past_max_file() {
        let disk = MemDisk::new(4096);
        let alloc = SequentialAllocator::new();
        let mut st = storage();
        st.num_blocks = u32::try_from(MAX_FILE_BLOCKS).unwrap();
        assert!(matches!(
            st.add_blocks(&disk, &alloc, 1),
            Err(VfsError::MaxFileSize)
        ));
    }

    #[test]
    fn disk_full_surfaces_unchanged() {
        let disk = MemDisk::new(4096);
        let mut st = storage();
        assert!(matches!(
            st.add_blocks(&disk, &FullAllocator, 4),
            Err(VfsError::DiskFull)
        ));
        assert_eq!(st.num_blocks(), 0);
    }

    #[test]
    fn header_serialisation_round_trip() {
        let disk = MemDisk::new(64 * 4096);
        let alloc = SequentialAllocator::new();
        let mut st = storage();
        st.add_blocks(&disk, &alloc, 14).unwrap();

        let mut header = [0_u8; 128];
        st.write_into(&mut header);
        let parsed = BlockAddressStorage::parse(NODE_ADDR, Address(0), &header).unwrap();
        assert_eq!(parsed, st);
    }

    #[test]
    fn slots_persist_at_fixed_offsets() {
        let disk = MemDisk::new(64 * 4096);
        let alloc = SequentialAllocator::new();
        let mut st = storage();
        st.add_blocks(&disk, &alloc, 2).unwrap();

        // The count and the first direct slot are on disk already.
        let mut header = vec![0_u8; 128];
        disk.read_exact_at(NODE_ADDR.0, &mut header).unwrap();
        let reloaded = BlockAddressStorage::parse(NODE_ADDR, Address(0), &header).unwrap();
        assert_eq!(reloaded.num_blocks(), 2);
        assert_eq!(reloaded.block_address(&disk, 1).unwrap(), Address(2 * 4096));
    }
}
