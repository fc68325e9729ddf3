//! Block groups: contiguous runs of blocks owning their block bitmap,
//! node bitmap and node table.
//!
//! A group serialises allocation and deallocation of its resources under
//! one mutex. Free counts are mirrored into the master record's
//! descriptor table; bitmaps persist on volume save.

use crate::bitmap::DataBitmap;
use cfs_disk::DiskAccess;
use cfs_error::{Result, VfsError};
use cfs_types::{
    Address, BLOCKS_PER_GROUP, BLOCK_SIZE_BYTES, NODES_PER_GROUP, NODE_BITMAP_BLOCKS,
    NODE_SIZE_BYTES, RESERVED_BLOCKS,
};
use parking_lot::Mutex;
use tracing::trace;

/// Summary of one group as persisted in the master record (16 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockGroupDescriptor {
    pub bitmaps_address: Address,
    pub free_blocks_in_group: u32,
    pub free_nodes_in_group: u32,
}

impl BlockGroupDescriptor {
    pub fn save(&self, disk: &dyn DiskAccess, pos: &mut Address) -> Result<()> {
        disk.write_u64(pos, self.bitmaps_address.0)?;
        disk.write_u32(pos, self.free_blocks_in_group)?;
        disk.write_u32(pos, self.free_nodes_in_group)
    }

    pub fn load(disk: &dyn DiskAccess, pos: &mut Address) -> Result<Self> {
        Ok(Self {
            bitmaps_address: Address(disk.read_u64(pos)?),
            free_blocks_in_group: disk.read_u32(pos)?,
            free_nodes_in_group: disk.read_u32(pos)?,
        })
    }
}

struct GroupInner {
    block_bitmap: DataBitmap,
    node_bitmap: DataBitmap,
    free_blocks: u32,
    free_nodes: u32,
}

/// A contiguous span of up to `BLOCKS_PER_GROUP` blocks. The first
/// `RESERVED_BLOCKS` hold the block bitmap, the node bitmap and the node
/// table, in that order; data blocks follow.
pub struct BlockGroup {
    index: u32,
    start: Address,
    size_blocks: u32,
    inner: Mutex<GroupInner>,
}

impl BlockGroup {
    /// Construct a freshly formatted group. A short final group keeps the
    /// full one-block bitmap; bits past its end are pre-set so they can
    /// never be allocated.
    #[must_use]
    pub fn format(index: u32, start: Address, size_blocks: u32) -> Self {
        let mut block_bitmap = DataBitmap::new(BLOCKS_PER_GROUP);
        block_bitmap.reserve_beginning(RESERVED_BLOCKS);
        for bit in size_blocks..BLOCKS_PER_GROUP {
            block_bitmap.set(bit);
        }
        let node_bitmap = DataBitmap::new(NODES_PER_GROUP);
        Self {
            index,
            start,
            size_blocks,
            inner: Mutex::new(GroupInner {
                block_bitmap,
                node_bitmap,
                free_blocks: size_blocks.saturating_sub(RESERVED_BLOCKS),
                free_nodes: NODES_PER_GROUP,
            }),
        }
    }

    /// Rehydrate a group from its descriptor and on-disk bitmaps.
    pub fn load(
        disk: &dyn DiskAccess,
        index: u32,
        size_blocks: u32,
        descriptor: &BlockGroupDescriptor,
    ) -> Result<Self> {
        let start = descriptor.bitmaps_address;
        let block_bitmap = DataBitmap::load(disk, start, BLOCKS_PER_GROUP)?;
        let node_bitmap = DataBitmap::load(disk, Self::node_bitmap_address(start), NODES_PER_GROUP)?;
        Ok(Self {
            index,
            start,
            size_blocks,
            inner: Mutex::new(GroupInner {
                block_bitmap,
                node_bitmap,
                free_blocks: descriptor.free_blocks_in_group,
                free_nodes: descriptor.free_nodes_in_group,
            }),
        })
    }

    fn node_bitmap_address(start: Address) -> Address {
        Address(start.0 + BLOCK_SIZE_BYTES)
    }

    fn node_table_address(&self) -> Address {
        Address(self.start.0 + u64::from(1 + NODE_BITMAP_BLOCKS) * BLOCK_SIZE_BYTES)
    }

    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[must_use]
    pub fn start(&self) -> Address {
        self.start
    }

    #[must_use]
    pub fn free_blocks(&self) -> u32 {
        self.inner.lock().free_blocks
    }

    #[must_use]
    pub fn free_nodes(&self) -> u32 {
        self.inner.lock().free_nodes
    }

    /// Allocate the lowest free block, or `None` when the group is full.
    pub fn allocate_block(&self) -> Option<Address> {
        let mut inner = self.inner.lock();
        if inner.free_blocks == 0 {
            return None;
        }
        let bit = inner.block_bitmap.allocate_first_free()?;
        inner.free_blocks -= 1;
        trace!(target: "cfs::group", event = "block_alloc", group = self.index, bit);
        Some(Address(self.start.0 + u64::from(bit) * BLOCK_SIZE_BYTES))
    }

    /// Allocate the lowest free node slot inside the node table.
    pub fn allocate_node(&self) -> Option<Address> {
        let mut inner = self.inner.lock();
        if inner.free_nodes == 0 {
            return None;
        }
        let bit = inner.node_bitmap.allocate_first_free()?;
        inner.free_nodes -= 1;
        trace!(target: "cfs::group", event = "node_alloc", group = self.index, bit);
        Some(Address(
            self.node_table_address().0 + u64::from(bit) * NODE_SIZE_BYTES,
        ))
    }

    /// Free a data block. Rejects addresses outside the group, off block
    /// boundaries, inside the reserved prefix, and double frees.
    #[expect(clippy::cast_possible_truncation)] // bit index < BLOCKS_PER_GROUP
    pub fn free_block(&self, address: Address) -> Result<()> {
        let rel = address.0.checked_sub(self.start.0).ok_or_else(|| {
            VfsError::corruption(address.0, format!("block below group {}", self.index))
        })?;
        if rel % BLOCK_SIZE_BYTES != 0 {
            return Err(VfsError::corruption(
                address.0,
                "freed block not on a block boundary",
            ));
        }
        if rel / BLOCK_SIZE_BYTES >= u64::from(self.size_blocks) {
            return Err(VfsError::corruption(
                address.0,
                format!("block beyond group {}", self.index),
            ));
        }
        let bit = (rel / BLOCK_SIZE_BYTES) as u32;
        if bit < RESERVED_BLOCKS {
            return Err(VfsError::corruption(
                address.0,
                "freed block inside the reserved prefix",
            ));
        }
        let mut inner = self.inner.lock();
        if !inner.block_bitmap.deallocate(bit) {
            return Err(VfsError::corruption(
                address.0,
                format!("double free of block bit {bit} in group {}", self.index),
            ));
        }
        inner.free_blocks += 1;
        Ok(())
    }

    /// Free a node slot. Rejects addresses outside the node table, off
    /// slot boundaries, and double frees.
    #[expect(clippy::cast_possible_truncation)] // slot index < NODES_PER_GROUP
    pub fn free_node(&self, address: Address) -> Result<()> {
        let table = self.node_table_address();
        let table_size = u64::from(NODES_PER_GROUP) * NODE_SIZE_BYTES;
        if !address.in_range(table, table_size) {
            return Err(VfsError::corruption(
                address.0,
                format!("node address outside group {} table", self.index),
            ));
        }
        let rel = address.0 - table.0;
        if rel % NODE_SIZE_BYTES != 0 {
            return Err(VfsError::corruption(
                address.0,
                "node address not on a slot boundary",
            ));
        }
        let slot = (rel / NODE_SIZE_BYTES) as u32;
        let mut inner = self.inner.lock();
        if !inner.node_bitmap.deallocate(slot) {
            return Err(VfsError::corruption(
                address.0,
                format!("double free of node slot {slot} in group {}", self.index),
            ));
        }
        inner.free_nodes += 1;
        Ok(())
    }

    /// Copy out the group summary for the master record.
    #[must_use]
    pub fn descriptor(&self) -> BlockGroupDescriptor {
        let inner = self.inner.lock();
        BlockGroupDescriptor {
            bitmaps_address: self.start,
            free_blocks_in_group: inner.free_blocks,
            free_nodes_in_group: inner.free_nodes,
        }
    }

    /// Persist both bitmaps at the head of the group.
    pub fn save_bitmaps(&self, disk: &dyn DiskAccess) -> Result<()> {
        let inner = self.inner.lock();
        inner.block_bitmap.save(disk, self.start)?;
        inner.node_bitmap.save(disk, Self::node_bitmap_address(self.start))
    }
}
