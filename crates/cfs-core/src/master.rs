//! The master record: volume header, group descriptor table, the only
//! block allocator, node creation and deletion, and the per-mount
//! live-node cache.
//!
//! The cache is keyed by the node's absolute on-disk address, which is
//! also what keeps the object graph acyclic: parents reach children
//! through directory entries, never through cached back-pointers.

use crate::baddr::{BlockAddressStorage, BlockAllocator};
use crate::dir::{validate_entry_name, DirState, DirectoryNode};
use crate::file::FileNode;
use crate::group::{BlockGroup, BlockGroupDescriptor};
use crate::node::{load_header, lock_write, NodeKind};
use cfs_disk::DiskAccess;
use cfs_error::{Result, VfsError};
use cfs_types::{
    Address, Ticks, VolumeLayout, BLOCKS_PER_GROUP, BLOCK_SIZE_BYTES, RESERVED_BLOCKS,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A live node, exactly one instance per address per mount.
#[derive(Clone)]
pub enum CachedNode {
    File(Arc<FileNode>),
    Directory(Arc<DirectoryNode>),
}

/// Mount-level summary, serialisable for operator tooling.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeStats {
    pub volume_size: u64,
    pub block_size: u64,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub group_count: u64,
    pub cached_nodes: usize,
}

pub struct MasterRecord {
    disk: Arc<dyn DiskAccess>,
    volume_size: u64,
    layout: VolumeLayout,
    root_address: Address,
    groups: Vec<BlockGroup>,
    free_space: Mutex<u64>,
    cache: DashMap<u64, CachedNode>,
    closed: AtomicBool,
}

fn group_count_for(total_blocks: u64) -> u64 {
    let full = total_blocks / u64::from(BLOCKS_PER_GROUP);
    let remainder = total_blocks % u64::from(BLOCKS_PER_GROUP);
    full + u64::from(remainder > u64::from(RESERVED_BLOCKS))
}

#[expect(clippy::cast_possible_truncation)] // bounded by BLOCKS_PER_GROUP
fn group_size_blocks(data_blocks: u64, group: u64) -> u32 {
    let remaining = data_blocks.saturating_sub(group * u64::from(BLOCKS_PER_GROUP));
    remaining.min(u64::from(BLOCKS_PER_GROUP)) as u32
}

impl MasterRecord {
    /// Format a fresh volume onto `disk` and mount it.
    #[expect(clippy::cast_possible_truncation)] // group indices are far below u32::MAX
    pub fn format(disk: Arc<dyn DiskAccess>, size: u64) -> Result<Arc<Self>> {
        if size % BLOCK_SIZE_BYTES != 0 {
            return Err(VfsError::InvalidVolumeSize {
                size,
                reason: "not a multiple of the block size",
            });
        }
        let total_blocks = size / BLOCK_SIZE_BYTES;
        if total_blocks <= u64::from(RESERVED_BLOCKS) + 1 {
            return Err(VfsError::InvalidVolumeSize {
                size,
                reason: "smaller than one group's reserved prefix",
            });
        }

        let group_count = group_count_for(total_blocks);
        let layout = VolumeLayout::for_group_count(size, group_count).ok_or(
            VfsError::InvalidVolumeSize {
                size,
                reason: "master record does not fit",
            },
        )?;
        let data_blocks = total_blocks - layout.master_blocks();

        let mut groups = Vec::with_capacity(usize::try_from(group_count).unwrap_or(0));
        for g in 0..group_count {
            groups.push(BlockGroup::format(
                g as u32,
                layout.group_start(g as u32),
                group_size_blocks(data_blocks, g),
            ));
        }
        let free: u64 = groups.iter().map(|g| u64::from(g.free_blocks())).sum();

        let mut master = Self {
            disk,
            volume_size: size,
            layout,
            root_address: Address::ZERO,
            groups,
            free_space: Mutex::new(free),
            cache: DashMap::new(),
            closed: AtomicBool::new(false),
        };

        let root = master.create_root()?;
        master.root_address = root.address();
        master.save()?;
        master.disk.flush()?;

        info!(
            target: "cfs::master",
            event = "volume_format",
            size,
            groups = group_count,
            free_blocks = free,
            root = %master.root_address
        );
        Ok(Arc::new(master))
    }

    /// Mount an existing volume: header, descriptors, bitmaps, root.
    pub fn load(disk: Arc<dyn DiskAccess>) -> Result<Arc<Self>> {
        let mut pos = Address::ZERO;
        let volume_size = disk.read_u64(&mut pos)?;
        let free_space = disk.read_u64(&mut pos)?;
        let root_address = Address(disk.read_u64(&mut pos)?);
        let group_count = disk.read_u64(&mut pos)?;

        if volume_size == 0 || volume_size % BLOCK_SIZE_BYTES != 0 {
            return Err(VfsError::corruption(0, "volume size not block-aligned"));
        }
        let total_blocks = volume_size / BLOCK_SIZE_BYTES;
        if group_count != group_count_for(total_blocks) {
            return Err(VfsError::corruption(
                24,
                format!("group count {group_count} does not match volume size {volume_size}"),
            ));
        }
        let layout = VolumeLayout::for_group_count(volume_size, group_count)
            .ok_or_else(|| VfsError::corruption(0, "master record does not fit volume"))?;
        let data_blocks = total_blocks - layout.master_blocks();

        let mut groups = Vec::with_capacity(usize::try_from(group_count).unwrap_or(0));
        for g in 0..group_count {
            let descriptor = BlockGroupDescriptor::load(disk.as_ref(), &mut pos)?;
            #[expect(clippy::cast_possible_truncation)] // bounded by group_count check
            let index = g as u32;
            if descriptor.bitmaps_address != layout.group_start(index) {
                return Err(VfsError::corruption(
                    descriptor.bitmaps_address.0,
                    format!("descriptor {g} points outside its group"),
                ));
            }
            groups.push(BlockGroup::load(
                disk.as_ref(),
                index,
                group_size_blocks(data_blocks, g),
                &descriptor,
            )?);
        }

        let master = Arc::new(Self {
            disk,
            volume_size,
            layout,
            root_address,
            groups,
            free_space: Mutex::new(free_space),
            cache: DashMap::new(),
            closed: AtomicBool::new(false),
        });
        master.root_directory()?;

        info!(
            target: "cfs::master",
            event = "volume_mount",
            size = volume_size,
            groups = group_count,
            free_blocks = free_space
        );
        Ok(master)
    }

    /// Persist the header, the descriptor table and every group's bitmaps.
    pub fn save(&self) -> Result<()> {
        let disk = self.disk.as_ref();
        let mut pos = Address::ZERO;
        disk.write_u64(&mut pos, self.volume_size)?;
        disk.write_u64(&mut pos, *self.free_space.lock())?;
        disk.write_u64(&mut pos, self.root_address.0)?;
        disk.write_u64(&mut pos, self.groups.len() as u64)?;
        for group in &self.groups {
            group.descriptor().save(disk, &mut pos)?;
        }
        for group in &self.groups {
            group.save_bitmaps(disk)?;
        }
        Ok(())
    }

    /// Unmount: save every cached node under its write lock (directories
    /// compact), then the master record, then flush. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let nodes: Vec<CachedNode> = self.cache.iter().map(|r| r.value().clone()).collect();
        for node in nodes {
            match node {
                CachedNode::File(file) => {
                    let state = lock_write(file.state())?;
                    state.save(self.disk.as_ref())?;
                }
                CachedNode::Directory(dir) => {
                    let mut state = lock_write(dir.state())?;
                    state.compact(self.disk.as_ref(), self)?;
                }
            }
        }
        self.cache.clear();
        self.save()?;
        self.disk.flush()?;
        self.closed.store(true, Ordering::SeqCst);
        info!(target: "cfs::master", event = "volume_close", size = self.volume_size);
        Ok(())
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VfsError::Closed);
        }
        Ok(())
    }

    #[must_use]
    pub fn disk(&self) -> &Arc<dyn DiskAccess> {
        &self.disk
    }

    #[must_use]
    pub fn root_address(&self) -> Address {
        self.root_address
    }

    #[must_use]
    pub fn free_space_blocks(&self) -> u64 {
        *self.free_space.lock()
    }

    #[must_use]
    pub fn descriptors(&self) -> Vec<BlockGroupDescriptor> {
        self.groups.iter().map(BlockGroup::descriptor).collect()
    }

    #[must_use]
    pub fn stats(&self) -> VolumeStats {
        VolumeStats {
            volume_size: self.volume_size,
            block_size: BLOCK_SIZE_BYTES,
            total_blocks: self.volume_size / BLOCK_SIZE_BYTES,
            free_blocks: self.free_space_blocks(),
            group_count: self.groups.len() as u64,
            cached_nodes: self.cache.len(),
        }
    }

    // ── Node creation and deletion ──────────────────────────────────────

    fn allocate_node_slot(&self) -> Result<Address> {
        // First group with a free node wins.
        self.groups
            .iter()
            .find_map(BlockGroup::allocate_node)
            .ok_or(VfsError::DiskFull)
    }

    fn create_root(&self) -> Result<Arc<DirectoryNode>> {
        let address = self.allocate_node_slot()?;
        let root = DirectoryNode::create_new(
            self.disk.as_ref(),
            self,
            address,
            self.layout.blocks_start,
            None,
            Ticks::now(),
        )?;
        self.cache
            .insert(address.0, CachedNode::Directory(Arc::clone(&root)));
        Ok(root)
    }

    /// Create a directory node under `parent` and link it by name.
    pub fn create_directory_node(
        &self,
        parent: &mut DirState,
        name: &str,
    ) -> Result<Arc<DirectoryNode>> {
        self.ensure_open()?;
        validate_entry_name(name)?;
        if parent.find_live_entry(name).is_some() {
            return Err(VfsError::AlreadyExists(name.to_owned()));
        }

        let address = self.allocate_node_slot()?;
        let dir = DirectoryNode::create_new(
            self.disk.as_ref(),
            self,
            address,
            self.layout.blocks_start,
            Some(parent.address()),
            Ticks::now(),
        );
        let dir = match dir {
            Ok(dir) => dir,
            Err(err) => {
                self.rollback_node_slot(address);
                return Err(err);
            }
        };
        if let Err(err) =
            parent.add_child_entry(self.disk.as_ref(), self, name, true, address)
        {
            let mut state = dir.state().write();
            let blocks = state.storage_mut().num_blocks();
            if state.storage_mut().free_last_blocks(self.disk.as_ref(), self, blocks).is_err() {
                warn!(target: "cfs::master", event = "create_rollback_failed", node = %address);
            }
            drop(state);
            self.rollback_node_slot(address);
            return Err(err);
        }
        self.cache
            .insert(address.0, CachedNode::Directory(Arc::clone(&dir)));
        debug!(target: "cfs::master", event = "dir_node_create", node = %address, name);
        Ok(dir)
    }

    /// Create an empty file node under `parent` and link it by name.
    pub fn create_file_node(&self, parent: &mut DirState, name: &str) -> Result<Arc<FileNode>> {
        self.ensure_open()?;
        validate_entry_name(name)?;
        if parent.find_live_entry(name).is_some() {
            return Err(VfsError::AlreadyExists(name.to_owned()));
        }

        let address = self.allocate_node_slot()?;
        let file = FileNode::new_empty(address, self.layout.blocks_start, Ticks::now());
        if let Err(err) = file.state().write().save(self.disk.as_ref()) {
            self.rollback_node_slot(address);
            return Err(err);
        }
        if let Err(err) =
            parent.add_child_entry(self.disk.as_ref(), self, name, false, address)
        {
            self.rollback_node_slot(address);
            return Err(err);
        }
        self.cache
            .insert(address.0, CachedNode::File(Arc::clone(&file)));
        debug!(target: "cfs::master", event = "file_node_create", node = %address, name);
        Ok(file)
    }

    fn rollback_node_slot(&self, address: Address) {
        match self.group_for(address) {
            Ok(group) => {
                if group.free_node(address).is_err() {
                    warn!(target: "cfs::master", event = "slot_rollback_failed", node = %address);
                }
            }
            Err(_) => {
                warn!(target: "cfs::master", event = "slot_rollback_failed", node = %address);
            }
        }
    }

    /// Free a node's data blocks, its slot, and drop it from the cache.
    /// The caller holds the node's write lock and hands in its storage.
    pub fn free_node_and_blocks(
        &self,
        address: Address,
        storage: &mut BlockAddressStorage,
    ) -> Result<()> {
        let blocks = storage.num_blocks();
        storage.free_last_blocks(self.disk.as_ref(), self, blocks)?;
        self.group_for(address)?.free_node(address)?;
        self.cache.remove(&address.0);
        debug!(target: "cfs::master", event = "node_free", node = %address, blocks);
        Ok(())
    }

    fn group_for(&self, address: Address) -> Result<&BlockGroup> {
        let index = self
            .layout
            .owning_group(address)
            .ok_or_else(|| VfsError::corruption(address.0, "address below the block space"))?;
        self.groups
            .get(index as usize)
            .ok_or_else(|| VfsError::corruption(address.0, "address beyond the last group"))
    }

    // ── Live-node cache ─────────────────────────────────────────────────

    /// Atomic get-or-load of a file node.
    pub fn get_file_node(&self, address: Address) -> Result<Arc<FileNode>> {
        self.ensure_open()?;
        match self.cache.entry(address.0) {
            Entry::Occupied(occupied) => match occupied.get() {
                CachedNode::File(file) => Ok(Arc::clone(file)),
                CachedNode::Directory(_) => Err(VfsError::corruption(
                    address.0,
                    "entry kind says file, cached node is a directory",
                )),
            },
            Entry::Vacant(vacant) => {
                let header = load_header(self.disk.as_ref(), address, self.layout.blocks_start)?;
                if header.kind != NodeKind::File {
                    return Err(VfsError::corruption(
                        address.0,
                        "entry kind says file, header flag says directory",
                    ));
                }
                let file = FileNode::from_header(address, header);
                vacant.insert(CachedNode::File(Arc::clone(&file)));
                Ok(file)
            }
        }
    }

    /// Atomic get-or-load of a directory node.
    pub fn get_directory_node(&self, address: Address) -> Result<Arc<DirectoryNode>> {
        self.ensure_open()?;
        match self.cache.entry(address.0) {
            Entry::Occupied(occupied) => match occupied.get() {
                CachedNode::Directory(dir) => Ok(Arc::clone(dir)),
                CachedNode::File(_) => Err(VfsError::corruption(
                    address.0,
                    "entry kind says directory, cached node is a file",
                )),
            },
            Entry::Vacant(vacant) => {
                let header = load_header(self.disk.as_ref(), address, self.layout.blocks_start)?;
                if header.kind != NodeKind::Directory {
                    return Err(VfsError::corruption(
                        address.0,
                        "entry kind says directory, header flag says file",
                    ));
                }
                let dir = DirectoryNode::from_header(self.disk.as_ref(), address, header)?;
                vacant.insert(CachedNode::Directory(Arc::clone(&dir)));
                Ok(dir)
            }
        }
    }

    /// The root directory, through the cache.
    pub fn root_directory(&self) -> Result<Arc<DirectoryNode>> {
        self.get_directory_node(self.root_address)
    }
}

impl BlockAllocator for MasterRecord {
    /// Allocate `count` blocks across groups, walking them in order.
    ///
    /// The free counter is decremented up front; on a group-walk
    /// shortfall the collected blocks go back to their groups and the
    /// counter is restored before `DiskFull` surfaces.
    fn allocate_blocks(&self, count: u32) -> Result<Vec<Address>> {
        self.ensure_open()?;
        if count == 0 {
            return Ok(Vec::new());
        }
        {
            let mut free = self.free_space.lock();
            if u64::from(count) > *free {
                return Err(VfsError::DiskFull);
            }
            *free -= u64::from(count);
        }

        let wanted = count as usize;
        let mut out = Vec::with_capacity(wanted);
        for group in &self.groups {
            while out.len() < wanted {
                match group.allocate_block() {
                    Some(address) => out.push(address),
                    None => break,
                }
            }
            if out.len() == wanted {
                break;
            }
        }

        if out.len() < wanted {
            warn!(
                target: "cfs::master",
                event = "alloc_shortfall",
                wanted,
                got = out.len()
            );
            for address in &out {
                if self
                    .group_for(*address)
                    .and_then(|g| g.free_block(*address))
                    .is_err()
                {
                    warn!(target: "cfs::master", event = "alloc_reconcile_failed", block = %address);
                }
            }
            *self.free_space.lock() += u64::from(count);
            return Err(VfsError::DiskFull);
        }
        Ok(out)
    }

    fn free_blocks(&self, addresses: &[Address]) -> Result<()> {
        for address in addresses {
            self.group_for(*address)?.free_block(*address)?;
            *self.free_space.lock() += 1;
        }
        Ok(())
    }
}
