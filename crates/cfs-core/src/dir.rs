//! Directory nodes: a singly-linked list of variable-length entries laid
//! out in the node's data blocks.
//!
//! Entries carry a flags byte, the target node address, the next-entry
//! address (0 ends the chain) and a UTF-16 name. An entry's slot size is
//! frozen at first save and never shrinks; deleted entries stay in the
//! chain and may be resurrected in place by a name that fits the slot.
//! Compaction re-lays live entries without gaps and frees trailing
//! blocks.

use crate::baddr::{BlockAddressStorage, BlockAllocator};
use crate::node::{save_header, NodeHeader, NodeKind, NodeLock};
use cfs_disk::DiskAccess;
use cfs_error::{Result, VfsError};
use cfs_types::{Address, Ticks, BLOCK_SIZE_BYTES, DIR_COMPACT_EVERY, MAX_NAME_UTF16};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, trace};

pub const ENTRY_FLAG_DELETED: u8 = 0b01;
pub const ENTRY_FLAG_DIRECTORY: u8 = 0b10;

/// Fixed part of an entry: flags, target, next, name length.
const ENTRY_FIXED_BYTES: u32 = 1 + 8 + 8 + 1;
/// Offset of the `next` pointer within an entry.
const ENTRY_NEXT_OFFSET: u64 = 1 + 8;

/// Characters that may not appear in an entry name.
const RESERVED_NAME_CHARS: &[char] = &['\\', '/', '*', '?', '"', '<', '>', '|', ':'];

/// Validate an entry name and return its length in UTF-16 code units.
pub fn validate_entry_name(name: &str) -> Result<u8> {
    let units = name.encode_utf16().count();
    if units == 0 || units > MAX_NAME_UTF16 {
        return Err(VfsError::InvalidPath(format!(
            "name length {units} outside 1..=255: {name:?}"
        )));
    }
    if name
        .chars()
        .any(|c| c.is_control() || RESERVED_NAME_CHARS.contains(&c))
    {
        return Err(VfsError::InvalidPath(format!(
            "name contains a reserved character: {name:?}"
        )));
    }
    #[expect(clippy::cast_possible_truncation)] // bounded by 255 above
    let units = units as u8;
    Ok(units)
}

fn names_equal(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// One directory entry, in memory. `self_address` and `size_bytes` pin
/// its on-disk slot.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    flags: u8,
    target: Address,
    next: u64,
    name: String,
    name_units: u8,
    self_address: Address,
    size_bytes: u32,
}

impl DirectoryEntry {
    /// Slot size for a name of `units` UTF-16 code units, 4-byte aligned.
    #[must_use]
    pub fn encoded_size(units: u8) -> u32 {
        (ENTRY_FIXED_BYTES + 2 * u32::from(units) + 3) & !3
    }

    #[must_use]
    pub fn new(
        name: &str,
        units: u8,
        is_directory: bool,
        target: Address,
        self_address: Address,
    ) -> Self {
        Self {
            flags: if is_directory { ENTRY_FLAG_DIRECTORY } else { 0 },
            target,
            next: 0,
            name: name.to_owned(),
            name_units: units,
            self_address,
            size_bytes: Self::encoded_size(units),
        }
    }

    /// Read the entry at `address`, remembering where it came from.
    pub fn load(disk: &dyn DiskAccess, address: Address) -> Result<Self> {
        let mut pos = address;
        let flags = disk.read_u8(&mut pos)?;
        let target = Address(disk.read_u64(&mut pos)?);
        let next = disk.read_u64(&mut pos)?;
        let name_units = disk.read_u8(&mut pos)?;
        if name_units == 0 {
            return Err(VfsError::corruption(address.0, "entry with empty name"));
        }
        let mut raw = vec![0_u8; 2 * usize::from(name_units)];
        disk.read_exact_at(pos.0, &mut raw)?;
        let code_units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let name = String::from_utf16(&code_units)
            .map_err(|_| VfsError::corruption(address.0, "entry name is not valid UTF-16"))?;
        Ok(Self {
            flags,
            target,
            next,
            name,
            name_units,
            self_address: address,
            size_bytes: Self::encoded_size(name_units),
        })
    }

    /// Write the full entry at its slot.
    pub fn save(&self, disk: &dyn DiskAccess) -> Result<()> {
        let mut pos = self.self_address;
        disk.write_u8(&mut pos, self.flags)?;
        disk.write_u64(&mut pos, self.target.0)?;
        disk.write_u64(&mut pos, self.next)?;
        disk.write_u8(&mut pos, self.name_units)?;
        let bytes: Vec<u8> = self.name.encode_utf16().flat_map(u16::to_le_bytes).collect();
        disk.write_bytes(&mut pos, &bytes)
    }

    /// Re-point the `next` pointer, in memory and on disk.
    pub fn set_next(&mut self, disk: &dyn DiskAccess, next: u64) -> Result<()> {
        self.next = next;
        disk.write_all_at(
            self.self_address.0 + ENTRY_NEXT_OFFSET,
            &next.to_le_bytes(),
        )
    }

    fn set_next_in_memory(&mut self, next: u64) {
        self.next = next;
    }

    fn relocate(&mut self, address: Address) {
        self.self_address = address;
    }

    /// Mark deleted, in memory and on disk.
    pub fn mark_deleted(&mut self, disk: &dyn DiskAccess) -> Result<()> {
        self.flags |= ENTRY_FLAG_DELETED;
        disk.write_all_at(self.self_address.0, &[self.flags])
    }

    /// Whether a name of `units` code units fits this (deleted) slot.
    #[must_use]
    pub fn can_resurrect(&self, units: u8) -> bool {
        self.is_deleted() && Self::encoded_size(units) <= self.size_bytes
    }

    /// Reuse the slot for a new entry. The slot size and the chain
    /// position stay as they are.
    pub fn resurrect(
        &mut self,
        disk: &dyn DiskAccess,
        name: &str,
        units: u8,
        is_directory: bool,
        target: Address,
    ) -> Result<()> {
        if !self.can_resurrect(units) {
            return Err(VfsError::corruption(
                self.self_address.0,
                "resurrection into a live or undersized slot",
            ));
        }
        self.flags = if is_directory { ENTRY_FLAG_DIRECTORY } else { 0 };
        self.target = target;
        self.name = name.to_owned();
        self.name_units = units;
        self.save(disk)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn target(&self) -> Address {
        self.target
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.flags & ENTRY_FLAG_DELETED != 0
    }

    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.flags & ENTRY_FLAG_DIRECTORY != 0
    }

    #[must_use]
    pub fn self_address(&self) -> Address {
        self.self_address
    }

    #[must_use]
    pub fn size_bytes(&self) -> u32 {
        self.size_bytes
    }

    fn is_dot(&self) -> bool {
        self.name == "." || self.name == ".."
    }
}

/// A directory node. Entry state lives behind the node's lock.
pub struct DirectoryNode {
    address: Address,
    state: NodeLock<DirState>,
}

impl DirectoryNode {
    /// Create a fresh directory on disk: `.` pointing at itself and,
    /// under a parent, `..` pointing at the parent.
    pub fn create_new(
        disk: &dyn DiskAccess,
        alloc: &dyn BlockAllocator,
        address: Address,
        blocks_start: Address,
        parent: Option<Address>,
        now: Ticks,
    ) -> Result<Arc<Self>> {
        let mut state = DirState {
            address,
            size: 0,
            created: now,
            modified: now,
            storage: BlockAddressStorage::new_empty(address, blocks_start),
            entries: Vec::new(),
            inserts_since_compact: 0,
        };
        state.storage.add_blocks(disk, alloc, 1)?;
        let block0 = state.storage.block_address(disk, 0)?;

        let mut dot = DirectoryEntry::new(".", 1, true, address, block0);
        if let Some(parent_address) = parent {
            let dotdot_at = Address(block0.0 + u64::from(dot.size_bytes()));
            let dotdot = DirectoryEntry::new("..", 2, true, parent_address, dotdot_at);
            dot.set_next_in_memory(dotdot_at.0);
            dot.save(disk)?;
            dotdot.save(disk)?;
            state.entries.push(dot);
            state.entries.push(dotdot);
        } else {
            dot.save(disk)?;
            state.entries.push(dot);
        }
        state.size = state.entries.len() as u64;
        state.save_header(disk)?;

        debug!(target: "cfs::dir", event = "dir_create", node = %address, has_parent = parent.is_some());
        Ok(Arc::new(Self {
            address,
            state: Arc::new(RwLock::new(state)),
        }))
    }

    /// Rehydrate a directory from its header, walking the entry chain
    /// from the start of block 0.
    pub fn from_header(
        disk: &dyn DiskAccess,
        address: Address,
        header: NodeHeader,
    ) -> Result<Arc<Self>> {
        let mut entries = Vec::new();
        if header.size > 0 {
            if header.storage.num_blocks() == 0 {
                return Err(VfsError::corruption(
                    address.0,
                    "directory with entries but no data blocks",
                ));
            }
            let mut at = header.storage.block_address(disk, 0)?;
            loop {
                let entry = DirectoryEntry::load(disk, at)?;
                let next = entry.next;
                entries.push(entry);
                if entries.len() as u64 == header.size {
                    if next != 0 {
                        return Err(VfsError::corruption(
                            address.0,
                            "entry chain longer than the recorded size",
                        ));
                    }
                    break;
                }
                if next == 0 {
                    return Err(VfsError::corruption(
                        address.0,
                        "entry chain shorter than the recorded size",
                    ));
                }
                at = Address(next);
            }
        }
        Ok(Arc::new(Self {
            address,
            state: Arc::new(RwLock::new(DirState {
                address,
                size: header.size,
                created: header.created,
                modified: header.modified,
                storage: header.storage,
                entries,
                inserts_since_compact: 0,
            })),
        }))
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    #[must_use]
    pub fn state(&self) -> &NodeLock<DirState> {
        &self.state
    }
}

/// Mutable directory state; guarded by the node lock.
pub struct DirState {
    address: Address,
    size: u64,
    created: Ticks,
    modified: Ticks,
    storage: BlockAddressStorage,
    entries: Vec<DirectoryEntry>,
    inserts_since_compact: u32,
}

impl DirState {
    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    /// Total chain length, deleted entries included.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
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

    /// Insert a child entry, resurrecting a deleted slot when one fits,
    /// appending otherwise. Every `DIR_COMPACT_EVERY` insertions the
    /// directory compacts itself.
    pub fn add_child_entry(
        &mut self,
        disk: &dyn DiskAccess,
        alloc: &dyn BlockAllocator,
        name: &str,
        is_directory: bool,
        target: Address,
    ) -> Result<()> {
        let units = validate_entry_name(name)?;
        if self.find_live_entry(name).is_some() {
            return Err(VfsError::AlreadyExists(name.to_owned()));
        }

        let resurrectable = self
            .entries
            .iter()
            .position(|entry| entry.can_resurrect(units));
        if let Some(index) = resurrectable {
            self.entries[index].resurrect(disk, name, units, is_directory, target)?;
            trace!(
                target: "cfs::dir",
                event = "entry_resurrect",
                dir = %self.address,
                name,
                slot = %self.entries[index].self_address()
            );
        } else {
            let needed = DirectoryEntry::encoded_size(units);
            let at = match self.entries.last() {
                Some(last) => {
                    let end_offset =
                        last.self_address().block_offset() + u64::from(last.size_bytes());
                    if end_offset + u64::from(needed) <= BLOCK_SIZE_BYTES {
                        Address(last.self_address().0 + u64::from(last.size_bytes()))
                    } else {
                        let index = self.storage.num_blocks();
                        self.storage.add_blocks(disk, alloc, 1)?;
                        self.storage.block_address(disk, index)?
                    }
                }
                None => {
                    if self.storage.num_blocks() == 0 {
                        self.storage.add_blocks(disk, alloc, 1)?;
                    }
                    self.storage.block_address(disk, 0)?
                }
            };

            let entry = DirectoryEntry::new(name, units, is_directory, target, at);
            entry.save(disk)?;
            if let Some(last) = self.entries.last_mut() {
                last.set_next(disk, at.0)?;
            }
            self.entries.push(entry);
            self.size += 1;
            trace!(
                target: "cfs::dir",
                event = "entry_append",
                dir = %self.address,
                name,
                slot = %at
            );
        }

        self.modified = Ticks::now();
        self.save_header(disk)?;

        self.inserts_since_compact += 1;
        if self.inserts_since_compact >= DIR_COMPACT_EVERY {
            self.compact(disk, alloc)?;
        }
        Ok(())
    }

    /// Case-insensitive lookup among live entries.
    #[must_use]
    pub fn find_live_entry(&self, name: &str) -> Option<&DirectoryEntry> {
        self.entries
            .iter()
            .find(|entry| !entry.is_deleted() && names_equal(entry.name(), name))
    }

    /// Remove the live entry with this name. Returns the target node
    /// address, or `None` when the name is missing or the kind differs.
    pub fn find_and_remove(
        &mut self,
        disk: &dyn DiskAccess,
        name: &str,
        want_directory: bool,
    ) -> Result<Option<Address>> {
        let Some(index) = self
            .entries
            .iter()
            .position(|entry| !entry.is_deleted() && names_equal(entry.name(), name))
        else {
            return Ok(None);
        };
        if self.entries[index].is_directory() != want_directory {
            return Ok(None);
        }
        self.entries[index].mark_deleted(disk)?;
        let target = self.entries[index].target();
        self.modified = Ticks::now();
        self.save_header(disk)?;
        trace!(target: "cfs::dir", event = "entry_remove", dir = %self.address, name);
        Ok(Some(target))
    }

    /// Live entries excluding `.` and `..`.
    pub fn live_children(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.entries
            .iter()
            .filter(|entry| !entry.is_deleted() && !entry.is_dot())
    }

    #[must_use]
    pub fn has_live_children(&self) -> bool {
        self.live_children().next().is_some()
    }

    #[must_use]
    pub fn child_directory_names(&self) -> Vec<String> {
        self.live_children()
            .filter(|entry| entry.is_directory())
            .map(|entry| entry.name().to_owned())
            .collect()
    }

    /// Compaction: re-lay live entries block by block with no gaps,
    /// re-link the chain, free trailing blocks, reset the size to the
    /// live count.
    pub fn compact(&mut self, disk: &dyn DiskAccess, alloc: &dyn BlockAllocator) -> Result<()> {
        let before = self.entries.len();
        let mut live: Vec<DirectoryEntry> = std::mem::take(&mut self.entries)
            .into_iter()
            .filter(|entry| !entry.is_deleted())
            .collect();

        let mut block_index = 0_u32;
        let mut offset = 0_u64;
        for entry in &mut live {
            if offset + u64::from(entry.size_bytes()) > BLOCK_SIZE_BYTES {
                block_index += 1;
                offset = 0;
            }
            let base = self.storage.block_address(disk, block_index)?;
            entry.relocate(Address(base.0 + offset));
            offset += u64::from(entry.size_bytes());
        }
        for index in 0..live.len() {
            let next = live.get(index + 1).map_or(0, |e| e.self_address().0);
            live[index].set_next_in_memory(next);
        }

        let needed = if live.is_empty() { 0 } else { block_index + 1 };
        let current = self.storage.num_blocks();
        if current > needed {
            self.storage
                .free_last_blocks(disk, alloc, current - needed)?;
        }

        for entry in &live {
            entry.save(disk)?;
        }
        debug!(
            target: "cfs::dir",
            event = "dir_compact",
            dir = %self.address,
            before,
            after = live.len()
        );
        self.size = live.len() as u64;
        self.entries = live;
        self.inserts_since_compact = 0;
        self.save_header(disk)
    }

    /// Persist the 128-byte header.
    pub fn save_header(&self, disk: &dyn DiskAccess) -> Result<()> {
        save_header(
            disk,
            NodeKind::Directory,
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
    use crate::node::load_header;
    use cfs_disk::MemDisk;

    const DIR_ADDR: Address = Address(128);
    const PARENT_ADDR: Address = Address(256);

    fn fixture() -> (MemDisk, SequentialAllocator) {
        (MemDisk::new(64 * 4096), SequentialAllocator::new())
    }

    fn reload(disk: &MemDisk) -> Arc<DirectoryNode> {
        let header = load_header(disk, DIR_ADDR, Address(0)).unwrap();
        assert_eq!(header.kind, NodeKind::Directory);
        DirectoryNode::from_header(disk, DIR_ADDR, header).unwrap()
    }

    #[test]
    fn root_has_only_dot() {
        let (disk, alloc) = fixture();
        let dir =
            DirectoryNode::create_new(&disk, &alloc, DIR_ADDR, Address(0), None, Ticks(1)).unwrap();
        let state = dir.state().read();
        assert_eq!(state.entry_count(), 1);
        let dot = state.find_live_entry(".").unwrap();
        assert!(dot.is_directory());
        assert_eq!(dot.target(), DIR_ADDR);
    }

    #[test]
    fn child_has_dot_and_dotdot() {
        let (disk, alloc) = fixture();
        let dir = DirectoryNode::create_new(
            &disk,
            &alloc,
            DIR_ADDR,
            Address(0),
            Some(PARENT_ADDR),
            Ticks(1),
        )
        .unwrap();
        let state = dir.state().read();
        assert_eq!(state.entry_count(), 2);
        assert_eq!(state.find_live_entry("..").unwrap().target(), PARENT_ADDR);
        assert!(!state.has_live_children());
    }

    #[test]
    fn add_find_remove_case_insensitive() {
        let (disk, alloc) = fixture();
        let dir =
            DirectoryNode::create_new(&disk, &alloc, DIR_ADDR, Address(0), None, Ticks(1)).unwrap();
        let mut state = dir.state().write();

        state
            .add_child_entry(&disk, &alloc, "Notes.txt", false, Address(512))
            .unwrap();
        assert!(state.find_live_entry("notes.TXT").is_some());
        assert!(matches!(
            state.add_child_entry(&disk, &alloc, "NOTES.txt", false, Address(640)),
            Err(VfsError::AlreadyExists(_))
        ));

        // Kind mismatch leaves the entry alone.
        assert_eq!(
            state.find_and_remove(&disk, "notes.txt", true).unwrap(),
            None
        );
        assert_eq!(
            state.find_and_remove(&disk, "notes.txt", false).unwrap(),
            Some(Address(512))
        );
        assert!(state.find_live_entry("notes.txt").is_none());
        // Chain still counts the deleted slot.
        assert_eq!(state.entry_count(), 2);
    }

    #[test]
    fn name_validation() {
        assert!(validate_entry_name("ok name.txt").is_ok());
        assert!(validate_entry_name("").is_err());
        assert!(validate_entry_name("a/b").is_err());
        assert!(validate_entry_name("a*b").is_err());
        assert!(validate_entry_name("tab\there").is_err());
        let long: String = "x".repeat(256);
        assert!(validate_entry_name(&long).is_err());
        assert_eq!(validate_entry_name(&"x".repeat(255)).unwrap(), 255);
    }

    #[test]
    fn deleted_slot_is_resurrected_when_name_fits() {
        let (disk, alloc) = fixture();
        let dir =
            DirectoryNode::create_new(&disk, &alloc, DIR_ADDR, Address(0), None, Ticks(1)).unwrap();
        let mut state = dir.state().write();

        state
            .add_child_entry(&disk, &alloc, "longish-name.dat", false, Address(512))
            .unwrap();
        let slot = state.find_live_entry("longish-name.dat").unwrap().self_address();
        state
            .find_and_remove(&disk, "longish-name.dat", false)
            .unwrap()
            .unwrap();

        // A shorter name reuses the same slot; the chain does not grow.
        let count_before = state.entry_count();
        state
            .add_child_entry(&disk, &alloc, "tiny", false, Address(640))
            .unwrap();
        let entry = state.find_live_entry("tiny").unwrap();
        assert_eq!(entry.self_address(), slot);
        assert_eq!(state.entry_count(), count_before);
    }

    #[test]
    fn oversized_name_appends_instead_of_resurrecting() {
        let (disk, alloc) = fixture();
        let dir =
            DirectoryNode::create_new(&disk, &alloc, DIR_ADDR, Address(0), None, Ticks(1)).unwrap();
        let mut state = dir.state().write();

        state
            .add_child_entry(&disk, &alloc, "abc", false, Address(512))
            .unwrap();
        let slot = state.find_live_entry("abc").unwrap().self_address();
        state.find_and_remove(&disk, "abc", false).unwrap().unwrap();

        state
            .add_child_entry(&disk, &alloc, "much-longer-name", false, Address(640))
            .unwrap();
        let entry = state.find_live_entry("much-longer-name").unwrap();
        assert_ne!(entry.self_address(), slot);
        assert_eq!(state.entry_count(), 3);
    }

    #[test]
    fn entries_never_cross_block_boundaries() {
        let (disk, alloc) = fixture();
        let dir =
            DirectoryNode::create_new(&disk, &alloc, DIR_ADDR, Address(0), None, Ticks(1)).unwrap();
        let mut state = dir.state().write();

        // 100-unit names produce 220-byte slots; 18 fit in the first
        // block alongside the 20-byte `.` entry.
        for i in 0..20 {
            let name = format!("{i:0>100}");
            state
                .add_child_entry(&disk, &alloc, &name, false, Address(512))
                .unwrap();
        }
        for entry in &state.entries {
            let start = entry.self_address().block_offset();
            assert!(start + u64::from(entry.size_bytes()) <= BLOCK_SIZE_BYTES);
        }
        assert!(state.storage.num_blocks() >= 2);
    }

    #[test]
    fn chain_survives_reload() {
        let (disk, alloc) = fixture();
        {
            let dir =
                DirectoryNode::create_new(&disk, &alloc, DIR_ADDR, Address(0), None, Ticks(1))
                    .unwrap();
            let mut state = dir.state().write();
            for name in ["alpha", "beta", "gamma"] {
                state
                    .add_child_entry(&disk, &alloc, name, false, Address(512))
                    .unwrap();
            }
            state.find_and_remove(&disk, "beta", false).unwrap().unwrap();
        }

        let dir = reload(&disk);
        let state = dir.state().read();
        assert_eq!(state.entry_count(), 4);
        assert!(state.find_live_entry("alpha").is_some());
        assert!(state.find_live_entry("beta").is_none());
        assert!(state.find_live_entry("gamma").is_some());
        let children: Vec<_> = state.live_children().map(|e| e.name().to_owned()).collect();
        assert_eq!(children, ["alpha", "gamma"]);
    }

    #[test]
    fn compaction_drops_deleted_slots_and_frees_blocks() {
        let (disk, alloc) = fixture();
        let dir =
            DirectoryNode::create_new(&disk, &alloc, DIR_ADDR, Address(0), None, Ticks(1)).unwrap();
        let mut state = dir.state().write();

        for i in 0..30 {
            let name = format!("{i:0>100}");
            state
                .add_child_entry(&disk, &alloc, &name, false, Address(512))
                .unwrap();
        }
        let blocks_before = state.storage.num_blocks();
        for i in 0..29 {
            let name = format!("{i:0>100}");
            state.find_and_remove(&disk, &name, false).unwrap().unwrap();
        }

        state.compact(&disk, &alloc).unwrap();
        assert_eq!(state.entry_count(), 2); // `.` and one survivor
        assert!(state.storage.num_blocks() < blocks_before);

        // The chain is still walkable from disk.
        drop(state);
        let reloaded = reload(&disk);
        let state = reloaded.state().read();
        assert_eq!(state.entry_count(), 2);
        assert!(state.find_live_entry(&format!("{:0>100}", 29)).is_some());
    }

    #[test]
    fn automatic_compaction_after_many_insertions() {
        let (disk, alloc) = fixture();
        let dir =
            DirectoryNode::create_new(&disk, &alloc, DIR_ADDR, Address(0), None, Ticks(1)).unwrap();
        let mut state = dir.state().write();

        for i in 0..DIR_COMPACT_EVERY {
            state
                .add_child_entry(&disk, &alloc, &format!("f{i}"), false, Address(512))
                .unwrap();
        }
        assert_eq!(state.inserts_since_compact, 0);
        assert_eq!(state.entry_count(), u64::from(DIR_COMPACT_EVERY) + 1);
    }
}
