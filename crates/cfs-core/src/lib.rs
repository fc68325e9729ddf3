#![forbid(unsafe_code)]
//! CapsuleFS storage engine.
//!
//! The on-disk core: allocation bitmaps, block groups, the node table,
//! direct/indirect/double-indirect block addressing, directory entry
//! chains with in-place resurrection, file payload I/O, and the master
//! record with its volume-wide allocator and live-node cache.
//!
//! Path resolution and the public file-system facade live in the `cfs`
//! crate; this crate deals in nodes and blocks.

pub mod baddr;
pub mod bitmap;
pub mod dir;
pub mod file;
pub mod group;
pub mod master;
pub mod node;
pub mod sparse;

pub use baddr::{BlockAddressStorage, BlockAllocator};
pub use bitmap::DataBitmap;
pub use dir::{validate_entry_name, DirState, DirectoryEntry, DirectoryNode};
pub use file::{FileNode, FileState};
pub use group::{BlockGroup, BlockGroupDescriptor};
pub use master::{CachedNode, MasterRecord, VolumeStats};
pub use node::{
    lock_read, lock_write, load_header, save_header, NodeHeader, NodeKind, NodeLock,
    NodeReadGuard, NodeWriteGuard,
};
