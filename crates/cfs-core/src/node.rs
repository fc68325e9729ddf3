//! Node headers and the per-node locking discipline.
//!
//! Every file or directory is a 128-byte header in some group's node
//! table: a kind flag, a size (bytes for files, entry count for
//! directories), two tick timestamps and the block-address record.
//!
//! Nodes are guarded by reader/writer locks with a fixed bounded
//! acquisition window; the owned (`Arc`) guard flavour is what lets an
//! open file handle carry its lock until close.

use crate::baddr::BlockAddressStorage;
use cfs_disk::DiskAccess;
use cfs_error::{Result, VfsError};
use cfs_types::{read_le_i64, read_le_u64, Address, Ticks, NODE_LOCK_TIMEOUT, NODE_SIZE_BYTES};
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};
use std::fmt;
use std::sync::Arc;

/// What a node is. Load paths learn the kind from the directory entry
/// that led them there; the header flag lets loads assert it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

impl NodeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared handle to a node's lockable state.
pub type NodeLock<T> = Arc<RwLock<T>>;
/// Owned read guard, held across calls (e.g. by a file handle).
pub type NodeReadGuard<T> = ArcRwLockReadGuard<RawRwLock, T>;
/// Owned write guard.
pub type NodeWriteGuard<T> = ArcRwLockWriteGuard<RawRwLock, T>;

/// Acquire a read lock within the fixed window, `LockTimeout` otherwise.
pub fn lock_read<T>(lock: &NodeLock<T>) -> Result<NodeReadGuard<T>> {
    lock.try_read_arc_for(NODE_LOCK_TIMEOUT)
        .ok_or(VfsError::LockTimeout)
}

/// Acquire a write lock within the fixed window, `LockTimeout` otherwise.
pub fn lock_write<T>(lock: &NodeLock<T>) -> Result<NodeWriteGuard<T>> {
    lock.try_write_arc_for(NODE_LOCK_TIMEOUT)
        .ok_or(VfsError::LockTimeout)
}

/// Decoded 128-byte node header.
#[derive(Debug, Clone)]
pub struct NodeHeader {
    pub kind: NodeKind,
    pub size: u64,
    pub created: Ticks,
    pub modified: Ticks,
    pub storage: BlockAddressStorage,
}

/// Read and decode the header at `address`.
pub fn load_header(
    disk: &dyn DiskAccess,
    address: Address,
    blocks_start: Address,
) -> Result<NodeHeader> {
    let mut buf = [0_u8; NODE_SIZE_BYTES as usize];
    disk.read_exact_at(address.0, &mut buf)?;

    let kind = match buf[0] {
        0 => NodeKind::File,
        1 => NodeKind::Directory,
        other => {
            return Err(VfsError::corruption(
                address.0,
                format!("invalid node kind flag {other}"),
            ));
        }
    };
    let corrupt = |e: cfs_types::ParseError| VfsError::corruption(address.0, e.to_string());
    Ok(NodeHeader {
        kind,
        size: read_le_u64(&buf, 1).map_err(corrupt)?,
        created: Ticks(read_le_i64(&buf, 9).map_err(corrupt)?),
        modified: Ticks(read_le_i64(&buf, 17).map_err(corrupt)?),
        storage: BlockAddressStorage::parse(address, blocks_start, &buf)?,
    })
}

/// Encode and persist a full node header.
pub fn save_header(
    disk: &dyn DiskAccess,
    kind: NodeKind,
    size: u64,
    created: Ticks,
    modified: Ticks,
    storage: &BlockAddressStorage,
) -> Result<()> {
    let mut buf = [0_u8; NODE_SIZE_BYTES as usize];
    buf[0] = match kind {
        NodeKind::File => 0,
        NodeKind::Directory => 1,
    };
    buf[1..9].copy_from_slice(&size.to_le_bytes());
    buf[9..17].copy_from_slice(&created.0.to_le_bytes());
    buf[17..25].copy_from_slice(&modified.0.to_le_bytes());
    storage.write_into(&mut buf);
    disk.write_all_at(storage.node_address().0, &buf)
}
