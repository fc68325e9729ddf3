#![forbid(unsafe_code)]
//! Core types and format constants for CapsuleFS.
//!
//! Everything here is fixed by the on-disk format; changing any constant
//! is a format break.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

// ── Format constants ────────────────────────────────────────────────────────

/// Allocation unit of a volume.
pub const BLOCK_SIZE_BYTES: u64 = 4096;
/// On-disk node header size.
pub const NODE_SIZE_BYTES: u64 = 128;
/// Bytes of volume per node slot.
pub const NODE_RATIO: u64 = 8192;
/// Blocks covered by one group (one block of bitmap, 8 bits per byte).
pub const BLOCKS_PER_GROUP: u32 = 8 * BLOCK_SIZE_BYTES as u32;
/// Node slots per group.
pub const NODES_PER_GROUP: u32 = 2048;
/// Node slots per block of the node table.
pub const NODES_PER_BLOCK: u32 = (BLOCK_SIZE_BYTES / NODE_SIZE_BYTES) as u32;
/// Blocks of node table per group.
pub const BLOCKS_FOR_NODE_TABLE: u32 = NODES_PER_GROUP / NODES_PER_BLOCK;
/// Bytes of node bitmap persisted per group.
pub const NODE_BITMAP_BYTES: u32 = NODES_PER_GROUP / 8;
/// Blocks occupied by the node bitmap.
pub const NODE_BITMAP_BLOCKS: u32 = 1;
/// Reserved prefix of every group: block bitmap, node bitmap, node table.
pub const RESERVED_BLOCKS: u32 = 1 + NODE_BITMAP_BLOCKS + BLOCKS_FOR_NODE_TABLE;
/// Span of a full group in bytes.
pub const GROUP_SIZE_BYTES: u64 = BLOCKS_PER_GROUP as u64 * BLOCK_SIZE_BYTES;

/// Direct block pointers in a node header.
pub const DIRECT_BLOCKS: u32 = 12;
/// 32-bit block indices per pointer block.
pub const POINTERS_PER_BLOCK: u32 = (BLOCK_SIZE_BYTES / 4) as u32;
/// Maximum data blocks addressable by one node.
pub const MAX_FILE_BLOCKS: u64 = DIRECT_BLOCKS as u64
    + POINTERS_PER_BLOCK as u64
    + POINTERS_PER_BLOCK as u64 * POINTERS_PER_BLOCK as u64;

/// Offset of the block-address record inside the node header.
pub const NODE_STORAGE_OFFSET: u64 = 25;
/// Master record header bytes before the descriptor table.
pub const MASTER_HEADER_BYTES: u64 = 32;
/// On-disk size of one group descriptor.
pub const GROUP_DESCRIPTOR_BYTES: u64 = 16;

/// Buffer size for bulk copy streaming.
pub const COPY_BUFFER_BYTES: usize = 40_960;
/// Bounded acquisition window for per-node reader/writer locks.
pub const NODE_LOCK_TIMEOUT: Duration = Duration::from_millis(1000);
/// Maximum directory entry name length in UTF-16 code units.
pub const MAX_NAME_UTF16: usize = 255;
/// Directory insertions between automatic compactions.
pub const DIR_COMPACT_EVERY: u32 = 100;

// ── Address ─────────────────────────────────────────────────────────────────

/// Absolute byte offset into a volume.
///
/// Unit-carrying wrapper so byte offsets and block indices cannot be mixed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Address(pub u64);

impl Address {
    pub const ZERO: Self = Self(0);

    /// Add a byte count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, bytes: u64) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }

    /// Subtract a byte count, returning `None` on underflow.
    #[must_use]
    pub fn checked_sub(self, bytes: u64) -> Option<Self> {
        self.0.checked_sub(bytes).map(Self)
    }

    /// Advance by `n` whole blocks.
    #[must_use]
    pub fn add_blocks(self, n: u64) -> Option<Self> {
        n.checked_mul(BLOCK_SIZE_BYTES)
            .and_then(|bytes| self.checked_add(bytes))
    }

    /// Round up to the next block boundary.
    #[must_use]
    pub fn align_up_to_block(self) -> Option<Self> {
        let mask = BLOCK_SIZE_BYTES - 1;
        self.0.checked_add(mask).map(|v| Self(v & !mask))
    }

    /// Offset of this address within its block.
    #[must_use]
    pub fn block_offset(self) -> u64 {
        self.0 % BLOCK_SIZE_BYTES
    }

    /// Whether the address sits exactly on a block boundary.
    #[must_use]
    pub fn is_block_aligned(self) -> bool {
        self.block_offset() == 0
    }

    /// Whether this address lies in `[start, start + size)`.
    #[must_use]
    pub fn in_range(self, start: Self, size: u64) -> bool {
        self >= start && start.checked_add(size).is_some_and(|end| self < end)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// ── Timestamps ──────────────────────────────────────────────────────────────

/// Signed 100-nanosecond intervals since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Ticks(pub i64);

impl Ticks {
    /// Current wall-clock time. Times before the epoch clamp to zero.
    #[must_use]
    #[expect(clippy::cast_possible_truncation)] // 100ns ticks overflow i64 in year ~31k
    pub fn now() -> Self {
        let ticks = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| (d.as_nanos() / 100) as i64);
        Self(ticks)
    }

    /// Convert to wall-clock time. Negative ticks clamp to the epoch.
    #[must_use]
    #[expect(clippy::cast_sign_loss)]
    pub fn to_system_time(self) -> SystemTime {
        if self.0 <= 0 {
            return UNIX_EPOCH;
        }
        UNIX_EPOCH + Duration::from_nanos(self.0 as u64 * 100)
    }
}

impl fmt::Display for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Volume geometry ─────────────────────────────────────────────────────────

/// Derived geometry of one volume: where the block-index space begins and
/// how addresses map onto groups.
///
/// `blocks_start` is the address of group 0's bitmaps — the first block
/// boundary at or past the end of the master record. All 32-bit block
/// indices are relative to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeLayout {
    pub volume_size: u64,
    pub blocks_start: Address,
}

impl VolumeLayout {
    /// Geometry for a volume whose master record holds `group_count`
    /// descriptors. Returns `None` when the header cannot fit the volume.
    #[must_use]
    pub fn for_group_count(volume_size: u64, group_count: u64) -> Option<Self> {
        let header_bytes =
            MASTER_HEADER_BYTES.checked_add(group_count.checked_mul(GROUP_DESCRIPTOR_BYTES)?)?;
        let blocks_start = Address(header_bytes).align_up_to_block()?;
        if blocks_start.0 >= volume_size {
            return None;
        }
        Some(Self {
            volume_size,
            blocks_start,
        })
    }

    /// Address of the block with the given global index.
    #[must_use]
    pub fn index_to_address(&self, index: u32) -> Address {
        Address(self.blocks_start.0 + u64::from(index) * BLOCK_SIZE_BYTES)
    }

    /// Global block index of a block-aligned address, `None` when the
    /// address is below the index space or misaligned.
    #[must_use]
    #[expect(clippy::cast_possible_truncation)] // index space is 32-bit by format
    pub fn address_to_index(&self, addr: Address) -> Option<u32> {
        let rel = addr.0.checked_sub(self.blocks_start.0)?;
        if rel % BLOCK_SIZE_BYTES != 0 {
            return None;
        }
        let index = rel / BLOCK_SIZE_BYTES;
        (index <= u64::from(u32::MAX)).then_some(index as u32)
    }

    /// Group that owns an address inside the block-index space.
    #[must_use]
    #[expect(clippy::cast_possible_truncation)] // group count is far below u32::MAX
    pub fn owning_group(&self, addr: Address) -> Option<u32> {
        let rel = addr.0.checked_sub(self.blocks_start.0)?;
        Some((rel / GROUP_SIZE_BYTES) as u32)
    }

    /// Start address (the bitmaps address) of group `index`.
    #[must_use]
    pub fn group_start(&self, index: u32) -> Address {
        Address(self.blocks_start.0 + u64::from(index) * GROUP_SIZE_BYTES)
    }

    /// Blocks consumed by the master record.
    #[must_use]
    pub fn master_blocks(&self) -> u64 {
        self.blocks_start.0 / BLOCK_SIZE_BYTES
    }
}

// ── Buffer parsing ──────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

#[inline]
#[expect(clippy::cast_possible_wrap)]
pub fn read_le_i64(data: &[u8], offset: usize) -> Result<i64, ParseError> {
    read_le_u64(data, offset).map(|v| v as i64)
}

// ── Tests ───────────────────────────────────────────────────────────────────
