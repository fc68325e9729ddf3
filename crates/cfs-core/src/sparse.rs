//! Sparse writes: placing one byte buffer across a sequence of possibly
//! non-contiguous block addresses.
//!
//! The buffer splits into a head (the remainder of the first block from
//! the starting offset), zero or more whole-block body ranges, and a
//! tail shorter than a block.

use cfs_disk::DiskAccess;
use cfs_error::{Result, VfsError};
use cfs_types::{Address, BLOCK_SIZE_BYTES};

const BLOCK: usize = BLOCK_SIZE_BYTES as usize;

/// Number of block addresses needed to place `len` bytes starting at
/// `offset_in_first` within the first block.
#[must_use]
pub fn blocks_required(len: usize, offset_in_first: usize) -> usize {
    debug_assert!(offset_in_first < BLOCK);
    if len == 0 {
        return 0;
    }
    let head = len.min(BLOCK - offset_in_first);
    if head == len {
        return 1;
    }
    let rest = len - head;
    1 + rest / BLOCK + usize::from(rest % BLOCK > 0)
}

/// Write `data` across `blocks`, starting `offset_in_first` bytes into
/// the first block. `blocks` must cover exactly the write range.
pub fn write_sparse(
    disk: &dyn DiskAccess,
    data: &[u8],
    blocks: &[Address],
    offset_in_first: usize,
) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    if blocks.len() != blocks_required(data.len(), offset_in_first) {
        return Err(VfsError::corruption(
            blocks.first().map_or(0, |a| a.0),
            format!(
                "sparse write block list mismatch: got {} blocks for {} bytes at offset {}",
                blocks.len(),
                data.len(),
                offset_in_first
            ),
        ));
    }

    let head = data.len().min(BLOCK - offset_in_first);
    disk.write_all_at(blocks[0].0 + offset_in_first as u64, &data[..head])?;

    let mut written = head;
    for block in &blocks[1..] {
        let chunk = (data.len() - written).min(BLOCK);
        disk.write_all_at(block.0, &data[written..written + chunk])?;
        written += chunk;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfs_disk::MemDisk;

    #[test]
    fn counts_head_only() {
        assert_eq!(blocks_required(0, 0), 0);
        assert_eq!(blocks_required(1, 0), 1);
        assert_eq!(blocks_required(4096, 0), 1);
        assert_eq!(blocks_required(10, 4000), 1);
        assert_eq!(blocks_required(96, 4000), 1);
    }

    #[test]
    fn counts_body_and_tail() {
        assert_eq!(blocks_required(4097, 0), 2);
        assert_eq!(blocks_required(8192, 0), 2);
        assert_eq!(blocks_required(8193, 0), 3);
        assert_eq!(blocks_required(97, 4000), 2);
        assert_eq!(blocks_required(4096 + 97, 4000), 3);
    }

    #[test]
    fn writes_across_non_contiguous_blocks() {
        let disk = MemDisk::new(16 * 4096);
        // Blocks deliberately out of order and scattered.
        let blocks = [Address(3 * 4096), Address(4096), Address(9 * 4096)];
        let data: Vec<u8> = (0..(100 + 4096 + 50)).map(|i| (i % 251) as u8).collect();
        let offset = 4096 - 100;

        write_sparse(&disk, &data, &blocks, offset).unwrap();

        let mut head = vec![0_u8; 100];
        disk.read_exact_at(3 * 4096 + offset as u64, &mut head).unwrap();
        assert_eq!(head, data[..100]);

        let mut body = vec![0_u8; 4096];
        disk.read_exact_at(4096, &mut body).unwrap();
        assert_eq!(body, data[100..100 + 4096]);

        let mut tail = vec![0_u8; 50];
        disk.read_exact_at(9 * 4096, &mut tail).unwrap();
        assert_eq!(tail, data[100 + 4096..]);
    }

    #[test]
    fn rejects_wrong_block_count() {
        let disk = MemDisk::new(4 * 4096);
        let err = write_sparse(&disk, &[0_u8; 10], &[Address(0), Address(4096)], 0);
        assert!(err.is_err());
    }
}
