//! Bulk file operations: copy and move within one volume or across two.
//!
//! Contents stream through a fixed-size buffer; moves compose copy and
//! delete. These operations are NOT transactional: a mid-way failure
//! leaves whatever partial state was already produced at the
//! destination, and the error surfaces to the caller.

use crate::path::VirtualPath;
use crate::volume::Volume;
use cfs_error::{Result, VfsError};
use cfs_types::COPY_BUFFER_BYTES;
use tracing::debug;

/// Copy one file, streaming through the copy buffer.
pub fn copy_file(source: &Volume, src: &str, destination: &Volume, dst: &str) -> Result<()> {
    let mut from = source.open_file(src, false)?;
    let mut to = destination.create_file(dst)?;
    loop {
        let chunk = from.read_data(COPY_BUFFER_BYTES)?;
        if chunk.is_empty() {
            break;
        }
        to.write_data(&chunk)?;
    }
    debug!(target: "cfs::ops", event = "copy_file", src, dst);
    Ok(())
}

/// Recursively copy a directory tree.
pub fn copy_directory(source: &Volume, src: &str, destination: &Volume, dst: &str) -> Result<()> {
    destination.create_directory(dst)?;
    for child in source.find_files(src, "*", false)? {
        let name = VirtualPath::parse(&child)?
            .name()
            .map(str::to_owned)
            .ok_or_else(|| VfsError::InvalidPath(child.clone()))?;
        let target = VirtualPath::combine(dst, &name);
        let info = source.file_info(&child)?;
        if info.is_directory {
            copy_directory(source, &child, destination, &target)?;
        } else {
            copy_file(source, &child, destination, &target)?;
        }
    }
    debug!(target: "cfs::ops", event = "copy_directory", src, dst);
    Ok(())
}

/// Copy, then delete the source file.
pub fn move_file(source: &Volume, src: &str, destination: &Volume, dst: &str) -> Result<()> {
    copy_file(source, src, destination, dst)?;
    source.delete_file(src)
}

/// Copy the tree, then delete the source tree.
pub fn move_directory(source: &Volume, src: &str, destination: &Volume, dst: &str) -> Result<()> {
    copy_directory(source, src, destination, dst)?;
    source.delete_directory(src, true)
}
