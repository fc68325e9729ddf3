#![forbid(unsafe_code)]
//! CapsuleFS: an embeddable, single-file virtual file system.
//!
//! A volume is a byte-addressable container — a host file, an in-memory
//! buffer, or a file inside another CapsuleFS volume — carrying an
//! EXT2-shaped layout: a master record, block groups with allocation
//! bitmaps and a node table, and directory entry chains. This crate is
//! the public face: paths, wildcard search, the `Volume` facade, open
//! file handles, recursive mounts and bulk copy/move.
//!
//! ```no_run
//! use cfs::Volume;
//!
//! # fn main() -> cfs::Result<()> {
//! let volume = Volume::create_on_file("/tmp/demo.cfs", 4096 * 2000)?;
//! volume.create_directory("\\docs")?;
//! let mut file = volume.create_file("\\docs\\hello.txt")?;
//! file.write_data(b"hello")?;
//! file.close();
//! volume.close()?;
//! # Ok(())
//! # }
//! ```

pub mod ops;

mod handle;
mod path;
mod pattern;
mod resolve;
mod volume;

pub use cfs_core::{NodeKind, VolumeStats};
pub use cfs_disk::{DiskAccess, FileDisk, MemDisk};
pub use cfs_error::{Result, VfsError};
pub use cfs_types::{Address, Ticks, BLOCK_SIZE_BYTES, COPY_BUFFER_BYTES};
pub use handle::{FileHandle, HandleDisk, SeekOrigin};
pub use path::{VirtualPath, SEPARATOR};
pub use pattern::SearchPattern;
pub use volume::{FileInfo, FindFiles, Volume};
