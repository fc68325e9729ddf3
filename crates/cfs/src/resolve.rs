//! Path resolution with hand-over-hand read locks.
//!
//! The walk read-locks the root, then each directory along the path,
//! pushing the guards onto a stack; a missing entry resolves to "no
//! node" and a child whose lock cannot be taken within the bounded
//! window aborts the whole walk. When the caller wants the target for
//! writing, the target's read lock is released and re-acquired as a
//! write lock. Ancestor guards are released on every exit path when the
//! stack drops.

use crate::path::VirtualPath;
use cfs_core::{
    lock_read, lock_write, DirState, DirectoryNode, FileNode, FileState, MasterRecord,
    NodeReadGuard, NodeWriteGuard,
};
use cfs_error::{Result, VfsError};
use std::sync::Arc;
use tracing::trace;

/// A resolved target, still holding its node lock.
pub(crate) enum Resolved {
    DirRead {
        node: Arc<DirectoryNode>,
        guard: NodeReadGuard<DirState>,
    },
    DirWrite {
        node: Arc<DirectoryNode>,
        guard: NodeWriteGuard<DirState>,
    },
    FileRead {
        node: Arc<FileNode>,
        guard: NodeReadGuard<FileState>,
    },
    FileWrite {
        node: Arc<FileNode>,
        guard: NodeWriteGuard<FileState>,
    },
}

pub(crate) fn wrong_kind(expected: &'static str, actual: &'static str, path: &str) -> VfsError {
    VfsError::WrongKind {
        expected,
        actual,
        path: path.to_owned(),
    }
}

/// Walk `path` from the root. `exclude_last` stops at the parent of the
/// final segment; `write_target` upgrades the target's lock to a write
/// lock. `Ok(None)` means some segment was missing.
pub(crate) fn resolve(
    master: &MasterRecord,
    path: &VirtualPath,
    exclude_last: bool,
    write_target: bool,
) -> Result<Option<Resolved>> {
    let root = master.root_directory()?;
    let mut ancestors: Vec<(Arc<DirectoryNode>, NodeReadGuard<DirState>)> = Vec::new();
    let mut current_node = root;
    let mut current_guard = lock_read(current_node.state())?;

    let segments = if exclude_last {
        path.parent_segments()
    } else {
        path.segments()
    };
    let (intermediate, last): (&[String], Option<&str>) = match segments.split_last() {
        Some((last, rest)) => (rest, Some(last.as_str())),
        None => (&[], None),
    };

    for segment in intermediate {
        let hit = current_guard
            .find_live_entry(segment)
            .map(|entry| (entry.target(), entry.is_directory()));
        match hit {
            None => return Ok(None),
            Some((_, false)) => {
                return Err(wrong_kind("directory", "file", &path.full_path()));
            }
            Some((target, true)) => {
                let child = master.get_directory_node(target)?;
                let guard = lock_read(child.state())?;
                ancestors.push((current_node, current_guard));
                current_node = child;
                current_guard = guard;
            }
        }
    }

    let resolved = match last {
        // The target is the current directory itself: the root, or the
        // parent when the final segment is excluded.
        None => {
            if write_target {
                let node = current_node;
                drop(current_guard);
                let guard = lock_write(node.state())?;
                Resolved::DirWrite { node, guard }
            } else {
                Resolved::DirRead {
                    node: current_node,
                    guard: current_guard,
                }
            }
        }
        Some(name) => {
            let hit = current_guard
                .find_live_entry(name)
                .map(|entry| (entry.target(), entry.is_directory()));
            let Some((target, is_directory)) = hit else {
                return Ok(None);
            };
            if is_directory {
                let child = master.get_directory_node(target)?;
                let read = lock_read(child.state())?;
                if write_target {
                    drop(read);
                    let guard = lock_write(child.state())?;
                    Resolved::DirWrite { node: child, guard }
                } else {
                    Resolved::DirRead {
                        node: child,
                        guard: read,
                    }
                }
            } else {
                let child = master.get_file_node(target)?;
                let read = lock_read(child.state())?;
                if write_target {
                    drop(read);
                    let guard = lock_write(child.state())?;
                    Resolved::FileWrite { node: child, guard }
                } else {
                    Resolved::FileRead {
                        node: child,
                        guard: read,
                    }
                }
            }
        }
    };

    trace!(
        target: "cfs::facade",
        event = "resolve",
        path = %path.full_path(),
        exclude_last,
        write_target,
        depth = ancestors.len()
    );
    drop(ancestors);
    Ok(Some(resolved))
}
