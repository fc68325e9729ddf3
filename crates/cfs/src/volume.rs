//! The volume facade: mounting, the public file-system operations, and
//! the lazy `find_files` enumeration.

use crate::handle::{FileHandle, HandleDisk, HandleGuard};
use crate::path::{segments_equal_ignore_case, VirtualPath};
use crate::pattern::SearchPattern;
use crate::resolve::{resolve, wrong_kind, Resolved};
use cfs_core::{lock_write, DirState, DirectoryNode, MasterRecord, NodeWriteGuard, VolumeStats};
use cfs_disk::{DiskAccess, FileDisk, MemDisk};
use cfs_error::{Result, VfsError};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info};

/// Metadata snapshot returned by `Volume::file_info`.
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub exists: bool,
    pub is_directory: bool,
    pub file_size: u64,
    pub created: Option<SystemTime>,
    pub modified: Option<SystemTime>,
}

impl FileInfo {
    fn missing() -> Self {
        Self {
            exists: false,
            is_directory: false,
            file_size: 0,
            created: None,
            modified: None,
        }
    }
}

/// A mounted CapsuleFS volume. Cheap to clone; all clones share the
/// mount. `close` saves everything and is idempotent.
#[derive(Clone)]
pub struct Volume {
    disk: Arc<dyn DiskAccess>,
    master: Arc<MasterRecord>,
}

impl Volume {
    /// Format a fresh volume onto a backing store and mount it.
    pub fn create(disk: Arc<dyn DiskAccess>, size: u64) -> Result<Self> {
        let master = MasterRecord::format(Arc::clone(&disk), size)?;
        Ok(Self { disk, master })
    }

    /// Mount an existing volume.
    pub fn mount(disk: Arc<dyn DiskAccess>) -> Result<Self> {
        let master = MasterRecord::load(Arc::clone(&disk))?;
        Ok(Self { disk, master })
    }

    /// Create a volume inside a fresh host file.
    pub fn create_on_file(path: impl AsRef<Path>, size: u64) -> Result<Self> {
        let disk: Arc<dyn DiskAccess> = Arc::new(FileDisk::create(path, size)?);
        Self::create(disk, size)
    }

    /// Mount a volume from a host file.
    pub fn mount_file(path: impl AsRef<Path>) -> Result<Self> {
        let disk: Arc<dyn DiskAccess> = Arc::new(FileDisk::open(path)?);
        Self::mount(disk)
    }

    /// Create a volume held entirely in memory.
    pub fn create_in_memory(size: u64) -> Result<Self> {
        let disk: Arc<dyn DiskAccess> = Arc::new(MemDisk::new(usize::try_from(size).map_err(
            |_| VfsError::InvalidVolumeSize {
                size,
                reason: "exceeds the address space",
            },
        )?));
        Self::create(disk, size)
    }

    /// Create a volume inside a file of a host volume. The host file
    /// node stays write-locked for the life of the inner mount.
    pub fn create_embedded(host: &Volume, path: &str, size: u64) -> Result<Volume> {
        let mut handle = host.create_file(path)?;
        handle.set_file_size(size)?;
        let disk: Arc<dyn DiskAccess> = Arc::new(HandleDisk::new(handle)?);
        info!(target: "cfs::facade", event = "embedded_create", path, size);
        Self::create(disk, size)
    }

    /// Mount a volume stored in a file of a host volume.
    pub fn mount_embedded(host: &Volume, path: &str) -> Result<Volume> {
        let handle = host.open_file(path, true)?;
        let disk: Arc<dyn DiskAccess> = Arc::new(HandleDisk::new(handle)?);
        info!(target: "cfs::facade", event = "embedded_mount", path);
        Self::mount(disk)
    }

    /// The volume roots this engine exposes.
    #[must_use]
    pub fn drives() -> Vec<String> {
        vec!["\\".to_owned()]
    }

    /// Save every cached node and the master record, then flush.
    /// Idempotent; operations after it fail with `Closed`.
    pub fn close(&self) -> Result<()> {
        self.master.close()
    }

    #[must_use]
    pub fn stats(&self) -> VolumeStats {
        self.master.stats()
    }

    // ── Directory and file operations ───────────────────────────────────

    pub fn create_directory(&self, path: &str) -> Result<()> {
        self.master.ensure_open()?;
        let vp = VirtualPath::parse(path)?;
        let name = vp
            .name()
            .ok_or_else(|| VfsError::InvalidPath("cannot create the root".to_owned()))?;
        let mut parent = self.parent_for_write(&vp)?;
        self.master.create_directory_node(&mut parent, name)?;
        debug!(target: "cfs::facade", event = "create_directory", path);
        Ok(())
    }

    /// Create a file and return its write-locked handle. The caller owns
    /// the handle and must close (or drop) it to release the lock.
    pub fn create_file(&self, path: &str) -> Result<FileHandle> {
        self.master.ensure_open()?;
        let vp = VirtualPath::parse(path)?;
        let name = vp
            .name()
            .ok_or_else(|| VfsError::InvalidPath("cannot create the root".to_owned()))?;
        let file = {
            let mut parent = self.parent_for_write(&vp)?;
            self.master.create_file_node(&mut parent, name)?
        };
        let guard = lock_write(file.state())?;
        debug!(target: "cfs::facade", event = "create_file", path);
        Ok(FileHandle::new(
            Arc::clone(&self.disk),
            Arc::clone(&self.master),
            file,
            HandleGuard::Write(guard),
        ))
    }

    /// Open a file for reading, or for writing when `can_write` is set.
    pub fn open_file(&self, path: &str, can_write: bool) -> Result<FileHandle> {
        self.master.ensure_open()?;
        let vp = VirtualPath::parse(path)?;
        let resolved = resolve(&self.master, &vp, false, can_write)?
            .ok_or_else(|| VfsError::NotFound(path.to_owned()))?;
        let (node, guard) = match resolved {
            Resolved::FileRead { node, guard } => (node, HandleGuard::Read(guard)),
            Resolved::FileWrite { node, guard } => (node, HandleGuard::Write(guard)),
            Resolved::DirRead { .. } | Resolved::DirWrite { .. } => {
                return Err(wrong_kind("file", "directory", path));
            }
        };
        debug!(target: "cfs::facade", event = "open_file", path, can_write);
        Ok(FileHandle::new(
            Arc::clone(&self.disk),
            Arc::clone(&self.master),
            node,
            guard,
        ))
    }

    pub fn delete_file(&self, path: &str) -> Result<()> {
        self.master.ensure_open()?;
        let vp = VirtualPath::parse(path)?;
        let name = vp
            .name()
            .ok_or_else(|| VfsError::InvalidPath("cannot delete the root".to_owned()))?;
        let mut parent = self.parent_for_write(&vp)?;

        let hit = parent
            .find_live_entry(name)
            .map(|entry| (entry.target(), entry.is_directory()));
        let Some((target, is_directory)) = hit else {
            return Err(VfsError::NotFound(path.to_owned()));
        };
        if is_directory {
            return Err(wrong_kind("file", "directory", path));
        }

        let file = self.master.get_file_node(target)?;
        let mut state = lock_write(file.state())?;
        parent
            .find_and_remove(self.disk.as_ref(), name, false)?
            .ok_or_else(|| VfsError::NotFound(path.to_owned()))?;
        self.master
            .free_node_and_blocks(file.address(), state.storage_mut())?;
        debug!(target: "cfs::facade", event = "delete_file", path);
        Ok(())
    }

    /// Delete a directory. Without `recursive` the directory must be
    /// empty; with it, the subtree is torn down post-order.
    pub fn delete_directory(&self, path: &str, recursive: bool) -> Result<()> {
        self.master.ensure_open()?;
        let vp = VirtualPath::parse(path)?;
        let name = vp
            .name()
            .ok_or_else(|| VfsError::InvalidPath("cannot delete the root".to_owned()))?;
        let mut parent = self.parent_for_write(&vp)?;

        let hit = parent
            .find_live_entry(name)
            .map(|entry| (entry.target(), entry.is_directory()));
        let Some((target, is_directory)) = hit else {
            return Err(VfsError::NotFound(path.to_owned()));
        };
        if !is_directory {
            return Err(wrong_kind("directory", "file", path));
        }

        let dir = self.master.get_directory_node(target)?;
        let state = lock_write(dir.state())?;
        if !recursive && state.has_live_children() {
            return Err(VfsError::NotEmpty(path.to_owned()));
        }
        parent
            .find_and_remove(self.disk.as_ref(), name, true)?
            .ok_or_else(|| VfsError::NotFound(path.to_owned()))?;
        drop(parent);

        self.destroy_directory(dir, state)?;
        debug!(target: "cfs::facade", event = "delete_directory", path, recursive);
        Ok(())
    }

    fn destroy_directory(
        &self,
        node: Arc<DirectoryNode>,
        mut state: NodeWriteGuard<DirState>,
    ) -> Result<()> {
        let children: Vec<(cfs_types::Address, bool)> = state
            .live_children()
            .map(|entry| (entry.target(), entry.is_directory()))
            .collect();
        for (target, is_directory) in children {
            if is_directory {
                let child = self.master.get_directory_node(target)?;
                let child_state = lock_write(child.state())?;
                self.destroy_directory(child, child_state)?;
            } else {
                let file = self.master.get_file_node(target)?;
                let mut file_state = lock_write(file.state())?;
                self.master
                    .free_node_and_blocks(file.address(), file_state.storage_mut())?;
            }
        }
        self.master
            .free_node_and_blocks(node.address(), state.storage_mut())
    }

    /// Re-point a file entry onto a new name or parent within this
    /// volume. Same source and destination is a no-op; parents are
    /// locked deepest path first.
    pub fn move_file(&self, src: &str, dst: &str) -> Result<()> {
        self.master.ensure_open()?;
        let src_vp = VirtualPath::parse(src)?;
        let dst_vp = VirtualPath::parse(dst)?;
        if src_vp.equals_ignore_case(&dst_vp) {
            return Ok(());
        }
        let src_name = src_vp
            .name()
            .ok_or_else(|| VfsError::InvalidPath("cannot move the root".to_owned()))?;
        let dst_name = dst_vp
            .name()
            .ok_or_else(|| VfsError::InvalidPath("cannot move onto the root".to_owned()))?;

        if segments_equal_ignore_case(src_vp.parent_segments(), dst_vp.parent_segments()) {
            let mut parent = self.parent_for_write(&src_vp)?;
            self.repoint_entry(&mut parent, None, src, src_name, dst, dst_name)?;
        } else {
            // Fixed lock order: deeper parent first, ties broken by name.
            let src_first = match src_vp
                .parent_segments()
                .len()
                .cmp(&dst_vp.parent_segments().len())
            {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Less => false,
                std::cmp::Ordering::Equal => {
                    src_vp.parent_path().to_lowercase() <= dst_vp.parent_path().to_lowercase()
                }
            };
            let (mut src_parent, mut dst_parent) = if src_first {
                let s = self.parent_for_write(&src_vp)?;
                let d = self.parent_for_write(&dst_vp)?;
                (s, d)
            } else {
                let d = self.parent_for_write(&dst_vp)?;
                let s = self.parent_for_write(&src_vp)?;
                (s, d)
            };
            self.repoint_entry(
                &mut src_parent,
                Some(&mut *dst_parent),
                src,
                src_name,
                dst,
                dst_name,
            )?;
        }
        debug!(target: "cfs::facade", event = "move_file", src, dst);
        Ok(())
    }

    fn repoint_entry(
        &self,
        src_parent: &mut DirState,
        dst_parent: Option<&mut DirState>,
        src: &str,
        src_name: &str,
        dst: &str,
        dst_name: &str,
    ) -> Result<()> {
        let hit = src_parent
            .find_live_entry(src_name)
            .map(|entry| (entry.target(), entry.is_directory()));
        let Some((target, is_directory)) = hit else {
            return Err(VfsError::NotFound(src.to_owned()));
        };
        if is_directory {
            return Err(wrong_kind("file", "directory", src));
        }

        let collision = match &dst_parent {
            Some(parent) => parent.find_live_entry(dst_name).is_some(),
            None => src_parent.find_live_entry(dst_name).is_some(),
        };
        if collision {
            return Err(VfsError::AlreadyExists(dst.to_owned()));
        }

        // The source node stays write-locked across the re-point.
        let file = self.master.get_file_node(target)?;
        let _node_guard = lock_write(file.state())?;

        src_parent
            .find_and_remove(self.disk.as_ref(), src_name, false)?
            .ok_or_else(|| VfsError::NotFound(src.to_owned()))?;
        let destination: &mut DirState = match dst_parent {
            Some(parent) => parent,
            None => src_parent,
        };
        destination.add_child_entry(
            self.disk.as_ref(),
            self.master.as_ref(),
            dst_name,
            false,
            target,
        )
    }

    /// Lazily enumerate entries under `path` whose names match the
    /// wildcard pattern. Unreadable subtrees are skipped.
    pub fn find_files(&self, path: &str, pattern: &str, recursive: bool) -> Result<FindFiles> {
        self.master.ensure_open()?;
        let vp = VirtualPath::parse(path)?;
        let pattern = SearchPattern::new(pattern)?;
        match resolve(&self.master, &vp, false, false)? {
            Some(Resolved::DirRead { .. } | Resolved::DirWrite { .. }) => {}
            Some(Resolved::FileRead { .. } | Resolved::FileWrite { .. }) => {
                return Err(wrong_kind("directory", "file", path));
            }
            None => return Err(VfsError::NotFound(path.to_owned())),
        }
        let mut pending_dirs = VecDeque::new();
        pending_dirs.push_back(vp.full_path());
        Ok(FindFiles {
            master: Arc::clone(&self.master),
            pattern,
            recursive,
            pending_dirs,
            results: VecDeque::new(),
        })
    }

    /// Metadata for a path; a missing target reports `exists = false`.
    pub fn file_info(&self, path: &str) -> Result<FileInfo> {
        self.master.ensure_open()?;
        let vp = VirtualPath::parse(path)?;
        let info = match resolve(&self.master, &vp, false, false)? {
            None => FileInfo::missing(),
            Some(Resolved::DirRead { guard, .. }) => FileInfo {
                exists: true,
                is_directory: true,
                file_size: 0,
                created: Some(guard.created().to_system_time()),
                modified: Some(guard.modified().to_system_time()),
            },
            Some(Resolved::DirWrite { guard, .. }) => FileInfo {
                exists: true,
                is_directory: true,
                file_size: 0,
                created: Some(guard.created().to_system_time()),
                modified: Some(guard.modified().to_system_time()),
            },
            Some(Resolved::FileRead { guard, .. }) => FileInfo {
                exists: true,
                is_directory: false,
                file_size: guard.size(),
                created: Some(guard.created().to_system_time()),
                modified: Some(guard.modified().to_system_time()),
            },
            Some(Resolved::FileWrite { guard, .. }) => FileInfo {
                exists: true,
                is_directory: false,
                file_size: guard.size(),
                created: Some(guard.created().to_system_time()),
                modified: Some(guard.modified().to_system_time()),
            },
        };
        Ok(info)
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    /// Write-lock the parent directory of `path`.
    fn parent_for_write(&self, path: &VirtualPath) -> Result<NodeWriteGuard<DirState>> {
        match resolve(&self.master, path, true, true)? {
            Some(Resolved::DirWrite { guard, .. }) => Ok(guard),
            Some(Resolved::FileRead { .. } | Resolved::FileWrite { .. }) => {
                Err(wrong_kind("directory", "file", &path.parent_path()))
            }
            Some(Resolved::DirRead { .. }) | None => {
                Err(VfsError::NotFound(path.parent_path()))
            }
        }
    }
}

/// Lazy result stream of `Volume::find_files`.
///
/// Each directory is snapshotted under its read lock, then the lock is
/// dropped before the names are yielded; consuming the iterator after
/// other operations ran (or failed) is safe, and unreadable
/// subdirectories are silently skipped.
pub struct FindFiles {
    master: Arc<MasterRecord>,
    pattern: SearchPattern,
    recursive: bool,
    pending_dirs: VecDeque<String>,
    results: VecDeque<String>,
}

impl FindFiles {
    fn visit(&mut self, dir_path: &str) {
        let Ok(vp) = VirtualPath::parse(dir_path) else {
            return;
        };
        let Ok(Some(Resolved::DirRead { guard, .. })) = resolve(&self.master, &vp, false, false)
        else {
            return;
        };
        for entry in guard.live_children() {
            if self.pattern.matches(entry.name()) {
                self.results
                    .push_back(VirtualPath::combine(dir_path, entry.name()));
            }
        }
        if self.recursive {
            for name in guard.child_directory_names() {
                self.pending_dirs
                    .push_back(VirtualPath::combine(dir_path, &name));
            }
        }
    }
}

impl Iterator for FindFiles {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            if let Some(hit) = self.results.pop_front() {
                return Some(hit);
            }
            let dir = self.pending_dirs.pop_front()?;
            self.visit(&dir);
        }
    }
}
