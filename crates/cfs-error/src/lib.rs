#![forbid(unsafe_code)]
//! Error types for CapsuleFS.
//!
//! Defines `VfsError` and a `Result<T>` alias used throughout the
//! workspace. Low-level failures propagate unchanged; the facade maps
//! allocator and lookup misses onto `DiskFull`/`NotFound`.

use thiserror::Error;

/// Unified error type for all CapsuleFS operations.
#[derive(Debug, Error)]
pub enum VfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("expected a {expected}, found a {actual}: {path}")]
    WrongKind {
        expected: &'static str,
        actual: &'static str,
        path: String,
    },

    #[error("no space left on volume")]
    DiskFull,

    #[error("maximum file size exceeded")]
    MaxFileSize,

    #[error("node lock not acquired within the timeout")]
    LockTimeout,

    #[error("corrupt volume metadata at {address:#x}: {detail}")]
    Corruption { address: u64, detail: String },

    #[error("block index {index} out of range ({allocated} blocks allocated)")]
    BlockIndexOutOfRange { index: u32, allocated: u32 },

    #[error("directory not empty: {0}")]
    NotEmpty(String),

    #[error("handle is read-only")]
    ReadOnly,

    #[error("invalid volume size {size}: {reason}")]
    InvalidVolumeSize { size: u64, reason: &'static str },

    #[error("volume or handle is closed")]
    Closed,
}

impl VfsError {
    /// Shorthand for `Corruption` with an owned detail message.
    #[must_use]
    pub fn corruption(address: u64, detail: impl Into<String>) -> Self {
        Self::Corruption {
            address,
            detail: detail.into(),
        }
    }
}

/// Result alias using `VfsError`.
pub type Result<T> = std::result::Result<T, VfsError>;
