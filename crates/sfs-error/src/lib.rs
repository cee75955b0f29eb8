#![forbid(unsafe_code)]
//! Error types for SnapFS.
//!
//! Defines `SnapError` and a `Result<T>` alias used throughout the
//! workspace. Invariant violations (overlapping diff keys, negative
//! reference counts) are programming errors and panic instead of surfacing
//! here; every operation either completes or rolls back and returns one of
//! these.

use sfs_types::PathError;
use thiserror::Error;

/// Unified error type for all SnapFS namespace operations.
#[derive(Debug, Error)]
pub enum SnapError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("parent does not exist: {0}")]
    ParentMissing(String),

    #[error("parent path is not a directory: {0}")]
    ParentNotDirectory(String),

    #[error("is not a directory: {0}")]
    NotDirectory(String),

    #[error("is a directory: {0}")]
    IsDirectory(String),

    #[error("file exists: {0}")]
    Exists(String),

    #[error("directory is not snapshottable: {0}")]
    NotSnapshottable(String),

    #[error("snapshot {name} already exists under {dir}")]
    SnapshotNameExists { dir: String, name: String },

    #[error("snapshot {name} does not exist under {dir}")]
    SnapshotNotFound { dir: String, name: String },

    #[error("modification on a read-only snapshot is disallowed: {0}")]
    SnapshotModification(String),

    #[error("the directory {0} cannot be deleted since it has snapshots")]
    HasSnapshots(String),

    #[error("namespace quota exceeded on {dir}: quota={quota} consumed={consumed}")]
    NsQuotaExceeded { dir: String, quota: u64, consumed: u64 },

    #[error("diskspace quota exceeded on {dir}: quota={quota} consumed={consumed}")]
    DsQuotaExceeded { dir: String, quota: u64, consumed: u64 },

    #[error("rename destination {0} is inside the source subtree")]
    RenameIntoSubtree(String),

    #[error("path component length {len} exceeds the limit of {limit}")]
    ComponentTooLong { len: usize, limit: usize },

    #[error("directory {dir} already holds the maximum of {limit} items")]
    DirectoryItemLimit { dir: String, limit: usize },

    #[error(transparent)]
    Path(#[from] PathError),
}

/// Result alias using `SnapError`.
pub type Result<T> = std::result::Result<T, SnapError>;
