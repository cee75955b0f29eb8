#![forbid(unsafe_code)]
//! Inode model for SnapFS.
//!
//! The live namespace tree, the per-directory and per-file snapshot diff
//! lists, the reference nodes that keep renamed inodes reachable from
//! older snapshots, and the block-collection bookkeeping that tells the
//! external block map which blocks became unreachable.
//!
//! All inodes live in a single [`InodeStore`] arena and point at each
//! other through [`sfs_types::InodeId`] handles; ownership is always
//! rooted in the live tree, a snapshot diff, or a `WithCount` reference.

pub mod blocks;
pub mod dir;
pub mod file;
pub mod inode;
pub mod reference;
pub mod snapshot;
pub mod store;

pub use blocks::{BlockMap, BlocksMapUpdateInfo};
pub use dir::{ChildRef, DirNode, DirQuota, DirectoryDiff, RemoveOutcome};
pub use file::{FileDiff, FileNode};
pub use inode::{Inode, InodeKind};
pub use reference::{RefKind, RefNode};
pub use snapshot::{SnapshotHandle, SnapshottableState};
pub use store::InodeStore;
