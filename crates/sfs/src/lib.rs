#![forbid(unsafe_code)]
//! SnapFS umbrella crate: re-exports the public surface of the workspace.

pub use sfs_diff as diff;
pub use sfs_error::{Result, SnapError};
pub use sfs_inode as inode;
pub use sfs_namespace::{
    BlockMap, BlocksMapUpdateInfo, CreateOptions, INodesInPath, Namespace, NamespaceConfig,
    SnapshottableDirStatus,
};
pub use sfs_types as types;
