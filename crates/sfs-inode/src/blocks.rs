//! Block-collection protocol toward the external block map.
//!
//! The engine never talks to block storage directly. When inodes become
//! unreachable it appends the block ids they owned to a
//! [`BlocksMapUpdateInfo`], and the caller drains that set into the real
//! block map at its own pace.

use serde::{Deserialize, Serialize};
use sfs_types::{BlockId, InodeId};

/// Capability the engine holds on the external block map.
///
/// `mark` re-records which file owns a block (used when block ownership
/// moves between version-chain members); actual deletion always goes
/// through a [`BlocksMapUpdateInfo`] so the caller can batch.
pub trait BlockMap {
    fn mark(&mut self, block: BlockId, owner: InodeId);
}

/// Ordered set of block ids that may be released by the external block map.
///
/// Collection order within a subtree is depth-first, children before
/// parent.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BlocksMapUpdateInfo {
    to_delete: Vec<BlockId>,
}

impl BlocksMapUpdateInfo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_to_delete(&mut self, block: BlockId) {
        self.to_delete.push(block);
    }

    #[must_use]
    pub fn to_delete(&self) -> &[BlockId] {
        &self.to_delete
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.to_delete.len()
    }

    /// Hand the collected blocks to the caller, leaving this set empty.
    pub fn drain(&mut self) -> Vec<BlockId> {
        std::mem::take(&mut self.to_delete)
    }
}
