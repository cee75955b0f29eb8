//! Files: block ownership, the per-file snapshot diff list, and the
//! version chain.
//!
//! A file that has been captured by at least one snapshot owns a list of
//! [`FileDiff`]s (sorted by snapshot id, same chronology rules as the
//! directory diff list) and sits on a circular *version chain* linking
//! the live inode with every frozen copy of it. The union of block ids
//! across the chain is exactly what the external block map must retain
//! for the file; removing one chain member releases only the blocks no
//! other member still holds.

use crate::blocks::BlocksMapUpdateInfo;
use crate::inode::{Inode, InodeKind};
use crate::store::InodeStore;
use sfs_types::{BlockId, InodeId, SnapshotId};
use std::collections::BTreeSet;
use tracing::{debug, trace};

/// The change a file accumulated between one snapshot and the next
/// recorded state: its size at the snapshot and, once an attribute
/// changed, a frozen copy of the whole inode.
#[derive(Debug, Clone)]
pub struct FileDiff {
    pub(crate) snapshot: SnapshotId,
    pub(crate) file_size: u64,
    pub(crate) snapshot_inode: Option<InodeId>,
}

impl FileDiff {
    #[must_use]
    pub fn snapshot(&self) -> SnapshotId {
        self.snapshot
    }

    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    #[must_use]
    pub fn snapshot_inode(&self) -> Option<InodeId> {
        self.snapshot_inode
    }
}

/// Snapshot bookkeeping attached to a file once a snapshot captured it.
#[derive(Debug, Clone)]
pub(crate) struct FileSnapshotState {
    pub(crate) diffs: Vec<FileDiff>,
    /// Next member of the circular version chain; a sole member points at
    /// itself.
    pub(crate) next: InodeId,
    /// The live state was deleted but some snapshot still sees the file.
    pub(crate) current_deleted: bool,
}

/// File payload of an inode.
#[derive(Debug, Clone)]
pub struct FileNode {
    pub(crate) replication: u16,
    pub(crate) block_size: u64,
    pub(crate) size: u64,
    pub(crate) blocks: Vec<BlockId>,
    pub(crate) snapshot: Option<FileSnapshotState>,
}

impl FileNode {
    #[must_use]
    pub fn new(replication: u16, block_size: u64) -> Self {
        Self {
            replication,
            block_size,
            size: 0,
            blocks: Vec::new(),
            snapshot: None,
        }
    }

    #[must_use]
    pub fn with_blocks(mut self, blocks: Vec<BlockId>, size: u64) -> Self {
        self.blocks = blocks;
        self.size = size;
        self
    }

    #[must_use]
    pub fn replication(&self) -> u16 {
        self.replication
    }

    #[must_use]
    pub fn preferred_block_size(&self) -> u64 {
        self.block_size
    }

    #[must_use]
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn diffs(&self) -> &[FileDiff] {
        self.snapshot.as_ref().map_or(&[], |s| &s.diffs)
    }

    /// Whether the live state was deleted while a snapshot still sees the
    /// file.
    #[must_use]
    pub fn is_current_deleted(&self) -> bool {
        self.snapshot.as_ref().is_some_and(|s| s.current_deleted)
    }

    #[must_use]
    pub fn has_snapshot_state(&self) -> bool {
        self.snapshot.is_some()
    }

    fn diff_index_for(&self, s: SnapshotId) -> Option<usize> {
        let diffs = self.diffs();
        match diffs.binary_search_by(|d| d.snapshot.cmp(&s)) {
            Ok(i) => Some(i),
            Err(j) if j < diffs.len() => Some(j),
            Err(_) => None,
        }
    }

    /// The frozen copy answering for snapshot `s`, or `None` meaning the
    /// live attributes apply.
    #[must_use]
    pub fn attribute_source(&self, s: SnapshotId) -> Option<InodeId> {
        let idx = self.diff_index_for(s)?;
        self.diffs()[idx..].iter().find_map(|d| d.snapshot_inode)
    }

    /// File size as of snapshot `s`, or the live size for the live view.
    #[must_use]
    pub fn size_at(&self, s: Option<SnapshotId>) -> u64 {
        match s.and_then(|s| self.diff_index_for(s)) {
            Some(idx) => self.diffs()[idx].file_size,
            None => self.size,
        }
    }
}

impl InodeStore {
    // ── Version chain ───────────────────────────────────────────────────

    fn ensure_chain(&mut self, file: InodeId) {
        let f = self.node_mut(file).as_file_mut();
        if f.snapshot.is_none() {
            f.snapshot = Some(FileSnapshotState {
                diffs: Vec::new(),
                next: file,
                current_deleted: false,
            });
        }
    }

    /// All members of the version chain `file` sits on, starting with
    /// `file` itself.
    #[must_use]
    pub fn chain_members(&self, file: InodeId) -> Vec<InodeId> {
        let mut members = vec![file];
        let Some(state) = &self.node(file).as_file().snapshot else {
            return members;
        };
        let mut cur = state.next;
        while cur != file {
            members.push(cur);
            let next = self
                .node(cur)
                .as_file()
                .snapshot
                .as_ref()
                .map_or(cur, |s| s.next);
            assert_ne!(next, cur, "version chain member {cur:?} is unlinked");
            cur = next;
        }
        members
    }

    /// Unlink one member from its version chain, leaving the rest intact.
    pub(crate) fn detach_from_chain(&mut self, member: InodeId) {
        let members = self.chain_members(member);
        if members.len() <= 1 {
            return;
        }
        let next_of_member = self.node(member).as_file().snapshot.as_ref().map(|s| s.next);
        let Some(next_of_member) = next_of_member else {
            return;
        };
        // Predecessor is the member whose next points here.
        let pred = *members
            .iter()
            .find(|&&m| {
                self.node(m)
                    .as_file()
                    .snapshot
                    .as_ref()
                    .is_some_and(|s| s.next == member)
            })
            .unwrap_or_else(|| panic!("version chain has no predecessor of {member:?}"));
        if let Some(s) = &mut self.node_mut(pred).as_file_mut().snapshot {
            s.next = next_of_member;
        }
        if let Some(s) = &mut self.node_mut(member).as_file_mut().snapshot {
            s.next = member;
        }
        trace!(member = member.0, "file_chain_detach");
    }

    /// Mark a file whose live state was deleted but which some snapshot
    /// still sees.
    ///
    /// Removing a `WithName` referrer is not a live deletion — the inode
    /// stays reachable at the rename destination — so it never marks.
    pub(crate) fn mark_current_deleted(&mut self, child: InodeId) {
        if let InodeKind::Reference(r) = &self.node(child).kind {
            if matches!(r.kind(), crate::reference::RefKind::WithName) {
                return;
            }
        }
        let id = self.resolve(child);
        if !self.node(id).is_file() {
            return;
        }
        self.ensure_chain(id);
        if let Some(s) = &mut self.node_mut(id).as_file_mut().snapshot {
            s.current_deleted = true;
        }
        debug!(file = id.0, "file_current_deleted");
    }

    /// Cleanup for an element created and deleted under the same diff: it
    /// never reached any snapshot, so a file with version-chain links must
    /// leave the chain before the caller destroys it.
    pub(crate) fn detach_trashed_file(&mut self, id: InodeId) {
        if !self.contains(id) {
            return;
        }
        let id = self.resolve(id);
        if self.node(id).is_file() {
            self.detach_from_chain(id);
        }
    }

    // ── Frozen copies and self-capture ──────────────────────────────────

    /// Clone a file's attributes and current block list into a frozen
    /// copy. The copy joins the arena but not the live tree.
    pub(crate) fn snapshot_copy_of_file(&mut self, file: InodeId) -> InodeId {
        let src = self.node(file);
        let f = src.as_file();
        let frozen = FileNode {
            replication: f.replication,
            block_size: f.block_size,
            size: f.size,
            blocks: f.blocks.clone(),
            snapshot: None,
        };
        let mut copy = Inode::new_file(src.name.clone(), src.perm.clone(), src.mtime, frozen);
        copy.atime = src.atime;
        copy.parent = src.parent;
        let copy_id = self.alloc(copy);
        trace!(file = file.0, copy = copy_id.0, "file_snapshot_copy");
        copy_id
    }

    /// Capture the file's pre-modification state into its own diff list
    /// for `latest`, linking the frozen copy into the version chain right
    /// after the live inode. Returns `None` when the state for `latest`
    /// was captured already.
    pub fn save_file_to_snapshot(&mut self, file: InodeId, latest: SnapshotId) -> Option<InodeId> {
        let file = self.resolve(file);
        {
            let f = self.node(file).as_file();
            if f.diffs().last().map(|d| d.snapshot) == Some(latest) {
                return None;
            }
        }
        let copy = self.snapshot_copy_of_file(file);
        self.ensure_chain(file);
        self.ensure_chain(copy);

        let live_next = self
            .node(file)
            .as_file()
            .snapshot
            .as_ref()
            .map_or(file, |s| s.next);
        if let Some(s) = &mut self.node_mut(copy).as_file_mut().snapshot {
            // A sole live member points at itself, so this closes the
            // two-member cycle live -> copy -> live.
            s.next = live_next;
        }
        if let Some(s) = &mut self.node_mut(file).as_file_mut().snapshot {
            s.next = copy;
        }

        let size = self.node(file).as_file().size;
        if let Some(s) = &mut self.node_mut(file).as_file_mut().snapshot {
            s.diffs.push(FileDiff {
                snapshot: latest,
                file_size: size,
                snapshot_inode: Some(copy),
            });
        }
        debug!(file = file.0, snapshot = latest.0, copy = copy.0, "file_diff_open");
        Some(copy)
    }

    // ── Block collection ────────────────────────────────────────────────

    /// Collect the blocks only this chain member still holds, then unlink
    /// it from the chain.
    pub(crate) fn collect_file_blocks(&mut self, file: InodeId, collected: &mut BlocksMapUpdateInfo) {
        let members = self.chain_members(file);
        let held_elsewhere: BTreeSet<BlockId> = members
            .iter()
            .filter(|&&m| m != file)
            .flat_map(|&m| self.node(m).as_file().blocks.iter().copied())
            .collect();
        let own: Vec<BlockId> = self.node(file).as_file().blocks.clone();
        for block in own {
            if !held_elsewhere.contains(&block) {
                collected.add_to_delete(block);
            }
        }
        self.detach_from_chain(file);
        debug!(file = file.0, "file_blocks_collected");
    }

    /// Remove this file's diff for snapshot `s`, mirroring the directory
    /// rules: retag to `prior` when the predecessor diff does not belong
    /// to it, otherwise fold into the predecessor and release the blocks
    /// only the victim's frozen copy still held.
    pub fn delete_file_snapshot_diff(
        &mut self,
        file: InodeId,
        s: SnapshotId,
        prior: Option<SnapshotId>,
        collected: &mut BlocksMapUpdateInfo,
    ) -> bool {
        let file = self.resolve(file);
        if !self.node(file).is_file() {
            return false;
        }
        let idx = {
            let diffs = self.node(file).as_file().diffs();
            match diffs.binary_search_by(|d| d.snapshot.cmp(&s)) {
                Ok(i) => i,
                Err(_) => return false,
            }
        };

        if let Some(p) = prior {
            let f = self.node_mut(file).as_file_mut();
            let state = f.snapshot.as_mut().unwrap_or_else(|| unreachable!());
            let prev_matches_prior = idx > 0 && state.diffs[idx - 1].snapshot == p;
            if !prev_matches_prior {
                state.diffs[idx].snapshot = p;
                debug!(file = file.0, from = s.0, to = p.0, "file_diff_retag");
                return true;
            }
        }

        let victim = {
            let f = self.node_mut(file).as_file_mut();
            let state = f.snapshot.as_mut().unwrap_or_else(|| unreachable!());
            state.diffs.remove(idx)
        };
        debug!(file = file.0, snapshot = s.0, "file_diff_drop");

        let adopted = if idx > 0 {
            let f = self.node_mut(file).as_file_mut();
            let state = f.snapshot.as_mut().unwrap_or_else(|| unreachable!());
            let prev = &mut state.diffs[idx - 1];
            if prev.snapshot_inode.is_none() {
                prev.snapshot_inode = victim.snapshot_inode;
                true
            } else {
                false
            }
        } else {
            false
        };

        if !adopted {
            if let Some(copy) = victim.snapshot_inode {
                self.collect_file_blocks(copy, collected);
                self.remove(copy);
            }
        }
        true
    }

    // ── Derived attributes ──────────────────────────────────────────────

    /// Effective replication of a file: the maximum across every member of
    /// its version chain, since the block map keeps blocks at the highest
    /// replication any retained version asks for.
    #[must_use]
    pub fn effective_replication(&self, file: InodeId) -> u16 {
        let file = self.resolve(file);
        self.chain_members(file)
            .into_iter()
            .map(|m| self.node(m).as_file().replication)
            .max()
            .unwrap_or(0)
    }

    /// File size visible in the given view.
    #[must_use]
    pub fn file_size(&self, file: InodeId, snapshot: Option<SnapshotId>) -> u64 {
        let file = self.resolve(file);
        self.node(file).as_file().size_at(snapshot)
    }

    /// Change the live replication factor.
    pub fn set_replication(&mut self, file: InodeId, replication: u16) {
        let file = self.resolve(file);
        self.node_mut(file).as_file_mut().replication = replication;
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use sfs_types::{NameKey, Permission};

    fn new_file(store: &mut InodeStore, blocks: &[u64], size: u64) -> InodeId {
        let file = FileNode::new(3, 1024)
            .with_blocks(blocks.iter().map(|&b| BlockId(b)).collect(), size);
        store.alloc(Inode::new_file(
            NameKey::from("f"),
            Permission::default(),
            100,
            file,
        ))
    }

    #[test]
    fn save_links_copy_into_chain_and_captures_state() {
        let mut store = InodeStore::new();
        let f = new_file(&mut store, &[1, 2], 2048);
        let s0 = SnapshotId(1);

        let copy = store.save_file_to_snapshot(f, s0).expect("capture");
        assert_eq!(store.chain_members(f), vec![f, copy]);
        assert_eq!(store.node(copy).as_file().blocks(), [BlockId(1), BlockId(2)]);

        // Repeated capture for the same snapshot is a no-op.
        assert!(store.save_file_to_snapshot(f, s0).is_none());

        // A later snapshot takes its own copy, linked right after the
        // live inode.
        let s1 = SnapshotId(2);
        let copy2 = store.save_file_to_snapshot(f, s1).expect("second capture");
        assert_eq!(store.chain_members(f), vec![f, copy2, copy]);
    }

    #[test]
    fn size_answers_from_the_nearest_recorded_diff() {
        let mut store = InodeStore::new();
        let f = new_file(&mut store, &[1], 1000);
        store.save_file_to_snapshot(f, SnapshotId(2)).unwrap();
        store.node_mut(f).as_file_mut().size = 5000;

        // s=1 never recorded a diff; the diff for s=2 answers.
        assert_eq!(store.file_size(f, Some(SnapshotId(1))), 1000);
        assert_eq!(store.file_size(f, Some(SnapshotId(2))), 1000);
        assert_eq!(store.file_size(f, None), 5000);
    }

    #[test]
    fn collect_releases_only_blocks_no_chain_member_holds() {
        let mut store = InodeStore::new();
        let f = new_file(&mut store, &[1, 2], 2048);
        let copy = store.save_file_to_snapshot(f, SnapshotId(1)).unwrap();

        // The live file drops block 2 and gains block 3; the frozen copy
        // still holds [1, 2].
        store.node_mut(f).as_file_mut().blocks = vec![BlockId(1), BlockId(3)];

        let mut collected = BlocksMapUpdateInfo::new();
        store.collect_file_blocks(f, &mut collected);
        // Block 1 and 2 stay with the copy; only 3 comes out.
        assert_eq!(collected.to_delete(), [BlockId(3)]);
        assert_eq!(store.chain_members(copy), vec![copy]);
    }

    #[test]
    fn deleting_a_file_diff_releases_the_copy_exclusive_blocks() {
        let mut store = InodeStore::new();
        let f = new_file(&mut store, &[1, 2], 2048);
        let copy = store.save_file_to_snapshot(f, SnapshotId(1)).unwrap();
        store.node_mut(f).as_file_mut().blocks = vec![BlockId(1)];

        let mut collected = BlocksMapUpdateInfo::new();
        assert!(store.delete_file_snapshot_diff(f, SnapshotId(1), None, &mut collected));
        assert_eq!(collected.to_delete(), [BlockId(2)]);
        assert!(!store.contains(copy));
        assert_eq!(store.chain_members(f), vec![f]);
    }

    #[test]
    fn deleting_a_file_diff_retags_when_an_older_snapshot_remains() {
        let mut store = InodeStore::new();
        let f = new_file(&mut store, &[1], 1000);
        let copy = store.save_file_to_snapshot(f, SnapshotId(5)).unwrap();

        let mut collected = BlocksMapUpdateInfo::new();
        assert!(store.delete_file_snapshot_diff(f, SnapshotId(5), Some(SnapshotId(3)), &mut collected));
        assert!(collected.is_empty());
        // The diff now answers for the older snapshot.
        assert_eq!(store.node(f).as_file().attribute_source(SnapshotId(3)), Some(copy));
    }

    #[test]
    fn effective_replication_is_the_chain_maximum() {
        let mut store = InodeStore::new();
        let f = new_file(&mut store, &[1], 1000);
        let copy = store.save_file_to_snapshot(f, SnapshotId(1)).unwrap();
        store.node_mut(f).as_file_mut().replication = 2;
        store.node_mut(copy).as_file_mut().replication = 5;
        assert_eq!(store.effective_replication(f), 5);
    }
}
