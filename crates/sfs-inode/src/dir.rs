//! Directories: children lists, quota caps, and the per-directory snapshot
//! diff list.
//!
//! A directory owns its children as a vector of inode ids sorted by the
//! children's name keys. Snapshot state is a chronological list of
//! [`DirectoryDiff`]s; the list itself realizes the posterior chain
//! `d₁ → d₂ → … → live`, with "posterior of `diffs[i]`" being `diffs[i+1]`
//! and the end of the list standing for the live state. State at snapshot
//! `s` is recovered by folding every diff at or after `s` and applying the
//! combined diff backwards over the live children.

use crate::blocks::BlocksMapUpdateInfo;
use crate::inode::InodeKind;
use crate::snapshot::SnapshottableState;
use crate::store::InodeStore;
use sfs_diff::{Diff, Keyed, PriorAccess, UndoDelete};
use sfs_error::{Result, SnapError};
use sfs_types::{InodeId, NameKey, SnapshotId};
use tracing::{debug, trace};

/// One child as recorded in a diff: the name key it was reachable under
/// and the inode that answered for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildRef {
    pub name: NameKey,
    pub node: InodeId,
}

impl Keyed for ChildRef {
    type Key = NameKey;

    fn key(&self) -> &NameKey {
        &self.name
    }
}

pub type ChildrenDiff = Diff<ChildRef>;

/// The change a directory accumulated between one snapshot and the next
/// recorded state.
#[derive(Debug, Clone)]
pub struct DirectoryDiff {
    /// The snapshot obtained by applying this diff backwards from its
    /// posterior state.
    pub(crate) snapshot: SnapshotId,
    /// Size of the children list when this diff was opened.
    pub(crate) children_size: usize,
    /// Frozen attribute copy of the directory itself; `None` while the
    /// attributes never changed under this diff.
    pub(crate) snapshot_inode: Option<InodeId>,
    pub(crate) diff: ChildrenDiff,
}

impl DirectoryDiff {
    fn new(snapshot: SnapshotId, children_size: usize) -> Self {
        Self {
            snapshot,
            children_size,
            snapshot_inode: None,
            diff: ChildrenDiff::new(),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> SnapshotId {
        self.snapshot
    }

    #[must_use]
    pub fn children_size(&self) -> usize {
        self.children_size
    }

    #[must_use]
    pub fn snapshot_inode(&self) -> Option<InodeId> {
        self.snapshot_inode
    }

    #[must_use]
    pub fn diff(&self) -> &ChildrenDiff {
        &self.diff
    }
}

/// Namespace and diskspace caps of a quota directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirQuota {
    pub ns_quota: Option<u64>,
    pub ds_quota: Option<u64>,
}

/// Directory payload of an inode.
#[derive(Debug, Clone, Default)]
pub struct DirNode {
    pub(crate) children: Vec<InodeId>,
    pub(crate) diffs: Vec<DirectoryDiff>,
    pub(crate) snapshottable: Option<SnapshottableState>,
    pub(crate) quota: Option<DirQuota>,
}

impl DirNode {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn children(&self) -> &[InodeId] {
        &self.children
    }

    #[must_use]
    pub fn diffs(&self) -> &[DirectoryDiff] {
        &self.diffs
    }

    #[must_use]
    pub fn is_snapshottable(&self) -> bool {
        self.snapshottable.is_some()
    }

    #[must_use]
    pub fn snapshottable(&self) -> Option<&SnapshottableState> {
        self.snapshottable.as_ref()
    }

    #[must_use]
    pub fn quota(&self) -> Option<DirQuota> {
        self.quota
    }

    /// The snapshot of the most recent diff, if any diff was recorded.
    #[must_use]
    pub fn last_diff_snapshot(&self) -> Option<SnapshotId> {
        self.diffs.last().map(|d| d.snapshot)
    }

    /// Index of the diff answering for snapshot `s`.
    ///
    /// An exact match is the diff tagged `s` itself. An inexact match
    /// means nothing changed between `s` and the next recorded state, so
    /// the *next* diff answers; past the end, the live state answers and
    /// `None` is returned.
    #[must_use]
    pub fn diff_index_for(&self, s: SnapshotId) -> Option<usize> {
        match self.diffs.binary_search_by(|d| d.snapshot.cmp(&s)) {
            Ok(i) => Some(i),
            Err(j) if j < self.diffs.len() => Some(j),
            Err(_) => None,
        }
    }

    /// The frozen attribute copy answering for snapshot `s`: the nearest
    /// copy at or after `s`, or `None` meaning the live attributes apply.
    #[must_use]
    pub fn attribute_source(&self, s: SnapshotId) -> Option<InodeId> {
        let idx = self.diff_index_for(s)?;
        self.diffs[idx..].iter().find_map(|d| d.snapshot_inode)
    }
}

/// Result of removing a child from its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// No child with that name; nothing changed.
    NotFound,
    /// Removed from the live tree but still reachable from a snapshot
    /// diff; its blocks stay owned.
    Retained,
    /// Removed and referenced by no snapshot; the caller must destroy the
    /// subtree and collect its blocks.
    Unreachable,
}

impl InodeStore {
    // ── Children ────────────────────────────────────────────────────────

    /// Binary-search position of `name` in a directory's live children.
    pub(crate) fn child_position(&self, dir: InodeId, name: &NameKey) -> std::result::Result<usize, usize> {
        let d = self.node(dir).as_directory();
        d.children
            .binary_search_by(|&c| self.local_name(c).cmp(name))
    }

    /// Live child lookup by name.
    #[must_use]
    pub fn get_live_child(&self, dir: InodeId, name: &NameKey) -> Option<InodeId> {
        let dir = self.resolve(dir);
        let d = self.node(dir).as_directory();
        self.child_position(dir, name)
            .ok()
            .map(|i| d.children[i])
    }

    /// Child lookup by name, in the live state or in a snapshot view.
    ///
    /// The snapshot walk starts at the diff answering for `s` and moves
    /// toward the live state: the first diff that determines the name
    /// wins, and a chain of unknowns falls through to the live child.
    #[must_use]
    pub fn get_child(&self, dir: InodeId, name: &NameKey, snapshot: Option<SnapshotId>) -> Option<InodeId> {
        let dir = self.resolve(dir);
        let Some(s) = snapshot else {
            return self.get_live_child(dir, name);
        };
        let d = self.node(dir).as_directory();
        let Some(idx) = d.diff_index_for(s) else {
            return self.get_live_child(dir, name);
        };
        for diff in &d.diffs[idx..] {
            match diff.diff.access_previous(name) {
                PriorAccess::Found(child) => return Some(child.node),
                PriorAccess::Absent => return None,
                PriorAccess::Unknown => {}
            }
        }
        self.get_live_child(dir, name)
    }

    /// The full children list, live or reconstructed for a snapshot.
    #[must_use]
    pub fn children_list(&self, dir: InodeId, snapshot: Option<SnapshotId>) -> Vec<InodeId> {
        let dir = self.resolve(dir);
        let d = self.node(dir).as_directory();
        let idx = match snapshot.and_then(|s| d.diff_index_for(s)) {
            Some(idx) => idx,
            None => return d.children.clone(),
        };
        let live: Vec<ChildRef> = d
            .children
            .iter()
            .map(|&c| ChildRef {
                name: self.local_name(c).clone(),
                node: c,
            })
            .collect();
        let mut combined = ChildrenDiff::new();
        for diff in &d.diffs[idx..] {
            combined.combine_posterior(&diff.diff, &mut |_| {});
        }
        combined
            .apply_to_current(&live)
            .into_iter()
            .map(|c| c.node)
            .collect()
    }

    // ── Diff bookkeeping ────────────────────────────────────────────────

    /// Make sure the most recent diff is the one for `latest`, opening a
    /// fresh empty diff if the last recorded one belongs to an older
    /// snapshot.
    pub(crate) fn check_and_add_latest_diff(&mut self, dir: InodeId, latest: SnapshotId) {
        let d = self.node_mut(dir).as_directory_mut();
        if d.last_diff_snapshot() != Some(latest) {
            let size = d.children.len();
            d.diffs.push(DirectoryDiff::new(latest, size));
            trace!(dir = dir.0, snapshot = latest.0, "dir_diff_open");
        }
    }

    /// Append the creation diff for a brand-new snapshot of this
    /// directory, with the frozen snapshot root as its attribute copy.
    pub(crate) fn add_snapshot_creation_diff(&mut self, dir: InodeId, s: SnapshotId, root: InodeId) {
        let d = self.node_mut(dir).as_directory_mut();
        let size = d.children.len();
        let mut diff = DirectoryDiff::new(s, size);
        diff.snapshot_inode = Some(root);
        d.diffs.push(diff);
        trace!(dir = dir.0, snapshot = s.0, root = root.0, "dir_diff_open_creation");
    }

    /// Capture the directory's own attributes into the latest diff, if not
    /// captured already. `copy` supplies a ready-made frozen copy; without
    /// one a fresh shallow copy is taken.
    pub fn save_self_to_snapshot(
        &mut self,
        dir: InodeId,
        latest: Option<SnapshotId>,
        copy: Option<InodeId>,
    ) {
        let dir = self.resolve(dir);
        let Some(latest) = latest else {
            return;
        };
        self.check_and_add_latest_diff(dir, latest);
        let captured = {
            let d = self.node(dir).as_directory();
            d.diffs.last().and_then(|x| x.snapshot_inode).is_some()
        };
        if captured {
            return;
        }
        let copy = match copy {
            Some(c) => c,
            None => self.snapshot_copy_of_directory(dir),
        };
        let d = self.node_mut(dir).as_directory_mut();
        let last = d.diffs.last_mut().unwrap_or_else(|| unreachable!());
        last.snapshot_inode = Some(copy);
    }

    /// Add `child` under `dir`, recording the creation into the latest
    /// snapshot first. Returns `false` and rolls the diff back when a
    /// child with the same name already exists.
    pub fn add_child(
        &mut self,
        dir: InodeId,
        child: InodeId,
        latest: Option<SnapshotId>,
    ) -> Result<bool> {
        let dir = self.resolve(dir);
        let name = self.local_name(child).clone();
        self.verify_quota_for_add(dir, child)?;

        let position = self.child_position(dir, &name);
        let mut undo = None;
        if let Some(s) = latest {
            self.check_and_add_latest_diff(dir, s);
            let d = self.node_mut(dir).as_directory_mut();
            let last = d.diffs.last_mut().unwrap_or_else(|| unreachable!());
            undo = Some(last.diff.create(ChildRef {
                name: name.clone(),
                node: child,
            }));
        }

        match position {
            Ok(_) => {
                if let Some(u) = undo {
                    let d = self.node_mut(dir).as_directory_mut();
                    let last = d.diffs.last_mut().unwrap_or_else(|| unreachable!());
                    last.diff.undo_create(&name, u);
                }
                Ok(false)
            }
            Err(at) => {
                let resolved_child = self.resolve(child);
                let child_mtime = self.node(resolved_child).mtime;
                let d = self.node_mut(dir).as_directory_mut();
                d.children.insert(at, child);
                self.node_mut(child).parent = Some(dir);
                if resolved_child != child {
                    // The live parent of a referred inode is wherever its
                    // reference currently hangs.
                    self.node_mut(resolved_child).parent = Some(dir);
                }
                // The directory changes when a child appears.
                self.node_mut(dir).mtime = child_mtime;
                trace!(dir = dir.0, child = child.0, "dir_add_child");
                Ok(true)
            }
        }
    }

    /// Remove the child named like `child` from `dir`, recording the
    /// deletion into the latest snapshot first.
    ///
    /// On a failed live removal only the diff undo runs; the cleanup of a
    /// trashed same-diff creation is gated on the removal having actually
    /// happened.
    pub fn remove_child(
        &mut self,
        dir: InodeId,
        child: InodeId,
        latest: Option<SnapshotId>,
    ) -> RemoveOutcome {
        let dir = self.resolve(dir);
        let name = self.local_name(child).clone();
        let position = self.child_position(dir, &name);

        let mut undo: Option<UndoDelete<ChildRef>> = None;
        if let Some(s) = latest {
            self.check_and_add_latest_diff(dir, s);
            let d = self.node_mut(dir).as_directory_mut();
            let last = d.diffs.last_mut().unwrap_or_else(|| unreachable!());
            undo = Some(last.diff.delete(ChildRef {
                name: name.clone(),
                node: child,
            }));
        }

        let Ok(at) = position else {
            if let Some(u) = undo {
                let d = self.node_mut(dir).as_directory_mut();
                let last = d.diffs.last_mut().unwrap_or_else(|| unreachable!());
                last.diff.undo_delete(&name, u);
            }
            return RemoveOutcome::NotFound;
        };

        let d = self.node_mut(dir).as_directory_mut();
        d.children.remove(at);
        trace!(dir = dir.0, child = child.0, "dir_remove_child");

        match undo {
            None => RemoveOutcome::Unreachable,
            Some(u) => match u.into_trashed() {
                Some(trashed) => {
                    // Created and deleted under the same diff: no snapshot
                    // ever saw it.
                    self.detach_trashed_file(trashed.node);
                    RemoveOutcome::Unreachable
                }
                None => {
                    self.mark_current_deleted(child);
                    RemoveOutcome::Retained
                }
            },
        }
    }

    /// Swap `old` for `new` at the same position and name. Used when a
    /// rename leaves a name-preserving reference behind.
    pub fn replace_child(&mut self, dir: InodeId, old: InodeId, new: InodeId) {
        let dir = self.resolve(dir);
        let name = self.local_name(old).clone();
        let at = self
            .child_position(dir, &name)
            .unwrap_or_else(|_| panic!("replace_child: no child named {name} under {dir:?}"));
        let d = self.node_mut(dir).as_directory_mut();
        assert_eq!(d.children[at], old, "replace_child: position holds a different inode");
        d.children[at] = new;
        self.node_mut(new).parent = Some(dir);
    }

    /// Capture a file child's attributes into the latest diff before a
    /// modification overwrites them. Returns the frozen copy when one was
    /// taken; `None` means the diff already determined the child (either
    /// captured earlier or created after the snapshot).
    pub fn save_child_to_snapshot(
        &mut self,
        dir: InodeId,
        child: InodeId,
        latest: SnapshotId,
    ) -> Option<InodeId> {
        let dir = self.resolve(dir);
        let file = self.resolve(child);
        if !self.node(file).is_file() {
            return None;
        }
        let name = self.local_name(child).clone();
        self.check_and_add_latest_diff(dir, latest);
        {
            let d = self.node(dir).as_directory();
            let last = d.diffs.last().unwrap_or_else(|| unreachable!());
            if !matches!(last.diff.access_previous(&name), PriorAccess::Unknown) {
                return None;
            }
        }

        let copy = self.save_file_to_snapshot(file, latest)?;
        let d = self.node_mut(dir).as_directory_mut();
        let last = d.diffs.last_mut().unwrap_or_else(|| unreachable!());
        last.diff.modify(ChildRef { name, node: copy });
        Some(copy)
    }

    // ── Snapshot diff deletion and cleanup ──────────────────────────────

    /// Remove this directory's diff for snapshot `s`, folding it into its
    /// predecessor and collecting what became unreachable.
    ///
    /// `prior` is the next older snapshot still retained by the owning
    /// snapshottable root. When the predecessor diff does not belong to
    /// `prior` (or there is none but `prior` exists), the victim diff is
    /// retagged to `prior` instead of removed: it now answers for the
    /// older snapshot's reads.
    pub fn delete_directory_snapshot_diff(
        &mut self,
        dir: InodeId,
        s: SnapshotId,
        prior: Option<SnapshotId>,
        collected: &mut BlocksMapUpdateInfo,
    ) -> bool {
        let dir = self.resolve(dir);
        let idx = {
            let d = self.node(dir).as_directory();
            match d.diffs.binary_search_by(|x| x.snapshot.cmp(&s)) {
                Ok(i) => i,
                Err(_) => return false,
            }
        };

        if let Some(p) = prior {
            let d = self.node_mut(dir).as_directory_mut();
            let prev_matches_prior = idx > 0 && d.diffs[idx - 1].snapshot == p;
            if !prev_matches_prior {
                d.diffs[idx].snapshot = p;
                debug!(dir = dir.0, from = s.0, to = p.0, "dir_diff_retag");
                return true;
            }
        }

        let victim = self.node_mut(dir).as_directory_mut().diffs.remove(idx);
        debug!(dir = dir.0, snapshot = s.0, "dir_diff_drop");
        let mut trashed: Vec<ChildRef> = Vec::new();
        if idx > 0 {
            let mut prev = std::mem::take(
                &mut self.node_mut(dir).as_directory_mut().diffs[idx - 1].diff,
            );
            prev.combine_posterior(&victim.diff, &mut |e| trashed.push(e.clone()));
            let adopted = {
                let d = self.node_mut(dir).as_directory_mut();
                d.diffs[idx - 1].diff = prev;
                if d.diffs[idx - 1].snapshot_inode.is_none() {
                    d.diffs[idx - 1].snapshot_inode = victim.snapshot_inode;
                    true
                } else {
                    false
                }
            };
            if !adopted {
                if let Some(copy) = victim.snapshot_inode {
                    self.remove(copy);
                }
            }
        } else {
            // Oldest diff with nothing before it: whatever only this diff
            // kept alive is now unreachable.
            trashed.extend(victim.diff.deleted().iter().cloned());
            if let Some(copy) = victim.snapshot_inode {
                self.remove(copy);
            }
        }
        for t in trashed {
            if self.contains(t.node) && !self.dir_still_references(dir, t.node) {
                self.destroy_and_collect(t.node, collected);
            }
        }
        true
    }

    /// Whether the directory still reaches `node` through its live
    /// children or any recorded diff. A trashed element that another diff
    /// (or the live tree) still holds must not be destroyed with the diff
    /// that dropped it.
    fn dir_still_references(&self, dir: InodeId, node: InodeId) -> bool {
        let d = self.node(dir).as_directory();
        d.children.contains(&node)
            || d.diffs.iter().any(|x| {
                x.diff.created().iter().any(|c| c.node == node)
                    || x.diff.deleted().iter().any(|c| c.node == node)
            })
    }

    /// Remove snapshot `s` from every diff list in the subtree rooted at
    /// `id`, children before parent. `prior` is the next older snapshot the
    /// owning snapshottable root still retains.
    pub fn clean_subtree(
        &mut self,
        id: InodeId,
        s: SnapshotId,
        prior: Option<SnapshotId>,
        collected: &mut BlocksMapUpdateInfo,
    ) {
        let id = self.resolve(id);
        match &self.node(id).kind {
            InodeKind::File(_) => {
                self.delete_file_snapshot_diff(id, s, prior, collected);
            }
            InodeKind::Directory(d) => {
                let mut targets: Vec<InodeId> = d.children.clone();
                for diff in &d.diffs {
                    targets.extend(diff.diff.deleted().iter().map(|c| c.node));
                }
                for t in targets {
                    if self.contains(t) {
                        self.clean_subtree(t, s, prior, collected);
                    }
                }
                self.delete_directory_snapshot_diff(id, s, prior, collected);
            }
            InodeKind::Reference(_) => unreachable!("resolved inode is a reference"),
        }
    }

    /// Destroy an unreachable subtree, handing every owned block to the
    /// collector. Children are collected before their parent.
    pub fn destroy_and_collect(&mut self, id: InodeId, collected: &mut BlocksMapUpdateInfo) {
        match &self.node(id).kind {
            InodeKind::File(_) => {
                self.collect_file_blocks(id, collected);
                self.remove(id);
            }
            InodeKind::Directory(_) => {
                let d = self.node(id).as_directory();
                let mut doomed: Vec<InodeId> = d.children.clone();
                for diff in &d.diffs {
                    doomed.extend(diff.diff.deleted().iter().map(|c| c.node));
                    if let Some(copy) = diff.snapshot_inode {
                        doomed.push(copy);
                    }
                }
                for child in doomed {
                    if self.contains(child) {
                        self.destroy_and_collect(child, collected);
                    }
                }
                self.remove(id);
            }
            InodeKind::Reference(_) => {
                self.remove_reference(id, collected);
            }
        }
    }

    // ── Quota ───────────────────────────────────────────────────────────

    /// Turn a directory into a quota directory (or update its caps).
    pub fn set_quota(&mut self, dir: InodeId, quota: DirQuota) {
        let dir = self.resolve(dir);
        self.node_mut(dir).as_directory_mut().quota = Some(quota);
    }

    /// Count the live namespace entries and diskspace of a subtree.
    #[must_use]
    pub fn subtree_counts(&self, id: InodeId) -> (u64, u64) {
        let id = self.resolve(id);
        match &self.node(id).kind {
            InodeKind::File(f) => (1, f.size * u64::from(f.replication)),
            InodeKind::Directory(d) => {
                let mut ns = 1;
                let mut ds = 0;
                for &child in &d.children {
                    let (cns, cds) = self.subtree_counts(child);
                    ns += cns;
                    ds += cds;
                }
                (ns, ds)
            }
            InodeKind::Reference(_) => unreachable!("resolved inode is a reference"),
        }
    }

    /// Check every quota directory on the ancestor chain of `dir` against
    /// the counts the new child would add.
    pub fn verify_quota_for_add(&self, dir: InodeId, child: InodeId) -> Result<()> {
        let (child_ns, child_ds) = self.subtree_counts(child);
        let mut cursor = Some(dir);
        while let Some(cur) = cursor {
            let node = self.node(cur);
            if let InodeKind::Directory(d) = &node.kind {
                if let Some(q) = d.quota {
                    let (ns, ds) = self.subtree_counts(cur);
                    if let Some(cap) = q.ns_quota {
                        let wanted = ns + child_ns;
                        if wanted > cap {
                            return Err(SnapError::NsQuotaExceeded {
                                dir: self.node(cur).name.to_string(),
                                quota: cap,
                                consumed: wanted,
                            });
                        }
                    }
                    if let Some(cap) = q.ds_quota {
                        let wanted = ds + child_ds;
                        if wanted > cap {
                            return Err(SnapError::DsQuotaExceeded {
                                dir: self.node(cur).name.to_string(),
                                quota: cap,
                                consumed: wanted,
                            });
                        }
                    }
                }
            }
            cursor = node.parent;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
