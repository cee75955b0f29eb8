//! Reference nodes: multi-path reachability after a rename crosses a
//! snapshot boundary.
//!
//! A renamed inode that an older snapshot still needs is wrapped in an
//! anonymous `WithCount`; the source directory keeps a `WithName` child
//! (frozen under the old name, visible only through the snapshot), and the
//! destination directory gets a `DstReference` child. Both point at the
//! same `WithCount`, which owns the single edge to the real inode and
//! counts its referrers. Blocks are collected only when the count reaches
//! zero.

use crate::blocks::BlocksMapUpdateInfo;
use crate::inode::{Inode, InodeKind};
use crate::store::InodeStore;
use sfs_types::{InodeId, NameKey, SnapshotId};
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub enum RefKind {
    /// Anonymous counting node; the only reference kind that owns the
    /// edge to a non-reference inode.
    WithCount {
        count: u32,
        /// The `WithName` referrers, kept for source-side snapshot
        /// bookkeeping after the destination catches up.
        with_names: Vec<InodeId>,
    },
    /// Immutable-name reference left at the source of the rename; the
    /// frozen name lives in the inode record itself.
    WithName,
    /// Reference at the destination path, remembering the destination
    /// subtree's latest snapshot at rename time.
    DstReference { dst_snapshot: Option<SnapshotId> },
}

#[derive(Debug, Clone)]
pub struct RefNode {
    pub(crate) referred: InodeId,
    pub(crate) kind: RefKind,
}

impl RefNode {
    #[must_use]
    pub fn referred(&self) -> InodeId {
        self.referred
    }

    #[must_use]
    pub fn kind(&self) -> &RefKind {
        &self.kind
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        match &self.kind {
            RefKind::WithCount { count, .. } => *count,
            _ => 0,
        }
    }

    #[must_use]
    pub fn dst_snapshot(&self) -> Option<SnapshotId> {
        match &self.kind {
            RefKind::DstReference { dst_snapshot } => *dst_snapshot,
            _ => None,
        }
    }
}

impl InodeStore {
    /// Wrap a non-reference inode in a fresh `WithCount`.
    ///
    /// The count starts at zero and grows as referrers attach, so it is
    /// always exactly the number of `WithName` and `DstReference` nodes
    /// pointing here.
    pub fn wrap_with_count(&mut self, target: InodeId) -> InodeId {
        assert!(
            !self.node(target).is_reference(),
            "WithCount must wrap a non-reference inode, got {target:?}"
        );
        let wc = self.alloc(Inode::new_reference(
            RefNode {
                referred: target,
                kind: RefKind::WithCount {
                    count: 0,
                    with_names: Vec::new(),
                },
            },
            NameKey::root(),
        ));
        self.node_mut(target).parent_ref = Some(wc);
        trace!(target = target.0, with_count = wc.0, "ref_wrap_with_count");
        wc
    }

    /// Attach a `WithName` referrer preserving the source-side name.
    pub fn attach_with_name(&mut self, with_count: InodeId, name: NameKey) -> InodeId {
        let wn = self.alloc(Inode::new_reference(
            RefNode {
                referred: with_count,
                kind: RefKind::WithName,
            },
            name,
        ));
        match &mut self.node_mut(with_count).as_reference_mut().kind {
            RefKind::WithCount { count, with_names } => {
                *count += 1;
                with_names.push(wn);
            }
            other => panic!("attach_with_name on non-WithCount: {other:?}"),
        }
        trace!(with_count = with_count.0, with_name = wn.0, "ref_attach_with_name");
        wn
    }

    /// Attach a `DstReference` referrer for the rename destination.
    pub fn attach_dst_reference(
        &mut self,
        with_count: InodeId,
        name: NameKey,
        dst_snapshot: Option<SnapshotId>,
    ) -> InodeId {
        let dr = self.alloc(Inode::new_reference(
            RefNode {
                referred: with_count,
                kind: RefKind::DstReference { dst_snapshot },
            },
            name,
        ));
        match &mut self.node_mut(with_count).as_reference_mut().kind {
            RefKind::WithCount { count, .. } => *count += 1,
            other => panic!("attach_dst_reference on non-WithCount: {other:?}"),
        }
        trace!(with_count = with_count.0, dst_ref = dr.0, "ref_attach_dst");
        dr
    }

    /// Drop one referrer. At count zero the referred inode loses its last
    /// access path: its blocks are collected and both it and the
    /// `WithCount` leave the arena. Returns the remaining count.
    pub fn remove_reference(&mut self, reference: InodeId, collected: &mut BlocksMapUpdateInfo) -> u32 {
        let (with_count, is_with_count) = {
            let r = self.node(reference).as_reference();
            match r.kind {
                RefKind::WithCount { .. } => (reference, true),
                _ => (r.referred(), false),
            }
        };

        if !is_with_count {
            match &mut self.node_mut(with_count).as_reference_mut().kind {
                RefKind::WithCount { count, with_names } => {
                    assert!(*count > 0, "reference count underflow on {with_count:?}");
                    *count -= 1;
                    with_names.retain(|&w| w != reference);
                }
                other => panic!("referrer {reference:?} points at non-WithCount: {other:?}"),
            }
            self.remove(reference);
        }

        let remaining = self.node(with_count).as_reference().count();
        debug!(with_count = with_count.0, remaining, "ref_remove");
        if remaining == 0 {
            let target = self.node(with_count).as_reference().referred();
            self.node_mut(target).parent_ref = None;
            self.remove(with_count);
            self.destroy_and_collect(target, collected);
        }
        remaining
    }

    /// The snapshot a modification through this inode must record into.
    ///
    /// For an inode reached through a `DstReference`, the destination's
    /// latest snapshot wins only if it is newer than the snapshot recorded
    /// at rename time; otherwise the source side still covers the inode
    /// and its `WithName` referrers supply the latest source snapshot.
    #[must_use]
    pub fn record_snapshot_for(&self, stored: InodeId, path_latest: Option<SnapshotId>) -> Option<SnapshotId> {
        let node = self.node(stored);
        let InodeKind::Reference(r) = &node.kind else {
            return path_latest;
        };
        let RefKind::DstReference { dst_snapshot } = r.kind() else {
            return path_latest;
        };
        if path_latest > *dst_snapshot {
            return path_latest;
        }
        let with_count = r.referred();
        let source_latest = match &self.node(with_count).as_reference().kind {
            RefKind::WithCount { with_names, .. } => with_names
                .iter()
                .filter_map(|&wn| self.node(wn).parent)
                .filter_map(|p| match &self.node(p).kind {
                    InodeKind::Directory(d) => d.last_diff_snapshot(),
                    _ => None,
                })
                .max(),
            _ => None,
        };
        source_latest.max(path_latest)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileNode;
    use sfs_types::{BlockId, Permission};

    fn new_file(store: &mut InodeStore, name: &str, block: u64) -> InodeId {
        let file = FileNode::new(3, 1024).with_blocks(vec![BlockId(block)], 1024);
        store.alloc(Inode::new_file(
            NameKey::from(name),
            Permission::default(),
            100,
            file,
        ))
    }

    #[test]
    fn count_tracks_attached_referrers() {
        let mut store = InodeStore::new();
        let f = new_file(&mut store, "x", 1);
        let wc = store.wrap_with_count(f);
        assert_eq!(store.node(f).parent_reference(), Some(wc));

        let wn = store.attach_with_name(wc, NameKey::from("x"));
        assert_eq!(store.node(wc).as_reference().count(), 1);
        let dr = store.attach_dst_reference(wc, NameKey::from("y"), None);
        assert_eq!(store.node(wc).as_reference().count(), 2);

        assert_eq!(store.resolve(wn), f);
        assert_eq!(store.resolve(dr), f);
    }

    #[test]
    fn with_name_keeps_the_frozen_source_name() {
        let mut store = InodeStore::new();
        let f = new_file(&mut store, "x", 1);
        let wc = store.wrap_with_count(f);
        let wn = store.attach_with_name(wc, NameKey::from("x"));
        let dr = store.attach_dst_reference(wc, NameKey::from("y"), None);

        store.set_local_name(dr, NameKey::from("z"));
        assert_eq!(store.local_name(f), &NameKey::from("z"));
        assert_eq!(store.local_name(dr), &NameKey::from("z"));
        assert_eq!(store.local_name(wn), &NameKey::from("x"), "frozen");
    }

    #[test]
    #[should_panic(expected = "cannot rename WithName")]
    fn with_name_rejects_renaming() {
        let mut store = InodeStore::new();
        let f = new_file(&mut store, "x", 1);
        let wc = store.wrap_with_count(f);
        let wn = store.attach_with_name(wc, NameKey::from("x"));
        store.set_local_name(wn, NameKey::from("other"));
    }

    #[test]
    fn blocks_come_out_only_at_count_zero() {
        let mut store = InodeStore::new();
        let f = new_file(&mut store, "x", 42);
        let wc = store.wrap_with_count(f);
        let wn = store.attach_with_name(wc, NameKey::from("x"));
        let dr = store.attach_dst_reference(wc, NameKey::from("y"), None);

        let mut collected = BlocksMapUpdateInfo::new();
        assert_eq!(store.remove_reference(wn, &mut collected), 1);
        assert!(collected.is_empty());
        assert!(store.contains(f));

        assert_eq!(store.remove_reference(dr, &mut collected), 0);
        assert_eq!(collected.to_delete(), [BlockId(42)]);
        assert!(!store.contains(f));
        assert!(!store.contains(wc));
    }

    #[test]
    fn dst_reference_defers_to_the_newer_side() {
        let mut store = InodeStore::new();
        let f = new_file(&mut store, "x", 1);
        let wc = store.wrap_with_count(f);
        store.attach_with_name(wc, NameKey::from("x"));
        let dr = store.attach_dst_reference(wc, NameKey::from("y"), Some(SnapshotId(3)));

        // Destination caught up past the rename-time snapshot: it wins.
        assert_eq!(
            store.record_snapshot_for(dr, Some(SnapshotId(5))),
            Some(SnapshotId(5))
        );
        // Destination stale: with no source-side diffs recorded there is
        // nothing newer to record into.
        assert_eq!(store.record_snapshot_for(dr, Some(SnapshotId(2))), Some(SnapshotId(2)));
    }
}
