//! Path resolution: from a component list to the inodes along the path,
//! diverting into snapshot views at the `.snapshot` pseudo-component.

use sfs_inode::InodeStore;
use sfs_types::{InodeId, NameKey, SnapshotId, join_path};

/// The inodes resolved for a requested path, plus the snapshot context the
/// walk picked up.
///
/// The first slot is always the namespace root. Missing trailing
/// components resolve to `None` slots rather than errors — presence checks
/// are the caller's job. The record is a read-only snapshot of the
/// resolution; nothing mutates it afterwards.
#[derive(Debug, Clone)]
pub struct INodesInPath {
    components: Vec<NameKey>,
    inodes: Vec<Option<InodeId>>,
    is_snapshot: bool,
    snapshot_root_index: Option<usize>,
    /// For snapshot paths, the snapshot named in the path; for live paths,
    /// the latest snapshot found on the way down.
    snapshot: Option<SnapshotId>,
}

impl INodesInPath {
    /// Number of inode slots (nulls included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inodes.is_empty()
    }

    /// The `i`-th resolved inode, if that component exists.
    #[must_use]
    pub fn inode(&self, i: usize) -> Option<InodeId> {
        self.inodes.get(i).copied().flatten()
    }

    /// The inode the full path names, if it exists.
    #[must_use]
    pub fn last_inode(&self) -> Option<InodeId> {
        self.inodes.last().copied().flatten()
    }

    /// The inode of the would-be parent of the last component.
    #[must_use]
    pub fn parent_inode(&self) -> Option<InodeId> {
        match self.inodes.len() {
            0 | 1 => None,
            n => self.inodes[n - 2],
        }
    }

    #[must_use]
    pub fn num_non_null(&self) -> usize {
        self.inodes.iter().take_while(|slot| slot.is_some()).count()
    }

    /// True once the walk crossed `.snapshot`.
    #[must_use]
    pub fn is_snapshot(&self) -> bool {
        self.is_snapshot
    }

    /// Index of the snapshot root inode within the slots, for snapshot
    /// paths that name a snapshot.
    #[must_use]
    pub fn snapshot_root_index(&self) -> Option<usize> {
        self.snapshot_root_index
    }

    /// For live paths: the most recent snapshot covering the path.
    #[must_use]
    pub fn latest_snapshot(&self) -> Option<SnapshotId> {
        if self.is_snapshot { None } else { self.snapshot }
    }

    /// For snapshot paths: the snapshot the path names.
    #[must_use]
    pub fn path_snapshot(&self) -> Option<SnapshotId> {
        if self.is_snapshot { self.snapshot } else { None }
    }

    /// The path as requested, reassembled.
    #[must_use]
    pub fn full_path(&self) -> String {
        join_path(&self.components)
    }

    /// Whether the path ends on the bare `.snapshot` component.
    #[must_use]
    pub fn is_dot_snapshot_dir(&self) -> bool {
        self.is_snapshot
            && self.snapshot.is_none()
            && self
                .components
                .last()
                .is_some_and(NameKey::is_dot_snapshot)
    }

    /// The name the last component asked for.
    #[must_use]
    pub fn last_component(&self) -> Option<&NameKey> {
        self.components.last()
    }
}

/// Walk the tree from `root` along `components`.
#[must_use]
pub fn resolve(store: &InodeStore, root: InodeId, components: Vec<NameKey>) -> INodesInPath {
    // One slot per component plus the root; crossing `.snapshot` consumes
    // a component without producing a slot of its own.
    let mut record = INodesInPath {
        components,
        inodes: vec![Some(root)],
        is_snapshot: false,
        snapshot_root_index: None,
        snapshot: None,
    };

    let mut capacity = record.components.len() + 1;
    let mut base: Option<InodeId> = Some(root);
    let mut i = 0;

    while i < record.components.len() {
        let Some(dir) = base else { break };
        let resolved = store.resolve(dir);
        if !store.node(resolved).is_directory() {
            break;
        }
        let dirnode = store.node(resolved).as_directory();

        // A snapshottable directory on a live path bumps the carried
        // latest snapshot.
        if !record.is_snapshot {
            if let Some(state) = dirnode.snapshottable() {
                if let Some(last) = state.last_snapshot() {
                    if record.snapshot.is_none_or(|s| s < last) {
                        record.snapshot = Some(last);
                    }
                }
            }
        }

        let component = &record.components[i];
        if component.is_dot_snapshot() && dirnode.is_snapshottable() && !record.is_snapshot {
            record.is_snapshot = true;
            capacity -= 1;
            if i == record.components.len() - 1 {
                // Bare `.snapshot`: the slots end at the snapshottable
                // directory, which has no child inode for it.
                break;
            }
            let name = record.components[i + 1].clone();
            match dirnode.snapshottable().and_then(|s| s.find(&name)) {
                Some(handle) => {
                    record.snapshot = Some(handle.id);
                    record.snapshot_root_index = Some(record.inodes.len());
                    record.inodes.push(Some(handle.root));
                    // Children of the snapshot root resolve through the
                    // live directory's diffs, not the frozen copy.
                    base = Some(resolved);
                }
                None => {
                    record.snapshot = None;
                    record.inodes.push(None);
                    base = None;
                }
            }
            i += 2;
            continue;
        }

        let child = store.get_child(resolved, component, record.path_snapshot());
        record.inodes.push(child);
        base = child;
        i += 1;
    }

    while record.inodes.len() < capacity {
        record.inodes.push(None);
    }
    record
}

// ── Tests ───────────────────────────────────────────────────────────────────
