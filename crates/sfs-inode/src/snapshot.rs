//! Snapshottable directory state: the named snapshots a directory hosts.

use crate::store::InodeStore;
use sfs_types::{InodeId, NameKey, SnapshotId};
use tracing::info;

/// One named snapshot of a snapshottable directory.
#[derive(Debug, Clone)]
pub struct SnapshotHandle {
    pub id: SnapshotId,
    pub name: NameKey,
    /// Frozen shallow copy of the directory at creation time; its name is
    /// the snapshot name, so reconstructed paths read naturally.
    pub root: InodeId,
}

/// State a directory gains from `allow_snapshot`: the handles of its
/// snapshots, kept sorted by name (names are unique within a directory).
#[derive(Debug, Clone, Default)]
pub struct SnapshottableState {
    snapshots: Vec<SnapshotHandle>,
}

impl SnapshottableState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    #[must_use]
    pub fn snapshots(&self) -> &[SnapshotHandle] {
        &self.snapshots
    }

    #[must_use]
    pub fn find(&self, name: &NameKey) -> Option<&SnapshotHandle> {
        self.snapshots
            .binary_search_by(|h| h.name.cmp(name))
            .ok()
            .map(|i| &self.snapshots[i])
    }

    /// The most recently created snapshot, by id.
    #[must_use]
    pub fn last_snapshot(&self) -> Option<SnapshotId> {
        self.snapshots.iter().map(|h| h.id).max()
    }

    /// The greatest retained snapshot id strictly below `s`.
    #[must_use]
    pub fn prior_of(&self, s: SnapshotId) -> Option<SnapshotId> {
        self.snapshots.iter().map(|h| h.id).filter(|&id| id < s).max()
    }

    pub(crate) fn insert(&mut self, handle: SnapshotHandle) -> bool {
        match self.snapshots.binary_search_by(|h| h.name.cmp(&handle.name)) {
            Ok(_) => false,
            Err(at) => {
                self.snapshots.insert(at, handle);
                true
            }
        }
    }

    pub(crate) fn take(&mut self, name: &NameKey) -> Option<SnapshotHandle> {
        match self.snapshots.binary_search_by(|h| h.name.cmp(name)) {
            Ok(at) => Some(self.snapshots.remove(at)),
            Err(_) => None,
        }
    }
}

impl InodeStore {
    /// Permit snapshots on a directory. Attributes, identity, and children
    /// are untouched; idempotent when already allowed.
    pub fn allow_snapshot(&mut self, dir: InodeId) {
        let dir = self.resolve(dir);
        let d = self.node_mut(dir).as_directory_mut();
        if d.snapshottable.is_none() {
            d.snapshottable = Some(SnapshottableState::new());
            info!(dir = dir.0, "snapshot_allowed");
        }
    }

    /// Withdraw snapshot permission. Fails (returns `false`) while any
    /// snapshot is retained.
    pub fn disallow_snapshot(&mut self, dir: InodeId) -> bool {
        let dir = self.resolve(dir);
        let d = self.node_mut(dir).as_directory_mut();
        match &d.snapshottable {
            Some(state) if !state.is_empty() => false,
            Some(_) => {
                d.snapshottable = None;
                info!(dir = dir.0, "snapshot_disallowed");
                true
            }
            None => true,
        }
    }

    /// Record a freshly allocated snapshot on its directory: freeze the
    /// root copy, register the handle, and open the creation diff.
    ///
    /// The caller guarantees the directory is snapshottable and the name
    /// is unused.
    pub fn add_snapshot(&mut self, dir: InodeId, id: SnapshotId, name: NameKey) -> SnapshotHandle {
        let dir = self.resolve(dir);
        let root = self.snapshot_copy_of_directory(dir);
        self.node_mut(root).name = name.clone();
        let handle = SnapshotHandle {
            id,
            name: name.clone(),
            root,
        };
        let d = self.node_mut(dir).as_directory_mut();
        let state = d
            .snapshottable
            .as_mut()
            .unwrap_or_else(|| panic!("add_snapshot on non-snapshottable {dir:?}"));
        let inserted = state.insert(handle.clone());
        assert!(inserted, "snapshot name {name} already registered");
        self.add_snapshot_creation_diff(dir, id, root);
        info!(dir = dir.0, snapshot = id.0, name = %name, "snapshot_created");
        handle
    }

    /// Unregister a snapshot handle by name, leaving the diff chains to
    /// the cleanup pass.
    pub fn remove_snapshot_handle(&mut self, dir: InodeId, name: &NameKey) -> Option<SnapshotHandle> {
        let dir = self.resolve(dir);
        let d = self.node_mut(dir).as_directory_mut();
        let handle = d.snapshottable.as_mut()?.take(name)?;
        info!(dir = dir.0, snapshot = handle.id.0, name = %name, "snapshot_unregistered");
        Some(handle)
    }

    /// Rename a snapshot in place. `None` means the old name is not
    /// registered; `Some(false)` a collision on the new name.
    pub fn rename_snapshot(&mut self, dir: InodeId, old: &NameKey, new: NameKey) -> Option<bool> {
        let dir = self.resolve(dir);
        let d = self.node_mut(dir).as_directory_mut();
        let state = d.snapshottable.as_mut()?;
        if state.find(&new).is_some() {
            return Some(false);
        }
        let mut handle = state.take(old)?;
        handle.name = new.clone();
        let root = handle.root;
        let inserted = state.insert(handle);
        assert!(inserted, "rename collision slipped through for {new}");
        self.node_mut(root).name = new.clone();
        info!(dir = dir.0, old = %old, new = %new, "snapshot_renamed");
        Some(true)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
