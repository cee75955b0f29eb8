#![forbid(unsafe_code)]
//! The SnapFS namespace facade.
//!
//! One [`Namespace`] owns the inode arena, the root directory, and the
//! monotone snapshot id counter, and exposes the operation surface:
//! lookups, tree mutations, and snapshot management. The caller provides
//! write serialization (a single logical writer at a time); every
//! operation here is synchronous, in-memory, and either completes or
//! rolls back before surfacing an error.
//!
//! Paths of the form `…/<d>/.snapshot/<s>/…` resolve to the state of
//! `<d>` as of snapshot `<s>`; mutating operations on such paths are
//! rejected.

pub mod config;
pub mod resolver;

pub use config::NamespaceConfig;
pub use resolver::{INodesInPath, resolve};
pub use sfs_inode::{
    BlockMap, BlocksMapUpdateInfo, ChildRef, DirQuota, FileNode, Inode, InodeKind, InodeStore,
    RefKind, RemoveOutcome, SnapshotHandle,
};

use sfs_error::{Result, SnapError};
use sfs_types::{BlockId, InodeId, NameKey, Permission, SnapshotId, split_path};
use tracing::{debug, info};

/// Attributes of a file to be created.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub perm: Permission,
    /// Replication factor; the configured default when absent.
    pub replication: Option<u16>,
    /// Preferred block size; the configured default when absent.
    pub block_size: Option<u64>,
    /// Blocks the file owns from the start; they are marked in the block
    /// map against the new inode.
    pub blocks: Vec<BlockId>,
    pub size: u64,
}

/// One entry of the snapshottable-directory listing.
#[derive(Debug, Clone)]
pub struct SnapshottableDirStatus {
    pub path: String,
    pub dir: InodeId,
    pub snapshot_count: usize,
}

/// The in-memory namespace: inode arena, root, and snapshot id allocator.
#[derive(Debug)]
pub struct Namespace {
    store: InodeStore,
    root: InodeId,
    next_snapshot_id: u64,
    config: NamespaceConfig,
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new(NamespaceConfig::default())
    }
}

impl Namespace {
    #[must_use]
    pub fn new(config: NamespaceConfig) -> Self {
        let mut store = InodeStore::new();
        let root = store.alloc(Inode::new_directory(
            NameKey::root(),
            Permission::default(),
            0,
        ));
        Self {
            store,
            root,
            next_snapshot_id: 1,
            config,
        }
    }

    #[must_use]
    pub fn store(&self) -> &InodeStore {
        &self.store
    }

    #[must_use]
    pub fn root(&self) -> InodeId {
        self.root
    }

    #[must_use]
    pub fn config(&self) -> &NamespaceConfig {
        &self.config
    }

    // ── Resolution ──────────────────────────────────────────────────────

    /// Resolve a path. Missing components become `None` slots; only a
    /// malformed path is an error.
    pub fn lookup(&self, path: &str) -> Result<INodesInPath> {
        let components = split_path(path)?;
        Ok(resolve(&self.store, self.root, components))
    }

    fn lookup_for_write(&self, path: &str) -> Result<INodesInPath> {
        let iip = self.lookup(path)?;
        if iip.is_snapshot() {
            return Err(SnapError::SnapshotModification(path.to_owned()));
        }
        Ok(iip)
    }

    // ── Tree mutations ──────────────────────────────────────────────────

    /// Create every missing directory along `path`. Idempotent for fully
    /// existing directory paths.
    pub fn mkdirs(&mut self, path: &str, perm: &Permission, mtime: u64) -> Result<InodeId> {
        let components = split_path(path)?;
        for c in &components {
            self.check_component(c)?;
        }
        let iip = self.lookup_for_write(path)?;

        let mut cursor = self.root;
        let mut first_missing = components.len();
        for i in 0..components.len() {
            match iip.inode(i + 1) {
                Some(id) => {
                    if !self.store.node(self.store.resolve(id)).is_directory() {
                        return Err(SnapError::ParentNotDirectory(path.to_owned()));
                    }
                    cursor = id;
                }
                None => {
                    first_missing = i;
                    break;
                }
            }
        }

        let mut latest = self.store.record_snapshot_for(cursor, iip.latest_snapshot());
        for component in components.iter().skip(first_missing) {
            self.check_dir_capacity(cursor)?;
            let id = self
                .store
                .alloc(Inode::new_directory(component.clone(), perm.clone(), mtime));
            let added = self.store.add_child(cursor, id, latest)?;
            assert!(added, "mkdirs raced on component {component}");
            cursor = id;
            // Directories born after the snapshot have no prior state to
            // record.
            latest = None;
        }
        debug!(path, inode = cursor.0, "mkdirs");
        Ok(cursor)
    }

    /// Create a file. The parent directory must exist.
    pub fn create(
        &mut self,
        path: &str,
        opts: &CreateOptions,
        mtime: u64,
        block_map: &mut dyn BlockMap,
    ) -> Result<InodeId> {
        let components = split_path(path)?;
        let Some(name) = components.last().cloned() else {
            return Err(SnapError::Exists("/".to_owned()));
        };
        self.check_component(&name)?;
        let iip = self.lookup_for_write(path)?;
        if iip.last_inode().is_some() {
            return Err(SnapError::Exists(path.to_owned()));
        }
        let parent = iip
            .parent_inode()
            .ok_or_else(|| SnapError::ParentMissing(path.to_owned()))?;
        if !self.store.node(self.store.resolve(parent)).is_directory() {
            return Err(SnapError::ParentNotDirectory(path.to_owned()));
        }
        self.check_dir_capacity(parent)?;

        let file = FileNode::new(
            opts.replication.unwrap_or(self.config.default_replication),
            opts.block_size.unwrap_or(self.config.default_block_size),
        )
        .with_blocks(opts.blocks.clone(), opts.size);
        let id = self
            .store
            .alloc(Inode::new_file(name, opts.perm.clone(), mtime, file));

        let latest = self.store.record_snapshot_for(parent, iip.latest_snapshot());
        match self.store.add_child(parent, id, latest) {
            Ok(true) => {}
            Ok(false) => {
                let mut scratch = BlocksMapUpdateInfo::new();
                self.store.destroy_and_collect(id, &mut scratch);
                return Err(SnapError::Exists(path.to_owned()));
            }
            Err(e) => {
                let mut scratch = BlocksMapUpdateInfo::new();
                self.store.destroy_and_collect(id, &mut scratch);
                return Err(e);
            }
        }
        for &b in &opts.blocks {
            block_map.mark(b, id);
        }
        debug!(path, inode = id.0, size = opts.size, "file_created");
        Ok(id)
    }

    /// Delete a file or directory subtree, returning the blocks that may
    /// be released. Blocks still visible in a snapshot are retained.
    pub fn delete(&mut self, path: &str, mtime: u64) -> Result<BlocksMapUpdateInfo> {
        let iip = self.lookup_for_write(path)?;
        let stored = iip
            .last_inode()
            .ok_or_else(|| SnapError::NotFound(path.to_owned()))?;
        let parent = iip
            .parent_inode()
            .ok_or_else(|| SnapError::NotFound(path.to_owned()))?;
        let resolved = self.store.resolve(stored);

        if self.store.node(resolved).is_directory() {
            if let Some(offender) = self.find_snapshottable_with_snapshots(resolved) {
                return Err(SnapError::HasSnapshots(self.store.full_path_of(offender)));
            }
        }

        // The parent's diff records against the snapshot covering the
        // path. A reference child removed outside any covering snapshot
        // still keeps its source-side view alive through its count.
        let latest = iip.latest_snapshot();
        let mut collected = BlocksMapUpdateInfo::new();
        match self.store.remove_child(parent, stored, latest) {
            RemoveOutcome::NotFound => return Err(SnapError::NotFound(path.to_owned())),
            RemoveOutcome::Retained => {}
            RemoveOutcome::Unreachable => {
                self.store.destroy_and_collect(stored, &mut collected);
            }
        }
        self.store.set_modification_time(parent, mtime);
        info!(path, blocks = collected.len(), "deleted");
        Ok(collected)
    }

    /// Move `src` to `dst`. When the source subtree is still visible in a
    /// snapshot, reference nodes keep both access paths alive.
    pub fn rename(&mut self, src: &str, dst: &str, mtime: u64) -> Result<()> {
        let src_components = split_path(src)?;
        let dst_components = split_path(dst)?;
        if src_components.is_empty() {
            return Err(SnapError::NotFound(src.to_owned()));
        }
        let Some(dst_name) = dst_components.last().cloned() else {
            return Err(SnapError::Exists("/".to_owned()));
        };
        self.check_component(&dst_name)?;
        if dst_components.len() > src_components.len()
            && dst_components[..src_components.len()] == src_components[..]
        {
            return Err(SnapError::RenameIntoSubtree(dst.to_owned()));
        }

        let src_iip = self.lookup_for_write(src)?;
        let stored = src_iip
            .last_inode()
            .ok_or_else(|| SnapError::NotFound(src.to_owned()))?;
        let src_parent = src_iip
            .parent_inode()
            .ok_or_else(|| SnapError::NotFound(src.to_owned()))?;

        let dst_iip = self.lookup_for_write(dst)?;
        if dst_iip.last_inode().is_some() {
            return Err(SnapError::Exists(dst.to_owned()));
        }
        let dst_parent = dst_iip
            .parent_inode()
            .ok_or_else(|| SnapError::ParentMissing(dst.to_owned()))?;
        if !self.store.node(self.store.resolve(dst_parent)).is_directory() {
            return Err(SnapError::ParentNotDirectory(dst.to_owned()));
        }
        self.check_dir_capacity(dst_parent)?;
        self.store.verify_quota_for_add(dst_parent, stored)?;

        let src_latest = src_iip.latest_snapshot();
        let dst_latest = dst_iip.latest_snapshot();
        let mut scratch = BlocksMapUpdateInfo::new();

        let moved = if let Some(s) = src_latest {
            // The source stays visible under its old name through a
            // name-preserving reference; the destination gets a reference
            // remembering its own snapshot horizon.
            let underlying = self.store.resolve(stored);
            let with_count = if self.store.node(stored).is_reference() {
                self.store.node(stored).as_reference().referred()
            } else {
                self.store.wrap_with_count(underlying)
            };
            let src_name = self.store.local_name(stored).clone();
            let with_name = self.store.attach_with_name(with_count, src_name);
            self.store.replace_child(src_parent, stored, with_name);
            let outcome = self.store.remove_child(src_parent, with_name, Some(s));
            debug_assert!(matches!(outcome, RemoveOutcome::Retained));
            if stored != underlying {
                // The old destination reference of an earlier rename has
                // been displaced; the fresh WithName keeps the count > 0.
                self.store.remove_reference(stored, &mut scratch);
            }
            self.store.set_local_name(underlying, dst_name.clone());
            self.store
                .attach_dst_reference(with_count, dst_name.clone(), dst_latest)
        } else {
            let outcome = self.store.remove_child(src_parent, stored, None);
            if matches!(outcome, RemoveOutcome::NotFound) {
                return Err(SnapError::NotFound(src.to_owned()));
            }
            self.store.set_local_name(stored, dst_name.clone());
            stored
        };

        let added = self.store.add_child(dst_parent, moved, dst_latest)?;
        assert!(added, "rename destination {dst} vanished mid-operation");
        self.store.set_modification_time(src_parent, mtime);
        self.store.set_modification_time(dst_parent, mtime);
        info!(src, dst, "renamed");
        Ok(())
    }

    // ── Attribute operations ────────────────────────────────────────────

    /// Update modification and/or access time.
    pub fn set_times(&mut self, path: &str, mtime: Option<u64>, atime: Option<u64>) -> Result<()> {
        let iip = self.lookup_for_write(path)?;
        let stored = iip
            .last_inode()
            .ok_or_else(|| SnapError::NotFound(path.to_owned()))?;
        self.record_modification(&iip);
        if let Some(m) = mtime {
            self.store.set_modification_time(stored, m);
        }
        if let Some(a) = atime {
            self.store.set_access_time(stored, a);
        }
        Ok(())
    }

    /// Replace the permission triple.
    pub fn set_permission(&mut self, path: &str, perm: Permission) -> Result<()> {
        let iip = self.lookup_for_write(path)?;
        let stored = iip
            .last_inode()
            .ok_or_else(|| SnapError::NotFound(path.to_owned()))?;
        self.record_modification(&iip);
        self.store.set_permission(stored, perm);
        Ok(())
    }

    /// Change a file's replication factor.
    pub fn set_replication(&mut self, path: &str, replication: u16) -> Result<()> {
        let iip = self.lookup_for_write(path)?;
        let stored = iip
            .last_inode()
            .ok_or_else(|| SnapError::NotFound(path.to_owned()))?;
        if !self.store.node(self.store.resolve(stored)).is_file() {
            return Err(SnapError::IsDirectory(path.to_owned()));
        }
        self.record_modification(&iip);
        self.store.set_replication(stored, replication);
        Ok(())
    }

    /// Make a directory a quota directory.
    pub fn set_quota(&mut self, path: &str, quota: DirQuota) -> Result<()> {
        let iip = self.lookup_for_write(path)?;
        let stored = iip
            .last_inode()
            .ok_or_else(|| SnapError::NotFound(path.to_owned()))?;
        if !self.store.node(self.store.resolve(stored)).is_directory() {
            return Err(SnapError::NotDirectory(path.to_owned()));
        }
        self.store.set_quota(stored, quota);
        Ok(())
    }

    /// Capture the pre-modification state of the path target into the
    /// snapshot that covers it, if any.
    fn record_modification(&mut self, iip: &INodesInPath) {
        let Some(stored) = iip.last_inode() else {
            return;
        };
        let Some(s) = self.store.record_snapshot_for(stored, iip.latest_snapshot()) else {
            return;
        };
        let resolved = self.store.resolve(stored);
        if self.store.node(resolved).is_directory() {
            self.store.save_self_to_snapshot(resolved, Some(s), None);
        } else if self.store.node(stored).is_reference() {
            // A renamed file records into its own diff list; the covering
            // snapshot lives on the source side of the rename.
            self.store.save_file_to_snapshot(resolved, s);
        } else if let Some(parent) = iip.parent_inode() {
            self.store.save_child_to_snapshot(parent, stored, s);
        } else {
            self.store.save_file_to_snapshot(resolved, s);
        }
    }

    // ── Snapshot operations ─────────────────────────────────────────────

    /// Permit snapshots on a directory.
    pub fn allow_snapshot(&mut self, path: &str) -> Result<()> {
        let dir = self.directory_at(path)?;
        self.store.allow_snapshot(dir);
        Ok(())
    }

    /// Withdraw snapshot permission; fails while snapshots are retained.
    pub fn disallow_snapshot(&mut self, path: &str) -> Result<()> {
        let dir = self.directory_at(path)?;
        if !self.store.disallow_snapshot(dir) {
            return Err(SnapError::HasSnapshots(path.to_owned()));
        }
        Ok(())
    }

    /// Take a named snapshot of a snapshottable directory.
    pub fn create_snapshot(&mut self, path: &str, name: &str) -> Result<SnapshotHandle> {
        let dir = self.directory_at(path)?;
        let name_key = NameKey::from(name);
        self.check_component(&name_key)?;
        let state = self
            .store
            .node(dir)
            .as_directory()
            .snapshottable()
            .ok_or_else(|| SnapError::NotSnapshottable(path.to_owned()))?;
        if state.find(&name_key).is_some() {
            return Err(SnapError::SnapshotNameExists {
                dir: path.to_owned(),
                name: name.to_owned(),
            });
        }
        let id = SnapshotId(self.next_snapshot_id);
        self.next_snapshot_id += 1;
        Ok(self.store.add_snapshot(dir, id, name_key))
    }

    /// Rename a snapshot.
    pub fn rename_snapshot(&mut self, path: &str, old: &str, new: &str) -> Result<()> {
        let dir = self.directory_at(path)?;
        if !self.store.node(dir).as_directory().is_snapshottable() {
            return Err(SnapError::NotSnapshottable(path.to_owned()));
        }
        let new_key = NameKey::from(new);
        self.check_component(&new_key)?;
        match self
            .store
            .rename_snapshot(dir, &NameKey::from(old), new_key)
        {
            Some(true) => Ok(()),
            Some(false) => Err(SnapError::SnapshotNameExists {
                dir: path.to_owned(),
                name: new.to_owned(),
            }),
            None => Err(SnapError::SnapshotNotFound {
                dir: path.to_owned(),
                name: old.to_owned(),
            }),
        }
    }

    /// Delete a named snapshot, returning the blocks that became
    /// unreachable.
    pub fn delete_snapshot(&mut self, path: &str, name: &str) -> Result<BlocksMapUpdateInfo> {
        let dir = self.directory_at(path)?;
        if !self.store.node(dir).as_directory().is_snapshottable() {
            return Err(SnapError::NotSnapshottable(path.to_owned()));
        }
        let handle = self
            .store
            .remove_snapshot_handle(dir, &NameKey::from(name))
            .ok_or_else(|| SnapError::SnapshotNotFound {
                dir: path.to_owned(),
                name: name.to_owned(),
            })?;
        let prior = self
            .store
            .node(dir)
            .as_directory()
            .snapshottable()
            .and_then(|s| s.prior_of(handle.id));
        let mut collected = BlocksMapUpdateInfo::new();
        self.store.clean_subtree(dir, handle.id, prior, &mut collected);
        info!(path, name, blocks = collected.len(), "snapshot_deleted");
        Ok(collected)
    }

    /// The snapshot names a directory currently hosts, in name order.
    pub fn snapshot_names(&self, path: &str) -> Result<Vec<String>> {
        let dir = self.directory_at(path)?;
        let state = self
            .store
            .node(dir)
            .as_directory()
            .snapshottable()
            .ok_or_else(|| SnapError::NotSnapshottable(path.to_owned()))?;
        Ok(state
            .snapshots()
            .iter()
            .map(|h| h.name.to_string())
            .collect())
    }

    /// Every snapshottable directory in the namespace.
    #[must_use]
    pub fn list_snapshottable(&self) -> Vec<SnapshottableDirStatus> {
        let mut out = Vec::new();
        self.collect_snapshottable(self.root, &mut out);
        out
    }

    // ── Listing ─────────────────────────────────────────────────────────

    /// Names under a directory path. A bare `…/.snapshot` path lists the
    /// snapshot names of its directory.
    pub fn list_children(&self, path: &str) -> Result<Vec<String>> {
        let iip = self.lookup(path)?;
        if iip.is_dot_snapshot_dir() {
            let dir = iip
                .last_inode()
                .ok_or_else(|| SnapError::NotFound(path.to_owned()))?;
            let state = self
                .store
                .node(self.store.resolve(dir))
                .as_directory()
                .snapshottable()
                .ok_or_else(|| SnapError::NotSnapshottable(path.to_owned()))?;
            return Ok(state
                .snapshots()
                .iter()
                .map(|h| h.name.to_string())
                .collect());
        }
        let stored = iip
            .last_inode()
            .ok_or_else(|| SnapError::NotFound(path.to_owned()))?;
        // A snapshot root is a frozen attribute copy; its children live in
        // the diff chain of the snapshottable directory itself.
        let base = if iip.snapshot_root_index() == Some(iip.len() - 1) && iip.len() >= 2 {
            iip.inode(iip.len() - 2)
                .ok_or_else(|| SnapError::NotFound(path.to_owned()))?
        } else {
            stored
        };
        let resolved = self.store.resolve(base);
        if !self.store.node(resolved).is_directory() {
            return Err(SnapError::NotDirectory(path.to_owned()));
        }
        Ok(self
            .store
            .children_list(resolved, iip.path_snapshot())
            .into_iter()
            .map(|c| self.store.local_name(c).to_string())
            .collect())
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    fn directory_at(&self, path: &str) -> Result<InodeId> {
        let iip = self.lookup(path)?;
        let stored = iip
            .last_inode()
            .ok_or_else(|| SnapError::NotFound(path.to_owned()))?;
        let resolved = self.store.resolve(stored);
        if !self.store.node(resolved).is_directory() {
            return Err(SnapError::NotDirectory(path.to_owned()));
        }
        Ok(resolved)
    }

    fn check_component(&self, name: &NameKey) -> Result<()> {
        if name.len() > self.config.max_component_length {
            return Err(SnapError::ComponentTooLong {
                len: name.len(),
                limit: self.config.max_component_length,
            });
        }
        Ok(())
    }

    fn check_dir_capacity(&self, dir: InodeId) -> Result<()> {
        let resolved = self.store.resolve(dir);
        let d = self.store.node(resolved).as_directory();
        if d.children().len() >= self.config.max_directory_items {
            return Err(SnapError::DirectoryItemLimit {
                dir: self.store.full_path_of(resolved),
                limit: self.config.max_directory_items,
            });
        }
        Ok(())
    }

    fn find_snapshottable_with_snapshots(&self, dir: InodeId) -> Option<InodeId> {
        let resolved = self.store.resolve(dir);
        let node = self.store.node(resolved);
        if let InodeKind::Directory(d) = node.kind() {
            if d.snapshottable().is_some_and(|s| !s.is_empty()) {
                return Some(resolved);
            }
            for &child in d.children() {
                if let Some(found) = self.find_snapshottable_with_snapshots(child) {
                    return Some(found);
                }
            }
        }
        None
    }

    fn collect_snapshottable(&self, dir: InodeId, out: &mut Vec<SnapshottableDirStatus>) {
        let resolved = self.store.resolve(dir);
        if let InodeKind::Directory(d) = self.store.node(resolved).kind() {
            if let Some(state) = d.snapshottable() {
                out.push(SnapshottableDirStatus {
                    path: self.store.full_path_of(resolved),
                    dir: resolved,
                    snapshot_count: state.len(),
                });
            }
            for &child in d.children() {
                self.collect_snapshottable(child, out);
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
