//! The inode arena.
//!
//! Every inode of the namespace, live or frozen into a snapshot, lives in
//! one `BTreeMap` keyed by a monotonically allocated [`InodeId`]. Removal
//! is explicit: a node is dropped from the arena only by the destroy path
//! once nothing (live tree, snapshot diff, reference) can reach it.

use crate::inode::{Inode, InodeKind};
use crate::reference::RefKind;
use sfs_types::{InodeId, NameKey, Permission, SnapshotId};
use std::collections::BTreeMap;
use tracing::trace;

#[derive(Debug, Default)]
pub struct InodeStore {
    nodes: BTreeMap<InodeId, Inode>,
    next_id: u64,
}

impl InodeStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Insert a new inode, assigning it the next identity.
    pub fn alloc(&mut self, mut inode: Inode) -> InodeId {
        let id = InodeId(self.next_id);
        self.next_id += 1;
        inode.id = id;
        self.nodes.insert(id, inode);
        trace!(inode = id.0, "inode_alloc");
        id
    }

    /// Fetch a node. A missing id is a corrupted link and panics.
    #[must_use]
    pub fn node(&self, id: InodeId) -> &Inode {
        self.nodes
            .get(&id)
            .unwrap_or_else(|| panic!("dangling inode id {id:?}"))
    }

    pub(crate) fn node_mut(&mut self, id: InodeId) -> &mut Inode {
        self.nodes
            .get_mut(&id)
            .unwrap_or_else(|| panic!("dangling inode id {id:?}"))
    }

    #[must_use]
    pub fn contains(&self, id: InodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drop a node from the arena. Only the destroy path calls this, after
    /// collecting the node's blocks and unlinking it everywhere.
    pub(crate) fn remove(&mut self, id: InodeId) -> Inode {
        trace!(inode = id.0, "inode_remove");
        self.nodes
            .remove(&id)
            .unwrap_or_else(|| panic!("removing unknown inode {id:?}"))
    }

    // ── Reference resolution ────────────────────────────────────────────

    /// Follow reference links down to the non-reference inode.
    #[must_use]
    pub fn resolve(&self, id: InodeId) -> InodeId {
        let mut cur = id;
        loop {
            match &self.node(cur).kind {
                InodeKind::Reference(r) => cur = r.referred(),
                _ => return cur,
            }
        }
    }

    /// The local name of an inode as seen from its parent.
    ///
    /// A `WithName` reference answers with its own frozen name; other
    /// references delegate to the referred inode.
    #[must_use]
    pub fn local_name(&self, id: InodeId) -> &NameKey {
        let node = self.node(id);
        match &node.kind {
            InodeKind::Reference(r) if matches!(r.kind(), RefKind::WithName) => &node.name,
            InodeKind::Reference(_) => self.local_name(self.resolve(id)),
            _ => &node.name,
        }
    }

    /// Rename an inode in place. Forbidden on `WithName` references, whose
    /// name is frozen evidence for the snapshot view.
    pub fn set_local_name(&mut self, id: InodeId, name: NameKey) {
        if let InodeKind::Reference(r) = &self.node(id).kind {
            assert!(
                !matches!(r.kind(), RefKind::WithName),
                "cannot rename WithName reference {id:?}"
            );
            let referred = r.referred();
            self.set_local_name(referred, name);
            return;
        }
        self.node_mut(id).name = name;
    }

    /// Absolute live path of an inode, reconstructed through parent links.
    #[must_use]
    pub fn full_path_of(&self, id: InodeId) -> String {
        let mut names: Vec<NameKey> = Vec::new();
        let mut cursor = Some(self.resolve(id));
        while let Some(cur) = cursor {
            let node = self.node(cur);
            if node.parent.is_none() {
                break;
            }
            names.push(node.name.clone());
            cursor = node.parent;
        }
        names.reverse();
        sfs_types::join_path(&names)
    }

    /// Render the live subtree as an indented listing, for diagnostics and
    /// test failure output.
    #[must_use]
    pub fn dump_tree(&self, root: InodeId) -> String {
        let mut out = String::new();
        self.dump_node(root, "", true, &mut out);
        out
    }

    fn dump_node(&self, id: InodeId, prefix: &str, last: bool, out: &mut String) {
        let name = self.local_name(id);
        let label = if name.is_empty() {
            "/".to_owned()
        } else {
            name.to_string()
        };
        let kind = match &self.node(self.resolve(id)).kind {
            InodeKind::File(f) => format!("file, {} blocks", f.blocks().len()),
            InodeKind::Directory(d) if d.is_snapshottable() => "dir, snapshottable".to_owned(),
            InodeKind::Directory(_) => "dir".to_owned(),
            InodeKind::Reference(_) => unreachable!("resolved inode is a reference"),
        };
        out.push_str(prefix);
        out.push_str(if last { "\\- " } else { "+- " });
        out.push_str(&format!("{label}   ({kind}, id={})\n", self.node(id).id.0));

        let resolved = self.resolve(id);
        if let InodeKind::Directory(d) = &self.node(resolved).kind {
            let children = d.children();
            let deeper = format!("{prefix}  ");
            for (i, &child) in children.iter().enumerate() {
                self.dump_node(child, &deeper, i + 1 == children.len(), out);
            }
        }
    }

    // ── Snapshot-parameterized attribute reads ──────────────────────────

    /// The inode whose attributes answer for `id` in the given snapshot:
    /// the nearest frozen copy at or after the snapshot, or the live inode
    /// when no copy was ever taken.
    #[must_use]
    pub fn attribute_source(&self, id: InodeId, snapshot: Option<SnapshotId>) -> InodeId {
        let id = self.resolve(id);
        let Some(s) = snapshot else {
            return id;
        };
        let node = self.node(id);
        match &node.kind {
            InodeKind::Directory(d) => d.attribute_source(s).unwrap_or(id),
            InodeKind::File(f) => f.attribute_source(s).unwrap_or(id),
            InodeKind::Reference(_) => unreachable!("resolved inode is a reference"),
        }
    }

    #[must_use]
    pub fn modification_time(&self, id: InodeId, snapshot: Option<SnapshotId>) -> u64 {
        self.node(self.attribute_source(id, snapshot)).mtime
    }

    #[must_use]
    pub fn access_time(&self, id: InodeId, snapshot: Option<SnapshotId>) -> u64 {
        self.node(self.attribute_source(id, snapshot)).atime
    }

    #[must_use]
    pub fn permission(&self, id: InodeId, snapshot: Option<SnapshotId>) -> &Permission {
        &self.node(self.attribute_source(id, snapshot)).perm
    }

    // ── Attribute writes (live state only) ──────────────────────────────

    pub fn set_modification_time(&mut self, id: InodeId, mtime: u64) {
        let id = self.resolve(id);
        self.node_mut(id).mtime = mtime;
    }

    pub fn set_access_time(&mut self, id: InodeId, atime: u64) {
        let id = self.resolve(id);
        self.node_mut(id).atime = atime;
    }

    pub fn set_permission(&mut self, id: InodeId, perm: Permission) {
        let id = self.resolve(id);
        self.node_mut(id).perm = perm;
    }

    // ── Frozen copies ───────────────────────────────────────────────────

    /// Take a shallow attribute copy of a directory: same name and
    /// attributes, no children of its own (historical children are always
    /// resolved through the diff chain of the live directory).
    pub(crate) fn snapshot_copy_of_directory(&mut self, dir: InodeId) -> InodeId {
        let src = self.node(dir);
        let mut copy = Inode::new_directory(src.name.clone(), src.perm.clone(), src.mtime);
        copy.atime = src.atime;
        copy.parent = src.parent;
        let copy_id = self.alloc(copy);
        trace!(dir = dir.0, copy = copy_id.0, "dir_snapshot_copy");
        copy_id
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileNode;
    use sfs_types::BlockId;

    #[test]
    fn allocation_hands_out_monotone_ids() {
        let mut store = InodeStore::new();
        let a = store.alloc(Inode::new_directory(
            NameKey::root(),
            Permission::default(),
            0,
        ));
        let b = store.alloc(Inode::new_directory(
            NameKey::from("b"),
            Permission::default(),
            0,
        ));
        assert!(a < b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn full_path_climbs_parent_links() {
        let mut store = InodeStore::new();
        let root = store.alloc(Inode::new_directory(
            NameKey::root(),
            Permission::default(),
            0,
        ));
        let a = store.alloc(Inode::new_directory(
            NameKey::from("a"),
            Permission::default(),
            0,
        ));
        store.add_child(root, a, None).unwrap();
        let f = store.alloc(Inode::new_file(
            NameKey::from("f"),
            Permission::default(),
            0,
            FileNode::new(1, 1024).with_blocks(vec![BlockId(1)], 10),
        ));
        store.add_child(a, f, None).unwrap();

        assert_eq!(store.full_path_of(f), "/a/f");
        assert_eq!(store.full_path_of(root), "/");
    }

    #[test]
    fn attribute_reads_answer_from_the_frozen_copy() {
        let mut store = InodeStore::new();
        let f = store.alloc(Inode::new_file(
            NameKey::from("f"),
            Permission::default(),
            100,
            FileNode::new(1, 1024),
        ));
        store.save_file_to_snapshot(f, SnapshotId(1)).unwrap();
        store.set_modification_time(f, 999);

        assert_eq!(store.modification_time(f, Some(SnapshotId(1))), 100);
        assert_eq!(store.modification_time(f, None), 999);
    }
}
