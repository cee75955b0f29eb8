//! The inode record and its kind variants.

use crate::dir::DirNode;
use crate::file::FileNode;
use crate::reference::RefNode;
use sfs_types::{InodeId, NameKey, Permission};

/// A single node of the namespace tree.
///
/// The common attributes live here; the variant payload carries what only
/// files, directories, or references have. Links to other inodes are
/// arena ids, never owning pointers.
#[derive(Debug, Clone)]
pub struct Inode {
    pub(crate) id: InodeId,
    pub(crate) name: NameKey,
    pub(crate) perm: Permission,
    pub(crate) mtime: u64,
    pub(crate) atime: u64,
    pub(crate) parent: Option<InodeId>,
    /// Back-pointer to the `WithCount` wrapping this inode, if any.
    pub(crate) parent_ref: Option<InodeId>,
    pub(crate) kind: InodeKind,
}

#[derive(Debug, Clone)]
pub enum InodeKind {
    File(FileNode),
    Directory(DirNode),
    Reference(RefNode),
}

impl Inode {
    #[must_use]
    pub fn new_file(name: NameKey, perm: Permission, mtime: u64, file: FileNode) -> Self {
        Self {
            id: InodeId(0),
            name,
            perm,
            mtime,
            atime: mtime,
            parent: None,
            parent_ref: None,
            kind: InodeKind::File(file),
        }
    }

    #[must_use]
    pub fn new_directory(name: NameKey, perm: Permission, mtime: u64) -> Self {
        Self {
            id: InodeId(0),
            name,
            perm,
            mtime,
            atime: mtime,
            parent: None,
            parent_ref: None,
            kind: InodeKind::Directory(DirNode::new()),
        }
    }

    pub(crate) fn new_reference(reference: RefNode, name: NameKey) -> Self {
        Self {
            id: InodeId(0),
            name,
            perm: Permission::default(),
            mtime: 0,
            atime: 0,
            parent: None,
            parent_ref: None,
            kind: InodeKind::Reference(reference),
        }
    }

    #[must_use]
    pub fn id(&self) -> InodeId {
        self.id
    }

    #[must_use]
    pub fn parent(&self) -> Option<InodeId> {
        self.parent
    }

    #[must_use]
    pub fn parent_reference(&self) -> Option<InodeId> {
        self.parent_ref
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        matches!(self.kind, InodeKind::File(_))
    }

    #[must_use]
    pub fn is_directory(&self) -> bool {
        matches!(self.kind, InodeKind::Directory(_))
    }

    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(self.kind, InodeKind::Reference(_))
    }

    #[must_use]
    pub fn kind(&self) -> &InodeKind {
        &self.kind
    }

    /// The file payload. Panics when the inode is not a file; callers
    /// dispatch on [`Inode::is_file`] first.
    #[must_use]
    pub fn as_file(&self) -> &FileNode {
        match &self.kind {
            InodeKind::File(f) => f,
            other => panic!("inode {:?} is not a file: {other:?}", self.id),
        }
    }

    pub(crate) fn as_file_mut(&mut self) -> &mut FileNode {
        match &mut self.kind {
            InodeKind::File(f) => f,
            _ => panic!("inode {:?} is not a file", self.id),
        }
    }

    /// The directory payload. Panics when the inode is not a directory.
    #[must_use]
    pub fn as_directory(&self) -> &DirNode {
        match &self.kind {
            InodeKind::Directory(d) => d,
            other => panic!("inode {:?} is not a directory: {other:?}", self.id),
        }
    }

    pub(crate) fn as_directory_mut(&mut self) -> &mut DirNode {
        match &mut self.kind {
            InodeKind::Directory(d) => d,
            _ => panic!("inode {:?} is not a directory", self.id),
        }
    }

    /// The reference payload. Panics when the inode is not a reference.
    #[must_use]
    pub fn as_reference(&self) -> &RefNode {
        match &self.kind {
            InodeKind::Reference(r) => r,
            other => panic!("inode {:?} is not a reference: {other:?}", self.id),
        }
    }

    pub(crate) fn as_reference_mut(&mut self) -> &mut RefNode {
        match &mut self.kind {
            InodeKind::Reference(r) => r,
            _ => panic!("inode {:?} is not a reference", self.id),
        }
    }
}
