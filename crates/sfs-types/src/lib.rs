#![forbid(unsafe_code)]
//! Core value types for SnapFS.
//!
//! Identifier newtypes, the ordered byte `NameKey` used for directory
//! children and diff keys, path component split/join, and the permission
//! triple carried by every inode.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Path separator used by the namespace.
pub const SEPARATOR: char = '/';

/// The pseudo-component that diverts resolution into a snapshot view.
///
/// Matched ASCII case-insensitively; see [`NameKey::is_dot_snapshot`].
pub const DOT_SNAPSHOT_DIR: &[u8] = b".snapshot";

// ── Identifiers ─────────────────────────────────────────────────────────────

/// Stable 64-bit inode identity. Also the arena key of the inode store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeId(pub u64);

/// Identity of a data block owned by a file. The block payload lives in the
/// external block map; the engine only tracks ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u64);

/// Monotone snapshot identity. Ids are the serialization point: two
/// snapshots taken at the same wall-clock instant still have distinct ids,
/// and a larger id always means a later snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SnapshotId(pub u64);

// ── Name keys ───────────────────────────────────────────────────────────────

/// An ordered byte sequence naming a child within its parent directory.
///
/// Children are kept in ascending byte-lexicographic order of their name
/// keys, so `Ord` on `NameKey` is the ordering of every children list and
/// of every diff. A `NameKey` is not a string: it compares and sorts as raw
/// bytes, and only display paths go through lossy UTF-8.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NameKey(Vec<u8>);

impl NameKey {
    /// The empty key, used as the root directory's local name.
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Does this component equal the literal `.snapshot`?
    ///
    /// ASCII-only case folding; non-ASCII bytes never fold.
    #[must_use]
    pub fn is_dot_snapshot(&self) -> bool {
        self.0.eq_ignore_ascii_case(DOT_SNAPSHOT_DIR)
    }
}

impl From<&str> for NameKey {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl fmt::Display for NameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for NameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NameKey({})", String::from_utf8_lossy(&self.0))
    }
}

// ── Paths ───────────────────────────────────────────────────────────────────

/// Path parsing failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path is not absolute: {0}")]
    NotAbsolute(String),

    #[error("path contains an empty component: {0}")]
    EmptyComponent(String),
}

/// Split an absolute path into its name-key components.
///
/// The leading separator is consumed; `"/"` yields an empty component list.
/// Repeated separators and a single trailing separator are rejected rather
/// than normalized — callers are expected to hand in normalized paths.
pub fn split_path(path: &str) -> Result<Vec<NameKey>, PathError> {
    let Some(rest) = path.strip_prefix(SEPARATOR) else {
        return Err(PathError::NotAbsolute(path.to_owned()));
    };
    if rest.is_empty() {
        return Ok(Vec::new());
    }
    let mut components = Vec::new();
    for part in rest.split(SEPARATOR) {
        if part.is_empty() {
            return Err(PathError::EmptyComponent(path.to_owned()));
        }
        components.push(NameKey::from(part));
    }
    Ok(components)
}

/// Join name-key components back into an absolute path string.
#[must_use]
pub fn join_path(components: &[NameKey]) -> String {
    if components.is_empty() {
        return SEPARATOR.to_string();
    }
    let mut out = String::new();
    for c in components {
        out.push(SEPARATOR);
        out.push_str(&c.to_string());
    }
    out
}

// ── Permissions ─────────────────────────────────────────────────────────────

/// Owner, group, and mode bits of an inode.
///
/// The engine stores and copies permissions verbatim; evaluation is the
/// caller's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub user: String,
    pub group: String,
    pub mode: u16,
}

impl Permission {
    #[must_use]
    pub fn new(user: &str, group: &str, mode: u16) -> Self {
        Self {
            user: user.to_owned(),
            group: group.to_owned(),
            mode,
        }
    }
}

impl Default for Permission {
    fn default() -> Self {
        Self::new("snapfs", "supergroup", 0o755)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
