#![forbid(unsafe_code)]
//! The diff primitive: an ordered (created, deleted) pair over a keyed
//! universe.
//!
//! A `Diff` records the change between a *prior* state and a *posterior*
//! state of a sorted, keyed collection:
//!
//! - `created`: elements present in the posterior state but not the prior;
//! - `deleted`: elements present in the prior state but not the posterior,
//!   each carrying the element value as of the prior state.
//!
//! Both lists are kept sorted by key. A key may appear in both at once:
//! that pair means the element was *replaced* between the two states — the
//! old value sits in `deleted`, the new one in `created` — and
//! [`Diff::apply_to_current`] reconstructs the prior list by dropping the
//! new element and restoring the old. A key in `deleted` alone with a
//! value different from the posterior element records an in-place
//! modification the same way.
//!
//! Every mutating operation returns an undo handle that restores the diff
//! exactly, so a caller that fails its own half of a compound mutation can
//! roll the diff back and keep the whole operation atomic.

use std::fmt;
use tracing::trace;

/// An element stored in a diff, sorted and addressed by its key.
pub trait Keyed {
    type Key: Ord + Clone + fmt::Debug;

    fn key(&self) -> &Self::Key;
}

/// Tri-valued answer about the prior state of a key.
#[derive(Debug, PartialEq, Eq)]
pub enum PriorAccess<'a, E> {
    /// The key existed in the prior state with this value.
    Found(&'a E),
    /// The key did not exist in the prior state.
    Absent,
    /// The diff has no record: the key is the same in prior and posterior
    /// states, and the caller must consult the posterior state.
    Unknown,
}

/// Undo handle for [`Diff::create`].
#[derive(Debug)]
pub enum UndoCreate<E> {
    /// The same element was restored out of `deleted`; undo re-inserts it.
    RemovedFromDeleted(E),
    /// The element was inserted into `created`; undo removes it.
    InsertedIntoCreated,
    /// `created` already held this key: a live element with that name
    /// exists, the caller's own insertion is about to fail, and nothing
    /// changed here.
    Unchanged,
}

/// Undo handle for [`Diff::delete`].
#[derive(Debug)]
pub struct UndoDelete<E> {
    kind: UndoDeleteKind,
    trashed: Option<E>,
    displaced: Option<E>,
}

#[derive(Debug)]
enum UndoDeleteKind {
    RemovedFromCreated,
    InsertedIntoDeleted,
    ReplacedInDeleted,
}

impl<E> UndoDelete<E> {
    /// The element this delete removed from `created`, if any.
    ///
    /// A non-`None` value means the deleted element had been created within
    /// this very diff: it is now unreachable from either endpoint of the
    /// diff, and the caller must clean it up — but only once its own live
    /// removal has actually succeeded.
    #[must_use]
    pub fn trashed(&self) -> Option<&E> {
        self.trashed.as_ref()
    }

    /// Consume the handle, yielding the trashed element for cleanup.
    #[must_use]
    pub fn into_trashed(self) -> Option<E> {
        self.trashed
    }

    /// The earlier capture this delete displaced from `deleted`, if any.
    /// The displaced element keeps whatever ownership it had; it is only
    /// needed back to reverse the operation.
    #[must_use]
    pub fn displaced(&self) -> Option<&E> {
        self.displaced.as_ref()
    }
}

/// Undo handle for [`Diff::modify`].
#[derive(Debug)]
pub enum UndoModify {
    /// The old value was inserted into `deleted`; undo removes it.
    InsertedIntoDeleted,
    /// The diff already determined the key; nothing changed.
    Unchanged,
}

/// The ordered (created, deleted) pair.
#[derive(Debug, Clone)]
pub struct Diff<E: Keyed> {
    created: Vec<E>,
    deleted: Vec<E>,
}

impl<E: Keyed> Default for Diff<E> {
    fn default() -> Self {
        Self {
            created: Vec::new(),
            deleted: Vec::new(),
        }
    }
}

impl<E: Keyed + Clone> Diff<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            created: Vec::new(),
            deleted: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.deleted.is_empty()
    }

    #[must_use]
    pub fn created(&self) -> &[E] {
        &self.created
    }

    #[must_use]
    pub fn deleted(&self) -> &[E] {
        &self.deleted
    }

    fn search(list: &[E], key: &E::Key) -> Result<usize, usize> {
        list.binary_search_by(|e| e.key().cmp(key))
    }

    /// Record the creation of `element` in the posterior state.
    pub fn create(&mut self, element: E) -> UndoCreate<E>
    where
        E: PartialEq,
    {
        let c = match Self::search(&self.created, element.key()) {
            Ok(_) => return UndoCreate::Unchanged,
            Err(c) => c,
        };
        match Self::search(&self.deleted, element.key()) {
            Ok(d) if self.deleted[d] == element => {
                // The exact element comes back: the prior and posterior
                // states agree again, so the record dissolves.
                let restored = self.deleted.remove(d);
                UndoCreate::RemovedFromDeleted(restored)
            }
            _ => {
                // A fresh creation, or a re-creation over a captured
                // deletion. Recording it either way lets prior-state
                // reconstruction drop the new element from older views;
                // the old capture, if any, stays in `deleted`.
                self.created.insert(c, element);
                UndoCreate::InsertedIntoCreated
            }
        }
    }

    /// Reverse a previous [`Diff::create`].
    pub fn undo_create(&mut self, key: &E::Key, undo: UndoCreate<E>) {
        match undo {
            UndoCreate::RemovedFromDeleted(element) => match Self::search(&self.deleted, key) {
                Ok(_) => panic!("undo_create: key {key:?} back in deleted"),
                Err(d) => self.deleted.insert(d, element),
            },
            UndoCreate::InsertedIntoCreated => {
                if let Ok(c) = Self::search(&self.created, key) {
                    self.created.remove(c);
                }
            }
            UndoCreate::Unchanged => {}
        }
    }

    /// Record the deletion of `current`, the element as of the posterior
    /// state immediately before this operation.
    pub fn delete(&mut self, current: E) -> UndoDelete<E> {
        match Self::search(&self.created, current.key()) {
            Ok(c) => {
                // Created within this diff and now deleted again: the entry
                // vanishes and the created element is handed back as trash.
                let trashed = self.created.remove(c);
                UndoDelete {
                    kind: UndoDeleteKind::RemovedFromCreated,
                    trashed: Some(trashed),
                    displaced: None,
                }
            }
            Err(_) => match Self::search(&self.deleted, current.key()) {
                Ok(d) => {
                    // An earlier modification already captured the prior
                    // state under this key. The entry switches to the
                    // element actually being removed; the displaced capture
                    // keeps whatever ownership it had and rides along only
                    // so undo can put it back.
                    let displaced = std::mem::replace(&mut self.deleted[d], current);
                    UndoDelete {
                        kind: UndoDeleteKind::ReplacedInDeleted,
                        trashed: None,
                        displaced: Some(displaced),
                    }
                }
                Err(d) => {
                    self.deleted.insert(d, current);
                    UndoDelete {
                        kind: UndoDeleteKind::InsertedIntoDeleted,
                        trashed: None,
                        displaced: None,
                    }
                }
            },
        }
    }

    /// Reverse a previous [`Diff::delete`].
    pub fn undo_delete(&mut self, key: &E::Key, undo: UndoDelete<E>) {
        match undo.kind {
            UndoDeleteKind::RemovedFromCreated => {
                let Some(trashed) = undo.trashed else {
                    panic!("undo_delete: missing trashed element for {key:?}");
                };
                match Self::search(&self.created, key) {
                    Ok(_) => panic!("undo_delete: key {key:?} back in created"),
                    Err(c) => self.created.insert(c, trashed),
                }
            }
            UndoDeleteKind::InsertedIntoDeleted => {
                if let Ok(d) = Self::search(&self.deleted, key) {
                    self.deleted.remove(d);
                }
            }
            UndoDeleteKind::ReplacedInDeleted => {
                let Some(displaced) = undo.displaced else {
                    panic!("undo_delete: missing displaced element for {key:?}");
                };
                match Self::search(&self.deleted, key) {
                    Ok(d) => self.deleted[d] = displaced,
                    Err(_) => panic!("undo_delete: key {key:?} no longer in deleted"),
                }
            }
        }
    }

    /// Record that the element with this key is about to be replaced,
    /// capturing `old` as the prior-state value.
    ///
    /// No-op when the diff already determines the key: either the prior
    /// value was captured earlier, or the element was created inside this
    /// diff and has no prior state to capture. Never touches `created`.
    pub fn modify(&mut self, old: E) -> UndoModify {
        if Self::search(&self.created, old.key()).is_ok() {
            return UndoModify::Unchanged;
        }
        match Self::search(&self.deleted, old.key()) {
            Ok(_) => UndoModify::Unchanged,
            Err(d) => {
                self.deleted.insert(d, old);
                UndoModify::InsertedIntoDeleted
            }
        }
    }

    /// Reverse a previous [`Diff::modify`].
    pub fn undo_modify(&mut self, key: &E::Key, undo: UndoModify) {
        if let UndoModify::InsertedIntoDeleted = undo {
            if let Ok(d) = Self::search(&self.deleted, key) {
                self.deleted.remove(d);
            }
        }
    }

    /// Answer what the prior state held for `key`, as far as this diff can
    /// tell on its own.
    #[must_use]
    pub fn access_previous(&self, key: &E::Key) -> PriorAccess<'_, E> {
        if let Ok(d) = Self::search(&self.deleted, key) {
            return PriorAccess::Found(&self.deleted[d]);
        }
        if Self::search(&self.created, key).is_ok() {
            return PriorAccess::Absent;
        }
        PriorAccess::Unknown
    }

    /// Fold a later diff into this one, so that this diff alone transforms
    /// the posterior state of `next` into the prior state of `self`.
    ///
    /// `processor` is invoked on every element that no endpoint of the
    /// combined diff can reach anymore: elements created in one state and
    /// gone again before the other, and stale captures superseded by an
    /// earlier one.
    ///
    /// Deletions are folded before creations — a later deletion may cancel
    /// a creation recorded here, and that must settle before the later
    /// diff's own re-creations merge in. The one combination no legal
    /// history produces (the same key created on both sides with nothing
    /// deleting it in between) panics: it means a corrupted diff chain.
    pub fn combine_posterior(&mut self, next: &Self, processor: &mut dyn FnMut(&E))
    where
        E: PartialEq,
    {
        for d in &next.deleted {
            match (
                Self::search(&self.created, d.key()),
                Self::search(&self.deleted, d.key()),
            ) {
                (Ok(c), _) => {
                    if self.created[c] == *d {
                        // Created here, deleted later: never visible at
                        // either endpoint of the combined diff.
                        let trashed = self.created.remove(c);
                        trace!(key = ?d.key(), "diff_combine_trash_created");
                        processor(&trashed);
                    } else {
                        // Created here, replaced later: the creation still
                        // stands and the later capture of it is stale —
                        // the combined prior state never held the key.
                        trace!(key = ?d.key(), "diff_combine_trash_stale_capture");
                        processor(d);
                    }
                }
                (Err(_), Ok(_)) => {
                    // This diff's own capture already describes the prior
                    // state; whatever the later diff recorded under the
                    // key is a newer incarnation no endpoint needs.
                    trace!(key = ?d.key(), "diff_combine_trash_recreated");
                    processor(d);
                }
                (Err(_), Err(at)) => self.deleted.insert(at, d.clone()),
            }
        }
        for c in &next.created {
            match Self::search(&self.created, c.key()) {
                Ok(_) => panic!("combine: key {:?} created in both diffs", c.key()),
                Err(at) => self.created.insert(at, c.clone()),
            }
        }
    }

    /// Produce the prior-state list from a posterior-state list: drop the
    /// entries in `created`, substitute or insert the entries in `deleted`
    /// at their sorted positions.
    #[must_use]
    pub fn apply_to_current(&self, current: &[E]) -> Vec<E> {
        let mut prior: Vec<E> = current
            .iter()
            .filter(|e| Self::search(&self.created, e.key()).is_err())
            .cloned()
            .collect();
        for d in &self.deleted {
            match Self::search(&prior, d.key()) {
                Ok(i) => prior[i] = d.clone(),
                Err(i) => prior.insert(i, d.clone()),
            }
        }
        prior
    }
}

impl<E: Keyed> PartialEq for Diff<E>
where
    E: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.created == other.created && self.deleted == other.deleted
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
