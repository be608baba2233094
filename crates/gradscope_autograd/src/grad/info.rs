use super::{key::GradKeyInner, node::GradSlotPtr};
use smallvec::SmallVec;
use std::rc::{Rc, Weak};

/// Per-key linkage record: where this tensor's gradient accumulates under one key.
#[derive(Clone)]
pub(crate) struct GradInfo {
    pub(crate) key: Weak<GradKeyInner>,
    pub(crate) slot: GradSlotPtr,
}

/// The linkage records of one tensor, at most one per gradient key.
#[derive(Clone, Default)]
pub(crate) struct GradInfoCollection {
    entries: SmallVec<[GradInfo; 1]>,
}

impl GradInfoCollection {
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &GradInfo> {
        self.entries.iter()
    }

    pub(crate) fn get(&self, key: &Rc<GradKeyInner>) -> Option<&GradSlotPtr> {
        self.entries
            .iter()
            .find(|e| std::ptr::eq(e.key.as_ptr(), Rc::as_ptr(key)))
            .map(|e| &e.slot)
    }

    pub(crate) fn contains(&self, key: &Rc<GradKeyInner>) -> bool {
        self.get(key).is_some()
    }

    /// Replaces any previous record for `key`.
    pub(crate) fn insert(&mut self, key: &Rc<GradKeyInner>, slot: GradSlotPtr) {
        self.remove_ptr(Rc::as_ptr(key));
        self.entries.push(GradInfo {
            key: Rc::downgrade(key),
            slot,
        });
    }

    pub(crate) fn remove_ptr(&mut self, key: *const GradKeyInner) -> Option<GradSlotPtr> {
        let pos = self.entries.iter().position(|e| std::ptr::eq(e.key.as_ptr(), key))?;
        Some(self.entries.remove(pos).slot)
    }

    /// Unlinks records whose key is gone or already finalized and hands them back.
    ///
    /// Keys that are merely blocked by a running backward stay linked. The
    /// caller drops the returned records after releasing its borrow, since
    /// that may free whole nodes.
    #[must_use]
    pub(crate) fn shrink(&mut self) -> Vec<GradInfo> {
        let (live, stale): (SmallVec<[GradInfo; 1]>, SmallVec<[GradInfo; 1]>) = self
            .entries
            .drain(..)
            .partition(|e| e.key.upgrade().map(|k| k.is_active()).unwrap_or(false));
        self.entries = live;
        stale.into_vec()
    }
}
