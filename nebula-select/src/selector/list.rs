use super::watched::{Membership, Watched};
use crate::utils::Slab;

use std::collections::TryReserveError;
use std::os::fd::RawFd;
use std::rc::Rc;

/// A list of watched descriptors backed by a [`Slab`].
///
/// Each record remembers its own slot, so removal is O(1). The list never
/// hands out a live iterator: callers take a [`snapshot`](Self::snapshot)
/// and re-check [`contains`](Self::contains) before visiting each element,
/// because visiting one element may run a callback that removes another.
pub(crate) struct WatchList {
    slab: Slab<Rc<Watched>>,
    membership: Membership,
}

impl WatchList {
    pub(crate) fn new(membership: Membership) -> Self {
        Self {
            slab: Slab::new(0),
            membership,
        }
    }

    /// Makes sure the next [`insert`](Self::insert) cannot fail.
    pub(crate) fn reserve(&mut self) -> Result<(), TryReserveError> {
        self.slab.reserve_one()
    }

    /// Adds `watched` to this list and returns its slot.
    pub(crate) fn insert(&mut self, watched: Rc<Watched>) -> Result<usize, TryReserveError> {
        let record = watched.clone();
        let slot = self.slab.try_insert(watched).map_err(|(_, e)| e)?;

        record.set_slot(slot);
        record.set_state(self.membership);

        Ok(slot)
    }

    /// Removes `watched` from this list, returning the list's reference.
    pub(crate) fn remove(&mut self, watched: &Watched) -> Option<Rc<Watched>> {
        if !self.contains(watched) {
            return None;
        }

        let removed = self.slab.remove(watched.slot())?;
        removed.set_state(Membership::Detached);

        Some(removed)
    }

    /// Returns `true` if `watched` is currently a member of this list.
    pub(crate) fn contains(&self, watched: &Watched) -> bool {
        watched.state() == self.membership
            && self
                .slab
                .get(watched.slot())
                .is_some_and(|w| std::ptr::eq(Rc::as_ptr(w), watched))
    }

    pub(crate) fn get(&self, slot: usize) -> Option<&Rc<Watched>> {
        self.slab.get(slot)
    }

    /// Clones every member, in slot order.
    pub(crate) fn snapshot(&self) -> Vec<Rc<Watched>> {
        self.slab.iter().map(|(_, w)| w.clone()).collect()
    }

    /// Clones every active member owned by `owner` (and on `fd`, if given).
    pub(crate) fn matching(&self, owner: *const (), fd: Option<RawFd>) -> Vec<Rc<Watched>> {
        self.slab
            .iter()
            .map(|(_, w)| w)
            .filter(|w| w.matches(owner, fd))
            .cloned()
            .collect()
    }

    /// Removes every member.
    pub(crate) fn drain(&mut self) -> Vec<Rc<Watched>> {
        let drained = self.slab.drain();
        for w in &drained {
            w.set_state(Membership::Detached);
        }
        drained
    }

    pub(crate) fn len(&self) -> usize {
        self.slab.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slab.len() == 0
    }
}
