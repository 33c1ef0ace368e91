//! Per-fd event slots and the changed-fd set.
//!
//! Registration and disinterest both mark the fd *changed*; before each
//! backend block the driver walks the changed set, recomputes desired
//! interest from the live events, and updates the backend only on a real
//! difference. Disinterest is detected through an at-trigger installed on
//! every registered event, so the backend can never hold stale interest.

use std::os::unix::io::RawFd;

use crate::event::Event;
use crate::FdAction;

#[derive(Default)]
pub(crate) struct FdSlot {
    /// Pending events, indexed by `FdAction`; several registrations per
    /// action accumulate and fire in registration order.
    events: [Vec<Event<(i32,)>>; 2],
    changed: bool,
}

pub(crate) struct FdTable {
    slots: Vec<FdSlot>,
    changed: Vec<RawFd>,
}

impl FdTable {
    pub(crate) fn new() -> FdTable {
        FdTable {
            slots: Vec::new(),
            changed: Vec::new(),
        }
    }

    pub(crate) fn expand(&mut self, fd: RawFd) {
        let need = fd as usize + 1;
        if self.slots.len() < need {
            self.slots.resize_with(need, FdSlot::default);
        }
    }

    pub(crate) fn add(&mut self, fd: RawFd, action: FdAction, e: Event<(i32,)>) {
        self.expand(fd);
        self.slots[fd as usize].events[action as usize].push(e);
    }

    pub(crate) fn push_change(&mut self, fd: RawFd) {
        if let Some(slot) = self.slots.get_mut(fd as usize) {
            if !slot.changed {
                slot.changed = true;
                self.changed.push(fd);
            }
        }
    }

    pub(crate) fn pop_change(&mut self) -> Option<RawFd> {
        let fd = self.changed.pop()?;
        self.slots[fd as usize].changed = false;
        Some(fd)
    }

    pub(crate) fn has_change(&self) -> bool {
        !self.changed.is_empty()
    }

    /// Prunes completed events and reports `(readable, writable)` interest.
    pub(crate) fn desired(&mut self, fd: RawFd) -> (bool, bool) {
        match self.slots.get_mut(fd as usize) {
            Some(slot) => {
                for events in slot.events.iter_mut() {
                    events.retain(|e| e.is_active());
                }
                (!slot.events[0].is_empty(), !slot.events[1].is_empty())
            }
            None => (false, false),
        }
    }

    /// Detaches the pending events for one action, for dispatch.
    pub(crate) fn take(&mut self, fd: RawFd, action: FdAction) -> Vec<Event<(i32,)>> {
        match self.slots.get_mut(fd as usize) {
            Some(slot) => std::mem::take(&mut slot.events[action as usize]),
            None => Vec::new(),
        }
    }

    /// Detaches every pending event on `fd`, read side first.
    pub(crate) fn take_all(&mut self, fd: RawFd) -> Vec<Event<(i32,)>> {
        match self.slots.get_mut(fd as usize) {
            Some(slot) => {
                let mut events = std::mem::take(&mut slot.events[0]);
                events.append(&mut slot.events[1]);
                events
            }
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Gather, Slot};

    #[test]
    fn desired_interest_follows_live_events() {
        let r = Gather::new();
        let slot = Slot::new();
        let mut fds = FdTable::new();

        let e = r.make_event((&slot,));
        fds.add(5, FdAction::Read, e.clone());
        fds.push_change(5);
        assert_eq!(fds.pop_change(), Some(5));
        assert_eq!(fds.desired(5), (true, false));

        e.trigger(0);
        assert_eq!(fds.desired(5), (false, false));
    }

    #[test]
    fn change_set_dedupes() {
        let mut fds = FdTable::new();
        fds.expand(3);
        fds.push_change(3);
        fds.push_change(3);
        assert_eq!(fds.pop_change(), Some(3));
        assert_eq!(fds.pop_change(), None);
    }
}
