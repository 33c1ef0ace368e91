use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::Location;
use std::rc::Rc;

use log::warn;

use crate::rendezvous::{callback_event, merge_refs, RendezvousCore};

/// The shared state behind every event handle: a one-shot completion node.
///
/// Memory is owned by `Rc`; *discard* semantics are driven by a separate use
/// count so that the waiting list of a rendezvous can hold the node without
/// keeping it "alive" in the discard sense. The count covers typed handles,
/// at-trigger chains, and driver queues; when it reaches zero while the node
/// is still registered, the node completes with `success = false`.
pub(crate) struct EventCore {
    uses: Cell<u32>,
    parent: RefCell<Option<ParentLink>>,
    at: RefCell<AtTrigger>,
    location: Cell<Option<&'static Location<'static>>>,
}

/// The edge from an active event back to its rendezvous.
pub(crate) struct ParentLink {
    pub(crate) r: Rc<RendezvousCore>,
    /// Rendezvous-assigned name, reported back on completion.
    pub(crate) name: usize,
    /// Position in the rendezvous' waiting vector, fixed up on swap-remove.
    pub(crate) index: usize,
}

pub(crate) enum AtTrigger {
    None,
    /// A chained zero-argument event, triggered with `success = true` when
    /// this event completes for any reason.
    Chain(EventRef),
    /// A packed driver callback; `arg` encodes `(driver index, fd)`.
    Callback { f: fn(usize), arg: usize },
}

thread_local! {
    /// The shared already-completed event. Cleared handles re-point here so
    /// they need no allocation and trigger as a no-op.
    static DEAD: Rc<EventCore> = Rc::new(EventCore::new(None));
}

impl EventCore {
    fn new(location: Option<&'static Location<'static>>) -> EventCore {
        EventCore {
            uses: Cell::new(0),
            parent: RefCell::new(None),
            at: RefCell::new(AtTrigger::None),
            location: Cell::new(location),
        }
    }

    /// A fresh, not-yet-registered node. The caller is expected to link it to
    /// a rendezvous via `RendezvousCore::add_waiting` before handing out refs.
    pub(crate) fn unregistered(location: &'static Location<'static>) -> Rc<EventCore> {
        Rc::new(EventCore::new(Some(location)))
    }

    pub(crate) fn is_active(&self) -> bool {
        self.parent.borrow().is_some()
    }

    pub(crate) fn set_parent(&self, link: Option<ParentLink>) {
        *self.parent.borrow_mut() = link;
    }

    pub(crate) fn parent_rendezvous(&self) -> Option<Rc<RendezvousCore>> {
        self.parent.borrow().as_ref().map(|link| link.r.clone())
    }

    pub(crate) fn fix_index(&self, index: usize) {
        if let Some(link) = self.parent.borrow_mut().as_mut() {
            link.index = index;
        }
    }

    pub(crate) fn location(&self) -> Option<&'static Location<'static>> {
        self.location.get()
    }

    /// Completes the event. Dispatch order matters and is fixed:
    ///
    /// 1. unlink from the parent rendezvous and clear the back-edge, so any
    ///    reentrant observer already sees an inactive event;
    /// 2. notify the rendezvous (which may run functional hooks or queue a
    ///    blocked closure);
    /// 3. run the at-trigger chain, exactly once.
    ///
    /// Triggering an inactive event is a no-op.
    pub(crate) fn trigger(core: &Rc<EventCore>, success: bool) {
        let link = core.parent.borrow_mut().take();
        if let Some(link) = link {
            link.r.complete(link.name, link.index, success);
            EventCore::fire_at_trigger(core);
        }
    }

    /// Runs and clears the at-trigger chain. Also used by the rendezvous
    /// destruction protocol after the parent links have been severed.
    pub(crate) fn fire_at_trigger(core: &Rc<EventCore>) {
        let at = std::mem::replace(&mut *core.at.borrow_mut(), AtTrigger::None);
        match at {
            AtTrigger::None => {}
            AtTrigger::Chain(e) => e.fire(true),
            AtTrigger::Callback { f, arg } => f(arg),
        }
    }

    /// Chains `e` onto this event: `e` triggers when this event completes or
    /// is discarded. On an already-completed event `e` triggers immediately.
    /// Multiple chains are combined through a distribute rendezvous.
    pub(crate) fn add_at_trigger(core: &Rc<EventCore>, e: EventRef) {
        if !core.is_active() {
            e.fire(true);
            return;
        }
        let mut at = core.at.borrow_mut();
        *at = match std::mem::replace(&mut *at, AtTrigger::None) {
            AtTrigger::None => AtTrigger::Chain(e),
            AtTrigger::Chain(prev) => AtTrigger::Chain(merge_refs(prev, e)),
            AtTrigger::Callback { f, arg } => {
                AtTrigger::Chain(merge_refs(callback_event(f, arg), e))
            }
        };
    }

    /// Like `add_at_trigger` for a raw callback; avoids an allocation in the
    /// common case of a single fd-disinterest hook per event.
    pub(crate) fn add_at_trigger_fn(core: &Rc<EventCore>, f: fn(usize), arg: usize) {
        if !core.is_active() {
            f(arg);
            return;
        }
        let mut at = core.at.borrow_mut();
        *at = match std::mem::replace(&mut *at, AtTrigger::None) {
            AtTrigger::None => AtTrigger::Callback { f, arg },
            AtTrigger::Chain(prev) => AtTrigger::Chain(merge_refs(prev, callback_event(f, arg))),
            AtTrigger::Callback { f: pf, arg: parg } => {
                AtTrigger::Chain(merge_refs(callback_event(pf, parg), callback_event(f, arg)))
            }
        };
    }
}

impl fmt::Debug for EventCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventCore")
            .field("uses", &self.uses.get())
            .field("active", &self.is_active())
            .finish()
    }
}

/// A counted reference to an event core.
///
/// Every holder that keeps an event "wanted" holds one of these: typed
/// handles, at-trigger chains, timer/asap/preblock queues, and distribute
/// members. Dropping the last one while the event is still registered
/// completes it as a discard.
pub(crate) struct EventRef {
    core: Rc<EventCore>,
}

impl EventRef {
    pub(crate) fn adopt(core: Rc<EventCore>) -> EventRef {
        core.uses.set(core.uses.get() + 1);
        EventRef { core }
    }

    pub(crate) fn dead() -> EventRef {
        DEAD.with(|d| EventRef::adopt(d.clone()))
    }

    pub(crate) fn core(&self) -> &Rc<EventCore> {
        &self.core
    }

    pub(crate) fn is_empty(&self) -> bool {
        !self.core.is_active()
    }

    pub(crate) fn fire(&self, success: bool) {
        EventCore::trigger(&self.core, success);
    }
}

impl Clone for EventRef {
    fn clone(&self) -> EventRef {
        EventRef::adopt(self.core.clone())
    }
}

impl Drop for EventRef {
    fn drop(&mut self) {
        let uses = self.core.uses.get() - 1;
        self.core.uses.set(uses);
        if uses == 0 && self.core.is_active() {
            let report = self
                .core
                .parent
                .borrow()
                .as_ref()
                .map_or(false, |link| !link.r.is_volatile());
            if report {
                match self.core.location() {
                    Some(loc) => warn!(
                        "dropping last reference to active event created at {}:{}",
                        loc.file(),
                        loc.line()
                    ),
                    None => warn!("dropping last reference to active event"),
                }
            }
            EventCore::trigger(&self.core, false);
        }
    }
}

impl fmt::Debug for EventRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.core.fmt(f)
    }
}
