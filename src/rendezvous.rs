//! Rendezvous: collections of pending events that a task can wait on.
//!
//! Four variants share one core. *Gather* wakes its task when every event
//! has completed; *explicit* hands back event names one at a time through
//! [`Rendezvous::join`]; *functional* runs a hook per completion and never
//! blocks anything (it is the substrate for the adapters); *distribute*
//! fans a single completion out to a member list.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::panic::Location;
use std::rc::{Rc, Weak};

use log::error;

use crate::driver::DriverState;
use crate::event::core::{EventCore, EventRef, ParentLink};
use crate::event::{Event, SlotPack};
use crate::task::{ClosureCell, Sleep, Step, TERMINATED};

pub(crate) enum Kind {
    Gather {
        ready: Cell<usize>,
    },
    Explicit {
        ready: RefCell<VecDeque<usize>>,
        /// Names whose events were discarded; the typed wrapper reclaims the
        /// matching name-slab entries on its next call.
        dead: RefCell<Vec<usize>>,
    },
    Functional {
        hook: Box<dyn Fn(usize, bool)>,
    },
    Distribute {
        members: RefCell<Vec<EventRef>>,
    },
}

pub(crate) struct Blocked {
    pub(crate) closure: Rc<ClosureCell>,
    pub(crate) position: u32,
    /// Weak: a blocked rendezvous must not keep a dropped driver (and with
    /// it the unblocked queue's cycle back to this rendezvous) alive.
    pub(crate) driver: Weak<DriverState>,
}

/// Variant-tagged rendezvous state shared by events, wrappers, and the
/// driver's unblocked queue.
pub(crate) struct RendezvousCore {
    kind: Kind,
    /// Weak self-reference, for handing out owning edges (event parent
    /// links, the unblocked queue) from `&self` methods.
    me: Weak<RendezvousCore>,
    waiting: RefCell<Vec<Rc<EventCore>>>,
    blocked: RefCell<Option<Blocked>>,
    /// Already on some driver's unblocked queue.
    queued: Cell<bool>,
    /// Volatile rendezvous do not warn when an active event loses its last
    /// reference; all runtime-internal variants are volatile.
    volatile: Cell<bool>,
}

impl RendezvousCore {
    fn new(kind: Kind, volatile: bool) -> Rc<RendezvousCore> {
        Rc::new_cyclic(|me| RendezvousCore {
            kind,
            me: me.clone(),
            waiting: RefCell::new(Vec::new()),
            blocked: RefCell::new(None),
            queued: Cell::new(false),
            volatile: Cell::new(volatile),
        })
    }

    pub(crate) fn gather() -> Rc<RendezvousCore> {
        RendezvousCore::new(
            Kind::Gather {
                ready: Cell::new(0),
            },
            false,
        )
    }

    pub(crate) fn explicit() -> Rc<RendezvousCore> {
        RendezvousCore::new(
            Kind::Explicit {
                ready: RefCell::new(VecDeque::new()),
                dead: RefCell::new(Vec::new()),
            },
            false,
        )
    }

    pub(crate) fn functional(hook: Box<dyn Fn(usize, bool)>) -> Rc<RendezvousCore> {
        RendezvousCore::new(Kind::Functional { hook }, true)
    }

    pub(crate) fn distribute() -> Rc<RendezvousCore> {
        RendezvousCore::new(
            Kind::Distribute {
                members: RefCell::new(Vec::new()),
            },
            true,
        )
    }

    pub(crate) fn is_volatile(&self) -> bool {
        self.volatile.get()
    }

    pub(crate) fn is_distribute(&self) -> bool {
        matches!(self.kind, Kind::Distribute { .. })
    }

    fn is_blockable(&self) -> bool {
        matches!(self.kind, Kind::Gather { .. } | Kind::Explicit { .. })
    }

    pub(crate) fn waiting_len(&self) -> usize {
        self.waiting.borrow().len()
    }

    /// Links a fresh event onto the waiting list under `name`.
    pub(crate) fn add_waiting(&self, event: &Rc<EventCore>, name: usize) {
        let me = match self.me.upgrade() {
            Some(me) => me,
            None => return,
        };
        let index = {
            let mut waiting = self.waiting.borrow_mut();
            waiting.push(event.clone());
            waiting.len() - 1
        };
        event.set_parent(Some(ParentLink { r: me, name, index }));
    }

    fn unlink(&self, index: usize) {
        let moved = {
            let mut waiting = self.waiting.borrow_mut();
            waiting.swap_remove(index);
            if index < waiting.len() {
                Some(waiting[index].clone())
            } else {
                None
            }
        };
        if let Some(moved) = moved {
            moved.fix_index(index);
        }
    }

    /// Completion dispatch: called by `EventCore::trigger` after the event's
    /// back-edge has been cleared.
    pub(crate) fn complete(&self, name: usize, index: usize, success: bool) {
        self.unlink(index);
        match &self.kind {
            Kind::Gather { ready } => {
                if success {
                    ready.set(ready.get() + 1);
                }
                if self.waiting.borrow().is_empty() {
                    self.unblock();
                }
            }
            Kind::Explicit { ready, dead } => {
                if success {
                    ready.borrow_mut().push_back(name);
                    self.unblock();
                } else {
                    dead.borrow_mut().push(name);
                    // A wait must also end when the last waiting event is
                    // discarded, or the task would sleep forever.
                    if self.waiting.borrow().is_empty() {
                        self.unblock();
                    }
                }
            }
            Kind::Functional { hook } => hook(name, success),
            Kind::Distribute { members } => {
                let members: Vec<EventRef> = members.borrow_mut().drain(..).collect();
                for member in members {
                    member.fire(success);
                }
            }
        }
    }

    pub(crate) fn push_member(&self, member: EventRef) {
        if let Kind::Distribute { members } = &self.kind {
            members.borrow_mut().push(member);
        } else {
            debug_assert!(false, "push_member on a non-distribute rendezvous");
        }
    }

    pub(crate) fn kind(&self) -> &Kind {
        &self.kind
    }

    /// Suspends `closure` on this rendezvous. At most one closure may block
    /// on a rendezvous at a time. If the rendezvous is already ready the
    /// closure is queued for immediate resumption; a wakeup can never be
    /// lost between the readiness check and the block.
    pub(crate) fn block(
        &self,
        closure: Rc<ClosureCell>,
        position: u32,
        driver: &Rc<DriverState>,
    ) {
        if !self.is_blockable() {
            error!("blocking a closure on a functional or distribute rendezvous");
            debug_assert!(false, "blocking a closure on a functional or distribute rendezvous");
            return;
        }
        if self.blocked.borrow().is_some() {
            error!("blocking a second closure on one rendezvous");
            debug_assert!(false, "blocking a second closure on one rendezvous");
            return;
        }
        closure.set_blocked_on(self.me.clone());
        *self.blocked.borrow_mut() = Some(Blocked {
            closure,
            position,
            driver: Rc::downgrade(driver),
        });
        if self.is_ready_now() {
            self.unblock();
        }
    }

    fn is_ready_now(&self) -> bool {
        match &self.kind {
            Kind::Gather { .. } => self.waiting.borrow().is_empty(),
            Kind::Explicit { ready, .. } => {
                !ready.borrow().is_empty() || self.waiting.borrow().is_empty()
            }
            _ => false,
        }
    }

    /// Queues the blocked closure (if any) on its driver's unblocked FIFO.
    /// Idempotent while queued.
    pub(crate) fn unblock(&self) {
        let driver = {
            let blocked = self.blocked.borrow();
            match blocked.as_ref() {
                Some(b) if !self.queued.get() => b.driver.upgrade(),
                _ => return,
            }
        };
        let driver = match driver {
            Some(driver) => driver,
            None => return,
        };
        let me = match self.me.upgrade() {
            Some(me) => me,
            None => return,
        };
        self.queued.set(true);
        driver.push_unblocked(me);
    }

    /// Driver side of `unblock`: detaches the blocked record for resumption.
    pub(crate) fn take_blocked(&self) -> Option<Blocked> {
        self.queued.set(false);
        self.blocked.borrow_mut().take()
    }

    /// Discards every waiting event. Two phases: sever all parent links
    /// first, then run the at-trigger chains, so a chain that re-enters this
    /// rendezvous finds a clean state.
    pub(crate) fn clear_waiting(&self) {
        let events: Vec<Rc<EventCore>> = self.waiting.borrow_mut().drain(..).collect();
        for event in &events {
            event.set_parent(None);
        }
        for event in &events {
            EventCore::fire_at_trigger(event);
        }
    }

    /// Marks a blocked closure terminated and schedules it to run once more
    /// so it can unwind. Part of the destruction protocol.
    pub(crate) fn terminate_blocked(&self) {
        {
            let mut blocked = self.blocked.borrow_mut();
            match blocked.as_mut() {
                Some(b) => b.position = TERMINATED,
                None => return,
            }
        }
        self.unblock();
    }
}

impl fmt::Debug for RendezvousCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            Kind::Gather { .. } => "gather",
            Kind::Explicit { .. } => "explicit",
            Kind::Functional { .. } => "functional",
            Kind::Distribute { .. } => "distribute",
        };
        f.debug_struct("RendezvousCore")
            .field("kind", &kind)
            .field("waiting", &self.waiting.borrow().len())
            .finish()
    }
}

/// Creates an event core registered on `r` and returns a counted reference.
pub(crate) fn register_ref(
    r: &Rc<RendezvousCore>,
    name: usize,
    location: &'static Location<'static>,
) -> EventRef {
    let core = EventCore::unregistered(location);
    r.add_waiting(&core, name);
    EventRef::adopt(core)
}

/// Combines two completion references: the result fires both. Coalesces into
/// an existing distribute rendezvous when possible, so chained combinations
/// stay flat and fire in combination order.
#[track_caller]
pub(crate) fn merge_refs(a: EventRef, b: EventRef) -> EventRef {
    if a.is_empty() {
        return b;
    }
    if b.is_empty() {
        return a;
    }
    if let Some(r) = a.core().parent_rendezvous() {
        if r.is_distribute() {
            r.push_member(b);
            return a;
        }
    }
    let d = RendezvousCore::distribute();
    d.push_member(a);
    d.push_member(b);
    register_ref(&d, 0, Location::caller())
}

/// Wraps a raw `(fn, arg)` callback as an event reference, for coalescing a
/// driver callback into an at-trigger chain.
#[track_caller]
pub(crate) fn callback_event(f: fn(usize), arg: usize) -> EventRef {
    let armed = Cell::new(true);
    let r = RendezvousCore::functional(Box::new(move |_name, _success| {
        if armed.replace(false) {
            f(arg);
        }
    }));
    register_ref(&r, 0, Location::caller())
}

/// A compact slab mapping the `usize` names stored in the core back to the
/// typed names of an explicit rendezvous.
struct NameSlab<I> {
    entries: Vec<Option<I>>,
    free: Vec<usize>,
}

impl<I> NameSlab<I> {
    fn new() -> NameSlab<I> {
        NameSlab {
            entries: Vec::new(),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, name: I) -> usize {
        match self.free.pop() {
            Some(token) => {
                self.entries[token] = Some(name);
                token
            }
            None => {
                self.entries.push(Some(name));
                self.entries.len() - 1
            }
        }
    }

    fn remove(&mut self, token: usize) -> Option<I> {
        let name = self.entries.get_mut(token).and_then(Option::take);
        if name.is_some() {
            self.free.push(token);
        }
        name
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.free.clear();
    }
}

/// An explicit rendezvous: each event is registered under a *name* of type
/// `I`, and [`join`](Rendezvous::join) yields the names of successfully
/// triggered events in trigger order. Discarded events are never delivered.
///
/// Use a tuple name type for multi-index joins.
pub struct Rendezvous<I: 'static = ()> {
    core: Rc<RendezvousCore>,
    names: RefCell<NameSlab<I>>,
}

impl<I: 'static> Rendezvous<I> {
    pub fn new() -> Rendezvous<I> {
        Rendezvous {
            core: RendezvousCore::explicit(),
            names: RefCell::new(NameSlab::new()),
        }
    }

    /// Registers a new event under `name` with the given result slots.
    #[track_caller]
    pub fn make_event<P: SlotPack>(&self, name: I, slots: P) -> Event<P::Values> {
        self.reclaim();
        let token = self.names.borrow_mut().insert(name);
        let inner = register_ref(&self.core, token, Location::caller());
        Event::from_parts(inner, slots.into_slots())
    }

    /// The name of the next ready event, in trigger order; `None` if no
    /// event is currently ready.
    pub fn join(&self) -> Option<I> {
        self.reclaim();
        let token = match self.core.kind() {
            Kind::Explicit { ready, .. } => ready.borrow_mut().pop_front(),
            _ => None,
        }?;
        self.names.borrow_mut().remove(token)
    }

    /// Number of registered events that have not completed.
    pub fn waiting(&self) -> usize {
        self.core.waiting_len()
    }

    /// Number of triggered events not yet joined.
    pub fn ready(&self) -> usize {
        match self.core.kind() {
            Kind::Explicit { ready, .. } => ready.borrow().len(),
            _ => 0,
        }
    }

    /// Discards all waiting events and forgets any ready names.
    pub fn clear(&self) {
        self.core.clear_waiting();
        if let Kind::Explicit { ready, dead } = self.core.kind() {
            ready.borrow_mut().clear();
            dead.borrow_mut().clear();
        }
        self.names.borrow_mut().clear();
    }

    /// A block request suspending the current task here, to be resumed at
    /// `position` once an event is ready or every event has completed.
    pub fn block(&self, position: u32) -> Step {
        Step::Sleep(Sleep {
            core: self.core.clone(),
            position,
        })
    }

    fn reclaim(&self) {
        if let Kind::Explicit { dead, .. } = self.core.kind() {
            let mut dead = dead.borrow_mut();
            if !dead.is_empty() {
                let mut names = self.names.borrow_mut();
                for token in dead.drain(..) {
                    names.remove(token);
                }
            }
        }
    }
}

impl<I: 'static> Default for Rendezvous<I> {
    fn default() -> Rendezvous<I> {
        Rendezvous::new()
    }
}

impl<I: 'static> Drop for Rendezvous<I> {
    fn drop(&mut self) {
        self.core.clear_waiting();
        self.core.terminate_blocked();
    }
}

impl<I: 'static> fmt::Debug for Rendezvous<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rendezvous")
            .field("waiting", &self.waiting())
            .field("ready", &self.ready())
            .finish()
    }
}

/// A gather rendezvous: the blocked task resumes once *every* registered
/// event has completed. Successful and discarded events are not
/// distinguished; only completion counts.
pub struct Gather {
    core: Rc<RendezvousCore>,
}

impl Gather {
    pub fn new() -> Gather {
        Gather {
            core: RendezvousCore::gather(),
        }
    }

    /// Registers a new event with the given result slots.
    #[track_caller]
    pub fn make_event<P: SlotPack>(&self, slots: P) -> Event<P::Values> {
        let inner = register_ref(&self.core, 0, Location::caller());
        Event::from_parts(inner, slots.into_slots())
    }

    /// Number of registered events that have not completed.
    pub fn waiting(&self) -> usize {
        self.core.waiting_len()
    }

    /// Number of successful completions not yet consumed by `join`.
    pub fn ready(&self) -> usize {
        match self.core.kind() {
            Kind::Gather { ready } => ready.get(),
            _ => 0,
        }
    }

    /// Consumes one successful completion.
    pub fn join(&self) -> bool {
        match self.core.kind() {
            Kind::Gather { ready } if ready.get() > 0 => {
                ready.set(ready.get() - 1);
                true
            }
            _ => false,
        }
    }

    /// Discards all waiting events.
    pub fn clear(&self) {
        self.core.clear_waiting();
    }

    /// A block request suspending the current task until the waiting list
    /// empties, to be resumed at `position`.
    pub fn block(&self, position: u32) -> Step {
        Step::Sleep(Sleep {
            core: self.core.clone(),
            position,
        })
    }
}

impl Default for Gather {
    fn default() -> Gather {
        Gather::new()
    }
}

impl Drop for Gather {
    fn drop(&mut self) {
        self.core.clear_waiting();
        self.core.terminate_blocked();
    }
}

impl fmt::Debug for Gather {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gather")
            .field("waiting", &self.waiting())
            .field("ready", &self.ready())
            .finish()
    }
}
