use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::event::core::{EventCore, EventRef};

/// A single-value result cell shared between an event handle and the code
/// that will eventually read the result.
///
/// A `Slot` is a cheap clonable cell: keep one clone, hand the other to
/// `make_event`, and read the value after the event has triggered. An event
/// whose consumer dropped all its `Slot` clones simply writes into a cell
/// nobody reads, which is how "ignore this result" is spelled.
pub struct Slot<T> {
    value: Rc<RefCell<Option<T>>>,
}

impl<T> Slot<T> {
    pub fn new() -> Slot<T> {
        Slot {
            value: Rc::new(RefCell::new(None)),
        }
    }

    /// Takes the triggered value, leaving the slot empty.
    pub fn take(&self) -> Option<T> {
        self.value.borrow_mut().take()
    }

    pub fn has_value(&self) -> bool {
        self.value.borrow().is_some()
    }

    pub(crate) fn put(&self, value: T) {
        *self.value.borrow_mut() = Some(value);
    }
}

impl<T: Clone> Slot<T> {
    pub fn get(&self) -> Option<T> {
        self.value.borrow().clone()
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Slot<T> {
        Slot {
            value: self.value.clone(),
        }
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Slot<T> {
        Slot::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Slot").field(&*self.value.borrow()).finish()
    }
}

/// A result pack: the tuple of values an event delivers on trigger.
///
/// Implemented for tuples of zero to four elements. The associated `Slots`
/// type is the matching pack of `Slot`s kept inside the handle.
pub trait Results: 'static {
    type Slots: Clone + 'static;

    #[doc(hidden)]
    fn store(slots: &Self::Slots, values: Self);
}

impl Results for () {
    type Slots = ();

    fn store(_slots: &(), _values: ()) {}
}

impl<T0: 'static> Results for (T0,) {
    type Slots = (Slot<T0>,);

    fn store(slots: &Self::Slots, values: Self) {
        slots.0.put(values.0);
    }
}

impl<T0: 'static, T1: 'static> Results for (T0, T1) {
    type Slots = (Slot<T0>, Slot<T1>);

    fn store(slots: &Self::Slots, values: Self) {
        slots.0.put(values.0);
        slots.1.put(values.1);
    }
}

impl<T0: 'static, T1: 'static, T2: 'static> Results for (T0, T1, T2) {
    type Slots = (Slot<T0>, Slot<T1>, Slot<T2>);

    fn store(slots: &Self::Slots, values: Self) {
        slots.0.put(values.0);
        slots.1.put(values.1);
        slots.2.put(values.2);
    }
}

impl<T0: 'static, T1: 'static, T2: 'static, T3: 'static> Results for (T0, T1, T2, T3) {
    type Slots = (Slot<T0>, Slot<T1>, Slot<T2>, Slot<T3>);

    fn store(slots: &Self::Slots, values: Self) {
        slots.0.put(values.0);
        slots.1.put(values.1);
        slots.2.put(values.2);
        slots.3.put(values.3);
    }
}

/// Borrowed slots accepted by `make_event`: `()` or a tuple of `&Slot<T>`.
pub trait SlotPack {
    type Values: Results;

    #[doc(hidden)]
    fn into_slots(self) -> <Self::Values as Results>::Slots;
}

impl SlotPack for () {
    type Values = ();

    fn into_slots(self) {}
}

impl<'a, T0: 'static> SlotPack for (&'a Slot<T0>,) {
    type Values = (T0,);

    fn into_slots(self) -> (Slot<T0>,) {
        (self.0.clone(),)
    }
}

impl<'a, T0: 'static, T1: 'static> SlotPack for (&'a Slot<T0>, &'a Slot<T1>) {
    type Values = (T0, T1);

    fn into_slots(self) -> (Slot<T0>, Slot<T1>) {
        (self.0.clone(), self.1.clone())
    }
}

impl<'a, T0: 'static, T1: 'static, T2: 'static> SlotPack
    for (&'a Slot<T0>, &'a Slot<T1>, &'a Slot<T2>)
{
    type Values = (T0, T1, T2);

    fn into_slots(self) -> (Slot<T0>, Slot<T1>, Slot<T2>) {
        (self.0.clone(), self.1.clone(), self.2.clone())
    }
}

impl<'a, T0: 'static, T1: 'static, T2: 'static, T3: 'static> SlotPack
    for (&'a Slot<T0>, &'a Slot<T1>, &'a Slot<T2>, &'a Slot<T3>)
{
    type Values = (T0, T1, T2, T3);

    fn into_slots(self) -> (Slot<T0>, Slot<T1>, Slot<T2>, Slot<T3>) {
        (self.0.clone(), self.1.clone(), self.2.clone(), self.3.clone())
    }
}

/// A one-shot completion handle with typed result slots.
///
/// Handles are cheap to clone; all clones share one underlying completion
/// node. Triggering writes the result values into the registered slots and
/// completes the node; dropping the last handle without triggering completes
/// it as a *discard* (`success = false`, slots untouched).
pub struct Event<T: Results = ()> {
    inner: EventRef,
    slots: <T as Results>::Slots,
}

impl<T: Results> Event<T> {
    pub(crate) fn from_parts(inner: EventRef, slots: <T as Results>::Slots) -> Event<T> {
        Event { inner, slots }
    }

    /// True while the event has not yet completed.
    pub fn is_active(&self) -> bool {
        !self.inner.is_empty()
    }

    /// True once the event has triggered or been discarded.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// A zero-argument handle sharing this event's completion node: triggers
    /// complete the event without touching result slots. Useful for "just
    /// wake me up" waits.
    pub fn unblocker(&self) -> Event<()> {
        Event {
            inner: self.inner.clone(),
            slots: (),
        }
    }

    /// Chains `e`: it triggers (successfully) when this event completes for
    /// any reason, including discard. On an already-completed event `e`
    /// triggers immediately.
    pub fn at_trigger(&self, e: Event<()>) {
        EventCore::add_at_trigger(self.inner.core(), e.into_ref());
    }

    /// Completes the event unsuccessfully without writing result slots.
    pub fn cancel(&self) {
        self.inner.fire(false);
    }

    /// Drops this handle's reference, re-pointing it at the shared dead
    /// event. If it was the last reference, the event is discarded.
    pub fn clear(&mut self) {
        self.inner = EventRef::dead();
    }

    pub(crate) fn core(&self) -> &Rc<EventCore> {
        self.inner.core()
    }

    pub(crate) fn into_ref(self) -> EventRef {
        self.inner
    }

    pub(crate) fn trigger_values(&self, values: T) {
        if self.is_active() {
            T::store(&self.slots, values);
            self.inner.fire(true);
        }
    }
}

impl Event<()> {
    /// A handle on the shared dead event: permanently inactive, triggers are
    /// no-ops.
    pub fn empty() -> Event<()> {
        Event {
            inner: EventRef::dead(),
            slots: (),
        }
    }

    pub fn trigger(&self) {
        self.inner.fire(true);
    }

    pub(crate) fn from_ref(inner: EventRef) -> Event<()> {
        Event { inner, slots: () }
    }
}

impl<T0: 'static> Event<(T0,)> {
    pub fn trigger(&self, v0: T0) {
        self.trigger_values((v0,));
    }
}

impl<T0: 'static, T1: 'static> Event<(T0, T1)> {
    pub fn trigger(&self, v0: T0, v1: T1) {
        self.trigger_values((v0, v1));
    }
}

impl<T0: 'static, T1: 'static, T2: 'static> Event<(T0, T1, T2)> {
    pub fn trigger(&self, v0: T0, v1: T1, v2: T2) {
        self.trigger_values((v0, v1, v2));
    }
}

impl<T0: 'static, T1: 'static, T2: 'static, T3: 'static> Event<(T0, T1, T2, T3)> {
    pub fn trigger(&self, v0: T0, v1: T1, v2: T2, v3: T3) {
        self.trigger_values((v0, v1, v2, v3));
    }
}

impl<T: Results> Clone for Event<T> {
    fn clone(&self) -> Event<T> {
        Event {
            inner: self.inner.clone(),
            slots: self.slots.clone(),
        }
    }
}

impl Default for Event<()> {
    fn default() -> Event<()> {
        Event::empty()
    }
}

impl<T: Results> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("active", &self.is_active())
            .finish()
    }
}
