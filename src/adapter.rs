//! Event adapters, built on functional rendezvous.
//!
//! Each adapter allocates a functional rendezvous whose hook runs when the
//! produced event completes, translating that completion onto the consumed
//! event: pre-filling result values (`bind*`), mapping them (`map`),
//! converting completion into an error code (`with_code`), fanning out
//! (`distribute`), or calling arbitrary code (`fun_event`).

use std::cell::RefCell;
use std::panic::Location;
use std::rc::Rc;
use std::time::Instant;

use crate::driver::Driver;
use crate::event::{Event, Slot};
use crate::rendezvous::{merge_refs, register_ref, RendezvousCore};

/// Wraps `f` as a zero-argument event: triggering calls `f(true)`, a discard
/// calls `f(false)`. `f` runs at most once.
#[track_caller]
pub fn fun_event<F>(f: F) -> Event<()>
where
    F: FnOnce(bool) + 'static,
{
    let f = RefCell::new(Some(f));
    let r = RendezvousCore::functional(Box::new(move |_name, success| {
        let f = f.borrow_mut().take();
        if let Some(f) = f {
            f(success);
        }
    }));
    Event::from_ref(register_ref(&r, 0, Location::caller()))
}

/// A zero-argument event that triggers both `e1` and `e2` when triggered and
/// discards both when discarded. Combining an existing distribute event with
/// a further event extends the fan-out list in place, so members fire in the
/// order they were combined.
pub fn distribute(e1: Event<()>, e2: Event<()>) -> Event<()> {
    Event::from_ref(merge_refs(e1.into_ref(), e2.into_ref()))
}

/// Consumes `e`; the returned zero-argument event triggers `e` with `v0`.
/// Discarding the returned event discards `e`.
#[track_caller]
pub fn bind<T0: 'static>(e: Event<(T0,)>, v0: T0) -> Event<()> {
    let state = RefCell::new(Some((e, v0)));
    let r = RendezvousCore::functional(Box::new(move |_name, success| {
        let state = state.borrow_mut().take();
        if let Some((e, v0)) = state {
            if success {
                e.trigger(v0);
            }
        }
    }));
    Event::from_ref(register_ref(&r, 0, Location::caller()))
}

/// Consumes a two-slot `e`; the returned one-slot event supplies the second
/// value, the first is pre-filled with `v0`.
#[track_caller]
pub fn bind_first<T0: 'static, T1: 'static>(e: Event<(T0, T1)>, v0: T0) -> Event<(T1,)> {
    let slot = Slot::new();
    let hook_slot = slot.clone();
    let state = RefCell::new(Some((e, v0)));
    let r = RendezvousCore::functional(Box::new(move |_name, success| {
        let state = state.borrow_mut().take();
        if let Some((e, v0)) = state {
            if success {
                if let Some(v1) = hook_slot.take() {
                    e.trigger(v0, v1);
                }
            }
        }
    }));
    Event::from_parts(register_ref(&r, 0, Location::caller()), (slot,))
}

/// Consumes a two-slot `e`; the returned one-slot event supplies the first
/// value, the second is pre-filled with `v1`.
#[track_caller]
pub fn bind_last<T0: 'static, T1: 'static>(e: Event<(T0, T1)>, v1: T1) -> Event<(T0,)> {
    let slot = Slot::new();
    let hook_slot = slot.clone();
    let state = RefCell::new(Some((e, v1)));
    let r = RendezvousCore::functional(Box::new(move |_name, success| {
        let state = state.borrow_mut().take();
        if let Some((e, v1)) = state {
            if success {
                if let Some(v0) = hook_slot.take() {
                    e.trigger(v0, v1);
                }
            }
        }
    }));
    Event::from_parts(register_ref(&r, 0, Location::caller()), (slot,))
}

/// Consumes `e`; the returned event's triggered value passes through `f`
/// into `e`. A discard of the returned event triggers `e` without writing
/// its result slot.
#[track_caller]
pub fn map<T0: 'static, U0: 'static, F>(e: Event<(U0,)>, f: F) -> Event<(T0,)>
where
    F: FnOnce(T0) -> U0 + 'static,
{
    let slot = Slot::new();
    let hook_slot = slot.clone();
    let state = RefCell::new(Some((e, f)));
    let r = RendezvousCore::functional(Box::new(move |_name, success| {
        let state = state.borrow_mut().take();
        if let Some((e, f)) = state {
            if success {
                if let Some(v) = hook_slot.take() {
                    e.trigger(f(v));
                }
            } else {
                e.unblocker().trigger();
            }
        }
    }));
    Event::from_parts(register_ref(&r, 0, Location::caller()), (slot,))
}

/// Consumes `e`; the returned event writes `code` into `out` on trigger and
/// the zero default on discard, then triggers `e` either way, so a waiter on
/// `e` always learns the outcome through `out`.
#[track_caller]
pub fn with_code(e: Event<()>, out: &Slot<i32>, code: i32) -> Event<()> {
    let out = out.clone();
    let state = RefCell::new(Some(e));
    let r = RendezvousCore::functional(Box::new(move |_name, success| {
        let state = state.borrow_mut().take();
        if let Some(e) = state {
            out.put(if success { code } else { 0 });
            e.trigger();
        }
    }));
    Event::from_ref(register_ref(&r, 0, Location::caller()))
}

/// A one-slot event whose triggered values append to `out`. Discards append
/// nothing.
#[track_caller]
pub fn push_back<T: 'static>(out: &Rc<RefCell<Vec<T>>>) -> Event<(T,)> {
    let out = out.clone();
    let slot = Slot::new();
    let hook_slot = slot.clone();
    let r = RendezvousCore::functional(Box::new(move |_name, success| {
        if success {
            if let Some(v) = hook_slot.take() {
                out.borrow_mut().push(v);
            }
        }
    }));
    Event::from_parts(register_ref(&r, 0, Location::caller()), (slot,))
}

/// Pairs `e` with a deadline: if `e` has not completed by `deadline` it is
/// cancelled. Completion of `e` disarms the timer.
#[track_caller]
pub fn with_timeout(driver: &Driver, deadline: Instant, e: Event<()>) -> Event<()> {
    let target = e.clone();
    let canceler = fun_event(move |success| {
        if success {
            target.cancel();
        }
    });
    let disarm = canceler.clone();
    e.at_trigger(fun_event(move |_| disarm.cancel()));
    driver.at_time(deadline, canceler);
    e
}
