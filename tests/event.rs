use std::cell::Cell;
use std::rc::Rc;

use tryst::{distribute, fun_event, Gather, Rendezvous, Slot};

mod util;

use util::init;

#[test]
fn trigger_writes_slots_and_is_one_shot() {
    init();

    let r = Rendezvous::<u32>::new();
    let value = Slot::new();
    let e = r.make_event(7, (&value,));
    assert!(e.is_active());
    assert_eq!(r.waiting(), 1);

    e.trigger(5);
    assert!(e.is_empty());
    assert_eq!(value.take(), Some(5));
    assert_eq!(r.join(), Some(7));

    // A second trigger of the same handle is a no-op.
    e.trigger(9);
    assert_eq!(r.join(), None);
    assert!(!value.has_value());
}

#[test]
fn clones_share_one_completion() {
    init();

    let r = Gather::new();
    let value = Slot::new();
    let e = r.make_event((&value,));
    let other = e.clone();

    other.trigger(1);
    assert!(e.is_empty());
    assert_eq!(r.waiting(), 0);
    assert_eq!(value.take(), Some(1));
}

#[test]
fn unblocker_completes_without_writing_slots() {
    init();

    let r = Gather::new();
    let value: Slot<u32> = Slot::new();
    let e = r.make_event((&value,));

    e.unblocker().trigger();
    assert!(e.is_empty());
    assert_eq!(r.waiting(), 0);
    assert!(!value.has_value());
}

#[test]
fn discard_fires_at_trigger_and_skips_slots() {
    init();

    // Cancellation fan-out: dropping the last handle completes the event
    // unsuccessfully and still runs its at-trigger chain.
    let r = Gather::new();
    let value: Slot<u32> = Slot::new();
    let h = r.make_event((&value,));

    let chain = Rendezvous::<()>::new();
    let c = chain.make_event((), ());
    h.at_trigger(c);

    drop(h);
    assert_eq!(chain.join(), Some(()));
    assert!(!value.has_value());
    assert_eq!(r.waiting(), 0);
}

#[test]
fn at_trigger_on_completed_event_fires_immediately() {
    init();

    let r = Gather::new();
    let e = r.make_event(());
    e.trigger();

    let fired = Rc::new(Cell::new(false));
    let observer = fired.clone();
    e.at_trigger(fun_event(move |success| {
        assert!(success);
        observer.set(true);
    }));
    assert!(fired.get());
}

#[test]
fn multiple_at_triggers_all_fire() {
    init();

    let r = Gather::new();
    let e = r.make_event(());
    let count = Rc::new(Cell::new(0));
    for _ in 0..3 {
        let count = count.clone();
        e.at_trigger(fun_event(move |_| count.set(count.get() + 1)));
    }

    e.trigger();
    assert_eq!(count.get(), 3);
}

#[test]
fn distribute_fires_members_in_combination_order() {
    init();

    let r = Rendezvous::<u32>::new();
    let e1 = r.make_event(1, ());
    let e2 = r.make_event(2, ());
    let e3 = r.make_event(3, ());

    let d = distribute(distribute(e1, e2), e3);
    d.trigger();

    assert_eq!(r.join(), Some(1));
    assert_eq!(r.join(), Some(2));
    assert_eq!(r.join(), Some(3));
    assert_eq!(r.join(), None);
    assert_eq!(r.waiting(), 0);
}

#[test]
fn distribute_discard_cancels_members() {
    init();

    let r = Gather::new();
    let e1 = r.make_event(());
    let e2 = r.make_event(());

    let d = distribute(e1, e2);
    drop(d);
    assert_eq!(r.waiting(), 0);
    assert_eq!(r.ready(), 0);
}

#[test]
fn distribute_coalesces_around_empty_events() {
    init();

    let r = Gather::new();
    let live = r.make_event(());

    let d = distribute(tryst::Event::empty(), live);
    d.trigger();
    assert_eq!(r.waiting(), 0);
    assert_eq!(r.ready(), 1);
}

#[test]
fn clear_detaches_a_handle() {
    init();

    let r = Gather::new();
    let mut e = r.make_event(());
    e.clear();
    assert!(e.is_empty());
    assert_eq!(r.waiting(), 0);

    // Triggering the cleared handle is harmless.
    e.trigger();
}

#[test]
fn cancel_completes_unsuccessfully() {
    init();

    let r = Gather::new();
    let e = r.make_event(());
    e.cancel();
    assert!(e.is_empty());
    assert_eq!(r.waiting(), 0);
    assert_eq!(r.ready(), 0);
}
