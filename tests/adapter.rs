use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use tryst::{bind, bind_first, bind_last, fun_event, map, push_back, with_code, with_timeout};
use tryst::{Driver, Event, Gather, Rendezvous, Slot};

mod util;

use util::init;

#[test]
fn bound_values_reach_the_event_slots() {
    init();

    let r = Rendezvous::<u32>::new();
    let first = Slot::new();
    let second = Slot::new();
    let h = r.make_event(9, (&first, &second));

    // bind_last fixes the trailing slot, bind the remaining one; triggering
    // the zero-argument result is equivalent to h.trigger(3, 7).
    let e: Event = bind(bind_last(h, 7u32), 3u32);
    e.trigger();

    assert_eq!(first.take(), Some(3));
    assert_eq!(second.take(), Some(7));
    assert_eq!(r.join(), Some(9));
}

#[test]
fn bind_first_supplies_the_trailing_value() {
    init();

    let r = Gather::new();
    let first = Slot::new();
    let second = Slot::new();
    let h = r.make_event((&first, &second));

    let tail = bind_first(h, 1u32);
    tail.trigger("rest");

    assert_eq!(first.take(), Some(1));
    assert_eq!(second.take(), Some("rest"));
    assert_eq!(r.waiting(), 0);
}

#[test]
fn bind_discard_propagates() {
    init();

    let r = Gather::new();
    let value: Slot<u32> = Slot::new();
    let e = bind(r.make_event((&value,)), 4u32);

    drop(e);
    assert_eq!(r.waiting(), 0);
    assert_eq!(r.ready(), 0);
    assert!(!value.has_value());
}

#[test]
fn map_translates_the_triggered_value() {
    init();

    let r = Gather::new();
    let len: Slot<u32> = Slot::new();
    let e = r.make_event((&len,));

    let words = map(e, |s: String| s.len() as u32);
    words.trigger("hello".to_string());

    assert_eq!(len.take(), Some(5));
    assert_eq!(r.waiting(), 0);
}

#[test]
fn map_discard_still_completes_the_target() {
    init();

    let r = Gather::new();
    let len: Slot<u32> = Slot::new();
    let e = r.make_event((&len,));

    let words = map(e, |s: String| s.len() as u32);
    drop(words);

    // The consumed event completes without a value written.
    assert_eq!(r.waiting(), 0);
    assert_eq!(r.ready(), 1);
    assert!(!len.has_value());
}

#[test]
fn with_code_reports_trigger_and_discard() {
    init();

    let r = Gather::new();

    let outcome = Slot::new();
    let w = with_code(r.make_event(()), &outcome, -7);
    w.trigger();
    assert_eq!(outcome.take(), Some(-7));
    assert_eq!(r.waiting(), 0);
    assert_eq!(r.ready(), 1);

    let outcome = Slot::new();
    let w = with_code(r.make_event(()), &outcome, -7);
    drop(w);
    assert_eq!(outcome.take(), Some(0));
    assert_eq!(r.waiting(), 0);
    assert_eq!(r.ready(), 2);
}

#[test]
fn push_back_collects_triggered_values() {
    init();

    let sink = Rc::new(RefCell::new(Vec::new()));
    let e1 = push_back(&sink);
    let e2 = push_back(&sink);
    let e3 = push_back(&sink);

    e1.trigger(3u32);
    e2.trigger(5u32);
    drop(e3);

    assert_eq!(*sink.borrow(), vec![3, 5]);
}

#[test]
fn fun_event_reports_discard() {
    init();

    let outcome = Rc::new(Cell::new(None));
    let seen = outcome.clone();
    let e = fun_event(move |success| seen.set(Some(success)));
    drop(e);
    assert_eq!(outcome.get(), Some(false));
}

#[test]
fn with_timeout_cancels_at_the_deadline() {
    init();

    let driver = Driver::new().unwrap();
    let r = Gather::new();
    let e = with_timeout(
        &driver,
        Instant::now() + Duration::from_millis(30),
        r.make_event(()),
    );

    let start = Instant::now();
    driver.run();
    assert!(start.elapsed() >= Duration::from_millis(25));
    assert!(e.is_empty());
    assert_eq!(r.waiting(), 0);
    assert_eq!(r.ready(), 0);
}

#[test]
fn with_timeout_disarms_when_the_event_completes_first() {
    init();

    let driver = Driver::new().unwrap();
    let r = Gather::new();
    let e = with_timeout(
        &driver,
        Instant::now() + Duration::from_secs(5),
        r.make_event(()),
    );

    e.trigger();
    let start = Instant::now();
    driver.run();
    // The disarmed timer must not keep the loop alive for five seconds.
    assert!(start.elapsed() < Duration::from_millis(500));
    assert_eq!(r.ready(), 1);
}
