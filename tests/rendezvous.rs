use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tryst::{Driver, Gather, Rendezvous, Step, Task, TERMINATED};

mod util;

use util::init;

/// Blocks on a gather until its waiting list empties, counting resumptions.
struct GatherWaiter {
    r: Rc<Gather>,
    resumed: Rc<Cell<u32>>,
}

impl Task for GatherWaiter {
    fn activate(&mut self, position: u32) -> Step {
        match position {
            0 if self.r.waiting() > 0 => self.r.block(1),
            _ => {
                self.resumed.set(self.resumed.get() + 1);
                assert_eq!(self.r.waiting(), 0);
                Step::Done
            }
        }
    }
}

#[test]
fn gather_wait_resumes_once_after_all_triggers() {
    init();

    let driver = Driver::new().unwrap();
    let r = Rc::new(Gather::new());
    let h1 = r.make_event(());
    let h2 = r.make_event(());
    let resumed = Rc::new(Cell::new(0));

    driver.spawn(GatherWaiter {
        r: r.clone(),
        resumed: resumed.clone(),
    });
    assert_eq!(resumed.get(), 0);

    h1.trigger();
    driver.run();
    assert_eq!(resumed.get(), 0);

    h2.trigger();
    driver.run();
    assert_eq!(resumed.get(), 1);
    assert_eq!(r.waiting(), 0);
}

#[test]
fn explicit_join_yields_names_in_trigger_order() {
    init();

    let r = Rendezvous::<i32>::new();
    let h1 = r.make_event(1, ());
    let h2 = r.make_event(2, ());
    let h3 = r.make_event(3, ());

    h2.trigger();
    h1.trigger();
    h3.trigger();

    assert_eq!(r.join(), Some(2));
    assert_eq!(r.join(), Some(1));
    assert_eq!(r.join(), Some(3));
    assert_eq!(r.join(), None);
}

#[test]
fn discarded_events_never_reach_join() {
    init();

    let r = Rendezvous::<i32>::new();
    let h1 = r.make_event(1, ());
    let h2 = r.make_event(2, ());

    drop(h1);
    h2.trigger();

    assert_eq!(r.join(), Some(2));
    assert_eq!(r.join(), None);
    assert_eq!(r.waiting(), 0);
}

#[test]
fn tuple_names_join_as_pairs() {
    init();

    let r = Rendezvous::<(u32, &'static str)>::new();
    let h = r.make_event((4, "read"), ());
    h.trigger();
    assert_eq!(r.join(), Some((4, "read")));
}

/// Joins everything it can, sleeping between batches, until no event
/// remains.
struct JoinWaiter {
    r: Rc<Rendezvous<i32>>,
    seen: Rc<RefCell<Vec<i32>>>,
    finished: Rc<Cell<bool>>,
}

impl Task for JoinWaiter {
    fn activate(&mut self, position: u32) -> Step {
        if position == TERMINATED {
            return Step::Done;
        }
        loop {
            match self.r.join() {
                Some(name) => self.seen.borrow_mut().push(name),
                None if self.r.waiting() > 0 => return self.r.block(1),
                None => {
                    self.finished.set(true);
                    return Step::Done;
                }
            }
        }
    }
}

#[test]
fn explicit_wait_ends_when_every_event_is_discarded() {
    init();

    let driver = Driver::new().unwrap();
    let r = Rc::new(Rendezvous::new());
    let h1 = r.make_event(1, ());
    let h2 = r.make_event(2, ());
    let seen = Rc::new(RefCell::new(Vec::new()));
    let finished = Rc::new(Cell::new(false));

    driver.spawn(JoinWaiter {
        r: r.clone(),
        seen: seen.clone(),
        finished: finished.clone(),
    });

    h1.trigger();
    drop(h2);
    driver.run();

    assert!(finished.get());
    assert_eq!(*seen.borrow(), vec![1]);
}

/// Sleeps on a pre-built block request; records being terminated.
struct Sleeper {
    step: Option<Step>,
    terminated: Rc<Cell<bool>>,
}

impl Task for Sleeper {
    fn activate(&mut self, position: u32) -> Step {
        if position == TERMINATED {
            self.terminated.set(true);
            return Step::Done;
        }
        match self.step.take() {
            Some(step) => step,
            None => Step::Done,
        }
    }
}

#[test]
fn dropping_a_rendezvous_unwinds_its_blocked_task() {
    init();

    let driver = Driver::new().unwrap();
    let r = Gather::new();
    let _pending = r.make_event(());
    let terminated = Rc::new(Cell::new(false));

    driver.spawn(Sleeper {
        step: Some(r.block(1)),
        terminated: terminated.clone(),
    });
    assert!(!terminated.get());

    drop(r);
    driver.run();
    assert!(terminated.get());
}

#[test]
fn blocking_on_an_already_empty_gather_resumes_immediately() {
    init();

    let driver = Driver::new().unwrap();
    let r = Rc::new(Gather::new());
    let resumed = Rc::new(Cell::new(0));

    // No events registered: the task's own waiting() check short-circuits,
    // but even a direct block must not lose the wakeup.
    driver.spawn(Sleeper {
        step: Some(r.block(1)),
        terminated: Rc::new(Cell::new(false)),
    });
    driver.spawn(GatherWaiter {
        r: r.clone(),
        resumed: resumed.clone(),
    });
    driver.run();
    assert_eq!(resumed.get(), 1);
}

#[test]
fn clear_discards_waiting_events() {
    init();

    let r = Rendezvous::<i32>::new();
    let h1 = r.make_event(1, ());
    let h2 = r.make_event(2, ());
    h1.trigger();

    r.clear();
    assert_eq!(r.waiting(), 0);
    assert_eq!(r.ready(), 0);
    assert_eq!(r.join(), None);
    assert!(h2.is_empty());
}

#[test]
fn gather_join_counts_successes_only() {
    init();

    let r = Gather::new();
    let h1 = r.make_event(());
    let h2 = r.make_event(());
    h1.trigger();
    drop(h2);

    assert_eq!(r.waiting(), 0);
    assert_eq!(r.ready(), 1);
    assert!(r.join());
    assert!(!r.join());
}
