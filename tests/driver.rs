use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use tryst::{fun_event, Driver, DriverConfig, Gather, NextWake, Rendezvous, Slot, Step, Task, TERMINATED};

mod util;

use util::init;

fn pipe() -> (i32, i32) {
    let mut fds = [0i32; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    (fds[0], fds[1])
}

fn close(fd: i32) {
    unsafe {
        libc::close(fd);
    }
}

#[test]
fn asap_cancellation_preempts_a_timer() {
    init();

    // A timer armed 100ms out is discarded by an asap event; the loop must
    // neither fire it nor sleep out the delay.
    let driver = Driver::new().unwrap();
    let r = Gather::new();
    let e = r.make_event(());
    driver.at_time(Instant::now() + Duration::from_millis(100), e.clone());

    let victim = e.clone();
    driver.at_asap(fun_event(move |_| victim.cancel()));

    let start = Instant::now();
    driver.run();
    assert!(start.elapsed() < Duration::from_millis(80));
    assert!(e.is_empty());
    assert_eq!(r.waiting(), 0);
    assert_eq!(r.ready(), 0);
}

#[test]
fn timers_fire_at_their_deadline() {
    init();

    let driver = Driver::new().unwrap();
    let r = Gather::new();
    driver.at_time(
        Instant::now() + Duration::from_millis(20),
        r.make_event(()),
    );

    let start = Instant::now();
    driver.run();
    assert!(start.elapsed() >= Duration::from_millis(15));
    assert_eq!(r.waiting(), 0);
    assert_eq!(r.ready(), 1);
}

#[test]
fn background_timers_do_not_keep_the_loop_alive() {
    init();

    let driver = Driver::new().unwrap();
    let r = Gather::new();
    let e = r.make_event(());
    driver.at_background_time(Instant::now() + Duration::from_millis(200), e.clone());

    assert_eq!(driver.next_wake(), NextWake::Never);
    let start = Instant::now();
    driver.run();
    assert!(start.elapsed() < Duration::from_millis(100));
    assert!(e.is_active());
}

#[test]
fn fd_readiness_reports_zero_and_kill_reports_ecanceled() {
    init();

    let driver = Driver::new().unwrap();
    let (rd, wr) = pipe();
    let r = Rendezvous::<u32>::new();

    let value = Slot::new();
    driver.at_fd_read(rd, r.make_event(1, (&value,)));
    assert_eq!(unsafe { libc::write(wr, b"x".as_ptr() as *const libc::c_void, 1) }, 1);
    driver.run_once();
    assert_eq!(r.join(), Some(1));
    assert_eq!(value.take(), Some(0));

    let value = Slot::new();
    driver.at_fd_read(rd, r.make_event(2, (&value,)));
    driver.kill_fd(rd);
    assert_eq!(r.join(), Some(2));
    assert_eq!(value.take(), Some(-libc::ECANCELED));

    close(rd);
    close(wr);
}

#[test]
fn poll_backend_handles_fd_readiness_and_kill() {
    init();

    // The same readiness and kill scenario with epoll disabled, so the
    // poll(2) interest set multiplexes on its own.
    let driver = Driver::with_config(DriverConfig { no_epoll: true }).unwrap();
    let (rd, wr) = pipe();
    let r = Rendezvous::<u32>::new();

    let value = Slot::new();
    driver.at_fd_read(rd, r.make_event(1, (&value,)));

    // Make the loop block in poll(2) before the byte arrives.
    let writer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(
            unsafe { libc::write(wr, b"x".as_ptr() as *const libc::c_void, 1) },
            1
        );
        wr
    });
    let start = Instant::now();
    driver.run();
    assert!(start.elapsed() >= Duration::from_millis(25));
    assert_eq!(r.join(), Some(1));
    assert_eq!(value.take(), Some(0));

    let value = Slot::new();
    driver.at_fd_read(rd, r.make_event(2, (&value,)));
    driver.kill_fd(rd);
    assert_eq!(r.join(), Some(2));
    assert_eq!(value.take(), Some(-libc::ECANCELED));

    // The forgotten interest must also leave the loop with nothing to wait
    // for.
    let start = Instant::now();
    driver.run();
    assert!(start.elapsed() < Duration::from_millis(100));

    close(rd);
    close(writer.join().unwrap());
}

#[test]
fn fd_write_readiness() {
    init();

    let driver = Driver::new().unwrap();
    let (rd, wr) = pipe();
    let r = Rendezvous::<u32>::new();
    let value = Slot::new();

    driver.at_fd_write(wr, r.make_event(1, (&value,)));
    driver.run_once();
    assert_eq!(r.join(), Some(1));
    assert_eq!(value.take(), Some(0));

    close(rd);
    close(wr);
}

#[test]
fn multiple_registrations_per_fd_fire_in_registration_order() {
    init();

    let driver = Driver::new().unwrap();
    let (rd, wr) = pipe();
    let r = Rendezvous::<u32>::new();
    let first: Slot<i32> = Slot::new();
    let second: Slot<i32> = Slot::new();

    driver.at_fd_read(rd, r.make_event(1, (&first,)));
    driver.at_fd_read(rd, r.make_event(2, (&second,)));
    assert_eq!(unsafe { libc::write(wr, b"y".as_ptr() as *const libc::c_void, 1) }, 1);
    driver.run_once();

    assert_eq!(r.join(), Some(1));
    assert_eq!(r.join(), Some(2));

    close(rd);
    close(wr);
}

#[test]
fn discarding_an_fd_event_drops_backend_interest() {
    init();

    let driver = Driver::new().unwrap();
    let (rd, wr) = pipe();
    let r = Rendezvous::<u32>::new();
    let ignored: Slot<i32> = Slot::new();

    let e = r.make_event(1, (&ignored,));
    driver.at_fd_read(rd, e);
    r.clear();

    // With the sole interest discarded there is no foreground work left, so
    // the loop exits instead of blocking on the pipe.
    let start = Instant::now();
    driver.run();
    assert!(start.elapsed() < Duration::from_millis(100));

    close(rd);
    close(wr);
}

#[test]
fn preblock_runs_before_asap_within_a_tick() {
    init();

    let driver = Driver::new().unwrap();
    let order = Rc::new(RefCell::new(Vec::new()));

    let seen = order.clone();
    driver.at_asap(fun_event(move |_| seen.borrow_mut().push("asap")));
    let seen = order.clone();
    driver.at_preblock(fun_event(move |_| seen.borrow_mut().push("preblock")));

    driver.run_once();
    assert_eq!(*order.borrow(), vec!["preblock", "asap"]);
}

#[test]
fn at_delay_zero_degrades_to_asap() {
    init();

    let driver = Driver::new().unwrap();
    let r = Gather::new();
    driver.at_delay(Duration::ZERO, r.make_event(()));

    let start = Instant::now();
    driver.run();
    assert!(start.elapsed() < Duration::from_millis(50));
    assert_eq!(r.ready(), 1);
}

#[test]
fn next_wake_reports_pending_work() {
    init();

    let driver = Driver::new().unwrap();
    assert_eq!(driver.next_wake(), NextWake::Never);

    driver.at_asap(fun_event(|_| {}));
    assert_eq!(driver.next_wake(), NextWake::Now);
    driver.run();
    assert_eq!(driver.next_wake(), NextWake::Never);

    let deadline = Instant::now() + Duration::from_secs(5);
    let r = Gather::new();
    let e = r.make_event(());
    driver.at_time(deadline, e.clone());
    assert_eq!(driver.next_wake(), NextWake::At(deadline));

    e.cancel();
    assert_eq!(driver.next_wake(), NextWake::Never);
}

/// Sleeps once on a pre-built block request, recording its tag on resume.
struct Tagged {
    step: Option<Step>,
    tag: &'static str,
    order: Rc<RefCell<Vec<&'static str>>>,
}

impl Task for Tagged {
    fn activate(&mut self, position: u32) -> Step {
        if position == TERMINATED {
            return Step::Done;
        }
        match self.step.take() {
            Some(step) => step,
            None => {
                self.order.borrow_mut().push(self.tag);
                Step::Done
            }
        }
    }
}

#[test]
fn closures_resume_in_unblock_order_across_rendezvous() {
    init();

    let driver = Driver::new().unwrap();
    let order = Rc::new(RefCell::new(Vec::new()));

    let ra = Rendezvous::<u32>::new();
    let ea = ra.make_event(1, ());
    let rb = Rendezvous::<u32>::new();
    let eb = rb.make_event(1, ());

    driver.spawn(Tagged {
        step: Some(ra.block(1)),
        tag: "a",
        order: order.clone(),
    });
    driver.spawn(Tagged {
        step: Some(rb.block(1)),
        tag: "b",
        order: order.clone(),
    });

    eb.trigger();
    ea.trigger();
    driver.run();
    assert_eq!(*order.borrow(), vec!["b", "a"]);
}

#[test]
fn blocked_locations_name_the_spawn_site() {
    init();

    let driver = Driver::new().unwrap();
    let r = Rendezvous::<u32>::new();
    let e = r.make_event(1, ());

    let handle = driver.spawn(Tagged {
        step: Some(r.block(1)),
        tag: "x",
        order: Rc::new(RefCell::new(Vec::new())),
    });
    handle.describe("waiting for test event");

    let locations = driver.blocked_locations();
    assert_eq!(locations.len(), 1);
    assert!(locations[0].contains("driver.rs"));
    assert!(locations[0].contains("waiting for test event"));

    e.trigger();
    driver.run();
    assert!(driver.blocked_locations().is_empty());
    assert!(handle.is_complete());
}

#[test]
fn shutdown_stops_run_forever() {
    init();

    let driver = Driver::new().unwrap();
    let quit = driver.clone();
    driver.at_delay(
        Duration::from_millis(20),
        fun_event(move |_| quit.shutdown()),
    );

    let start = Instant::now();
    driver.run_forever();
    assert!(start.elapsed() >= Duration::from_millis(15));
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[test]
fn drivers_have_distinct_indexes() {
    init();

    let a = Driver::new().unwrap();
    let b = Driver::new().unwrap();
    assert_ne!(a.index(), b.index());
}
