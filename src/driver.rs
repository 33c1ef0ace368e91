//! The event loop.
//!
//! A driver owns every runtime structure of one loop thread: the per-fd
//! event slots, the timer heap, the asap and preblock queues, the unblocked
//! FIFO of rendezvous whose closures are ready to resume, and the backend
//! interest sets. Each tick runs the stages in a fixed order: preblock
//! events, fd-interest reconciliation, the backend block, then signal, fd,
//! timer, and asap dispatch, resuming unblocked closures after each
//! dispatch stage.
//!
//! Multiple drivers may coexist on one thread, identified by a small index;
//! they share nothing but the process-wide signal state.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::env;
use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::panic::Location;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use log::{error, trace};

use crate::event::core::{EventCore, EventRef};
use crate::event::Event;
use crate::fds::FdTable;
use crate::rendezvous::RendezvousCore;
use crate::signal;
use crate::sys::selector::{revents, PollFds, POLL_READ, POLL_WRITE};
use crate::task::{ClosureCell, Step, Task, TaskHandle, TERMINATED};
use crate::timer::TimerHeap;

/// Capacity of the per-thread driver table. Fd callbacks pack
/// `driver_index + fd * CAPACITY` into a single word.
pub(crate) const DRIVER_CAPACITY: usize = 256;

/// Which readiness a fd registration waits for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FdAction {
    Read = 0,
    Write = 1,
}

/// When the loop would next have work, as reported by [`Driver::next_wake`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NextWake {
    /// Immediate work is pending.
    Now,
    /// The earliest foreground timer deadline.
    At(Instant),
    /// No foreground timer exists.
    Never,
}

/// Driver construction options. [`Driver::new`] applies the `TRYST_DRIVER`
/// and `TRYST_NO_EPOLL` environment overrides on top of the defaults.
#[derive(Clone, Copy, Debug, Default)]
pub struct DriverConfig {
    /// Skip the epoll backend and multiplex through poll(2) alone.
    pub no_epoll: bool,
}

type ErrorHandler = Box<dyn Fn(RawFd, io::Error, &str)>;
type BackendError = (RawFd, io::Error, String);

/// One fd's readiness as reported by the backend.
struct Readiness {
    fd: RawFd,
    readable: bool,
    writable: bool,
    error: bool,
    hangup: bool,
}

struct Registry {
    slots: Vec<Option<Weak<DriverState>>>,
    next: usize,
}

thread_local! {
    static REGISTRY: RefCell<Registry> = RefCell::new(Registry {
        slots: Vec::new(),
        next: 0,
    });
}

fn reserve_index() -> io::Result<usize> {
    REGISTRY.with(|reg| {
        let mut reg = reg.borrow_mut();
        if reg.next < DRIVER_CAPACITY {
            let index = reg.next;
            reg.next += 1;
            if reg.slots.len() <= index {
                reg.slots.resize(index + 1, None);
            }
            return Ok(index);
        }
        for (index, slot) in reg.slots.iter_mut().enumerate() {
            if slot.as_ref().map_or(true, |w| w.strong_count() == 0) {
                *slot = None;
                return Ok(index);
            }
        }
        Err(io::Error::new(
            io::ErrorKind::Other,
            "driver table exhausted",
        ))
    })
}

pub(crate) fn by_index(index: usize) -> Option<Rc<DriverState>> {
    REGISTRY
        .try_with(|reg| {
            reg.borrow()
                .slots
                .get(index)
                .and_then(|slot| slot.as_ref())
                .and_then(Weak::upgrade)
        })
        .ok()
        .flatten()
}

/// At-trigger hook installed on every fd registration: decodes the packed
/// `(driver, fd)` word and marks the fd changed, so completed or discarded
/// events always drop their backend interest before the next block.
fn fd_disinterest(arg: usize) {
    let index = arg % DRIVER_CAPACITY;
    let fd = (arg / DRIVER_CAPACITY) as RawFd;
    if let Some(d) = by_index(index) {
        d.fds.borrow_mut().push_change(fd);
    }
}

pub(crate) struct DriverState {
    index: usize,
    /// Weak self-reference, so `&self` methods can hand an owning edge to a
    /// blocking rendezvous.
    me: Weak<DriverState>,
    unblocked: RefCell<VecDeque<Rc<RendezvousCore>>>,
    closures: RefCell<Vec<Weak<ClosureCell>>>,
    fds: RefCell<FdTable>,
    timers: RefCell<TimerHeap>,
    asap: RefCell<VecDeque<EventRef>>,
    preblock: RefCell<VecDeque<EventRef>>,
    sel: RefCell<Selector>,
    running: Cell<bool>,
    errh: RefCell<Option<ErrorHandler>>,
}

impl DriverState {
    pub(crate) fn push_unblocked(&self, r: Rc<RendezvousCore>) {
        self.unblocked.borrow_mut().push_back(r);
    }

    /// Resumes every queued closure, in the FIFO order the rendezvous
    /// unblocked, until the queue drains.
    pub(crate) fn run_unblocked(&self) {
        loop {
            let r = self.unblocked.borrow_mut().pop_front();
            let r = match r {
                Some(r) => r,
                None => break,
            };
            if let Some(blocked) = r.take_blocked() {
                blocked.closure.clear_blocked_on();
                self.run_closure(blocked.closure, blocked.position);
            }
        }
    }

    fn run_closure(&self, cell: Rc<ClosureCell>, position: u32) {
        match cell.activate(position) {
            Step::Done => cell.set_position(TERMINATED),
            Step::Sleep(sleep) => {
                let me = match self.me.upgrade() {
                    Some(me) => me,
                    None => return,
                };
                cell.set_position(sleep.position);
                sleep.core.block(cell, sleep.position, &me);
            }
        }
    }

    fn has_foreground(&self) -> bool {
        self.timers.borrow().has_foreground()
            || self.sel.borrow().fd_interest_count() > 0
            || signal::foreground_count() > 0
    }

    fn update_fds(&self) {
        if !self.fds.borrow().has_change() {
            return;
        }
        let mut errors = Vec::new();
        {
            let mut fds = self.fds.borrow_mut();
            let mut sel = self.sel.borrow_mut();
            while let Some(fd) = fds.pop_change() {
                let (readable, writable) = fds.desired(fd);
                sel.update(fd, readable, writable, &mut errors);
            }
        }
        self.report_errors(errors);
    }

    fn dispatch_fds(&self, readiness: Vec<Readiness>) {
        if readiness.is_empty() {
            return;
        }
        let mut fired: Vec<(Event<(i32,)>, i32)> = Vec::new();
        {
            let mut fds = self.fds.borrow_mut();
            for r in &readiness {
                if r.hangup {
                    let code = if r.error { -libc::ECONNRESET } else { 0 };
                    for e in fds.take(r.fd, FdAction::Read) {
                        fired.push((e, code));
                    }
                    for e in fds.take(r.fd, FdAction::Write) {
                        fired.push((e, -libc::ESHUTDOWN));
                    }
                } else {
                    if r.readable {
                        for e in fds.take(r.fd, FdAction::Read) {
                            fired.push((e, 0));
                        }
                    }
                    if r.writable {
                        for e in fds.take(r.fd, FdAction::Write) {
                            fired.push((e, 0));
                        }
                    }
                }
            }
        }
        for (e, code) in fired {
            e.trigger(code);
        }
    }

    /// One loop iteration. Returns `false` when the loop should stop because
    /// no foreground work remains (never in `forever` mode).
    fn tick(&self, forever: bool) -> bool {
        trace!("driver {} tick", self.index);

        // Preblock events run once per tick, before the backend blocks.
        loop {
            let e = self.preblock.borrow_mut().pop_front();
            match e {
                Some(e) => e.fire(true),
                None => break,
            }
        }
        self.run_unblocked();

        self.update_fds();

        self.timers.borrow_mut().cull();
        let now = Instant::now();
        let immediate = !self.asap.borrow().is_empty()
            || !self.preblock.borrow().is_empty()
            || signal::any_active()
            || !self.unblocked.borrow().is_empty();
        let timeout_ms: libc::c_int = if immediate {
            0
        } else {
            let head = self.timers.borrow().head_expiry();
            match head {
                Some(h) if h <= now => 0,
                head => {
                    if !forever && !self.has_foreground() {
                        return false; // no more foreground events
                    }
                    match head {
                        Some(h) => duration_to_ms(h - now),
                        None => -1,
                    }
                }
            }
        };

        let (readiness, sig_ready) = {
            let mut errors = Vec::new();
            let out = self
                .sel
                .borrow_mut()
                .wait(timeout_ms, signal::pipe_read_fd(), &mut errors);
            self.report_errors(errors);
            out
        };

        if sig_ready && !signal::any_active() {
            // A stray wake-up byte with no pending flag; swallow it so the
            // loop cannot spin on a readable signal pipe.
            signal::drain_pipe();
        }
        if signal::any_active() {
            signal::dispatch(self);
        }

        self.dispatch_fds(readiness);
        self.run_unblocked();

        let now = Instant::now();
        loop {
            let e = self.timers.borrow_mut().pop_expired(now);
            match e {
                Some(e) => e.fire(true),
                None => break,
            }
        }
        self.run_unblocked();

        loop {
            let e = self.asap.borrow_mut().pop_front();
            match e {
                Some(e) => e.fire(true),
                None => break,
            }
        }
        self.run_unblocked();

        true
    }

    fn report_errors(&self, errors: Vec<BackendError>) {
        for (fd, err, msg) in errors {
            match &*self.errh.borrow() {
                Some(errh) => errh(fd, err, &msg),
                None => error!("driver {}: {}: {}", self.index, msg, err),
            }
        }
    }
}

impl Drop for DriverState {
    fn drop(&mut self) {
        let _ = REGISTRY.try_with(|reg| {
            if let Some(slot) = reg.borrow_mut().slots.get_mut(self.index) {
                *slot = None;
            }
        });
    }
}

fn duration_to_ms(d: Duration) -> libc::c_int {
    // Round up so a sub-millisecond wait does not busy-spin at timeout zero.
    let ms = (d.as_nanos() + 999_999) / 1_000_000;
    ms.min(libc::c_int::MAX as u128) as libc::c_int
}

/// The single-threaded cooperative event loop.
///
/// `Driver` is a cheap clonable handle; clones share one loop. All
/// registration methods take an event handle and return immediately. Only
/// [`run`](Driver::run), [`run_forever`](Driver::run_forever), and
/// [`run_once`](Driver::run_once) block.
pub struct Driver {
    d: Rc<DriverState>,
}

impl Driver {
    /// Creates a driver, honoring `TRYST_DRIVER` (`epoll` or `poll`) and
    /// `TRYST_NO_EPOLL` from the environment.
    pub fn new() -> io::Result<Driver> {
        let mut config = DriverConfig::default();
        if env::var_os("TRYST_NO_EPOLL").is_some() {
            config.no_epoll = true;
        }
        match env::var("TRYST_DRIVER") {
            Ok(ref s) if s == "poll" => config.no_epoll = true,
            Ok(ref s) if s == "epoll" => config.no_epoll = false,
            _ => {}
        }
        Driver::with_config(config)
    }

    pub fn with_config(config: DriverConfig) -> io::Result<Driver> {
        let index = reserve_index()?;
        let d = Rc::new_cyclic(|me| DriverState {
            index,
            me: me.clone(),
            unblocked: RefCell::new(VecDeque::new()),
            closures: RefCell::new(Vec::new()),
            fds: RefCell::new(FdTable::new()),
            timers: RefCell::new(TimerHeap::new()),
            asap: RefCell::new(VecDeque::new()),
            preblock: RefCell::new(VecDeque::new()),
            sel: RefCell::new(Selector::new(!config.no_epoll)),
            running: Cell::new(false),
            errh: RefCell::new(None),
        });
        REGISTRY.with(|reg| {
            reg.borrow_mut().slots[index] = Some(Rc::downgrade(&d));
        });
        Ok(Driver { d })
    }

    /// This driver's slot in the per-thread driver table.
    pub fn index(&self) -> usize {
        self.d.index
    }

    /// Spawns a cooperative task and runs it to its first block point.
    #[track_caller]
    pub fn spawn(&self, task: impl Task) -> TaskHandle {
        let cell = Rc::new(ClosureCell::new(Box::new(task), Location::caller()));
        self.d.closures.borrow_mut().push(Rc::downgrade(&cell));
        self.d.run_closure(cell.clone(), 0);
        TaskHandle { cell }
    }

    /// Resolves `e` with `0` when `fd` is ready for `action`, or with a
    /// negative error code: `-ECONNRESET` on a read-side error or hangup,
    /// `-ESHUTDOWN` on the write side, `-ECANCELED` on [`kill_fd`].
    ///
    /// [`kill_fd`]: Driver::kill_fd
    pub fn at_fd(&self, fd: RawFd, action: FdAction, e: Event<(i32,)>) {
        if fd < 0 {
            error!("at_fd: negative fd");
            debug_assert!(false, "at_fd: negative fd");
            return;
        }
        if e.is_empty() {
            return;
        }
        let arg = self.d.index + fd as usize * DRIVER_CAPACITY;
        EventCore::add_at_trigger_fn(e.core(), fd_disinterest, arg);
        let mut fds = self.d.fds.borrow_mut();
        fds.add(fd, action, e);
        fds.push_change(fd);
    }

    pub fn at_fd_read(&self, fd: RawFd, e: Event<(i32,)>) {
        self.at_fd(fd, FdAction::Read, e);
    }

    pub fn at_fd_write(&self, fd: RawFd, e: Event<(i32,)>) {
        self.at_fd(fd, FdAction::Write, e);
    }

    /// Triggers every pending event on `fd` with `-ECANCELED` and forgets
    /// the backend interest.
    pub fn kill_fd(&self, fd: RawFd) {
        let events = {
            let mut fds = self.d.fds.borrow_mut();
            let events = fds.take_all(fd);
            fds.push_change(fd);
            events
        };
        for e in events {
            e.trigger(-libc::ECANCELED);
        }
    }

    /// Resolves `e` at the absolute `deadline`. Foreground: keeps the loop
    /// alive until it fires.
    pub fn at_time(&self, deadline: Instant, e: Event<()>) {
        self.at_time_full(deadline, e, false);
    }

    /// Like [`at_time`](Driver::at_time), but a background timer: it fires
    /// on schedule yet does not by itself keep the loop alive.
    pub fn at_background_time(&self, deadline: Instant, e: Event<()>) {
        self.at_time_full(deadline, e, true);
    }

    fn at_time_full(&self, deadline: Instant, e: Event<()>, background: bool) {
        if !e.is_empty() {
            self.d
                .timers
                .borrow_mut()
                .push(deadline, e.into_ref(), background);
        }
    }

    /// Resolves `e` after `delay`; a zero delay degrades to
    /// [`at_asap`](Driver::at_asap).
    pub fn at_delay(&self, delay: Duration, e: Event<()>) {
        if delay.is_zero() {
            self.at_asap(e);
        } else {
            self.at_time(Instant::now() + delay, e);
        }
    }

    /// Resolves `e` at the end of the current tick, after fd and timer
    /// dispatch.
    pub fn at_asap(&self, e: Event<()>) {
        if !e.is_empty() {
            self.d.asap.borrow_mut().push_back(e.into_ref());
        }
    }

    /// Resolves `e` once per tick just before the backend blocks.
    pub fn at_preblock(&self, e: Event<()>) {
        if !e.is_empty() {
            self.d.preblock.borrow_mut().push_back(e.into_ref());
        }
    }

    /// Resolves `e` on delivery of `signo`. Signal state is process-wide:
    /// whichever driver loops on this thread drains the shared signal pipe.
    pub fn at_signal(signo: i32, e: Event<()>) {
        signal::at_signal(signo, e, false);
    }

    /// Like [`at_signal`](Driver::at_signal) without keeping the loop alive.
    pub fn at_background_signal(signo: i32, e: Event<()>) {
        signal::at_signal(signo, e, true);
    }

    /// Runs the loop until no foreground work remains or
    /// [`shutdown`](Driver::shutdown) is called.
    pub fn run(&self) {
        self.d.running.set(true);
        self.d.sel.borrow_mut().check_fork();
        while self.d.running.get() && self.d.tick(false) {}
    }

    /// Runs the loop until [`shutdown`](Driver::shutdown), sleeping through
    /// stretches with no foreground work.
    pub fn run_forever(&self) {
        self.d.running.set(true);
        self.d.sel.borrow_mut().check_fork();
        while self.d.running.get() {
            self.d.tick(true);
        }
    }

    /// Runs one tick: at most one backend block plus the dispatch stages.
    pub fn run_once(&self) {
        self.d.sel.borrow_mut().check_fork();
        self.d.tick(false);
    }

    /// Makes `run` and `run_forever` return after the current tick.
    pub fn shutdown(&self) {
        self.d.running.set(false);
    }

    /// When the loop would next do work: now, at the earliest foreground
    /// timer deadline, or never.
    pub fn next_wake(&self) -> NextWake {
        if !self.d.asap.borrow().is_empty()
            || !self.d.preblock.borrow().is_empty()
            || signal::any_active()
            || !self.d.unblocked.borrow().is_empty()
        {
            return NextWake::Now;
        }
        self.d.timers.borrow_mut().cull();
        match self.d.timers.borrow().earliest_foreground() {
            Some(deadline) => NextWake::At(deadline),
            None => NextWake::Never,
        }
    }

    /// Installs the handler for backend failures. Without one, failures are
    /// logged. The loop itself never stops on a backend error.
    pub fn set_error_handler(&self, errh: impl Fn(RawFd, io::Error, &str) + 'static) {
        *self.d.errh.borrow_mut() = Some(Box::new(errh));
    }

    /// `file:line` descriptions of every task currently blocked on a
    /// rendezvous.
    pub fn blocked_locations(&self) -> Vec<String> {
        let mut closures = self.d.closures.borrow_mut();
        closures.retain(|w| w.strong_count() != 0);
        closures
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|cell| cell.is_blocked())
            .map(|cell| cell.location_description())
            .collect()
    }

}

impl Clone for Driver {
    fn clone(&self) -> Driver {
        Driver { d: self.d.clone() }
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver").field("index", &self.d.index).finish()
    }
}

/// The backend pair: a poll(2) interest set that is always maintained, with
/// epoll layered on top where available. If epoll fails it is recreated a
/// bounded number of times and then permanently abandoned in favor of
/// poll(2); registrations survive because the poll set never went stale.
struct Selector {
    pollfds: PollFds,
    poll_sig_watched: bool,
    epoll: EpollState,
}

impl Selector {
    fn new(want_epoll: bool) -> Selector {
        Selector {
            pollfds: PollFds::new(),
            poll_sig_watched: false,
            epoll: EpollState::new(want_epoll),
        }
    }

    /// Registered fd interests, excluding the signal pipe.
    fn fd_interest_count(&self) -> usize {
        self.pollfds.len() - self.poll_sig_watched as usize
    }

    fn check_fork(&mut self) {
        self.epoll.check_fork();
    }

    fn update(&mut self, fd: RawFd, readable: bool, writable: bool, errors: &mut Vec<BackendError>) {
        let old = self.pollfds.events(fd);
        let new = poll_interest(readable, writable);
        if old == new {
            return;
        }
        self.pollfds.set_events(fd, new);
        self.epoll.control(fd, old != 0, readable, writable, errors);
    }

    fn wait(
        &mut self,
        timeout_ms: libc::c_int,
        sig_fd: RawFd,
        errors: &mut Vec<BackendError>,
    ) -> (Vec<Readiness>, bool) {
        if self.epoll.ensure(&self.pollfds, sig_fd, errors) {
            self.epoll.watch_sig(sig_fd, errors);
            return self.epoll.wait(timeout_ms, sig_fd, errors);
        }

        if sig_fd >= 0 && !self.poll_sig_watched {
            self.pollfds.set_events(sig_fd, POLL_READ);
            self.poll_sig_watched = true;
        }
        if self.fd_interest_count() == 0 && timeout_ms == 0 {
            return (Vec::new(), false);
        }
        match self.pollfds.poll(timeout_ms) {
            Ok(0) => (Vec::new(), false),
            Ok(_) => {
                let mut out = Vec::new();
                let mut sig_ready = false;
                for (fd, revents) in self.pollfds.ready() {
                    if fd == sig_fd {
                        sig_ready = true;
                        continue;
                    }
                    out.push(Readiness {
                        fd,
                        readable: revents::is_readable(revents),
                        writable: revents::is_writable(revents),
                        error: revents::is_error(revents),
                        hangup: revents::is_hangup(revents),
                    });
                }
                (out, sig_ready)
            }
            Err(ref err) if recoverable(err) => (Vec::new(), false),
            Err(err) => {
                errors.push((-1, err, "poll failure".to_string()));
                (Vec::new(), false)
            }
        }
    }
}

fn poll_interest(readable: bool, writable: bool) -> libc::c_short {
    (if readable { POLL_READ } else { 0 }) | (if writable { POLL_WRITE } else { 0 })
}

fn recoverable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

#[cfg(any(target_os = "linux", target_os = "android"))]
use self::epoll_state::EpollState;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll_state {
    use super::{recoverable, BackendError, Readiness};
    use crate::sys::selector::{epoll_event, epoll_interest, Epoll, EpollEvents, PollFds};
    use log::warn;
    use std::os::unix::io::RawFd;

    /// Bounded retry budget for a misbehaving epoll descriptor; once spent,
    /// the driver stays on poll(2) for good.
    const MAX_ERRCOUNT: u32 = 32;

    pub(super) struct EpollState {
        ep: Option<Epoll>,
        events: EpollEvents,
        err_count: u32,
        pid: libc::pid_t,
        sig_watched: bool,
    }

    impl EpollState {
        pub(super) fn new(enabled: bool) -> EpollState {
            let mut state = EpollState {
                ep: None,
                events: Epoll::events_buffer(),
                err_count: if enabled { 0 } else { MAX_ERRCOUNT },
                pid: unsafe { libc::getpid() },
                sig_watched: false,
            };
            if enabled {
                match Epoll::new() {
                    Ok(ep) => state.ep = Some(ep),
                    Err(err) => {
                        warn!("epoll unavailable, using poll: {}", err);
                        state.err_count = MAX_ERRCOUNT;
                    }
                }
            }
            state
        }

        /// An epoll descriptor does not survive fork; drop it so `ensure`
        /// rebuilds from the poll set in the child.
        pub(super) fn check_fork(&mut self) {
            if self.ep.is_some() && self.pid != unsafe { libc::getpid() } {
                self.ep = None;
                self.sig_watched = false;
            }
        }

        /// True when epoll is usable, recreating the descriptor and
        /// reinstalling every interest if it was lost.
        pub(super) fn ensure(
            &mut self,
            pollfds: &PollFds,
            sig_fd: RawFd,
            errors: &mut Vec<BackendError>,
        ) -> bool {
            'recreate: while self.ep.is_none() && self.err_count < MAX_ERRCOUNT {
                let ep = match Epoll::new() {
                    Ok(ep) => ep,
                    Err(err) => {
                        self.err_count += 1;
                        errors.push((-1, err, "epoll_create1 failure".to_string()));
                        return false;
                    }
                };
                for (fd, events) in pollfds.interests() {
                    if fd == sig_fd {
                        continue;
                    }
                    let readable = events & super::POLL_READ != 0;
                    let writable = events & super::POLL_WRITE != 0;
                    if let Err(err) = ep.control(fd, false, epoll_interest(readable, writable)) {
                        self.err_count += 1;
                        errors.push((fd, err, "epoll_ctl(ADD) failure, retrying".to_string()));
                        continue 'recreate;
                    }
                }
                self.pid = unsafe { libc::getpid() };
                self.sig_watched = false;
                self.ep = Some(ep);
            }
            self.ep.is_some()
        }

        pub(super) fn watch_sig(&mut self, sig_fd: RawFd, errors: &mut Vec<BackendError>) {
            if sig_fd < 0 || self.sig_watched {
                return;
            }
            let result = match &self.ep {
                Some(ep) => ep.control(sig_fd, false, epoll_interest(true, false)),
                None => return,
            };
            match result {
                Ok(()) => self.sig_watched = true,
                Err(err) => self.fail(sig_fd, err, "epoll_ctl(ADD) failure", errors),
            }
        }

        pub(super) fn control(
            &mut self,
            fd: RawFd,
            was_present: bool,
            readable: bool,
            writable: bool,
            errors: &mut Vec<BackendError>,
        ) {
            let events = epoll_interest(readable, writable);
            let result = match &self.ep {
                Some(ep) => ep.control(fd, was_present, events),
                None => return,
            };
            if let Err(err) = result {
                // A deregistration may race with a close(2) elsewhere.
                if events == 0
                    && matches!(err.raw_os_error(), Some(libc::EBADF) | Some(libc::ENOENT))
                {
                    return;
                }
                let op = if events == 0 {
                    "DEL"
                } else if was_present {
                    "MOD"
                } else {
                    "ADD"
                };
                self.fail(fd, err, &format!("epoll_ctl({}) failure", op), errors);
            }
        }

        fn fail(&mut self, fd: RawFd, err: std::io::Error, what: &str, errors: &mut Vec<BackendError>) {
            self.err_count += 1;
            let verdict = if self.err_count < MAX_ERRCOUNT {
                "retrying"
            } else {
                "giving up"
            };
            errors.push((fd, err, format!("{}, {}", what, verdict)));
            self.ep = None;
            self.sig_watched = false;
        }

        pub(super) fn wait(
            &mut self,
            timeout_ms: libc::c_int,
            sig_fd: RawFd,
            errors: &mut Vec<BackendError>,
        ) -> (Vec<Readiness>, bool) {
            let ep = match &self.ep {
                Some(ep) => ep,
                None => return (Vec::new(), false),
            };
            match ep.wait(&mut self.events, timeout_ms) {
                Ok(()) => {}
                Err(ref err) if recoverable(err) => return (Vec::new(), false),
                Err(err) => {
                    errors.push((-1, err, "epoll_wait failure".to_string()));
                    return (Vec::new(), false);
                }
            }
            let mut out = Vec::new();
            let mut sig_ready = false;
            for event in self.events.iter() {
                let fd = epoll_event::fd(event);
                if fd == sig_fd {
                    sig_ready = true;
                    continue;
                }
                out.push(Readiness {
                    fd,
                    readable: epoll_event::is_readable(event),
                    writable: epoll_event::is_writable(event),
                    error: epoll_event::is_error(event),
                    hangup: epoll_event::is_hangup(event),
                });
            }
            (out, sig_ready)
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
use self::epoll_state::EpollState;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
mod epoll_state {
    use super::{BackendError, Readiness};
    use crate::sys::selector::PollFds;
    use std::os::unix::io::RawFd;

    /// Platforms without epoll always run on poll(2).
    pub(super) struct EpollState;

    impl EpollState {
        pub(super) fn new(_enabled: bool) -> EpollState {
            EpollState
        }

        pub(super) fn check_fork(&mut self) {}

        pub(super) fn ensure(
            &mut self,
            _pollfds: &PollFds,
            _sig_fd: RawFd,
            _errors: &mut Vec<BackendError>,
        ) -> bool {
            false
        }

        pub(super) fn watch_sig(&mut self, _sig_fd: RawFd, _errors: &mut Vec<BackendError>) {}

        pub(super) fn control(
            &mut self,
            _fd: RawFd,
            _was_present: bool,
            _readable: bool,
            _writable: bool,
            _errors: &mut Vec<BackendError>,
        ) {
        }

        pub(super) fn wait(
            &mut self,
            _timeout_ms: libc::c_int,
            _sig_fd: RawFd,
            _errors: &mut Vec<BackendError>,
        ) -> (Vec<Readiness>, bool) {
            (Vec::new(), false)
        }
    }
}
