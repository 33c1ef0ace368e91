//! Signal delivery over a self-pipe.
//!
//! The only state a signal handler touches is process-global and
//! async-signal-safe: one flag per signal, one "anything happened" flag, and
//! the write end of a nonblocking close-on-exec pipe. Everything else (the
//! per-signal event list, the foreground accounting, the dispatching set)
//! belongs to the thread that runs the driver loop, which is the sole reader
//! of the pipe.

use std::cell::RefCell;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use log::error;

use crate::adapter::fun_event;
use crate::driver::DriverState;
use crate::event::Event;
use crate::rendezvous;
use crate::sys;

pub(crate) const NSIG: usize = 32;

#[allow(clippy::declare_interior_mutable_const)]
const INACTIVE: AtomicBool = AtomicBool::new(false);

static SIG_ANY_ACTIVE: AtomicBool = AtomicBool::new(false);
static SIG_ACTIVE: [AtomicBool; NSIG] = [INACTIVE; NSIG];
static SIG_PIPE_READ: AtomicI32 = AtomicI32::new(-1);
static SIG_PIPE_WRITE: AtomicI32 = AtomicI32::new(-1);

struct SignalTable {
    handlers: Vec<Event<()>>,
    dispatching: [bool; NSIG],
    foreground: usize,
    total: usize,
}

thread_local! {
    static TABLE: RefCell<SignalTable> = RefCell::new(SignalTable {
        handlers: (0..NSIG).map(|_| Event::empty()).collect(),
        dispatching: [false; NSIG],
        foreground: 0,
        total: 0,
    });
}

extern "C" fn signal_handler(signo: libc::c_int) {
    // Set the flags, wake the loop through the pipe, restore errno. Nothing
    // else is async-signal-safe.
    let saved_errno = sys::take_errno();
    if (signo as usize) < NSIG {
        SIG_ACTIVE[signo as usize].store(true, Ordering::Relaxed);
    }
    SIG_ANY_ACTIVE.store(true, Ordering::Relaxed);
    let wfd = SIG_PIPE_WRITE.load(Ordering::Relaxed);
    if wfd >= 0 {
        let byte = [0u8];
        unsafe {
            libc::write(wfd, byte.as_ptr() as *const libc::c_void, 1);
        }
    }
    sys::set_errno(saved_errno);
}

pub(crate) fn any_active() -> bool {
    SIG_ANY_ACTIVE.load(Ordering::Relaxed)
}

pub(crate) fn foreground_count() -> usize {
    TABLE.with(|t| t.borrow().foreground)
}

pub(crate) fn pipe_read_fd() -> RawFd {
    SIG_PIPE_READ.load(Ordering::Relaxed)
}

fn ensure_pipe() -> io::Result<()> {
    if SIG_PIPE_READ.load(Ordering::Relaxed) >= 0 {
        return Ok(());
    }
    let fds = sys::pipe()?;
    SIG_PIPE_READ.store(fds[0], Ordering::Relaxed);
    SIG_PIPE_WRITE.store(fds[1], Ordering::Relaxed);
    Ok(())
}

fn install_handler(signo: usize) {
    let f: extern "C" fn(libc::c_int) = signal_handler;
    set_sigaction(signo, f as usize as libc::sighandler_t);
}

fn install_default(signo: usize) {
    set_sigaction(signo, libc::SIG_DFL);
}

fn set_sigaction(signo: usize, handler: libc::sighandler_t) {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = handler;
        libc::sigemptyset(&mut sa.sa_mask);
        sa.sa_flags = 0;
        if libc::sigaction(signo as libc::c_int, &sa, std::ptr::null_mut()) == -1 {
            error!(
                "sigaction({}) failed: {}",
                signo,
                io::Error::last_os_error()
            );
        }
    }
}

/// Arranges for `e` to trigger when `signo` is delivered. Foreground
/// registrations keep the driver loop alive.
pub(crate) fn at_signal(signo: i32, e: Event<()>, background: bool) {
    if signo < 0 || signo as usize >= NSIG {
        error!("at_signal: signal {} out of range", signo);
        debug_assert!(false, "at_signal: signal out of range");
        return;
    }
    if let Err(err) = ensure_pipe() {
        error!("at_signal: cannot create signal pipe: {}", err);
        return;
    }
    // An empty event still forces creation of the signal pipe.
    if e.is_empty() {
        return;
    }
    let signo = signo as usize;

    e.at_trigger(fun_event(move |_| registration_gone(signo, background)));
    TABLE.with(|t| {
        let mut t = t.borrow_mut();
        t.total += 1;
        if !background {
            t.foreground += 1;
        }
        let prev = std::mem::replace(&mut t.handlers[signo], Event::empty());
        t.handlers[signo] = merge(prev, e);
        if !t.dispatching[signo] {
            install_handler(signo);
        }
    });
}

fn merge(a: Event<()>, b: Event<()>) -> Event<()> {
    Event::from_ref(rendezvous::merge_refs(a.into_ref(), b.into_ref()))
}

/// Runs when any registration completes, whether delivered or discarded.
fn registration_gone(signo: usize, background: bool) {
    TABLE.with(|t| {
        let mut t = t.borrow_mut();
        t.total -= 1;
        if !background {
            t.foreground -= 1;
        }
        if t.handlers[signo].is_empty() && !t.dispatching[signo] {
            install_default(signo);
        }
    });
}

pub(crate) fn drain_pipe() {
    let rfd = SIG_PIPE_READ.load(Ordering::Relaxed);
    if rfd < 0 {
        return;
    }
    let mut crap = [0u8; 64];
    loop {
        let n = unsafe { libc::read(rfd, crap.as_mut_ptr() as *mut libc::c_void, crap.len()) };
        if n <= 0 {
            break;
        }
    }
}

/// Drains the pipe, blocks the delivered signals, triggers their event
/// lists, runs the resulting closures, resets handlers that have no
/// registrations left, and unblocks the signals again.
pub(crate) fn dispatch(driver: &DriverState) {
    SIG_ANY_ACTIVE.store(false, Ordering::Relaxed);
    drain_pipe();

    let mut delivered = [false; NSIG];
    let mut set: libc::sigset_t = unsafe { std::mem::zeroed() };
    unsafe {
        libc::sigemptyset(&mut set);
    }
    let mut any = false;
    for (signo, flag) in delivered.iter_mut().enumerate() {
        if SIG_ACTIVE[signo].swap(false, Ordering::Relaxed) {
            *flag = true;
            any = true;
            unsafe {
                libc::sigaddset(&mut set, signo as libc::c_int);
            }
        }
    }
    if !any {
        return;
    }

    unsafe {
        libc::sigprocmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
    }

    let mut fired = Vec::new();
    TABLE.with(|t| {
        let mut t = t.borrow_mut();
        for (signo, &hit) in delivered.iter().enumerate() {
            if hit {
                t.dispatching[signo] = true;
                fired.push(std::mem::replace(&mut t.handlers[signo], Event::empty()));
            }
        }
    });
    for e in fired {
        e.trigger();
    }

    // Run closures activated by signals (plus maybe some others) before the
    // signals are unblocked, so responders can reinstall handlers first.
    driver.run_unblocked();

    let mut reset = Vec::new();
    TABLE.with(|t| {
        let mut t = t.borrow_mut();
        for (signo, &hit) in delivered.iter().enumerate() {
            if hit {
                t.dispatching[signo] = false;
                if t.handlers[signo].is_empty() {
                    reset.push(signo);
                }
            }
        }
    });
    for signo in reset {
        install_default(signo);
    }

    unsafe {
        libc::sigprocmask(libc::SIG_UNBLOCK, &set, std::ptr::null_mut());
    }
}
