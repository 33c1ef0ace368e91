use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::sys::unix::syscall;

/// An epoll interest set.
///
/// The driver layers this on top of its poll(2) set: interests are mirrored
/// into both, and if epoll misbehaves the driver falls back to poll(2)
/// without losing registrations.
#[derive(Debug)]
pub(crate) struct Epoll {
    ep: OwnedFd,
}

pub(crate) type EpollEvents = Vec<libc::epoll_event>;

/// Size of the readiness buffer handed to `epoll_wait`.
const EVENT_CAPACITY: usize = 128;

pub(crate) fn epoll_interest(readable: bool, writable: bool) -> u32 {
    let mut kind = 0;
    if readable {
        kind |= (libc::EPOLLIN | libc::EPOLLRDHUP) as u32;
    }
    if writable {
        kind |= libc::EPOLLOUT as u32;
    }
    kind
}

impl Epoll {
    pub(crate) fn new() -> io::Result<Epoll> {
        // SAFETY: `epoll_create1(2)` ensures the fd is valid.
        let ep = unsafe { OwnedFd::from_raw_fd(syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?) };
        Ok(Epoll { ep })
    }

    pub(crate) fn events_buffer() -> EpollEvents {
        Vec::with_capacity(EVENT_CAPACITY)
    }

    /// Adds, modifies, or removes interest in `fd`. `events == 0` removes.
    pub(crate) fn control(&self, fd: RawFd, was_present: bool, events: u32) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events,
            u64: fd as u64,
            #[cfg(target_os = "redox")]
            _pad: 0,
        };

        let op = if events == 0 {
            libc::EPOLL_CTL_DEL
        } else if was_present {
            libc::EPOLL_CTL_MOD
        } else {
            libc::EPOLL_CTL_ADD
        };
        let ep = self.ep.as_raw_fd();
        syscall!(epoll_ctl(ep, op, fd, &mut event)).map(|_| ())
    }

    pub(crate) fn wait(&self, events: &mut EpollEvents, timeout_ms: libc::c_int) -> io::Result<()> {
        events.clear();
        syscall!(epoll_wait(
            self.ep.as_raw_fd(),
            events.as_mut_ptr(),
            events.capacity() as i32,
            timeout_ms,
        ))
        .map(|n_events| {
            // This is safe because `epoll_wait` ensures that `n_events` are
            // assigned.
            unsafe { events.set_len(n_events as usize) };
        })
    }
}

pub(crate) mod event {
    use std::os::fd::RawFd;

    pub(crate) fn fd(event: &libc::epoll_event) -> RawFd {
        event.u64 as RawFd
    }

    pub(crate) fn is_readable(event: &libc::epoll_event) -> bool {
        (event.events as libc::c_int & (libc::EPOLLIN | libc::EPOLLRDHUP)) != 0
    }

    pub(crate) fn is_writable(event: &libc::epoll_event) -> bool {
        (event.events as libc::c_int & libc::EPOLLOUT) != 0
    }

    pub(crate) fn is_error(event: &libc::epoll_event) -> bool {
        (event.events as libc::c_int & libc::EPOLLERR) != 0
    }

    pub(crate) fn is_hangup(event: &libc::epoll_event) -> bool {
        (event.events as libc::c_int & (libc::EPOLLERR | libc::EPOLLHUP)) != 0
    }
}
