use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::io;
use std::os::unix::io::RawFd;

use crate::sys::unix::syscall;

#[cfg(any(target_os = "linux", target_os = "android"))]
const POLLRDHUP: libc::c_short = libc::POLLRDHUP;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const POLLRDHUP: libc::c_short = 0;

pub(crate) const POLL_READ: libc::c_short = libc::POLLIN | POLLRDHUP;
pub(crate) const POLL_WRITE: libc::c_short = libc::POLLOUT;

/// The poll(2) interest set.
///
/// Entries are kept dense so the vector can be handed to `poll` directly; a
/// per-fd index map keeps updates and removals O(1). Removal swaps the last
/// entry into the vacated position, mirroring how the waiting lists elsewhere
/// in the crate unlink events.
pub(crate) struct PollFds {
    fds: Vec<libc::pollfd>,
    index: HashMap<RawFd, usize>,
}

impl PollFds {
    pub(crate) fn new() -> PollFds {
        PollFds {
            fds: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.fds.len()
    }

    /// Current interest bits for `fd`, zero if absent.
    pub(crate) fn events(&self, fd: RawFd) -> libc::c_short {
        match self.index.get(&fd) {
            Some(&i) => self.fds[i].events,
            None => 0,
        }
    }

    /// Sets the interest bits for `fd`; zero removes the entry.
    pub(crate) fn set_events(&mut self, fd: RawFd, events: libc::c_short) {
        match self.index.get(&fd) {
            None => {
                if events != 0 {
                    self.index.insert(fd, self.fds.len());
                    self.fds.push(libc::pollfd {
                        fd,
                        events,
                        revents: 0,
                    });
                }
            }
            Some(&i) => {
                if events != 0 {
                    self.fds[i].events = events;
                } else {
                    self.index.remove(&fd);
                    self.fds.swap_remove(i);
                    if i < self.fds.len() {
                        self.index.insert(self.fds[i].fd, i);
                    }
                }
            }
        }
    }

    pub(crate) fn poll(&mut self, timeout_ms: libc::c_int) -> io::Result<usize> {
        for pfd in self.fds.iter_mut() {
            pfd.revents = 0;
        }
        syscall!(poll(
            self.fds.as_mut_ptr(),
            self.fds.len() as libc::nfds_t,
            timeout_ms,
        ))
        .map(|n| n as usize)
    }

    /// `(fd, revents)` pairs with nonzero revents after the last `poll`.
    pub(crate) fn ready(&self) -> Vec<(RawFd, libc::c_short)> {
        self.fds
            .iter()
            .filter(|pfd| pfd.revents != 0)
            .map(|pfd| (pfd.fd, pfd.revents))
            .collect()
    }

    /// Every registered `(fd, events)` pair; used to reinstall interest when
    /// the epoll descriptor is recreated.
    pub(crate) fn interests(&self) -> Vec<(RawFd, libc::c_short)> {
        self.fds.iter().map(|pfd| (pfd.fd, pfd.events)).collect()
    }
}

impl Debug for PollFds {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollFds").field("len", &self.fds.len()).finish()
    }
}

pub(crate) mod revents {
    pub(crate) fn is_readable(revents: libc::c_short) -> bool {
        revents & (libc::POLLIN | super::POLLRDHUP) != 0
    }

    pub(crate) fn is_writable(revents: libc::c_short) -> bool {
        revents & libc::POLLOUT != 0
    }

    pub(crate) fn is_error(revents: libc::c_short) -> bool {
        revents & (libc::POLLNVAL | libc::POLLERR) != 0
    }

    pub(crate) fn is_hangup(revents: libc::c_short) -> bool {
        revents & (libc::POLLNVAL | libc::POLLERR | libc::POLLHUP) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_clear_interest() {
        let mut pfds = PollFds::new();
        pfds.set_events(4, POLL_READ);
        pfds.set_events(9, POLL_WRITE);
        pfds.set_events(4, POLL_READ | POLL_WRITE);
        assert_eq!(pfds.len(), 2);
        assert_eq!(pfds.events(4), POLL_READ | POLL_WRITE);
        assert_eq!(pfds.events(9), POLL_WRITE);

        pfds.set_events(4, 0);
        assert_eq!(pfds.len(), 1);
        assert_eq!(pfds.events(4), 0);
        // The swapped-in entry must still be addressable.
        assert_eq!(pfds.events(9), POLL_WRITE);
    }

    #[test]
    fn clearing_unknown_fd_is_a_no_op() {
        let mut pfds = PollFds::new();
        pfds.set_events(7, 0);
        assert_eq!(pfds.len(), 0);
    }
}
