mod poll;

pub(crate) use self::poll::{revents, PollFds, POLL_READ, POLL_WRITE};

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) use self::epoll::{epoll_interest, event as epoll_event, Epoll, EpollEvents};
