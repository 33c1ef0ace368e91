/// Helper macro to execute a system call that returns an `io::Result`.
macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

pub(crate) use syscall;

pub(crate) mod selector;

use std::io;
use std::os::unix::io::RawFd;

/// Creates a nonblocking, close-on-exec pipe and returns `[read, write]`.
#[cfg(any(
    target_os = "android",
    target_os = "dragonfly",
    target_os = "freebsd",
    target_os = "linux",
    target_os = "netbsd",
    target_os = "openbsd",
))]
pub(crate) fn pipe() -> io::Result<[RawFd; 2]> {
    let mut fds: [RawFd; 2] = [-1, -1];
    syscall!(pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC))?;
    Ok(fds)
}

#[cfg(not(any(
    target_os = "android",
    target_os = "dragonfly",
    target_os = "freebsd",
    target_os = "linux",
    target_os = "netbsd",
    target_os = "openbsd",
)))]
pub(crate) fn pipe() -> io::Result<[RawFd; 2]> {
    let mut fds: [RawFd; 2] = [-1, -1];
    syscall!(pipe(fds.as_mut_ptr()))?;
    for fd in &fds {
        if let Err(err) = syscall!(fcntl(*fd, libc::F_SETFL, libc::O_NONBLOCK))
            .and_then(|_| syscall!(fcntl(*fd, libc::F_SETFD, libc::FD_CLOEXEC)))
        {
            let _ = syscall!(close(fds[0]));
            let _ = syscall!(close(fds[1]));
            return Err(err);
        }
    }
    Ok(fds)
}

/// Reads `errno` without going through `io::Error`. Async-signal-safe.
pub(crate) fn take_errno() -> i32 {
    unsafe { *errno_location() }
}

/// Restores `errno`. Async-signal-safe.
pub(crate) fn set_errno(value: i32) {
    unsafe { *errno_location() = value }
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "emscripten"))]
unsafe fn errno_location() -> *mut libc::c_int {
    libc::__errno_location()
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
unsafe fn errno_location() -> *mut libc::c_int {
    libc::__error()
}

#[cfg(any(target_os = "openbsd", target_os = "netbsd", target_os = "dragonfly"))]
unsafe fn errno_location() -> *mut libc::c_int {
    libc::__errno()
}
