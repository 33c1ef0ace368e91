//! A lightweight cooperative event-driven runtime.
//!
//! `tryst` is built from three interlocking pieces:
//!
//! * [`Event`]: a one-shot completion handle carrying zero to four typed
//!   result values, delivered through shared [`Slot`]s.
//! * [`Rendezvous`] and [`Gather`]: collections of pending events that a
//!   cooperative task waits on. Events migrate from *waiting* to *ready*
//!   when triggered; dropping the last handle to an event instead
//!   *discards* it, which is how cancellation propagates.
//! * [`Driver`]: a single-threaded loop that demultiplexes fd readiness,
//!   timers, POSIX signals, and immediate work onto suspended [`Task`]s.
//!
//! Tasks are explicit state machines: [`Task::activate`] resumes at a
//! numbered position and returns a [`Step`] saying whether the task is done
//! or wants to block on a rendezvous again.
//!
//! # Examples
//!
//! Waiting for two events, reading one result back through a slot:
//!
//! ```
//! use tryst::{Gather, Slot};
//!
//! let r = Gather::new();
//! let status = Slot::new();
//!
//! let wake = r.make_event(());
//! let fetch = r.make_event((&status,));
//! assert_eq!(r.waiting(), 2);
//!
//! wake.trigger();
//! fetch.trigger(42);
//!
//! assert_eq!(r.waiting(), 0);
//! assert_eq!(status.take(), Some(42));
//! ```
//!
//! Joining named completions in trigger order:
//!
//! ```
//! use tryst::Rendezvous;
//!
//! let r = Rendezvous::<u32>::new();
//! let a = r.make_event(1, ());
//! let b = r.make_event(2, ());
//!
//! b.trigger();
//! a.trigger();
//!
//! assert_eq!(r.join(), Some(2));
//! assert_eq!(r.join(), Some(1));
//! assert_eq!(r.join(), None);
//! ```

#![allow(clippy::new_without_default)]

mod adapter;
mod driver;
mod event;
mod fds;
mod rendezvous;
mod signal;
mod sys;
mod task;
mod timer;

pub use crate::adapter::{
    bind, bind_first, bind_last, distribute, fun_event, map, push_back, with_code, with_timeout,
};
pub use crate::driver::{Driver, DriverConfig, FdAction, NextWake};
pub use crate::event::{Event, Results, Slot, SlotPack};
pub use crate::rendezvous::{Gather, Rendezvous};
pub use crate::task::{Step, Task, TaskHandle, TERMINATED};
