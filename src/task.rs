//! Suspendable tasks.
//!
//! A task is a hand-written (or generated) state machine: the driver calls
//! [`Task::activate`] with a resume position, the task runs until it either
//! finishes or wants to wait on a rendezvous, and reports which through the
//! returned [`Step`]. Position `0` is the entry point; [`TERMINATED`] tells
//! the task that a rendezvous it was blocked on has been destroyed and it
//! should unwind.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::Location;
use std::rc::{Rc, Weak};

use crate::rendezvous::RendezvousCore;

/// Resume position handed to a task blocked on a rendezvous that was
/// destroyed: clean up and return [`Step::Done`].
pub const TERMINATED: u32 = u32::MAX;

/// A cooperative task, resumable at numbered positions.
pub trait Task: 'static {
    /// Runs the task from `position` until it returns or blocks again.
    fn activate(&mut self, position: u32) -> Step;
}

/// What a task does next after an activation.
pub enum Step {
    /// The task is finished; its resources are released.
    Done,
    /// Suspend on a rendezvous. Built by [`Rendezvous::block`] and
    /// [`Gather::block`].
    ///
    /// [`Rendezvous::block`]: crate::Rendezvous::block
    /// [`Gather::block`]: crate::Gather::block
    Sleep(Sleep),
}

/// An opaque block request: which rendezvous to wait on and where to resume.
pub struct Sleep {
    pub(crate) core: Rc<RendezvousCore>,
    pub(crate) position: u32,
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Done => f.write_str("Step::Done"),
            Step::Sleep(sleep) => f
                .debug_struct("Step::Sleep")
                .field("position", &sleep.position)
                .finish(),
        }
    }
}

/// Runtime bookkeeping for one spawned task.
pub(crate) struct ClosureCell {
    task: RefCell<Box<dyn Task>>,
    position: Cell<u32>,
    blocked_on: RefCell<Weak<RendezvousCore>>,
    location: &'static Location<'static>,
    description: RefCell<Option<String>>,
}

impl ClosureCell {
    pub(crate) fn new(task: Box<dyn Task>, location: &'static Location<'static>) -> ClosureCell {
        ClosureCell {
            task: RefCell::new(task),
            position: Cell::new(0),
            blocked_on: RefCell::new(Weak::new()),
            location,
            description: RefCell::new(None),
        }
    }

    pub(crate) fn activate(&self, position: u32) -> Step {
        self.position.set(position);
        self.task.borrow_mut().activate(position)
    }

    pub(crate) fn set_position(&self, position: u32) {
        self.position.set(position);
    }

    pub(crate) fn position(&self) -> u32 {
        self.position.get()
    }

    pub(crate) fn set_blocked_on(&self, r: Weak<RendezvousCore>) {
        *self.blocked_on.borrow_mut() = r;
    }

    pub(crate) fn clear_blocked_on(&self) {
        *self.blocked_on.borrow_mut() = Weak::new();
    }

    pub(crate) fn is_blocked(&self) -> bool {
        self.blocked_on.borrow().strong_count() != 0
    }

    pub(crate) fn set_description(&self, description: String) {
        *self.description.borrow_mut() = Some(description);
    }

    pub(crate) fn location(&self) -> String {
        format!("{}:{}", self.location.file(), self.location.line())
    }

    pub(crate) fn location_description(&self) -> String {
        match &*self.description.borrow() {
            Some(d) => format!("{}:{} {}", self.location.file(), self.location.line(), d),
            None => self.location(),
        }
    }
}

/// A handle on a spawned task, for diagnostics.
///
/// The runtime keeps the task alive while it is blocked; the handle only
/// observes it.
#[derive(Clone)]
pub struct TaskHandle {
    pub(crate) cell: Rc<ClosureCell>,
}

impl TaskHandle {
    /// `file:line` of the `spawn` call.
    pub fn location(&self) -> String {
        self.cell.location()
    }

    /// Location plus the optional description set at spawn time.
    pub fn location_description(&self) -> String {
        self.cell.location_description()
    }

    /// Attaches a human-readable description used by
    /// [`Driver::blocked_locations`](crate::Driver::blocked_locations).
    pub fn describe(&self, description: impl Into<String>) {
        self.cell.set_description(description.into());
    }

    /// True once the task has returned [`Step::Done`] or been terminated.
    pub fn is_complete(&self) -> bool {
        self.cell.position() == TERMINATED && !self.cell.is_blocked()
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("location", &self.location())
            .field("blocked", &self.cell.is_blocked())
            .finish()
    }
}
