//! One-shot completion events and their typed result slots.

pub(crate) mod core;
mod handle;

pub use self::handle::{Event, Results, Slot, SlotPack};
