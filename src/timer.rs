//! The timer set: a 4-ary min-heap keyed on `(deadline, insertion order)`.
//!
//! Timers are *foreground* by default; background timers still fire but do
//! not by themselves keep the loop alive. Heads whose event has already
//! completed are culled before the loop computes its block timeout.

use std::time::Instant;

use crate::event::core::EventRef;

const ARITY: usize = 4;

struct Trec {
    when: Instant,
    order: u32,
    background: bool,
    e: EventRef,
}

impl Trec {
    fn earlier_than(&self, other: &Trec) -> bool {
        self.when < other.when
            || (self.when == other.when && (self.order.wrapping_sub(other.order) as i32) < 0)
    }
}

pub(crate) struct TimerHeap {
    heap: Vec<Trec>,
    next_order: u32,
    foreground: usize,
}

impl TimerHeap {
    pub(crate) fn new() -> TimerHeap {
        TimerHeap {
            heap: Vec::new(),
            next_order: 0,
            foreground: 0,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub(crate) fn has_foreground(&self) -> bool {
        self.foreground != 0
    }

    pub(crate) fn push(&mut self, when: Instant, e: EventRef, background: bool) {
        let order = self.next_order;
        self.next_order = self.next_order.wrapping_add(1);
        if !background {
            self.foreground += 1;
        }
        self.heap.push(Trec {
            when,
            order,
            background,
            e,
        });
        self.sift_up(self.heap.len() - 1);
    }

    pub(crate) fn head_expiry(&self) -> Option<Instant> {
        self.heap.first().map(|t| t.when)
    }

    /// Earliest deadline that keeps the loop alive. Linear: only the
    /// diagnostic `next_wake` asks.
    pub(crate) fn earliest_foreground(&self) -> Option<Instant> {
        self.heap
            .iter()
            .filter(|t| !t.background)
            .map(|t| t.when)
            .min()
    }

    /// Removes head entries whose event has been discarded or triggered.
    pub(crate) fn cull(&mut self) {
        while matches!(self.heap.first(), Some(t) if t.e.is_empty()) {
            self.remove_head();
        }
    }

    /// Detaches the head timer if it has expired at `now`.
    pub(crate) fn pop_expired(&mut self, now: Instant) -> Option<EventRef> {
        match self.heap.first() {
            Some(t) if t.when <= now => Some(self.remove_head().e),
            _ => None,
        }
    }

    fn remove_head(&mut self) -> Trec {
        let removed = self.heap.swap_remove(0);
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        if !removed.background {
            self.foreground -= 1;
        }
        removed
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / ARITY;
            if self.heap[pos].earlier_than(&self.heap[parent]) {
                self.heap.swap(pos, parent);
                pos = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        loop {
            let first = pos * ARITY + 1;
            if first >= self.heap.len() {
                break;
            }
            let last = (first + ARITY).min(self.heap.len());
            let mut smallest = pos;
            for child in first..last {
                if self.heap[child].earlier_than(&self.heap[smallest]) {
                    smallest = child;
                }
            }
            if smallest == pos {
                break;
            }
            self.heap.swap(pos, smallest);
            pos = smallest;
        }
    }
}
