//! Interval bookkeeping
//!
//! Pending timed waits are stack-disciplined: `begin_interval` pushes,
//! `complete_interval` pops, and nesting completes in reverse order of being
//! begun. Each script owns exactly one stack.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::wait::WaitGate;

#[derive(Debug)]
pub struct IntervalEntry {
    /// Live timer; `None` during dry runs.
    pub gate: Option<WaitGate>,
    /// Completion flag shared with the timer thread; `None` during dry runs.
    pub done: Option<Arc<AtomicBool>>,
    pub label: String,
}

#[derive(Debug, Default)]
pub struct IntervalStack {
    entries: Vec<IntervalEntry>,
}

impl IntervalStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: IntervalEntry) {
        self.entries.push(entry);
    }

    pub fn pop(&mut self) -> Option<IntervalEntry> {
        self.entries.pop()
    }

    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
