//! Ordering of work within a single dispatch.
//!
//! Signal and query deliveries run before request callbacks, which run before workflow code is
//! resumed on tick. Queues are re-checked after every task so work enqueued by a task keeps its
//! priority.

use std::{cell::RefCell, collections::VecDeque};

type Task = Box<dyn FnOnce()>;

/// Explicit per-worker task queues
#[derive(Default)]
pub struct Scheduler {
    signals: RefCell<VecDeque<Task>>,
    callbacks: RefCell<VecDeque<Task>>,
    ticks: RefCell<VecDeque<Task>>,
}

impl Scheduler {
    pub fn on_signal(&self, task: impl FnOnce() + 'static) {
        self.signals.borrow_mut().push_back(Box::new(task));
    }

    pub fn on_callback(&self, task: impl FnOnce() + 'static) {
        self.callbacks.borrow_mut().push_back(Box::new(task));
    }

    pub fn on_tick(&self, task: impl FnOnce() + 'static) {
        self.ticks.borrow_mut().push_back(Box::new(task));
    }

    fn next(&self) -> Option<Task> {
        // Each pop is its own statement so no queue stays borrowed while a task runs
        if let Some(t) = self.signals.borrow_mut().pop_front() {
            return Some(t);
        }
        if let Some(t) = self.callbacks.borrow_mut().pop_front() {
            return Some(t);
        }
        self.ticks.borrow_mut().pop_front()
    }

    /// Run queued tasks until every queue is empty
    pub fn tick(&self) {
        while let Some(task) = self.next() {
            task();
        }
    }

    pub fn is_idle(&self) -> bool {
        self.signals.borrow().is_empty()
            && self.callbacks.borrow().is_empty()
            && self.ticks.borrow().is_empty()
    }
}
