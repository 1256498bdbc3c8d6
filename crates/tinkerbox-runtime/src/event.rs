//! Per-computer event queue
//!
//! Any thread may push; only the computer's own execution loop pops. The
//! mutex guards queue mutation only, and the condvar wakes a resume loop
//! that is blocked waiting for input.

use crate::value::Value;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Kind of the event delivered when a computer is asked to stop
pub const TERMINATE: &str = "terminate";

/// An input event queued for one computer
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event name, delivered as the first resume value
    pub kind: String,
    /// Positional parameters following the name
    pub args: Vec<Value>,
}

impl Event {
    /// Create an event with the given parameters
    pub fn new(kind: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            kind: kind.into(),
            args,
        }
    }

    /// The synthetic event used to ask a program to stop
    pub fn terminate() -> Self {
        Self::new(TERMINATE, Vec::new())
    }

    /// Does this event pass a filter? An empty filter accepts everything
    /// and `terminate` always gets through.
    pub fn matches(&self, filter: &str) -> bool {
        filter.is_empty() || self.kind == filter || self.kind == TERMINATE
    }

    /// Flatten into the value list handed to a resume
    pub fn into_values(self) -> Vec<Value> {
        let mut values = Vec::with_capacity(self.args.len() + 1);
        values.push(Value::Str(self.kind));
        values.extend(self.args);
        values
    }
}

/// Outcome of waiting for the next event
#[derive(Debug, Clone, PartialEq)]
pub enum Wait {
    /// An event was popped
    Event(Event),
    /// Nothing arrived before the timeout
    TimedOut,
    /// The waiter was woken because it should stop waiting
    Interrupted,
}

/// Thread-safe FIFO of pending events plus a wake-up signal
pub struct EventQueue {
    queue: Mutex<VecDeque<Event>>,
    notify: Condvar,
}

impl EventQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Condvar::new(),
        }
    }

    /// Append an event and wake the waiting loop
    pub fn push(&self, event: Event) {
        let mut queue = self.queue.lock();
        queue.push_back(event);
        self.notify.notify_all();
    }

    /// Pop the oldest event without blocking
    pub fn try_pop(&self) -> Option<Event> {
        self.queue.lock().pop_front()
    }

    /// Block until an event is available, `timeout` elapses, or
    /// `keep_waiting` returns false after a wake-up.
    ///
    /// `keep_waiting` is evaluated with the queue lock held, so a
    /// `wake_all` issued after changing the condition is never lost.
    pub fn wait_next(&self, timeout: Duration, keep_waiting: impl Fn() -> bool) -> Wait {
        let deadline = Instant::now() + timeout;
        let mut queue = self.queue.lock();
        loop {
            if let Some(event) = queue.pop_front() {
                return Wait::Event(event);
            }
            if !keep_waiting() {
                return Wait::Interrupted;
            }
            if self.notify.wait_until(&mut queue, deadline).timed_out() {
                return match queue.pop_front() {
                    Some(event) => Wait::Event(event),
                    None => Wait::TimedOut,
                };
            }
        }
    }

    /// Discard every queued event
    pub fn clear(&self) {
        self.queue.lock().clear();
    }

    /// Wake every waiter so it can re-check its stop condition
    pub fn wake_all(&self) {
        let _queue = self.queue.lock();
        self.notify.notify_all();
    }

    /// Number of queued events
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Is the queue empty?
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
