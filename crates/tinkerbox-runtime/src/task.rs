//! Host task queue
//!
//! Work that must run on the thread owning the display (dialogs, terminal
//! messages raised from a computer thread) is queued here and drained by
//! whoever owns that thread.

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// A unit of deferred host work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Multi-producer queue of host tasks
pub struct TaskQueue {
    sender: Sender<Task>,
    receiver: Receiver<Task>,
}

impl TaskQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Queue a task from any thread
    pub fn queue(&self, task: impl FnOnce() + Send + 'static) {
        // The receiver lives as long as the queue, so this cannot fail
        let _ = self.sender.send(Box::new(task));
    }

    /// Run every task queued so far, returning how many ran
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.receiver.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for one task and run it
    pub fn run_next(&self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(task) => {
                task();
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Number of queued tasks
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Is the queue empty?
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
