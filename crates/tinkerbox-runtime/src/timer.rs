//! Shared timer thread
//!
//! One thread serves every computer. It waits on a condvar until the
//! earliest deadline, then hands each due event to its owner. Owners are
//! resolved through the registry, never held directly, so a timer that
//! outlives its computer is dropped instead of touching freed state.

use crate::event::Event;
use crate::handle::{ComputerHandle, TimerId};
use crate::registry::ComputerRegistry;
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashSet;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Entry in the timer heap
struct TimerEntry {
    fire_at: Instant,
    id: TimerId,
    owner: ComputerHandle,
    event: Event,
}

// Reverse ordering for min-heap (earliest deadline first)
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.id == other.id
    }
}

impl Eq for TimerEntry {}

struct TimerState {
    pending: BinaryHeap<TimerEntry>,
    cancelled: FxHashSet<TimerId>,
}

/// The host-wide timer thread
pub struct TimerService {
    state: Mutex<TimerState>,
    notify: Condvar,
    shutdown: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
    registry: Arc<ComputerRegistry>,
}

impl TimerService {
    /// Create a timer service delivering to computers in `registry`
    pub fn new(registry: Arc<ComputerRegistry>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TimerState {
                pending: BinaryHeap::new(),
                cancelled: FxHashSet::default(),
            }),
            notify: Condvar::new(),
            shutdown: AtomicBool::new(false),
            handle: Mutex::new(None),
            registry,
        })
    }

    /// Start the timer thread
    pub fn start(self: &Arc<Self>) {
        let timer = Arc::clone(self);

        let handle = thread::Builder::new()
            .name("tinkerbox-timer".to_string())
            .spawn(move || {
                timer.run_loop();
            })
            .expect("Failed to spawn timer thread");

        *self.handle.lock() = Some(handle);
    }

    /// Stop the timer thread
    pub fn stop(&self) {
        self.shutdown.store(true, AtomicOrdering::Release);
        {
            let _state = self.state.lock();
            self.notify.notify_one();
        }

        if let Some(handle) = self.handle.lock().take() {
            let start = Instant::now();
            let timeout = Duration::from_secs(2);
            loop {
                if handle.is_finished() {
                    let _ = handle.join();
                    return;
                }
                if start.elapsed() > timeout {
                    drop(handle);
                    return;
                }
                thread::sleep(Duration::from_millis(5));
            }
        }
    }

    /// Deliver `event` to `owner` at `fire_at` unless cancelled first
    pub fn schedule(&self, id: TimerId, owner: ComputerHandle, fire_at: Instant, event: Event) {
        let mut state = self.state.lock();
        state.pending.push(TimerEntry {
            fire_at,
            id,
            owner,
            event,
        });
        // The new entry may be earlier than the one being waited for
        self.notify.notify_one();
    }

    /// Cancel a scheduled timer. Unknown ids are ignored.
    pub fn cancel(&self, id: TimerId) {
        let mut state = self.state.lock();
        if state.pending.iter().any(|entry| entry.id == id) {
            state.cancelled.insert(id);
        }
    }

    /// Number of timers waiting to fire, including cancelled ones not yet
    /// reached
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn run_loop(&self) {
        loop {
            if self.shutdown.load(AtomicOrdering::Acquire) {
                break;
            }

            let mut state = self.state.lock();

            // stop() may have signalled between the check above and the lock
            if self.shutdown.load(AtomicOrdering::Acquire) {
                break;
            }

            let now = Instant::now();
            let mut due = Vec::new();
            while state.pending.peek().is_some_and(|entry| entry.fire_at <= now) {
                if let Some(entry) = state.pending.pop() {
                    if !state.cancelled.remove(&entry.id) {
                        due.push(entry);
                    }
                }
            }

            if !due.is_empty() {
                // Deliver without the timer lock; owners take their own locks
                drop(state);
                for entry in due {
                    self.fire(entry);
                }
                continue;
            }

            if let Some(next) = state.pending.peek() {
                let now = Instant::now();
                if next.fire_at > now {
                    let timeout = next.fire_at - now;
                    self.notify.wait_for(&mut state, timeout);
                }
            } else {
                self.notify.wait(&mut state);
            }
        }

        #[cfg(debug_assertions)]
        eprintln!("Timer thread shutting down");
    }

    fn fire(&self, entry: TimerEntry) {
        if let Some(computer) = self.registry.resolve_timer(entry.id, entry.owner) {
            computer.timer_fired(entry.id, entry.event);
        }
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.stop();
    }
}
