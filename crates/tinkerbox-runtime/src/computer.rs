//! A single computer instance
//!
//! `Computer` is shared as `Arc<Computer>` between its own execution thread,
//! the timer thread, the host and peripherals on other computers. The
//! interpreter state is not part of it: that belongs to the execution
//! loop's stack frame, so only the owning thread can ever reach it.

use crate::config::ComputerConfig;
use crate::debug::BreakpointTable;
use crate::event::{Event, EventQueue};
use crate::handle::{ComputerHandle, TimerId};
use crate::lifecycle::Host;
use crate::mount::{Mount, MountTable};
use crate::peripheral::{Connection, Peripheral};
use crate::script::HookControl;
use crate::terminal::Terminal;
use crate::value::Value;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Whether the computer should keep running
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RunState {
    /// Stop at the next opportunity and do not boot again
    Stopped,
    /// Running normally
    Running,
    /// Stop the current boot, then boot again
    Rebooting,
}

/// Where the execution loop currently is
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BootPhase {
    /// Resetting the terminal and allocating a fresh state
    Booting,
    /// Opening libraries and plugins
    LoadingLibs,
    /// Loading the BIOS chunk
    LoadingBios,
    /// Inside the resume loop
    Running,
    /// Between boots after a reboot request
    Rebooting,
    /// The execution loop has returned
    Stopped,
}

/// A per-computer cleanup callback, run when the computer is destroyed
pub type Finalizer = Box<dyn FnOnce(&Computer) + Send>;

/// Everything needed to construct a computer
pub(crate) struct ComputerParts {
    pub handle: ComputerHandle,
    pub is_debugger: bool,
    pub terminal: Option<Arc<dyn Terminal>>,
    pub mounts: Box<dyn MountTable>,
    pub config: ComputerConfig,
    pub data_dir: PathBuf,
    pub host: Weak<Host>,
}

struct RunStatus {
    state: RunState,
    phase: BootPhase,
}

/// One virtual computer
pub struct Computer {
    handle: ComputerHandle,
    is_debugger: bool,
    status: Mutex<RunStatus>,
    events: EventQueue,
    peripherals: Mutex<FxHashMap<String, Arc<dyn Peripheral>>>,
    connections: Mutex<FxHashMap<u64, Box<dyn Connection>>>,
    next_connection: AtomicU64,
    breakpoints: Mutex<BreakpointTable>,
    terminal: Option<Arc<dyn Terminal>>,
    mounts: Mutex<Box<dyn MountTable>>,
    config: Mutex<ComputerConfig>,
    data_dir: PathBuf,
    timers: Mutex<FxHashSet<TimerId>>,
    debounce: Mutex<Option<TimerId>>,
    finalizers: Mutex<Vec<Finalizer>>,
    last_call: Mutex<Option<String>>,
    host: Weak<Host>,
}

impl Computer {
    pub(crate) fn new(parts: ComputerParts) -> Self {
        Self {
            handle: parts.handle,
            is_debugger: parts.is_debugger,
            status: Mutex::new(RunStatus {
                state: RunState::Running,
                phase: BootPhase::Booting,
            }),
            events: EventQueue::new(),
            peripherals: Mutex::new(FxHashMap::default()),
            connections: Mutex::new(FxHashMap::default()),
            next_connection: AtomicU64::new(1),
            breakpoints: Mutex::new(BreakpointTable::new()),
            terminal: parts.terminal,
            mounts: Mutex::new(parts.mounts),
            config: Mutex::new(parts.config),
            data_dir: parts.data_dir,
            timers: Mutex::new(FxHashSet::default()),
            debounce: Mutex::new(None),
            finalizers: Mutex::new(Vec::new()),
            last_call: Mutex::new(None),
            host: parts.host,
        }
    }

    /// A computer with no host, terminal or mounts
    #[cfg(test)]
    pub(crate) fn detached(id: u32) -> Arc<Self> {
        Arc::new(Self::new(ComputerParts {
            handle: ComputerHandle::new(id),
            is_debugger: false,
            terminal: None,
            mounts: Box::new(crate::mount::DirectoryMountTable::new()),
            config: ComputerConfig::default(),
            data_dir: PathBuf::new(),
            host: Weak::new(),
        }))
    }

    /// User-visible id
    pub fn id(&self) -> u32 {
        self.handle.id()
    }

    /// Generation-tagged identity
    pub fn handle(&self) -> ComputerHandle {
        self.handle
    }

    /// Is this a debugger instance?
    pub fn is_debugger(&self) -> bool {
        self.is_debugger
    }

    /// The host this computer belongs to, if it is still alive
    pub fn host(&self) -> Option<Arc<Host>> {
        self.host.upgrade()
    }

    /// Attached terminal, if not headless
    pub fn terminal(&self) -> Option<&Arc<dyn Terminal>> {
        self.terminal.as_ref()
    }

    /// Data directory on the host
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Active mounts
    pub fn mounts(&self) -> Vec<Mount> {
        self.mounts.lock().mounts()
    }

    /// Mount a host directory at runtime
    pub fn mount(&self, host_path: &Path, mount_point: &str, read_only: bool) -> bool {
        self.mounts.lock().mount(host_path, mount_point, read_only)
    }

    // ---- run state -------------------------------------------------------

    /// Current run state
    pub fn run_state(&self) -> RunState {
        self.status.lock().state
    }

    /// Current boot phase
    pub fn phase(&self) -> BootPhase {
        self.status.lock().phase
    }

    pub(crate) fn set_phase(&self, phase: BootPhase) {
        self.status.lock().phase = phase;
    }

    /// Is the current boot still supposed to run?
    pub fn is_running(&self) -> bool {
        self.run_state() == RunState::Running
    }

    /// Ask the computer to stop
    pub fn shutdown(&self) {
        self.status.lock().state = RunState::Stopped;
        self.events.wake_all();
    }

    /// Ask the computer to stop and boot again
    pub fn reboot(&self) {
        {
            let mut status = self.status.lock();
            if status.state == RunState::Stopped {
                return;
            }
            status.state = RunState::Rebooting;
        }
        self.events.wake_all();
    }

    /// Start a boot: a pending reboot becomes a normal run. Returns false
    /// if the computer was asked to stop.
    pub(crate) fn begin_boot(&self) -> bool {
        let mut status = self.status.lock();
        match status.state {
            RunState::Stopped => false,
            RunState::Running | RunState::Rebooting => {
                status.state = RunState::Running;
                true
            }
        }
    }

    /// Stop unless a reboot or shutdown was already requested
    pub(crate) fn finish(&self) {
        let mut status = self.status.lock();
        if status.state == RunState::Running {
            status.state = RunState::Stopped;
        }
    }

    // ---- events ----------------------------------------------------------

    /// The event queue
    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    /// Queue an event for the running program
    pub fn queue_event(&self, event: Event) {
        self.events.push(event);
    }

    /// Wake the execution loop so it re-checks the run state
    pub fn wake(&self) {
        self.events.wake_all();
    }

    // ---- peripherals -----------------------------------------------------

    /// Attach a peripheral. Returns false if the side is taken.
    pub fn attach_peripheral(&self, side: &str, peripheral: Arc<dyn Peripheral>) -> bool {
        {
            let mut peripherals = self.peripherals.lock();
            if peripherals.contains_key(side) {
                return false;
            }
            peripherals.insert(side.to_string(), peripheral.clone());
        }
        peripheral.attach(self, side);
        self.queue_event(Event::new("peripheral", vec![Value::str(side)]));
        true
    }

    /// Detach the peripheral on `side`
    pub fn detach_peripheral(&self, side: &str) -> bool {
        let removed = self.peripherals.lock().remove(side);
        match removed {
            Some(peripheral) => {
                peripheral.detach();
                self.queue_event(Event::new("peripheral_detach", vec![Value::str(side)]));
                true
            }
            None => false,
        }
    }

    /// Detach the peripheral on `side` only if it represents `target`
    pub(crate) fn detach_reference(&self, side: &str, target: ComputerHandle) -> bool {
        let is_reference = self
            .peripherals
            .lock()
            .get(side)
            .is_some_and(|p| p.target() == Some(target));
        is_reference && self.detach_peripheral(side)
    }

    /// Peripheral on `side`
    pub fn peripheral(&self, side: &str) -> Option<Arc<dyn Peripheral>> {
        self.peripherals.lock().get(side).cloned()
    }

    /// Sides with something attached, sorted
    pub fn peripheral_sides(&self) -> Vec<String> {
        let mut sides: Vec<String> = self.peripherals.lock().keys().cloned().collect();
        sides.sort();
        sides
    }

    /// Every attached peripheral
    pub fn peripherals(&self) -> Vec<Arc<dyn Peripheral>> {
        self.peripherals.lock().values().cloned().collect()
    }

    /// Call a method on the peripheral at `side`
    pub fn call_peripheral(&self, side: &str, method: &str, args: Vec<Value>) -> Result<Vec<Value>, String> {
        let peripheral = self
            .peripheral(side)
            .ok_or_else(|| format!("No peripheral attached to {}", side))?;
        self.note_external_call(&format!("peripheral.call({}, {})", side, method));
        peripheral.call(self, method, args)
    }

    /// Remove every peripheral and release each one
    pub(crate) fn release_peripherals(&self) {
        let drained: Vec<_> = self.peripherals.lock().drain().collect();
        for (_, peripheral) in drained {
            peripheral.detach();
        }
    }

    // ---- connections -----------------------------------------------------

    /// Track an open connection, returning its id
    pub fn open_connection(&self, connection: Box<dyn Connection>) -> u64 {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        self.connections.lock().insert(id, connection);
        id
    }

    /// Close one connection
    pub fn close_connection(&self, id: u64) -> bool {
        let removed = self.connections.lock().remove(&id);
        match removed {
            Some(mut connection) => {
                connection.close();
                true
            }
            None => false,
        }
    }

    /// Close every open connection
    pub fn close_all_connections(&self) {
        let drained: Vec<_> = self.connections.lock().drain().collect();
        for (_, mut connection) in drained {
            connection.close();
        }
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    // ---- timers ----------------------------------------------------------

    /// Start a timer that queues `timer` with its id after `delay`
    pub fn start_timer(&self, delay: Duration) -> TimerId {
        let id = TimerId::new();
        self.track_timer(id);
        if let Some(host) = self.host() {
            let event = Event::new("timer", vec![Value::Integer(id.as_u64() as i64)]);
            host.timers()
                .schedule(id, self.handle, Instant::now() + delay, event);
        }
        id
    }

    /// Cancel a timer. Returns false if it already fired or is unknown.
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        let removed = self.timers.lock().remove(&id);
        if removed {
            if let Some(host) = self.host() {
                host.timers().cancel(id);
            }
        }
        removed
    }

    /// Queue `event` after `delay`, replacing any pending debounced event
    pub fn arm_debounce(&self, delay: Duration, event: Event) -> TimerId {
        let id = TimerId::new();
        let previous = self.debounce.lock().replace(id);
        if let Some(host) = self.host() {
            if let Some(previous) = previous {
                host.timers().cancel(previous);
            }
            host.timers()
                .schedule(id, self.handle, Instant::now() + delay, event);
        }
        id
    }

    /// Timers started and not yet fired or cancelled
    pub fn pending_timers(&self) -> Vec<TimerId> {
        self.timers.lock().iter().copied().collect()
    }

    pub(crate) fn track_timer(&self, id: TimerId) {
        self.timers.lock().insert(id);
    }

    /// Called by the timer thread when one of this computer's timers fires
    pub(crate) fn timer_fired(&self, id: TimerId, event: Event) {
        let owned = self.timers.lock().remove(&id);
        let debounced = !owned && {
            let mut debounce = self.debounce.lock();
            if *debounce == Some(id) {
                *debounce = None;
                true
            } else {
                false
            }
        };
        if owned || debounced {
            self.queue_event(event);
        }
    }

    pub(crate) fn take_timers(&self) -> Vec<TimerId> {
        self.timers.lock().drain().collect()
    }

    pub(crate) fn take_debounce(&self) -> Option<TimerId> {
        self.debounce.lock().take()
    }

    // ---- finalizers ------------------------------------------------------

    /// Run `finalizer` when this computer is destroyed
    pub fn add_finalizer(&self, finalizer: impl FnOnce(&Computer) + Send + 'static) {
        self.finalizers.lock().push(Box::new(finalizer));
    }

    pub(crate) fn run_finalizers(&self) {
        let finalizers: Vec<Finalizer> = std::mem::take(&mut *self.finalizers.lock());
        for finalizer in finalizers {
            finalizer(self);
        }
    }

    // ---- debugging -------------------------------------------------------

    /// Set a breakpoint, installing the debug hook through `hooks`
    pub fn set_breakpoint(&self, source: &str, line: i64, hooks: &mut dyn HookControl) -> u32 {
        self.breakpoints.lock().set(source, line, hooks)
    }

    /// Clear a breakpoint, removing the hook if it was the last
    pub fn clear_breakpoint(&self, id: u32, hooks: &mut dyn HookControl) -> bool {
        self.breakpoints.lock().clear(id, hooks)
    }

    /// Run `f` with the breakpoint table
    pub fn with_breakpoints<R>(&self, f: impl FnOnce(&mut BreakpointTable) -> R) -> R {
        f(&mut self.breakpoints.lock())
    }

    /// Remember the name of the external function being called
    pub fn note_external_call(&self, name: &str) {
        *self.last_call.lock() = Some(name.to_string());
    }

    /// Name of the last external function called
    pub fn last_call(&self) -> Option<String> {
        self.last_call.lock().clone()
    }

    // ---- configuration ---------------------------------------------------

    /// Computer label
    pub fn label(&self) -> Option<String> {
        self.config.lock().label.clone()
    }

    /// Change the label
    pub fn set_label(&self, label: Option<String>) {
        self.config.lock().label = label;
    }

    /// Copy of the persisted configuration
    pub fn config(&self) -> ComputerConfig {
        self.config.lock().clone()
    }
}

impl std::fmt::Debug for Computer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computer")
            .field("handle", &self.handle)
            .field("is_debugger", &self.is_debugger)
            .field("run_state", &self.run_state())
            .finish()
    }
}
