//! Shared fixtures for the integration tests

#![allow(dead_code)]

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tinkerbox_runtime::{
    BiosSource, BufferTerminal, Computer, Connection, Host, HostBuilder, HostConfig, Notifier,
    Peripheral, ScriptState, ScriptedEngine, Terminal, TerminalFactory, Value,
};

/// Long enough that no test should ever hit it by accident
pub const PATIENCE: Duration = Duration::from_secs(10);

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// A temporary ROM layout: `<root>/rom`, `<root>/debug` and a computer root
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("rom")).unwrap();
        std::fs::create_dir_all(dir.path().join("debug")).unwrap();
        Self { dir }
    }

    /// A fixture whose ROM directory is missing
    pub fn without_rom() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Host settings pointing at this fixture
    pub fn config(&self) -> HostConfig {
        HostConfig {
            rom_path: self.path(),
            computer_root: self.path().join("computer"),
            abort_timeout_ms: PATIENCE.as_millis() as u64,
            standards_timeout_ms: PATIENCE.as_millis() as u64,
            ..HostConfig::default()
        }
    }
}

/// Terminal factory that hands out inspectable buffer terminals
#[derive(Default)]
pub struct RecordingTerminals {
    created: Mutex<Vec<(u32, Arc<BufferTerminal>)>>,
}

impl RecordingTerminals {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The most recent terminal created for `id`
    pub fn terminal(&self, id: u32) -> Option<Arc<BufferTerminal>> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|(tid, _)| *tid == id)
            .map(|(_, t)| t.clone())
    }
}

impl TerminalFactory for RecordingTerminals {
    fn create(&self, id: u32, title: &str) -> Option<Arc<dyn Terminal>> {
        let terminal = Arc::new(BufferTerminal::new(title));
        self.created.lock().push((id, terminal.clone()));
        Some(terminal)
    }
}

/// Notifier that remembers every dialog
#[derive(Default)]
pub struct RecordingNotifier {
    dialogs: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn dialogs(&self) -> Vec<(String, String)> {
        self.dialogs.lock().clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.dialogs.lock().iter().map(|(t, _)| t.clone()).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, title: &str, message: &str) {
        self.dialogs
            .lock()
            .push((title.to_string(), message.to_string()));
    }
}

/// Peripheral that counts lifecycle calls. Its `block` method waits until
/// the test releases it.
pub struct CountingPeripheral {
    pub reinitialized: AtomicUsize,
    pub detached: AtomicUsize,
    gate: Receiver<()>,
    release: Sender<()>,
}

impl CountingPeripheral {
    pub fn new() -> Arc<Self> {
        let (release, gate) = unbounded();
        Arc::new(Self {
            reinitialized: AtomicUsize::new(0),
            detached: AtomicUsize::new(0),
            gate,
            release,
        })
    }

    /// Let one pending (or future) `block` call return
    pub fn release(&self) {
        let _ = self.release.send(());
    }

    pub fn reinitialized(&self) -> usize {
        self.reinitialized.load(Ordering::SeqCst)
    }

    pub fn detached(&self) -> usize {
        self.detached.load(Ordering::SeqCst)
    }
}

impl Peripheral for CountingPeripheral {
    fn kind(&self) -> &str {
        "counter"
    }

    fn call(&self, _computer: &Computer, method: &str, _args: Vec<Value>) -> Result<Vec<Value>, String> {
        match method {
            "block" => {
                self.gate
                    .recv_timeout(PATIENCE)
                    .map_err(|_| "never released".to_string())?;
                Ok(vec![])
            }
            "count" => Ok(vec![Value::from(self.reinitialized() as i64)]),
            other => Err(format!("No such method {}", other)),
        }
    }

    fn reinitialize(&self, _state: &mut dyn ScriptState) {
        self.reinitialized.fetch_add(1, Ordering::SeqCst);
    }

    fn detach(&self) {
        self.detached.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connection that counts how often it is closed
pub struct CountingConnection(pub Arc<AtomicUsize>);

impl Connection for CountingConnection {
    fn close(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Everything a test needs to drive one host
pub struct Harness {
    pub fixture: Fixture,
    pub engine: Arc<ScriptedEngine>,
    pub terminals: Arc<RecordingTerminals>,
    pub notifier: Arc<RecordingNotifier>,
    pub host: Arc<Host>,
}

impl Harness {
    /// Host with recording terminals running `bios`
    pub fn new(bios: &str) -> Self {
        Self::with_config(bios, |_| {})
    }

    pub fn with_config(bios: &str, configure: impl FnOnce(&mut HostConfig)) -> Self {
        Self::build(Fixture::new(), bios, configure, |builder| builder)
    }

    pub fn build(
        fixture: Fixture,
        bios: &str,
        configure: impl FnOnce(&mut HostConfig),
        customize: impl FnOnce(HostBuilder) -> HostBuilder,
    ) -> Self {
        let mut config = fixture.config();
        configure(&mut config);
        let engine = Arc::new(ScriptedEngine::new());
        let terminals = RecordingTerminals::new();
        let notifier = RecordingNotifier::new();
        let builder = Host::builder(config, engine.clone())
            .terminals(terminals.clone())
            .notifier(notifier.clone())
            .bios(BiosSource::Embedded(bios.to_string()));
        let host = customize(builder).build();
        Self {
            fixture,
            engine,
            terminals,
            notifier,
            host,
        }
    }

    pub fn transcript(&self, id: u32) -> Vec<String> {
        self.engine.transcript(id)
    }

    /// Wait until the transcript of `id` has at least `len` lines
    pub fn wait_for_lines(&self, id: u32, len: usize) -> bool {
        wait_until(PATIENCE, || self.transcript(id).len() >= len)
    }

    /// Wait for `computer` to stop and be torn down
    pub fn join(&self, computer: &Computer) {
        assert!(self.host.join(computer.handle()), "computer {} was never started", computer.id());
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.host.shutdown_all();
        self.host.join_all();
    }
}
