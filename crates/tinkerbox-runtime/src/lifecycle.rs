//! Host and computer lifecycle
//!
//! The [`Host`] owns everything shared between computers: the registry,
//! the timer thread, the task queue and the collaborator factories. It
//! constructs computers, runs each on its own thread and tears each down
//! on that same thread once its execution loop returns.

use crate::bridge::ChunkParser;
use crate::computer::{Computer, ComputerParts};
use crate::config::{ConfigStore, HostConfig, MemoryConfigStore};
use crate::error::{ComputerError, HostException, MountFailure};
use crate::event::Event;
use crate::handle::ComputerHandle;
use crate::library::{standard_libraries, Library};
use crate::mount::{DirectoryMountTable, MountTable, MountTableFactory};
use crate::plugin::PluginLoader;
use crate::registry::ComputerRegistry;
use crate::runloop;
use crate::script::ScriptEngine;
use crate::task::TaskQueue;
use crate::terminal::{Notifier, StderrNotifier, Terminal, TerminalFactory};
use crate::timer::TimerService;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

/// Where the boot script comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BiosSource {
    /// Read from a file on every boot
    File(PathBuf),
    /// Built into the host
    Embedded(String),
}

impl BiosSource {
    /// Description used in error messages
    pub fn display_path(&self) -> String {
        match self {
            BiosSource::File(path) => path.display().to_string(),
            BiosSource::Embedded(_) => "embedded BIOS".to_string(),
        }
    }
}

/// Builder for a [`Host`]
pub struct HostBuilder {
    config: HostConfig,
    engine: Arc<dyn ScriptEngine>,
    terminals: Option<Arc<dyn TerminalFactory>>,
    mount_tables: Option<MountTableFactory>,
    config_store: Option<Arc<dyn ConfigStore>>,
    notifier: Option<Arc<dyn Notifier>>,
    plugins: Option<Arc<dyn PluginLoader>>,
    libraries: Vec<Arc<dyn Library>>,
    bios: Option<BiosSource>,
}

impl HostBuilder {
    /// Replace the terminal factory (default: the configured render mode)
    pub fn terminals(mut self, terminals: Arc<dyn TerminalFactory>) -> Self {
        self.terminals = Some(terminals);
        self
    }

    /// Replace the mount table factory (default: directory mounts)
    pub fn mount_tables(mut self, factory: MountTableFactory) -> Self {
        self.mount_tables = Some(factory);
        self
    }

    /// Replace the configuration store (default: in memory)
    pub fn config_store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.config_store = Some(store);
        self
    }

    /// Replace the dialog sink (default: stderr)
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Install a plugin loader
    pub fn plugins(mut self, plugins: Arc<dyn PluginLoader>) -> Self {
        self.plugins = Some(plugins);
        self
    }

    /// Add a library after the standard ones
    pub fn library(mut self, library: Arc<dyn Library>) -> Self {
        self.libraries.push(library);
        self
    }

    /// Replace the boot script (default: `bios.lua` under the ROM path)
    pub fn bios(mut self, bios: BiosSource) -> Self {
        self.bios = Some(bios);
        self
    }

    /// Build the host and start its timer thread
    pub fn build(self) -> Arc<Host> {
        let registry = Arc::new(ComputerRegistry::new());
        let timers = TimerService::new(registry.clone());
        timers.start();

        let terminals = self
            .terminals
            .unwrap_or_else(|| Arc::new(self.config.render_mode) as Arc<dyn TerminalFactory>);
        let bios = self
            .bios
            .unwrap_or_else(|| BiosSource::File(self.config.rom_path.join("bios.lua")));

        Arc::new_cyclic(|this| Host {
            registry,
            timers,
            tasks: TaskQueue::new(),
            notifier: self
                .notifier
                .unwrap_or_else(|| Arc::new(StderrNotifier) as Arc<dyn Notifier>),
            engine: self.engine,
            terminals,
            mount_tables: self.mount_tables.unwrap_or_else(DirectoryMountTable::factory),
            config_store: self
                .config_store
                .unwrap_or_else(|| Arc::new(MemoryConfigStore::new()) as Arc<dyn ConfigStore>),
            plugins: self.plugins,
            libraries: self.libraries,
            bios,
            orphaned: Mutex::new(Vec::new()),
            threads: Mutex::new(Vec::new()),
            this: this.clone(),
            config: self.config,
        })
    }
}

/// Owner of every computer in the process
pub struct Host {
    config: HostConfig,
    registry: Arc<ComputerRegistry>,
    timers: Arc<TimerService>,
    tasks: TaskQueue,
    notifier: Arc<dyn Notifier>,
    engine: Arc<dyn ScriptEngine>,
    terminals: Arc<dyn TerminalFactory>,
    mount_tables: MountTableFactory,
    config_store: Arc<dyn ConfigStore>,
    plugins: Option<Arc<dyn PluginLoader>>,
    libraries: Vec<Arc<dyn Library>>,
    bios: BiosSource,
    orphaned: Mutex<Vec<Arc<dyn Terminal>>>,
    threads: Mutex<Vec<(ComputerHandle, JoinHandle<()>)>>,
    this: Weak<Host>,
}

impl Host {
    /// Start building a host
    pub fn builder(config: HostConfig, engine: Arc<dyn ScriptEngine>) -> HostBuilder {
        HostBuilder {
            config,
            engine,
            terminals: None,
            mount_tables: None,
            config_store: None,
            notifier: None,
            plugins: None,
            libraries: standard_libraries(),
            bios: None,
        }
    }

    /// Host settings
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Registry of running computers
    pub fn registry(&self) -> &Arc<ComputerRegistry> {
        &self.registry
    }

    /// The shared timer thread
    pub fn timers(&self) -> &Arc<TimerService> {
        &self.timers
    }

    /// Work queued for the display thread
    pub fn tasks(&self) -> &TaskQueue {
        &self.tasks
    }

    pub(crate) fn engine(&self) -> &Arc<dyn ScriptEngine> {
        &self.engine
    }

    pub(crate) fn parser(&self) -> Arc<dyn ChunkParser> {
        self.engine.parser()
    }

    pub(crate) fn libraries(&self) -> &[Arc<dyn Library>] {
        &self.libraries
    }

    pub(crate) fn plugins(&self) -> Option<&Arc<dyn PluginLoader>> {
        self.plugins.as_ref()
    }

    pub(crate) fn bios(&self) -> &BiosSource {
        &self.bios
    }

    /// Construct a computer without registering or starting it.
    ///
    /// A mount failure aborts construction. In standards mode the terminal
    /// is kept, showing the failure, as an orphan; otherwise it is released.
    pub fn create(&self, id: u32, is_debugger: bool) -> Result<Arc<Computer>, ComputerError> {
        let config = self.config_store.load(id)?;
        let title = match &config.label {
            Some(label) => format!("Tinkerbox Terminal: {}", label),
            None => format!("Tinkerbox Terminal: Computer {}", id),
        };
        let terminal = self.terminals.create(id, &title);
        if let Some(terminal) = &terminal {
            terminal.set_grayscale(!config.is_color);
        }
        let mut mounts = (self.mount_tables)(id);

        if let Err(failure) = self.mount_system(mounts.as_mut(), is_debugger) {
            if let Some(terminal) = terminal {
                if self.config.standards_mode {
                    terminal.show_fatal_message("Cannot mount ROM");
                    self.orphaned.lock().push(terminal);
                } else {
                    terminal.destroy();
                }
            }
            return Err(failure.into());
        }

        for custom in &self.config.custom_mounts {
            let mounted = custom
                .policy
                .read_only(self.config.mount_mode)
                .map_or(false, |read_only| {
                    mounts.mount(&custom.host_path, &custom.mount_point, read_only)
                });
            if !mounted {
                eprintln!(
                    "Could not mount custom mount path at {}",
                    custom.host_path.display()
                );
            }
        }

        let data_dir = self.config.data_dir(id);
        if let Err(source) = std::fs::create_dir_all(&data_dir) {
            if let Some(terminal) = terminal {
                terminal.destroy();
            }
            return Err(ComputerError::DataDir {
                path: data_dir,
                source,
            });
        }

        Ok(Arc::new(Computer::new(ComputerParts {
            handle: ComputerHandle::new(id),
            is_debugger,
            terminal,
            mounts,
            config,
            data_dir,
            host: self.this.clone(),
        })))
    }

    fn mount_system(&self, mounts: &mut dyn MountTable, is_debugger: bool) -> Result<(), MountFailure> {
        let rom = self.config.rom_path.join("rom");
        if !mounts.mount(&rom, "rom", self.config.rom_read_only) {
            return Err(MountFailure {
                image: "ROM".to_string(),
                mount_point: "rom".to_string(),
            });
        }
        if is_debugger && !mounts.mount(&self.config.rom_path.join("debug"), "debug", true) {
            return Err(MountFailure {
                image: "debugger ROM".to_string(),
                mount_point: "debug".to_string(),
            });
        }
        Ok(())
    }

    /// Construct, register and start computer `id`
    pub fn spawn(self: &Arc<Self>, id: u32) -> Result<Arc<Computer>, ComputerError> {
        self.start(id, false)
    }

    /// Construct, register and start a debugger instance
    pub fn spawn_debugger(self: &Arc<Self>, id: u32) -> Result<Arc<Computer>, ComputerError> {
        self.start(id, true)
    }

    fn start(self: &Arc<Self>, id: u32, is_debugger: bool) -> Result<Arc<Computer>, ComputerError> {
        let computer = match self.create(id, is_debugger) {
            Ok(computer) => computer,
            Err(err) => {
                self.report_open_failure(&err);
                return Err(err);
            }
        };

        self.registry.insert(computer.clone());

        let host = Arc::clone(self);
        let running = computer.clone();
        let spawned = thread::Builder::new()
            .name(format!("Computer {} Thread", id))
            .spawn(move || computer_thread(host, running));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(source) => {
                computer.shutdown();
                self.teardown(&computer);
                let err = ComputerError::Thread { id, source };
                self.report_open_failure(&err);
                return Err(err);
            }
        };

        self.threads.lock().push((computer.handle(), handle));

        #[cfg(debug_assertions)]
        eprintln!("Started computer {}", computer.handle());

        Ok(computer)
    }

    fn report_open_failure(&self, err: &ComputerError) {
        let message = format!("An error occurred while opening the computer session: {}", err);
        eprintln!("{}", message);
        if !self.config.standards_mode {
            self.show_dialog(None, "Failed to open computer", &message);
        }
    }

    /// Show a message on `terminal`, or as a host dialog when there is none.
    /// Runs on the display thread via the task queue.
    pub fn show_dialog(&self, terminal: Option<Arc<dyn Terminal>>, title: &str, message: &str) {
        let notifier = self.notifier.clone();
        let title = title.to_string();
        let message = message.to_string();
        self.tasks.queue(move || match terminal {
            Some(terminal) => terminal.show_message(&title, &message),
            None => notifier.notify(&title, &message),
        });
    }

    /// Unregister a computer, tear it down and release its handle.
    ///
    /// Runs on the computer's own thread once its execution loop has
    /// returned, or on the spawning thread if that thread never started.
    fn teardown(&self, computer: &Computer) {
        let handle = computer.handle();
        self.registry.retire(handle);
        self.destroy(computer);
        self.registry.release(handle);
    }

    fn destroy(&self, computer: &Computer) {
        computer.run_finalizers();

        if let Some(terminal) = computer.terminal() {
            if terminal.is_error_mode() {
                self.orphaned.lock().push(terminal.clone());
            } else {
                terminal.destroy();
            }
        }

        if let Err(err) = self.config_store.save(computer.id(), &computer.config()) {
            eprintln!("Could not save configuration for computer {}: {}", computer.id(), err);
        }

        computer.release_peripherals();

        for reference in self.registry.take_references(computer.handle()) {
            if let Some(other) = self.registry.get(reference.referencer) {
                other.detach_reference(&reference.side, computer.handle());
            }
        }

        self.registry.invalidate_timers(computer.take_timers());
        if let Some(debounce) = computer.take_debounce() {
            self.timers.cancel(debounce);
        }

        computer.close_all_connections();

        #[cfg(debug_assertions)]
        eprintln!("Destroyed computer {}", computer.handle());
    }

    /// Wait for one computer's thread to finish. Returns false if the
    /// handle has no thread (never started, or already joined).
    pub fn join(&self, handle: ComputerHandle) -> bool {
        let thread = {
            let mut threads = self.threads.lock();
            let index = threads.iter().position(|(h, _)| *h == handle);
            index.map(|i| threads.remove(i).1)
        };
        match thread {
            Some(thread) => {
                let _ = thread.join();
                true
            }
            None => false,
        }
    }

    /// Wait for every computer thread, including ones started meanwhile
    pub fn join_all(&self) {
        loop {
            let threads: Vec<_> = std::mem::take(&mut *self.threads.lock());
            if threads.is_empty() {
                return;
            }
            for (_, thread) in threads {
                let _ = thread.join();
            }
        }
    }

    /// Ask every computer to stop
    pub fn shutdown_all(&self) {
        for computer in self.registry.snapshot() {
            computer.shutdown();
        }
    }

    /// Queue an event on every computer
    pub fn broadcast(&self, event: Event) {
        self.registry.broadcast(&event);
    }

    /// Running computers
    pub fn computers(&self) -> Vec<Arc<Computer>> {
        self.registry.snapshot()
    }

    /// Terminals kept alive after their computer failed
    pub fn orphaned_terminals(&self) -> Vec<Arc<dyn Terminal>> {
        self.orphaned.lock().clone()
    }

    /// Run queued display-thread work
    pub fn run_pending_tasks(&self) -> usize {
        self.tasks.run_pending()
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.timers.stop();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown error".to_string()
    }
}

/// Body of a computer thread
fn computer_thread(host: Arc<Host>, computer: Arc<Computer>) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| runloop::run_computer(&host, &computer)));

    if let Err(payload) = result {
        let exception = HostException {
            id: computer.id(),
            last_call: computer.last_call(),
            message: panic_message(payload.as_ref()),
        };
        eprintln!("{}", exception);
        host.show_dialog(
            computer.terminal().cloned(),
            "Uncaught Exception",
            &format!(
                "An uncaught exception has occurred on the computer thread: \"{}\". The computer will now shut down.",
                exception.message
            ),
        );
        computer.shutdown();
        computer.close_all_connections();
    }

    host.teardown(&computer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedEngine;
    use crate::terminal::BufferTerminal;

    #[derive(Default)]
    struct KeepTerminals(Mutex<Vec<Arc<BufferTerminal>>>);

    impl TerminalFactory for KeepTerminals {
        fn create(&self, _id: u32, title: &str) -> Option<Arc<dyn Terminal>> {
            let terminal = Arc::new(BufferTerminal::new(title));
            self.0.lock().push(terminal.clone());
            Some(terminal)
        }
    }

    #[test]
    fn test_teardown_of_unstarted_computer() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("rom")).unwrap();
        let config = HostConfig {
            rom_path: dir.path().to_path_buf(),
            computer_root: dir.path().join("computer"),
            ..HostConfig::default()
        };
        let terminals = Arc::new(KeepTerminals::default());
        let host = Host::builder(config, Arc::new(ScriptedEngine::new()))
            .terminals(terminals.clone())
            .build();

        let computer = host.create(4, false).unwrap();
        let handle = computer.handle();
        host.registry().insert(computer.clone());

        host.teardown(&computer);

        assert!(host.registry().is_empty());
        assert!(host.registry().get(handle).is_none());
        assert_eq!(host.registry().freed_count(), 0);
        assert!(terminals.0.lock()[0].is_destroyed());
        assert!(!host.join(handle));
    }
}
