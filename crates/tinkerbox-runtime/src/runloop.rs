//! The execution loop
//!
//! One call of [`run_computer`] drives a computer for its whole life. Each
//! iteration is one boot:
//!
//! ```text
//! Booting -> LoadingLibs -> LoadingBios -> Running -+-> Rebooting -> Booting
//!                                                   +-> Stopped
//! ```
//!
//! Inside `Running` the main coroutine is resumed until it finishes, fails,
//! or the computer is asked to stop. Every suspension blocks on the event
//! queue for the next event matching the program's filter.

use crate::bridge::YieldableLoader;
use crate::computer::{BootPhase, Computer, RunState};
use crate::error::{BootError, ScriptError};
use crate::event::{Event, Wait};
use crate::library::{hidden_globals, CapabilitySet, Library};
use crate::lifecycle::{BiosSource, Host};
use crate::plugin::plugin_error_table;
use crate::script::{Coroutine, Resumed, ScriptState};
use crate::value::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Chunk name the BIOS is loaded under
pub const BIOS_CHUNK_NAME: &str = "@bios.lua";

/// One boot's interpreter state and the libraries opened into it.
///
/// Dropping it runs the end-of-boot cleanup, including while unwinding.
struct Session<'a> {
    computer: &'a Computer,
    state: Box<dyn ScriptState>,
    libraries: Vec<Arc<dyn Library>>,
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.computer.wake();
        self.computer.close_all_connections();
        for library in self.libraries.drain(..) {
            library.deinit(self.computer);
        }
    }
}

/// Run `computer` until it stops for good
pub(crate) fn run_computer(host: &Arc<Host>, computer: &Arc<Computer>) {
    while computer.begin_boot() {
        computer.set_phase(BootPhase::Booting);

        if let Err(err) = boot(host, computer) {
            report_boot_failure(host, computer, &err);
            computer.shutdown();
        }

        if computer.run_state() != RunState::Rebooting {
            break;
        }
        computer.set_phase(BootPhase::Rebooting);

        #[cfg(debug_assertions)]
        eprintln!("Rebooting computer {}", computer.id());
    }
    computer.finish();
    computer.set_phase(BootPhase::Stopped);
}

fn boot(host: &Arc<Host>, computer: &Arc<Computer>) -> Result<(), BootError> {
    let config = host.config();

    if let Some(terminal) = computer.terminal() {
        terminal.reset();
    }

    let mut session = Session {
        computer: computer.as_ref(),
        state: host.engine().new_state()?,
        libraries: Vec::new(),
    };
    let main = session.state.create_coroutine()?;
    computer.events().clear();

    // Peripheral objects survive the reboot; only the state is new
    for peripheral in computer.peripherals() {
        peripheral.reinitialize(session.state.as_mut());
    }

    session.state.bind_computer(computer.clone());

    computer.set_phase(BootPhase::LoadingLibs);
    let caps = CapabilitySet::resolve(config, computer.is_debugger());
    session.state.open_base_library(&hidden_globals(config));
    for library in host.libraries() {
        if !caps.allows(library.requires()) {
            continue;
        }
        session
            .state
            .open_library(library.name(), &library.exposed(caps));
        session.libraries.push(library.clone());
    }

    if !config.vanilla {
        if let Some(errors) = plugin_error_table() {
            session.state.set_global("_PLUGIN_ERRORS", errors);
        }
        if let Some(plugins) = host.plugins() {
            plugins.load_all(computer, session.state.as_mut());
        }
    }

    set_host_globals(host, computer, session.state.as_mut());

    if config.standards_mode {
        session
            .state
            .set_loader(Arc::new(YieldableLoader::new(host.parser())));
    }

    computer.set_phase(BootPhase::LoadingBios);
    let source = read_bios(host.bios())?;
    session
        .state
        .load(main, &source, BIOS_CHUNK_NAME)
        .map_err(|err| BootError::BiosLoad {
            path: host.bios().display_path(),
            message: err.to_string(),
        })?;

    computer.set_phase(BootPhase::Running);
    resume_loop(host, computer, session.state.as_mut(), main);
    Ok(())
}

fn set_host_globals(host: &Host, computer: &Computer, state: &mut dyn ScriptState) {
    let config = host.config();

    state.set_global(
        "_HOST",
        Value::str(format!("Tinkerbox {}", env!("CARGO_PKG_VERSION"))),
    );
    if computer.terminal().is_none() {
        state.set_global("_HEADLESS", Value::Boolean(true));
    }
    state.set_global(
        "_DEFAULT_SETTINGS",
        Value::str(config.default_computer_settings.as_str()),
    );
    state.set_global(
        "_DISABLE_LUA51_FEATURES",
        Value::Boolean(config.disable_lua51_features),
    );

    if let Some(script) = &config.startup_script {
        // A leading ESC marks inline source rather than a path
        let source = match script.strip_prefix('\x1b') {
            Some(inline) => Some(inline.to_string()),
            None => match std::fs::read_to_string(script) {
                Ok(source) => Some(source),
                Err(err) => {
                    eprintln!("Could not read startup script {}: {}", script, err);
                    None
                }
            },
        };
        if let Some(source) = source {
            state.set_global("_STARTUP_SCRIPT", Value::Str(source));
        }
    }
    if let Some(args) = &config.startup_args {
        state.set_global("_STARTUP_ARGS", Value::str(args.as_str()));
    }
}

fn read_bios(bios: &BiosSource) -> Result<Vec<u8>, BootError> {
    match bios {
        BiosSource::File(path) => std::fs::read(path).map_err(|source| BootError::BiosMissing {
            path: path.display().to_string(),
            source,
        }),
        BiosSource::Embedded(source) => Ok(source.clone().into_bytes()),
    }
}

/// Wait for the next event that passes `filter`, discarding the rest
fn next_event(computer: &Computer, filter: &str, timeout: Duration) -> Wait {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match computer.events().wait_next(remaining, || computer.is_running()) {
            Wait::Event(event) if !event.matches(filter) => continue,
            other => return other,
        }
    }
}

fn resume_loop(host: &Host, computer: &Computer, state: &mut dyn ScriptState, main: Coroutine) {
    let config = host.config();
    let idle_timeout = config.idle_timeout();
    let mut args = Vec::new();
    // A synthetic terminate has been delivered and no real event since
    let mut terminate_sent = false;

    while computer.is_running() {
        match state.resume(main, std::mem::take(&mut args)) {
            Ok(Resumed::Yielded(values)) => {
                if !computer.is_running() {
                    break;
                }
                let filter = values
                    .first()
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();

                // After a forced terminate, only an event that is already
                // waiting can keep the program alive
                let timeout = if terminate_sent {
                    Duration::ZERO
                } else {
                    idle_timeout
                };

                match next_event(computer, &filter, timeout) {
                    Wait::Event(event) => {
                        terminate_sent = false;
                        args = event.into_values();
                    }
                    Wait::TimedOut if terminate_sent => {
                        eprintln!(
                            "Computer {} did not stop after being terminated; shutting down",
                            computer.id()
                        );
                        computer.shutdown();
                    }
                    Wait::TimedOut => {
                        #[cfg(debug_assertions)]
                        eprintln!(
                            "Computer {} idle for {:?}; sending terminate",
                            computer.id(),
                            idle_timeout
                        );
                        terminate_sent = true;
                        args = Event::terminate().into_values();
                    }
                    Wait::Interrupted => break,
                }
            }
            Ok(Resumed::Finished(_)) => {
                computer.finish();
                if config.standards_mode {
                    if let Some(terminal) = computer.terminal() {
                        if !terminal.is_error_mode() {
                            terminal.show_fatal_message("Error running computer");
                        }
                    }
                }
                break;
            }
            Err(err) => {
                // Errors raised while a reboot or shutdown is underway are
                // part of stopping, not failures
                if computer.is_running() {
                    computer.shutdown();
                    report_script_error(host, computer, &err);
                }
                break;
            }
        }
    }
}

fn report_script_error(host: &Host, computer: &Computer, err: &ScriptError) {
    eprintln!("Computer {} error: {}", computer.id(), err);
    match computer.terminal() {
        Some(terminal) if host.config().standards_mode => {
            terminal.show_fatal_message(&format!("Error running computer: {}", err));
        }
        terminal => host.show_dialog(terminal.cloned(), "Script Error", &err.to_string()),
    }
}

fn report_boot_failure(host: &Host, computer: &Computer, err: &BootError) {
    eprintln!(
        "Computer {}: {}. Please make sure the ROM is installed properly.",
        computer.id(),
        err
    );
    let (fatal, title, message) = match err {
        BootError::BiosMissing { path, .. } | BootError::BiosLoad { path, .. } => (
            "Error loading bios.lua",
            "Couldn't load BIOS",
            format!(
                "Couldn't load BIOS from {}. Please make sure the ROM is installed properly.",
                path
            ),
        ),
        BootError::State(_) => ("Error starting computer", "Couldn't start computer", err.to_string()),
    };
    match computer.terminal() {
        Some(terminal) if host.config().standards_mode => terminal.show_fatal_message(fatal),
        terminal => host.show_dialog(terminal.cloned(), title, &message),
    }
}
