//! Tinkerbox Computer Runtime
//!
//! This crate hosts virtual computers, each on its own OS thread:
//! - Instance construction, registration and teardown
//! - The per-computer execution loop and event queue
//! - A loader bridge that lets chunk readers suspend the calling program
//! - Breakpoints backed by interpreter debug hooks
//! - Invalidation registries for computers and timers that outlive their owner
//!
//! The interpreter itself is pluggable through [`ScriptEngine`]; the
//! [`scripted`] module provides a line-oriented engine for tools and tests.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bridge;
pub mod computer;
pub mod config;
pub mod debug;
pub mod error;
pub mod event;
pub mod handle;
pub mod invalidation;
pub mod library;
pub mod lifecycle;
pub mod mount;
pub mod peripheral;
pub mod plugin;
pub mod registry;
mod runloop;
pub mod script;
pub mod scripted;
pub mod task;
pub mod terminal;
pub mod timer;
pub mod value;

pub use bridge::{BlockingLoader, ChunkParser, ChunkSupplier, LoadStep, Loader, PendingLoad, SourceParser, YieldableLoader};
pub use computer::{BootPhase, Computer, RunState};
pub use config::{ComputerConfig, ConfigStore, FileConfigStore, HostConfig, MemoryConfigStore};
pub use debug::{Breakpoint, BreakpointTable};
pub use error::{BootError, ComputerError, ConfigError, HostException, LoadError, MountFailure, ScriptError};
pub use event::{Event, EventQueue, Wait};
pub use handle::{ComputerHandle, TimerId};
pub use library::{Capability, CapabilitySet, Library, StandardLibrary};
pub use lifecycle::{BiosSource, Host, HostBuilder};
pub use mount::{DirectoryMountTable, MountMode, MountTable};
pub use peripheral::{ComputerPeripheral, Connection, Peripheral};
pub use registry::ComputerRegistry;
pub use runloop::BIOS_CHUNK_NAME;
pub use script::{Coroutine, Hook, HookControl, HookTarget, Resumed, ScriptEngine, ScriptState};
pub use scripted::ScriptedEngine;
pub use terminal::{BufferTerminal, Notifier, RenderMode, Terminal, TerminalFactory};
pub use timer::TimerService;
pub use value::Value;
