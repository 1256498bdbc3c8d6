//! The interpreter as seen by the runtime
//!
//! The embedded language is not part of this crate. A computer only needs
//! to allocate a fresh state per boot, load a chunk into a coroutine, resume
//! it with values, and install per-instruction hooks. Everything else the
//! interpreter does is its own business.

use crate::bridge::{ChunkParser, Loader};
use crate::computer::Computer;
use crate::error::ScriptError;
use crate::value::Value;
use std::sync::Arc;

/// Hook fires when a function is called
pub const HOOK_CALL: u32 = 1 << 0;
/// Hook fires when a function returns
pub const HOOK_RETURN: u32 = 1 << 1;
/// Hook fires when execution reaches a new line
pub const HOOK_LINE: u32 = 1 << 2;
/// Hook fires every `count` instructions
pub const HOOK_COUNT: u32 = 1 << 3;
/// Hook fires when an error is raised
pub const HOOK_ERROR: u32 = 1 << 4;
/// Hook fires when a coroutine is resumed
pub const HOOK_RESUME: u32 = 1 << 5;
/// Hook fires when a coroutine yields
pub const HOOK_YIELD: u32 = 1 << 6;

/// A coroutine inside one interpreter state
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Coroutine(pub u32);

/// A successful resume
#[derive(Debug, Clone, PartialEq)]
pub enum Resumed {
    /// The coroutine suspended itself with these values
    Yielded(Vec<Value>),
    /// The coroutine's function returned these values
    Finished(Vec<Value>),
}

/// Which execution context a hook is installed on
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HookTarget {
    /// The computer's main coroutine
    Main,
    /// The context that is currently calling into the host
    Current,
}

/// Per-instruction hook configuration
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Hook {
    /// Bitwise OR of the `HOOK_*` constants
    pub mask: u32,
    /// Instruction count between `HOOK_COUNT` firings
    pub count: u32,
}

/// Installation and removal of interpreter hooks.
///
/// The hook function itself belongs to the debugger surface; this trait
/// only decides where it is active.
pub trait HookControl {
    /// Install (`Some`) or remove (`None`) the hook on a target
    fn set_hook(&mut self, target: HookTarget, hook: Option<Hook>);
}

/// One interpreter state, recreated on every boot
pub trait ScriptState: HookControl {
    /// Create a new coroutine in this state
    fn create_coroutine(&mut self) -> Result<Coroutine, ScriptError>;

    /// Open the base library, leaving out the named globals
    fn open_base_library(&mut self, hidden: &[&str]);

    /// Expose a host library under `name` with the given surfaces
    fn open_library(&mut self, name: &str, surfaces: &[&str]);

    /// Set a global variable
    fn set_global(&mut self, name: &str, value: Value);

    /// Make `computer` retrievable as "the calling computer" from host calls
    fn bind_computer(&mut self, computer: Arc<Computer>);

    /// Replace the loader used by the script-visible `load`
    fn set_loader(&mut self, loader: Arc<dyn Loader>);

    /// Load a chunk as the body of `co`
    fn load(&mut self, co: Coroutine, source: &[u8], chunk_name: &str) -> Result<(), ScriptError>;

    /// Resume `co` with `args`
    fn resume(&mut self, co: Coroutine, args: Vec<Value>) -> Result<Resumed, ScriptError>;
}

/// Factory for interpreter states
pub trait ScriptEngine: Send + Sync {
    /// Allocate a fresh, empty state
    fn new_state(&self) -> Result<Box<dyn ScriptState>, ScriptError>;

    /// The engine's blocking source parser
    fn parser(&self) -> Arc<dyn ChunkParser>;
}
