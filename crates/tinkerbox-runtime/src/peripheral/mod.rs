//! Peripheral and connection contracts
//!
//! Peripheral objects outlive interpreter states: a reboot keeps the same
//! objects attached and asks each to re-register itself with the new state.

pub mod computer;

pub use computer::ComputerPeripheral;

use crate::computer::Computer;
use crate::handle::ComputerHandle;
use crate::script::ScriptState;
use crate::value::Value;

/// A device attached to one side of a computer
pub trait Peripheral: Send + Sync {
    /// Peripheral type name ("computer", "monitor", ...)
    fn kind(&self) -> &str;

    /// Called once when attached to `owner` at `side`
    fn attach(&self, _owner: &Computer, _side: &str) {}

    /// Invoke a method
    fn call(&self, computer: &Computer, method: &str, args: Vec<Value>) -> Result<Vec<Value>, String>;

    /// Re-register with a freshly booted interpreter state
    fn reinitialize(&self, _state: &mut dyn ScriptState) {}

    /// Release the peripheral. Called exactly once, when it is removed from
    /// its computer or the computer is destroyed.
    fn detach(&self) {}

    /// The computer this peripheral represents, for cross-references
    fn target(&self) -> Option<ComputerHandle> {
        None
    }
}

/// An open outbound network connection
pub trait Connection: Send {
    /// Close the connection. Called at most once.
    fn close(&mut self);
}
