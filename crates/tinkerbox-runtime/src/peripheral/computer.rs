//! The "computer" peripheral: one computer seen from another
//!
//! The peripheral never holds its target directly. It names it by handle
//! and goes through the registry on every call, and it registers itself in
//! the registry's reference index so the target's teardown can find and
//! detach it.

use super::Peripheral;
use crate::computer::Computer;
use crate::handle::ComputerHandle;
use crate::lifecycle::Host;
use crate::value::Value;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Where this peripheral is attached
#[derive(Debug, Clone)]
struct Binding {
    owner: ComputerHandle,
    side: String,
}

/// A peripheral representing another computer
pub struct ComputerPeripheral {
    host: Weak<Host>,
    target: Mutex<ComputerHandle>,
    binding: Mutex<Option<Binding>>,
}

impl ComputerPeripheral {
    /// Create a peripheral pointing at `target`
    pub fn new(host: &Arc<Host>, target: ComputerHandle) -> Self {
        Self {
            host: Arc::downgrade(host),
            target: Mutex::new(target),
            binding: Mutex::new(None),
        }
    }

    fn live_target(&self, host: &Host) -> Option<Arc<Computer>> {
        host.registry().get(*self.target.lock())
    }

    fn retarget(&self, host: &Host, new_target: ComputerHandle) {
        let old = std::mem::replace(&mut *self.target.lock(), new_target);
        if let Some(binding) = self.binding.lock().as_ref() {
            host.registry()
                .remove_reference(old, binding.owner, &binding.side);
            host.registry()
                .add_reference(new_target, binding.owner, &binding.side);
        }
    }
}

impl Peripheral for ComputerPeripheral {
    fn kind(&self) -> &str {
        "computer"
    }

    fn attach(&self, owner: &Computer, side: &str) {
        if let Some(host) = self.host.upgrade() {
            host.registry()
                .add_reference(*self.target.lock(), owner.handle(), side);
        }
        *self.binding.lock() = Some(Binding {
            owner: owner.handle(),
            side: side.to_string(),
        });
    }

    fn call(&self, _computer: &Computer, method: &str, _args: Vec<Value>) -> Result<Vec<Value>, String> {
        let host = self
            .host
            .upgrade()
            .ok_or_else(|| "host is shutting down".to_string())?;
        let target = *self.target.lock();

        match method {
            "getID" => Ok(vec![Value::from(target.id())]),
            "isOn" => Ok(vec![Value::Boolean(self.live_target(&host).is_some())]),
            "turnOn" => {
                if self.live_target(&host).is_none() {
                    let computer = host.spawn(target.id()).map_err(|e| e.to_string())?;
                    self.retarget(&host, computer.handle());
                }
                Ok(vec![])
            }
            "shutdown" => {
                if let Some(computer) = self.live_target(&host) {
                    computer.shutdown();
                }
                Ok(vec![])
            }
            "reboot" => {
                if let Some(computer) = self.live_target(&host) {
                    computer.reboot();
                }
                Ok(vec![])
            }
            "getLabel" => Ok(vec![self
                .live_target(&host)
                .and_then(|computer| computer.label())
                .map(Value::Str)
                .unwrap_or(Value::Nil)]),
            other => Err(format!("No such method {}", other)),
        }
    }

    fn detach(&self) {
        let binding = self.binding.lock().take();
        if let (Some(binding), Some(host)) = (binding, self.host.upgrade()) {
            host.registry()
                .remove_reference(*self.target.lock(), binding.owner, &binding.side);
        }
    }

    fn target(&self) -> Option<ComputerHandle> {
        Some(*self.target.lock())
    }
}
