//! Plugin loading contract and the process-wide plugin error list

use crate::computer::Computer;
use crate::script::ScriptState;
use crate::value::Value;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

static PLUGIN_ERRORS: Lazy<Mutex<Vec<(PathBuf, String)>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Loads host plugins into a booting computer
pub trait PluginLoader: Send + Sync {
    /// Load every plugin into `state`. Failures are recorded with
    /// [`record_plugin_error`] rather than returned.
    fn load_all(&self, computer: &Arc<Computer>, state: &mut dyn ScriptState);
}

/// Record that the plugin at `path` failed to load
pub fn record_plugin_error(path: impl Into<PathBuf>, message: impl Into<String>) {
    PLUGIN_ERRORS.lock().push((path.into(), message.into()));
}

/// Every recorded plugin error
pub fn plugin_errors() -> Vec<(PathBuf, String)> {
    PLUGIN_ERRORS.lock().clone()
}

/// Plugin name shown to scripts: the file name up to its first dot
pub fn plugin_name(path: &Path) -> String {
    let file = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    match file.find('.') {
        Some(dot) => file[..dot].to_string(),
        None => file,
    }
}

/// Plugin errors as a `{name = message}` table, or `None` if there are none
pub fn plugin_error_table() -> Option<Value> {
    let errors = PLUGIN_ERRORS.lock();
    if errors.is_empty() {
        return None;
    }
    Some(Value::Table(
        errors
            .iter()
            .map(|(path, message)| (Value::Str(plugin_name(path)), Value::str(message.as_str())))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_name() {
        assert_eq!(plugin_name(Path::new("/plugins/ccemux.so")), "ccemux");
        assert_eq!(plugin_name(Path::new("sound.plugin.dll")), "sound");
        assert_eq!(plugin_name(Path::new("bare")), "bare");
    }

    #[test]
    fn test_recorded_errors_appear_in_table() {
        record_plugin_error("/plugins/broken-test.so", "missing symbol");
        assert!(plugin_errors()
            .iter()
            .any(|(path, _)| path == Path::new("/plugins/broken-test.so")));

        let Some(Value::Table(entries)) = plugin_error_table() else {
            panic!("expected a table");
        };
        assert!(entries
            .iter()
            .any(|(k, v)| k.as_str() == Some("broken-test") && v.as_str() == Some("missing symbol")));
    }
}
