//! Runtime error types.

use std::path::PathBuf;

/// Failure to mount a required image while constructing a computer
#[derive(Debug, Clone, thiserror::Error)]
#[error("Could not mount {image} at /{mount_point}")]
pub struct MountFailure {
    /// Which image failed ("ROM", "debugger ROM")
    pub image: String,
    /// Mount point inside the computer
    pub mount_point: String,
}

/// Errors that can occur while reading or writing configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// Malformed computer configuration
    #[error("Invalid computer configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed host configuration
    #[error("Invalid host configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Errors that prevent a computer from being constructed.
///
/// A computer that fails with one of these never enters the registry.
#[derive(Debug, thiserror::Error)]
pub enum ComputerError {
    /// A required mount failed
    #[error("{0}")]
    Mount(#[from] MountFailure),

    /// Configuration could not be loaded
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The data directory could not be created
    #[error("Could not create data directory {path}: {source}")]
    DataDir {
        /// Directory that was being created
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The computer thread could not be started
    #[error("Could not start thread for computer {id}: {source}")]
    Thread {
        /// Computer id
        id: u32,
        /// Underlying I/O error
        source: std::io::Error,
    },
}

/// Errors that end the current boot without rebooting
#[derive(Debug, thiserror::Error)]
pub enum BootError {
    /// The BIOS file could not be read
    #[error("Couldn't load BIOS: {path} ({source})")]
    BiosMissing {
        /// Expanded BIOS path
        path: String,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The interpreter rejected the BIOS chunk
    #[error("Couldn't load BIOS: {path} ({message})")]
    BiosLoad {
        /// Expanded BIOS path
        path: String,
        /// Interpreter error message
        message: String,
    },

    /// A fresh interpreter state could not be set up
    #[error("Couldn't create interpreter state: {0}")]
    State(#[from] ScriptError),
}

/// Errors reported by an interpreter state.
///
/// `Memory` and `Yield` are never produced by the built-in engine; they
/// exist for [`ScriptEngine`](crate::script::ScriptEngine) implementations
/// backed by a real interpreter.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    /// Uncaught error raised by the running program
    #[error("{0}")]
    Runtime(String),

    /// The interpreter ran out of memory
    #[error("not enough memory")]
    Memory,

    /// A suspension was attempted where it is not allowed
    #[error("{0}")]
    Yield(String),
}

/// Errors from a yieldable (or blocking) load
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// The owning call was abandoned before the worker finished
    #[error("load cancelled")]
    Cancelled,

    /// The reader function failed or returned a non-string
    #[error("{0}")]
    Reader(String),

    /// The parser rejected the source. [`SourceParser`](crate::bridge::SourceParser)
    /// accepts any bytes; other parsers report syntax errors here.
    #[error("{0}")]
    Parse(String),
}

/// A failure that escaped a computer's execution loop entirely
#[derive(Debug, Clone, thiserror::Error)]
#[error("Uncaught exception while executing computer {id} (last external call: {}): {message}", .last_call.as_deref().unwrap_or("none"))]
pub struct HostException {
    /// Computer id
    pub id: u32,
    /// Name of the last external function the interpreter called
    pub last_call: Option<String>,
    /// Panic payload, rendered as text
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_exception_message() {
        let e = HostException {
            id: 4,
            last_call: Some("fs.open".to_string()),
            message: "boom".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "Uncaught exception while executing computer 4 (last external call: fs.open): boom"
        );

        let e = HostException {
            id: 4,
            last_call: None,
            message: "boom".to_string(),
        };
        assert!(e.to_string().contains("last external call: none"));
    }

    #[test]
    fn test_mount_failure_converts() {
        let err: ComputerError = MountFailure {
            image: "ROM".to_string(),
            mount_point: "rom".to_string(),
        }
        .into();
        assert!(matches!(err, ComputerError::Mount(_)));
        assert_eq!(err.to_string(), "Could not mount ROM at /rom");
    }

    #[test]
    fn test_thread_error_message() {
        let err = ComputerError::Thread {
            id: 5,
            source: std::io::Error::new(std::io::ErrorKind::WouldBlock, "no threads left"),
        };
        assert_eq!(
            err.to_string(),
            "Could not start thread for computer 5: no threads left"
        );
    }
}
