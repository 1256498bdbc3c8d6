//! Host and per-computer configuration
//!
//! Host settings are read once from a TOML file. Per-computer settings are
//! small JSON documents owned by a [`ConfigStore`].

use crate::error::ConfigError;
use crate::mount::{CustomMount, MountMode};
use crate::terminal::RenderMode;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Data directory override for one computer id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomDataDir {
    /// Computer id
    pub id: u32,
    /// Directory to use instead of `<computer_root>/<id>`
    pub path: PathBuf,
}

/// Host-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Strict compatibility: fatal errors go to the terminal, loads may
    /// yield and the idle timeout is shorter
    pub standards_mode: bool,
    /// Strip every non-standard API
    pub vanilla: bool,
    /// Strip network listeners and the mounter
    pub server_mode: bool,
    /// Enable the http API
    pub http_enable: bool,
    /// Enable the debug API and breakpoints
    pub debug_enable: bool,
    /// Policy for user-requested mounts
    pub mount_mode: MountMode,
    /// Mount the ROM read-only
    pub rom_read_only: bool,
    /// Idle timeout outside standards mode, in milliseconds
    pub abort_timeout_ms: u64,
    /// Idle timeout in standards mode, in milliseconds
    pub standards_timeout_ms: u64,
    /// Settings string handed to every computer
    pub default_computer_settings: String,
    /// Ask the BIOS to hide deprecated language features
    pub disable_lua51_features: bool,
    /// Parent of the per-computer data directories
    pub computer_root: PathBuf,
    /// Directory holding `rom/`, `debug/` and the BIOS
    pub rom_path: PathBuf,
    /// Terminal backend
    pub render_mode: RenderMode,
    /// Per-id data directory overrides
    pub custom_data_dirs: Vec<CustomDataDir>,
    /// Host directories mounted into every computer
    pub custom_mounts: Vec<CustomMount>,
    /// Script to run at startup: a file path, or inline source after `\x1b`
    pub startup_script: Option<String>,
    /// Arguments for the startup script
    pub startup_args: Option<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            standards_mode: false,
            vanilla: false,
            server_mode: false,
            http_enable: true,
            debug_enable: true,
            mount_mode: MountMode::default(),
            rom_read_only: true,
            abort_timeout_ms: 17_000,
            standards_timeout_ms: 7_000,
            default_computer_settings: String::new(),
            disable_lua51_features: false,
            computer_root: PathBuf::from("computer"),
            rom_path: PathBuf::from("."),
            render_mode: RenderMode::default(),
            custom_data_dirs: Vec::new(),
            custom_mounts: Vec::new(),
            startup_script: None,
            startup_args: None,
        }
    }
}

impl HostConfig {
    /// Load from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// How long a suspended computer may go without input
    pub fn idle_timeout(&self) -> Duration {
        if self.standards_mode {
            Duration::from_millis(self.standards_timeout_ms)
        } else {
            Duration::from_millis(self.abort_timeout_ms)
        }
    }

    /// Data directory for a computer id
    pub fn data_dir(&self, id: u32) -> PathBuf {
        self.custom_data_dirs
            .iter()
            .find(|d| d.id == id)
            .map(|d| d.path.clone())
            .unwrap_or_else(|| self.computer_root.join(id.to_string()))
    }
}

/// Persisted settings of one computer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ComputerConfig {
    /// Computer label
    pub label: Option<String>,
    /// Color (advanced) computer
    pub is_color: bool,
    /// Open the terminal fullscreen
    pub start_fullscreen: bool,
}

impl Default for ComputerConfig {
    fn default() -> Self {
        Self {
            label: None,
            is_color: true,
            start_fullscreen: false,
        }
    }
}

/// Storage for per-computer settings
pub trait ConfigStore: Send + Sync {
    /// Load the settings for `id`; a computer without saved settings gets
    /// the defaults
    fn load(&self, id: u32) -> Result<ComputerConfig, ConfigError>;

    /// Persist the settings for `id`
    fn save(&self, id: u32, config: &ComputerConfig) -> Result<(), ConfigError>;
}

/// Stores `<dir>/<id>.json`
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    dir: PathBuf,
}

impl FileConfigStore {
    /// Store settings under `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, id: u32) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self, id: u32) -> Result<ComputerConfig, ConfigError> {
        let path = self.path(id);
        if !path.exists() {
            return Ok(ComputerConfig::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, id: u32, config: &ComputerConfig) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(config)?;
        std::fs::write(self.path(id), content)?;
        Ok(())
    }
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    configs: Mutex<FxHashMap<u32, ComputerConfig>>,
}

impl MemoryConfigStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Saved settings for `id`, if any
    pub fn get(&self, id: u32) -> Option<ComputerConfig> {
        self.configs.lock().get(&id).cloned()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self, id: u32) -> Result<ComputerConfig, ConfigError> {
        Ok(self.get(id).unwrap_or_default())
    }

    fn save(&self, id: u32, config: &ComputerConfig) -> Result<(), ConfigError> {
        self.configs.lock().insert(id, config.clone());
        Ok(())
    }
}
