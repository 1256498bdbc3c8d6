//! Mount table contract and mount policies

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Global policy for user-requested mounts
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MountMode {
    /// No user mounts at all
    #[serde(rename = "none")]
    None,
    /// Read-only, and the read-only flag cannot be overridden
    #[serde(rename = "ro_strict")]
    #[default]
    ReadOnlyStrict,
    /// Read-only unless asked otherwise
    #[serde(rename = "ro")]
    ReadOnly,
    /// Read-write
    #[serde(rename = "rw")]
    ReadWrite,
}

/// Per-mount override of the global mode
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountPolicy {
    /// Follow the global [`MountMode`]
    #[default]
    Default,
    /// Always read-only
    ForceReadOnly,
    /// Always read-write
    ForceReadWrite,
}

impl MountPolicy {
    /// Whether to mount read-only, or `None` if the mount is not allowed
    pub fn read_only(self, mode: MountMode) -> Option<bool> {
        match self {
            MountPolicy::ForceReadOnly => Some(true),
            MountPolicy::ForceReadWrite => Some(false),
            MountPolicy::Default => match mode {
                MountMode::None => None,
                MountMode::ReadWrite => Some(false),
                MountMode::ReadOnly | MountMode::ReadOnlyStrict => Some(true),
            },
        }
    }
}

/// A host directory configured to appear inside every computer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomMount {
    /// Path inside the computer
    pub mount_point: String,
    /// Directory on the host
    pub host_path: PathBuf,
    /// Read-only override
    #[serde(default)]
    pub policy: MountPolicy,
}

/// One active mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Path inside the computer
    pub mount_point: String,
    /// Directory on the host
    pub host_path: PathBuf,
    /// Is the mount read-only?
    pub read_only: bool,
}

/// A computer's filesystem mounts
pub trait MountTable: Send {
    /// Mount `host_path` at `mount_point`. Returns false if the mount failed.
    fn mount(&mut self, host_path: &Path, mount_point: &str, read_only: bool) -> bool;

    /// Active mounts, in mount order
    fn mounts(&self) -> Vec<Mount>;
}

/// Builds an empty mount table for a computer id
pub type MountTableFactory = Arc<dyn Fn(u32) -> Box<dyn MountTable> + Send + Sync>;

/// Mount table over host directories
#[derive(Debug, Default)]
pub struct DirectoryMountTable {
    mounts: Vec<Mount>,
}

impl DirectoryMountTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory producing empty directory tables
    pub fn factory() -> MountTableFactory {
        Arc::new(|_id| Box::new(DirectoryMountTable::new()) as Box<dyn MountTable>)
    }
}

impl MountTable for DirectoryMountTable {
    fn mount(&mut self, host_path: &Path, mount_point: &str, read_only: bool) -> bool {
        if !host_path.is_dir() {
            return false;
        }
        let mount_point = mount_point.trim_matches('/').to_string();
        if self.mounts.iter().any(|m| m.mount_point == mount_point) {
            return false;
        }
        self.mounts.push(Mount {
            mount_point,
            host_path: host_path.to_path_buf(),
            read_only,
        });
        true
    }

    fn mounts(&self) -> Vec<Mount> {
        self.mounts.clone()
    }
}
