//! Subcommand implementations

pub mod config;
pub mod run;

use anyhow::Context;
use std::path::{Path, PathBuf};
use tinkerbox_runtime::HostConfig;

/// `<config dir>/tinkerbox`, if the platform has one
fn app_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tinkerbox"))
}

/// Load the host configuration: an explicit file, else the per-user file,
/// else defaults rooted in the per-user data directory
pub fn load_config(path: Option<&Path>) -> anyhow::Result<HostConfig> {
    if let Some(path) = path {
        return HostConfig::from_file(path)
            .with_context(|| format!("Failed to read config {}", path.display()));
    }

    if let Some(path) = app_config_dir().map(|dir| dir.join("config.toml")) {
        if path.exists() {
            return HostConfig::from_file(&path)
                .with_context(|| format!("Failed to read config {}", path.display()));
        }
    }

    let mut config = HostConfig::default();
    if let Some(data) = dirs::data_dir() {
        config.computer_root = data.join("tinkerbox").join("computer");
    }
    Ok(config)
}

/// Where per-computer settings are stored
pub fn computer_config_dir(config: &HostConfig) -> PathBuf {
    app_config_dir()
        .map(|dir| dir.join("computers"))
        .unwrap_or_else(|| config.computer_root.join(".config"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_explicit_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.toml");
        std::fs::write(&path, "standards_mode = true\nabort_timeout_ms = 500\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert!(config.standards_mode);
        assert_eq!(config.abort_timeout_ms, 500);
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let err = load_config(Some(Path::new("/no/such/host.toml"))).unwrap_err();
        assert!(err.to_string().contains("/no/such/host.toml"));
    }
}
