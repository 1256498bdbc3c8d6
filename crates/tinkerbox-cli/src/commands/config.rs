//! `tinkerbox config`: print the effective host configuration

use std::path::Path;

pub fn execute(path: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_config(path)?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
