// src/commands/config.rs
//! Effective configuration

use anyhow::Result;
use llamapkg::config::Config;

pub fn cmd_config(config: &Config) -> Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}
