//! Configuration commands

use anyhow::{Context, Result};
use colored::Colorize;

use crate::config::ShelfConfig;

/// Print the effective configuration as JSON
pub fn cmd_config_show() -> Result<()> {
    let path = ShelfConfig::config_path()?;
    let config = ShelfConfig::load_from(&path)?;

    if !path.exists() {
        println!("{} No config file, showing defaults", ">".dimmed());
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&config).context("Failed to serialize config")?
    );
    Ok(())
}

/// Set one dotted key and save
pub fn cmd_config_set(key: &str, value: &str) -> Result<()> {
    let path = ShelfConfig::config_path()?;
    let mut config = ShelfConfig::load_from(&path)?;
    config.set(key, value)?;
    config.save_to(&path)?;

    println!("{} Set {} = {}", "+".green(), key.cyan(), value);
    Ok(())
}

pub fn cmd_config_path() -> Result<()> {
    println!("{}", ShelfConfig::config_path()?.display());
    Ok(())
}
