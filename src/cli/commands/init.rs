//! Init and Config commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};

use crate::config::Settings;

/// Run init command - create configuration file under `root`.
pub fn run_init(root: &Path, force: bool) -> anyhow::Result<PathBuf> {
    let config_path = root.join(".file-events").join("settings.toml");

    if config_path.exists() && !force {
        bail!(
            "Configuration file already exists at: {}\nUse --force to overwrite",
            config_path.display()
        );
    }

    Settings::default()
        .save(&config_path)
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    println!("Created configuration file at: {}", config_path.display());
    println!("Edit this file to customize your settings.");
    Ok(config_path)
}

/// Run config command - display current configuration.
pub fn run_config(config: &Settings) -> anyhow::Result<()> {
    println!("Current Configuration:");
    println!("{}", "=".repeat(50));
    let toml_str = toml::to_string_pretty(config).context("Error displaying config")?;
    println!("{toml_str}");
    Ok(())
}
