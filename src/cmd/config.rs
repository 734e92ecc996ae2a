//! Configuration view and validation commands: `pulsewatch config`.

use anyhow::{Context, Result};
use pulsewatch::config::PulsewatchToml;
use std::path::Path;

use super::super::ConfigCommands;

const REDACTED: &str = "********";

pub fn cmd_config(config_path: &Path, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Pulsewatch Configuration");
            println!("========================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No pulsewatch.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            let mut toml = PulsewatchToml::load_or_default(config_path)?;
            toml.apply_env()?;
            if toml.phabricator.token.is_some() {
                toml.phabricator.token = Some(REDACTED.to_string());
            }

            println!("Effective values (with env overrides):");
            println!();
            let rendered =
                toml::to_string_pretty(&toml).context("Failed to serialize configuration")?;
            println!("{}", rendered);
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No pulsewatch.toml found. Checking defaults.");
            }

            let mut toml = PulsewatchToml::load_or_default(config_path)?;
            toml.apply_env()?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("pulsewatch.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if let Some(parent) = config_path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }

            PulsewatchToml::default().save(config_path)?;

            println!("Created pulsewatch.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [phabricator] url, token, secure_project_slugs, repositories");
            println!("  - [hook] group_id, hook_id");
            println!("  - [monitoring] emails, period_secs, restart_index_namespace");
            println!();
        }
    }

    Ok(())
}
