//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use agenr_domain::config::Config;

#[derive(Parser)]
#[command(name = "agenr", about = "Multi-tenant gateway trust & control core")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the gateway server (default).
    Serve,
    /// Apply store migrations and exit.
    Migrate,
    /// Configuration helpers.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Validate the configuration and report issues.
    Validate,
    /// Print the effective configuration (TOML).
    Show,
}

/// Load config from `AGENR_CONFIG` (default `./agenr.toml`) plus env
/// overrides.
pub fn load_config() -> anyhow::Result<(Config, PathBuf)> {
    let path = PathBuf::from(
        std::env::var("AGENR_CONFIG").unwrap_or_else(|_| "./agenr.toml".to_string()),
    );
    let config = Config::load(&path)?;
    Ok((config, path))
}

pub mod config_cmd {
    use agenr_domain::config::{Config, ConfigSeverity};

    /// Returns whether validation passed (no errors).
    pub fn validate(config: &Config, path: &std::path::Path) -> bool {
        let issues = config.validate();
        if issues.is_empty() {
            println!("{}: OK", path.display());
            return true;
        }
        for issue in &issues {
            println!("{issue}");
        }
        !issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error)
    }

    pub fn show(config: &Config) {
        match toml::to_string_pretty(config) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => eprintln!("failed to render config: {e}"),
        }
    }
}
