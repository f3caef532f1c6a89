//! Command-line interface.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use ca_domain::config::Config;

#[derive(Parser)]
#[command(name = "clinagent", about = "Clinical assistant agent gateway")]
pub struct Cli {
    /// Path to the TOML config file (default: ./clinagent.toml, or
    /// $CLINAGENT_CONFIG).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the gateway server (default).
    Serve,
    /// Configuration helpers.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Validate the config file and report issues.
    Validate,
    /// Print the effective configuration.
    Show,
}

/// Load the configuration. Resolution order: `--config`, then
/// `$CLINAGENT_CONFIG`, then `./clinagent.toml`. A missing file yields
/// the defaults.
pub fn load_config(explicit: Option<&PathBuf>) -> anyhow::Result<(Config, PathBuf)> {
    let path = explicit
        .cloned()
        .or_else(|| std::env::var("CLINAGENT_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("clinagent.toml"));

    if !path.exists() {
        tracing::info!(path = %path.display(), "config file not found, using defaults");
        return Ok((Config::default(), path));
    }

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("parsing config file {}", path.display()))?;
    Ok((config, path))
}

/// `config validate` entry point. Returns false when errors were found.
pub fn validate(config: &Config, path: &std::path::Path) -> bool {
    use ca_domain::config::ConfigSeverity;

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

/// `config show` entry point.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => eprintln!("failed to render config: {e}"),
    }
}
