//! CLI definition and command handling

pub mod commands;
pub mod output;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use flotilla_core::config::{load_config, load_config_from_dir, Config};

use commands::{BuildCommand, CacheCommand, CheckCommand};

/// Flotilla - multi-target build orchestrator
#[derive(Debug, Parser)]
#[command(name = "flotilla")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Working directory
    #[arg(short = 'C', long, global = true)]
    pub directory: Option<PathBuf>,

    /// Configuration file (default: nearest flotilla.toml or flotilla.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the configured builds
    Build(BuildCommand),

    /// Validate configuration and show what a build would run
    Check(CheckCommand),

    /// Fingerprint cache management
    Cache(CacheCommand),
}

/// A loaded configuration and the directory it applies to
#[derive(Debug)]
pub struct Project {
    pub config: Config,
    pub config_path: PathBuf,
    pub root: PathBuf,
}

impl Project {
    /// Absolute cache directory
    pub fn cache_dir(&self) -> PathBuf {
        if self.config.cache.dir.is_absolute() {
            self.config.cache.dir.clone()
        } else {
            self.root.join(&self.config.cache.dir)
        }
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> anyhow::Result<()> {
        // Change to specified directory if provided
        if let Some(dir) = &self.directory {
            std::env::set_current_dir(dir)?;
        }

        match self.command {
            Commands::Build(ref cmd) => cmd.execute(&self),
            Commands::Check(ref cmd) => cmd.execute(&self),
            Commands::Cache(ref cmd) => cmd.execute(&self),
        }
    }

    /// Load the configuration named by `--config`, or the nearest one
    pub fn load_project(&self) -> anyhow::Result<Project> {
        let (config, config_path) = match &self.config {
            Some(path) => {
                let config = load_config(path)
                    .with_context(|| format!("failed to load {}", path.display()))?;
                (config, path.clone())
            }
            None => {
                let cwd = std::env::current_dir()?;
                load_config_from_dir(&cwd)
                    .context("no flotilla configuration found (expected flotilla.toml or flotilla.yaml)")?
            }
        };

        let root = std::fs::canonicalize(parent_dir(&config_path))?;
        Ok(Project {
            config,
            config_path,
            root,
        })
    }
}
