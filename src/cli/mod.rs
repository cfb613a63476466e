//! Command-line interface
//!
//! Provides the main CLI structure using clap with subcommands for:
//! - `deps`: print the ordered module list for an entry file
//! - `watch`: keep the graph live and reprint after each invalidation

mod deps;
mod watch;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;

pub use deps::DepsCommand;
pub use watch::WatchCommand;

/// Dependency graph and module resolver for mobile JavaScript bundles
#[derive(Parser, Debug)]
#[command(name = "hastegraph")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to hastegraph.toml config file
    #[arg(short, long, global = true, default_value = "hastegraph.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve an entry file and print its ordered dependencies
    Deps(DepsCommand),

    /// Watch the roots and reprint dependencies on every change
    Watch(WatchCommand),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<()> {
        print_banner();

        match &self.command {
            Commands::Deps(cmd) => cmd.execute(&self.config).await,
            Commands::Watch(cmd) => cmd.execute(&self.config).await,
        }
    }
}

/// Print the hastegraph banner
fn print_banner() {
    eprintln!(
        "\n{} {} {}\n",
        "◆".cyan(),
        "hastegraph".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}
