//! Deps command implementation

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tracing::info;

use crate::config::GraphConfig;
use crate::graph::{DependencyGraph, RequestOptions, Response};

/// Resolve an entry file and print its ordered dependencies
#[derive(Args, Debug)]
pub struct DepsCommand {
    /// Entry file, absolute or relative to a project root
    pub entry: PathBuf,

    /// Platform tag (ios, android, ...)
    #[arg(short, long)]
    pub platform: Option<String>,

    /// Only list the entry's own specifiers, without resolving the graph
    #[arg(long)]
    pub shallow: bool,

    /// Fail with a non-zero exit on the first unresolved dependency
    #[arg(long)]
    pub strict: bool,
}

impl DepsCommand {
    pub async fn execute(&self, config_path: &str) -> Result<()> {
        let start = Instant::now();

        info!("Loading configuration from {}", config_path);
        let config = GraphConfig::load(config_path)?;
        let graph = DependencyGraph::load(config)
            .await
            .context("Failed to build dependency graph")?;

        if self.shallow {
            let specifiers = graph
                .get_shallow_dependencies(&self.entry, &Default::default())
                .await?;
            for specifier in specifiers {
                eprintln!("  {} {}", "•".dimmed(), specifier);
            }
            return Ok(());
        }

        let mut options = RequestOptions::new(self.entry.clone());
        options.platform = self.platform.clone();
        options.fail_on_unresolved = self.strict;

        let response = graph.get_dependencies(&options).await?;
        graph.persist_caches();

        print_response(&response, start.elapsed());
        Ok(())
    }
}

/// Print a response summary
pub(super) fn print_response(response: &Response, elapsed: std::time::Duration) {
    for module in response.dependencies() {
        eprintln!(
            "  {} {}",
            "•".dimmed(),
            module.path().display().to_string().cyan()
        );
    }

    for error in response.errors() {
        eprintln!("  {} {}", "✗".red(), error.to_string().red());
    }

    eprintln!(
        "\n{} {} module(s) from {} in {:.2?}\n",
        "✓".green().bold(),
        response.dependencies().len(),
        response.main_module_id().unwrap_or("?").bold(),
        elapsed
    );
}
