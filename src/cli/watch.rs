//! Watch command implementation

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tracing::{error, info};

use crate::config::GraphConfig;
use crate::graph::{DependencyGraph, RequestOptions};
use crate::watch::{classify, Watcher};

/// Watch the roots and reprint dependencies on every change
#[derive(Args, Debug)]
pub struct WatchCommand {
    /// Entry file, absolute or relative to a project root
    pub entry: PathBuf,

    /// Platform tag (ios, android, ...)
    #[arg(short, long)]
    pub platform: Option<String>,
}

impl WatchCommand {
    pub async fn execute(&self, config_path: &str) -> Result<()> {
        info!("Loading configuration from {}", config_path);
        let config = GraphConfig::load(config_path)?;
        let roots = config.project_roots();

        let graph = DependencyGraph::load(config)
            .await
            .context("Failed to build dependency graph")?;

        let mut options = RequestOptions::new(self.entry.clone());
        options.platform = self.platform.clone();

        let start = Instant::now();
        let response = graph.get_dependencies(&options).await?;
        super::deps::print_response(&response, start.elapsed());

        eprintln!(
            "  {} Watching for changes. Press {} to stop\n",
            "•".dimmed(),
            "Ctrl+C".yellow()
        );

        let mut watcher = Watcher::new(&roots)?;
        while let Some(path) = watcher.next().await {
            let Some(event) = classify(graph.fastfs(), &path) else {
                continue;
            };
            eprintln!(
                "  {} {:?}: {}",
                "↻".yellow(),
                event.kind,
                path.display().to_string().dimmed()
            );

            if let Err(e) = graph
                .process_file_change(event.kind, &event.root, &event.rel_path)
                .await
            {
                error!("change processing failed: {}", e);
                continue;
            }

            let start = Instant::now();
            match graph.get_dependencies(&options).await {
                Ok(response) => super::deps::print_response(&response, start.elapsed()),
                Err(e) => error!("request failed: {}", e),
            }
            graph.persist_caches();
        }

        Ok(())
    }
}
