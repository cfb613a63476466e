//! hastegraph - dependency graph and module resolver for mobile bundles
//!
//! # Features
//! - Virtual filesystem index over watched roots, with lazy subtrees
//! - Haste-name and asset indexes keyed by platform
//! - Multi-strategy specifier resolution with browser-field redirects
//! - Incremental resolution cache reacting to filesystem changes

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hastegraph::Cli;

/// Initialize the logging/tracing system
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("hastegraph=debug"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("hastegraph=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    cli.execute().await
}
