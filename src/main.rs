use anyhow::Result;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vaultsync::cli::{self, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "vaultsync=debug"
    } else if cli.quiet {
        "vaultsync=warn"
    } else {
        "vaultsync=info"
    };

    // Logs go to stderr; stdout carries results and the MCP protocol
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    debug!("Starting vaultsync v{}", env!("CARGO_PKG_VERSION"));

    cli::run(cli).await
}
