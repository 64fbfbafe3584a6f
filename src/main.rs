use anyhow::Result;
use clap::Parser;

use mediagate::cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    match cli.command {
        Commands::Serve(args) => mediagate::cli::serve::run(args, &cli.config_dir).await,
        Commands::Check(args) => mediagate::cli::check::run(args, &cli.config_dir).await,
        Commands::Mint(args) => mediagate::cli::mint::run(args, &cli.config_dir).await,
    }
}
