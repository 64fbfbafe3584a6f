pub mod check;
pub mod mint;
pub mod serve;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "mediagate")]
#[command(author, version, about = "Fast gate for password-protected static media")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding per-site config blobs (default.toml, site-*.toml)
    #[arg(
        short,
        long,
        global = true,
        default_value = "/etc/mediagate",
        env = "MEDIAGATE_CONFIG_DIR"
    )]
    pub config_dir: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the gate HTTP service
    Serve(serve::ServeArgs),

    /// Validate a site config and its protected-file map
    Check(check::CheckArgs),

    /// Mint a gate cookie for testing or deployment verification
    Mint(mint::MintArgs),
}
