use anyhow::Result;
use clap::Args;
use std::path::Path;

use crate::server::Server;

#[derive(Args)]
pub struct ServeArgs {
    /// Address to bind
    #[arg(short, long, default_value = "127.0.0.1", env = "MEDIAGATE_BIND")]
    pub bind: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8749", env = "MEDIAGATE_PORT")]
    pub port: u16,
}

pub async fn run(args: ServeArgs, config_dir: &str) -> Result<()> {
    let server = Server::new(Path::new(config_dir), &args.bind, args.port);
    server.run().await
}
