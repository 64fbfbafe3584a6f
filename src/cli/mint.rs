use anyhow::Result;
use clap::Args;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config;
use crate::gate::authorize;

#[derive(Args)]
pub struct MintArgs {
    /// Protection-path identifier
    pub protection_id: String,

    /// Login proof token (the session or remember-me secret)
    pub token: String,

    /// Lifetime in seconds from now
    #[arg(short, long, default_value = "3600")]
    pub ttl: u64,

    /// Site token to resolve (omit to use default.toml)
    #[arg(short, long)]
    pub site: Option<String>,
}

/// Mint the gate cookie the login flow would set, for deployment
/// verification. Requires the site's gate key, so it only works where the
/// config blobs are readable.
pub async fn run(args: MintArgs, config_dir: &str) -> Result<()> {
    let site = config::resolve(Path::new(config_dir), args.site.as_deref(), None);
    if site.media_gate_key.is_empty() {
        anyhow::bail!("resolved site has an empty media_gate_key; nothing to mint with");
    }

    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    let expiry = now + args.ttl;
    let value = authorize::mint_cookie_value(
        site.media_gate_key.as_bytes(),
        &args.protection_id,
        &args.token,
        expiry,
    )?;

    println!(
        "{}{}={}",
        site.gate_cookie_prefix, args.protection_id, value
    );
    Ok(())
}
