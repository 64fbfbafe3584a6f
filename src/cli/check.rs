use anyhow::Result;
use clap::Args;
use std::path::Path;

use crate::config::{self, SiteConfig};
use crate::gate::protection;

#[derive(Args)]
pub struct CheckArgs {
    /// Site token to resolve (omit to use default.toml)
    #[arg(short, long)]
    pub site: Option<String>,
}

/// Validate a site config the way the gate will see it at request time.
///
/// Exits non-zero when the gate would fail closed on every request: empty
/// gate key, missing upload base, or an unreadable protected map.
pub async fn run(args: CheckArgs, config_dir: &str) -> Result<()> {
    let site = config::resolve(Path::new(config_dir), args.site.as_deref(), None);
    let mut problems = Vec::new();

    describe(&site);
    collect_problems(&site, &mut problems);

    match site.protected_map_path() {
        None => problems.push("no protected-map location (upload_base empty)".to_string()),
        Some(map_path) => match protection::load(&map_path) {
            Ok(map) => {
                println!("Protected map:   {} ({} entries)", map_path.display(), map.len());
            }
            Err(_) => {
                problems.push(format!("protected map {} unreadable", map_path.display()));
            }
        },
    }

    if problems.is_empty() {
        println!("OK");
        Ok(())
    } else {
        for problem in &problems {
            println!("PROBLEM: {}", problem);
        }
        anyhow::bail!("{} problem(s) found; the gate will deny all requests", problems.len())
    }
}

fn describe(site: &SiteConfig) {
    println!("Site:            {} ({})", site.site_slug, site.site_url);
    println!("Upload base:     {}", site.upload_base);
    println!("Delivery method: {}", site.delivery_method.as_str());
    println!(
        "Gate key:        {}",
        if site.media_gate_key.is_empty() {
            "MISSING"
        } else {
            "set"
        }
    );
}

fn collect_problems(site: &SiteConfig, problems: &mut Vec<String>) {
    if site.media_gate_key.is_empty() {
        problems.push("media_gate_key is empty".to_string());
    }
    if site.upload_base.is_empty() {
        problems.push("upload_base is empty".to_string());
    } else if !Path::new(&site.upload_base).is_absolute() {
        problems.push(format!("upload_base {} is not absolute", site.upload_base));
    } else if !Path::new(&site.upload_base).is_dir() {
        problems.push(format!("upload_base {} is not a directory", site.upload_base));
    }
}
