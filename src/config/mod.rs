//! Per-site gate configuration: schema and resolver.
//!
//! One TOML blob per logical site, written by the external configuration
//! writer whenever protection settings change. The gate re-resolves the
//! blob on every request; nothing is cached across requests, so a settings
//! change published between two requests is picked up by the second one.
//!
//! Resolution order (fixed by the deployment contract):
//! 1. `site-<token>.toml` when the rewrite rule supplied a site token
//! 2. `default.toml`
//! 3. every `site-*.toml` in lexicographic order (only when no token)
//!
//! The first candidate that explicitly matches (token == `site_slug`, or
//! the request host matches `site_url`) wins. Otherwise the first candidate
//! that loaded at all is used as a fallback. If nothing loads, an empty
//! config is returned and every downstream stage fails closed on it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::gate::detect::DeliveryMethod;

/// Configuration for one logical site/tenant.
///
/// All fields have serde defaults so a partially written blob still
/// deserializes; the defaults are chosen so that a missing field denies
/// rather than grants (most importantly `media_gate_key`, which is empty
/// by default and makes both the guard and the authorizer fail closed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Shared gate secret: the rewrite-rule marker must equal it, and it
    /// keys the gate-cookie HMAC. Empty means the gate is unconfigured.
    #[serde(default)]
    pub media_gate_key: String,

    /// Tenant identity, used for explicit-match resolution.
    #[serde(default)]
    pub site_id: u64,

    #[serde(default)]
    pub site_slug: String,

    /// Canonical URL of the site, e.g. `https://example.com`.
    #[serde(default)]
    pub site_url: String,

    /// Absolute directory all served files must resolve beneath.
    #[serde(default)]
    pub upload_base: String,

    /// Override for the protected-file map location.
    /// Default: `<upload_base>/.protected-files.json`.
    #[serde(default)]
    pub protected_list_file: Option<String>,

    // Cookie-name prefixes; the protection-path id is appended to each.
    #[serde(default = "default_session_prefix")]
    pub session_cookie_prefix: String,

    #[serde(default = "default_remember_id_prefix")]
    pub remember_id_cookie_prefix: String,

    #[serde(default = "default_remember_token_prefix")]
    pub remember_token_cookie_prefix: String,

    #[serde(default = "default_gate_prefix")]
    pub gate_cookie_prefix: String,

    /// Web server document root, stripped from absolute paths when
    /// computing internal redirect targets.
    #[serde(default)]
    pub document_root: Option<String>,

    /// Application install root, fallback prefix for internal-path math.
    #[serde(default)]
    pub abs_path: Option<String>,

    /// URL path the site is served under, e.g. `/` or `/blog`.
    #[serde(default = "default_home_path")]
    pub home_path: String,

    /// Forced delivery method. `auto` detects from the server software
    /// string and falls back to direct streaming.
    #[serde(default)]
    pub delivery_method: DeliveryMethod,

    /// Query parameter name LiteSpeed is configured to require on
    /// internal re-entry.
    #[serde(default = "default_litespeed_query_key")]
    pub litespeed_query_key: String,

    /// Access-key value matching the LiteSpeed server configuration.
    #[serde(default)]
    pub litespeed_access_key: String,

    /// Nginx `internal` location prefix for X-Accel-Redirect targets.
    #[serde(default = "default_nginx_internal_prefix")]
    pub nginx_internal_prefix: String,

    /// Root holding pre-generated alternate representations. When a file
    /// exists at the same relative path under this root (after optional
    /// extension rewriting), it is delivered in place of the original.
    #[serde(default)]
    pub variant_base: Option<String>,

    /// Extension rewrites applied when probing the variant root,
    /// e.g. `jpg = "webp"`.
    #[serde(default)]
    pub variant_ext_map: HashMap<String, String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            media_gate_key: String::new(),
            site_id: 0,
            site_slug: String::new(),
            site_url: String::new(),
            upload_base: String::new(),
            protected_list_file: None,
            session_cookie_prefix: default_session_prefix(),
            remember_id_cookie_prefix: default_remember_id_prefix(),
            remember_token_cookie_prefix: default_remember_token_prefix(),
            gate_cookie_prefix: default_gate_prefix(),
            document_root: None,
            abs_path: None,
            home_path: default_home_path(),
            delivery_method: DeliveryMethod::default(),
            litespeed_query_key: default_litespeed_query_key(),
            litespeed_access_key: String::new(),
            nginx_internal_prefix: default_nginx_internal_prefix(),
            variant_base: None,
            variant_ext_map: HashMap::new(),
        }
    }
}

// Default value functions
fn default_session_prefix() -> String {
    "mg_sess_".to_string()
}
fn default_remember_id_prefix() -> String {
    "mg_rid_".to_string()
}
fn default_remember_token_prefix() -> String {
    "mg_rtok_".to_string()
}
fn default_gate_prefix() -> String {
    "mg_gate_".to_string()
}
fn default_home_path() -> String {
    "/".to_string()
}
fn default_litespeed_query_key() -> String {
    "mg_access".to_string()
}
fn default_nginx_internal_prefix() -> String {
    "/mediagate-internal".to_string()
}

impl SiteConfig {
    /// Load a single site config blob.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: SiteConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Resolved location of the protected-file map.
    ///
    /// Returns `None` when neither an override nor an upload base is
    /// configured, which downstream treats as an unreadable map (403).
    pub fn protected_map_path(&self) -> Option<PathBuf> {
        if let Some(ref override_path) = self.protected_list_file {
            if !override_path.is_empty() {
                return Some(PathBuf::from(override_path));
            }
        }
        if self.upload_base.is_empty() {
            return None;
        }
        Some(Path::new(&self.upload_base).join(".protected-files.json"))
    }

    /// Whether this config explicitly matches the request.
    fn matches(&self, token: Option<&str>, host: Option<&str>) -> bool {
        if let Some(token) = token {
            return !self.site_slug.is_empty() && self.site_slug == token;
        }
        if let Some(host) = host {
            return host_matches(&self.site_url, host);
        }
        false
    }
}

/// Compare the authority of `site_url` against a request `Host` header.
///
/// Case-insensitive; a port on either side only has to match when both
/// sides carry one.
fn host_matches(site_url: &str, request_host: &str) -> bool {
    let site_authority = site_url
        .strip_prefix("https://")
        .or_else(|| site_url.strip_prefix("http://"))
        .unwrap_or(site_url);
    let site_authority = site_authority.split('/').next().unwrap_or("");
    if site_authority.is_empty() || request_host.is_empty() {
        return false;
    }

    if site_authority.eq_ignore_ascii_case(request_host) {
        return true;
    }

    let site_host = site_authority.split(':').next().unwrap_or("");
    let request_bare = request_host.split(':').next().unwrap_or("");
    let either_has_port = site_authority.contains(':') != request_host.contains(':');
    either_has_port && site_host.eq_ignore_ascii_case(request_bare)
}

/// Resolve the site config for one request.
///
/// `token` comes from the rewrite rule (trusted side-channel), `host` from
/// the request `Host` header. Never fails: an unresolvable configuration
/// yields `SiteConfig::default()`, whose empty gate key makes every
/// downstream stage deny.
pub fn resolve(config_dir: &Path, token: Option<&str>, host: Option<&str>) -> SiteConfig {
    let mut fallback: Option<SiteConfig> = None;

    for candidate in candidate_files(config_dir, token) {
        let config = match SiteConfig::from_file(&candidate) {
            Ok(config) => config,
            Err(e) => {
                debug!("Skipping config {}: {}", candidate.display(), e);
                continue;
            }
        };

        if config.matches(token, host) {
            debug!("Resolved site config {}", candidate.display());
            return config;
        }

        if fallback.is_none() {
            fallback = Some(config);
        }
    }

    match fallback {
        Some(config) => config,
        None => {
            warn!(
                "No site config loaded from {}; gate will deny",
                config_dir.display()
            );
            SiteConfig::default()
        }
    }
}

/// Ordered candidate config files for a request.
fn candidate_files(config_dir: &Path, token: Option<&str>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(token) = token {
        // Tokens come from the server rule, but keep them from escaping
        // the config directory anyway.
        if !token.is_empty() && !token.contains(['/', '\\', '.']) {
            candidates.push(config_dir.join(format!("site-{token}.toml")));
        }
    }

    candidates.push(config_dir.join("default.toml"));

    if token.is_none() {
        let mut site_files: Vec<PathBuf> = fs::read_dir(config_dir)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.path())
                    .filter(|path| {
                        path.file_name()
                            .and_then(|name| name.to_str())
                            .is_some_and(|name| {
                                name.starts_with("site-") && name.ends_with(".toml")
                            })
                    })
                    .collect()
            })
            .unwrap_or_default();
        site_files.sort();
        candidates.extend(site_files);
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_site(dir: &Path, name: &str, slug: &str, url: &str, key: &str) {
        fs::write(
            dir.join(name),
            format!(
                "media_gate_key = \"{key}\"\nsite_slug = \"{slug}\"\nsite_url = \"{url}\"\nupload_base = \"/srv/uploads\"\n"
            ),
        )
        .unwrap();
    }

    #[test]
    fn token_match_wins() {
        let tmp = tempfile::tempdir().unwrap();
        write_site(tmp.path(), "default.toml", "main", "https://main.test", "k1");
        write_site(tmp.path(), "site-shop.toml", "shop", "https://shop.test", "k2");

        let config = resolve(tmp.path(), Some("shop"), None);
        assert_eq!(config.site_slug, "shop");
        assert_eq!(config.media_gate_key, "k2");
    }

    #[test]
    fn token_mismatch_falls_back_to_first_loaded() {
        let tmp = tempfile::tempdir().unwrap();
        write_site(tmp.path(), "default.toml", "main", "https://main.test", "k1");

        // site-ghost.toml does not exist; default.toml loads but its slug
        // does not match, so it is the fallback.
        let config = resolve(tmp.path(), Some("ghost"), None);
        assert_eq!(config.site_slug, "main");
    }

    #[test]
    fn host_match_without_token() {
        let tmp = tempfile::tempdir().unwrap();
        write_site(tmp.path(), "default.toml", "main", "https://main.test", "k1");
        write_site(tmp.path(), "site-a.toml", "a", "https://a.test", "ka");
        write_site(tmp.path(), "site-b.toml", "b", "https://b.test", "kb");

        let config = resolve(tmp.path(), None, Some("b.test"));
        assert_eq!(config.site_slug, "b");
    }

    #[test]
    fn empty_dir_yields_empty_config() {
        let tmp = tempfile::tempdir().unwrap();
        let config = resolve(tmp.path(), None, Some("anything.test"));
        assert!(config.media_gate_key.is_empty());
        assert!(config.upload_base.is_empty());
    }

    #[test]
    fn traversal_token_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        write_site(tmp.path(), "default.toml", "main", "https://main.test", "k1");

        let config = resolve(tmp.path(), Some("../../etc/passwd"), None);
        assert_eq!(config.site_slug, "main");
    }

    #[test]
    fn host_matching_rules() {
        assert!(host_matches("https://example.com", "example.com"));
        assert!(host_matches("https://example.com", "EXAMPLE.COM"));
        assert!(host_matches("https://example.com/blog", "example.com"));
        assert!(host_matches("http://example.com:8080", "example.com:8080"));
        assert!(host_matches("https://example.com", "example.com:443"));
        assert!(!host_matches("https://example.com", "other.com"));
        assert!(!host_matches("https://example.com:8080", "example.com:9090"));
        assert!(!host_matches("", "example.com"));
    }

    #[test]
    fn protected_map_path_resolution() {
        let mut config = SiteConfig {
            upload_base: "/srv/uploads".to_string(),
            ..SiteConfig::default()
        };
        assert_eq!(
            config.protected_map_path().unwrap(),
            PathBuf::from("/srv/uploads/.protected-files.json")
        );

        config.protected_list_file = Some("/var/lib/gate/map.json".to_string());
        assert_eq!(
            config.protected_map_path().unwrap(),
            PathBuf::from("/var/lib/gate/map.json")
        );

        let empty = SiteConfig::default();
        assert!(empty.protected_map_path().is_none());
    }
}
