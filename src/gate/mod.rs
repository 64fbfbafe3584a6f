//! The gate pipeline.
//!
//! One request = one pass through
//! guard -> config -> normalize -> lookup -> authorize -> variant -> deliver.
//! Every stage either advances the [`DeliveryContext`] or short-circuits
//! with a [`GateError`] that maps onto a single opaque HTTP status. No
//! state is shared across requests; configuration and the protected map
//! are re-read per invocation so an externally published update takes
//! effect on the next request.

pub mod authorize;
pub mod cookies;
pub mod deliver;
pub mod detect;
pub mod guard;
pub mod normalize;
pub mod protection;
pub mod variant;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::config;
pub use deliver::{Delivery, HandoffHeader};
pub use detect::DeliveryMethod;

/// Everything the gate needs from one incoming request.
///
/// `marker` and `site_token` arrive through the trusted side-channel the
/// rewrite rule injects; the rest is client-controlled and treated as
/// hostile.
#[derive(Debug, Clone, Default)]
pub struct GateRequest {
    /// Raw `file` parameter (URL-encoded relative path).
    pub file: Option<String>,

    /// Shared gate-secret marker from the invoking server rule.
    pub marker: Option<String>,

    /// Optional site-identifier token from the invoking server rule.
    pub site_token: Option<String>,

    /// Request `Host` header, for config fallback matching.
    pub host: Option<String>,

    /// Server-software string, input to delivery-method detection.
    pub server_software: Option<String>,

    /// Cookies, parsed as opaque name/value pairs.
    pub cookies: HashMap<String, String>,

    /// Current unix time in seconds.
    pub now: u64,
}

/// Pipeline failure, carrying exactly the HTTP status it maps to.
///
/// Authorization failures are deliberately indistinguishable from each
/// other: a missing cookie, a malformed cookie, an expired cookie, and a
/// bad MAC all surface as the same `Unauthorized`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    /// Invoked without the expected entry marker, or marker/key mismatch.
    #[error("forbidden")]
    Guard,

    /// Missing or empty file parameter after decoding.
    #[error("bad request")]
    BadRequest,

    /// File does not resolve to a regular file beneath the upload root.
    #[error("not found")]
    NotFound,

    /// Protected file without acceptable proof of login.
    #[error("forbidden")]
    Unauthorized,

    /// The protected-file map could not be read or parsed. Fails closed.
    #[error("forbidden")]
    MapUnreadable,

    /// A forced delivery method cannot compute its internal path.
    #[error("misconfigured delivery: {0}")]
    Misconfigured(String),
}

impl GateError {
    /// HTTP status code this failure is reported as.
    pub fn status(&self) -> u16 {
        match self {
            GateError::Guard | GateError::Unauthorized | GateError::MapUnreadable => 403,
            GateError::BadRequest => 400,
            GateError::NotFound => 404,
            GateError::Misconfigured(_) => 500,
        }
    }
}

/// Per-request record threaded through the pipeline stages.
///
/// Authorization is keyed to the original file identity; the variant
/// resolver may rewrite only the delivery path/content-type afterwards.
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    /// Canonical absolute path of the file to deliver.
    pub path: PathBuf,

    /// Normalized relative path beneath the upload root (original file).
    pub relpath: String,

    /// Protection-path id the file belongs to, if any.
    pub protection_id: Option<String>,

    /// Content type of the file to deliver, when known.
    pub content_type: Option<String>,
}

/// Run the full pipeline for one request.
///
/// Blocking (filesystem) work only; the server invokes this via
/// `spawn_blocking` and performs the actual response I/O itself.
pub fn evaluate(config_dir: &Path, req: &GateRequest) -> Result<Delivery, GateError> {
    // Before any configuration or filesystem work, so direct probers see
    // nothing but an immediate 403.
    guard::require_marker(req.marker.as_deref())?;

    let site = config::resolve(
        config_dir,
        req.site_token.as_deref(),
        req.host.as_deref(),
    );
    guard::require_key_match(req.marker.as_deref(), &site)?;

    let raw = req.file.as_deref().ok_or(GateError::BadRequest)?;
    let relpath = normalize::normalize_relpath(raw)?;
    let path = normalize::resolve_under_root(&relpath, Path::new(&site.upload_base))?;

    let map_path = site.protected_map_path().ok_or(GateError::MapUnreadable)?;
    let map = protection::load(&map_path)?;

    let protection_id = map.lookup(&relpath).map(str::to_string);
    let mut ctx = DeliveryContext {
        path,
        relpath,
        protection_id,
        content_type: None,
    };

    if let Some(ref id) = ctx.protection_id {
        debug!(relpath = %ctx.relpath, protection_id = %id, "protected file");
        if !authorize::authorize(&site, &req.cookies, id, req.now) {
            return Err(GateError::Unauthorized);
        }
    }

    variant::apply(&site, &mut ctx);

    let method = match site.delivery_method {
        DeliveryMethod::Auto => detect::detect(req.server_software.as_deref().unwrap_or("")),
        configured => configured,
    };
    deliver::dispatch(&site, site.delivery_method, method, &ctx)
}
