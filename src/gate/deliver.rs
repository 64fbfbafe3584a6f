//! Delivery dispatch.
//!
//! A closed set of strategies instead of one driver script per web server:
//! header handoff (Apache X-Sendfile, Nginx X-Accel-Redirect, LiteSpeed
//! X-LiteSpeed-Location) or direct streaming. Handoff emits exactly one
//! delivery header and no body; the web server transfers the file.
//!
//! Failure semantics: a *forced* method that cannot compute its internal
//! path is a 500 (explicit misconfiguration). During auto-detection the
//! same condition falls through to direct streaming, which always works.

use std::path::Path;
use tracing::debug;

use crate::config::SiteConfig;
use crate::gate::detect::DeliveryMethod;
use crate::gate::{DeliveryContext, GateError};

/// Streaming chunk size for direct delivery.
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// The one response header a handoff sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffHeader {
    XSendfile,
    XAccelRedirect,
    XLiteSpeedLocation,
}

impl HandoffHeader {
    pub fn name(&self) -> &'static str {
        match self {
            HandoffHeader::XSendfile => "X-Sendfile",
            HandoffHeader::XAccelRedirect => "X-Accel-Redirect",
            HandoffHeader::XLiteSpeedLocation => "X-LiteSpeed-Location",
        }
    }
}

/// Outcome of a successful pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Set one delivery header and terminate without a body.
    Handoff {
        header: HandoffHeader,
        location: String,
        content_type: Option<String>,
    },
    /// Stream the file from the gate process.
    Direct {
        path: std::path::PathBuf,
        content_type: String,
    },
}

/// Choose the delivery mechanism for an authorized (or unprotected) file.
///
/// `configured` is the site's setting (decides forced-vs-auto semantics);
/// `resolved` is the method to actually attempt, with `Auto` already
/// replaced by the detection result.
pub fn dispatch(
    site: &SiteConfig,
    configured: DeliveryMethod,
    resolved: DeliveryMethod,
    ctx: &DeliveryContext,
) -> Result<Delivery, GateError> {
    let forced = configured != DeliveryMethod::Auto;

    let delivery = match resolved {
        DeliveryMethod::Apache => Some(Delivery::Handoff {
            header: HandoffHeader::XSendfile,
            location: ctx.path.to_string_lossy().into_owned(),
            content_type: ctx.content_type.clone(),
        }),
        DeliveryMethod::Nginx => {
            internal_location(site, &ctx.path, &site.nginx_internal_prefix).map(|location| {
                Delivery::Handoff {
                    header: HandoffHeader::XAccelRedirect,
                    location,
                    content_type: ctx.content_type.clone(),
                }
            })
        }
        DeliveryMethod::LiteSpeed => internal_location(site, &ctx.path, &site.home_path)
            .map(|location| Delivery::Handoff {
                header: HandoffHeader::XLiteSpeedLocation,
                location: format!(
                    "{}?{}={}",
                    location, site.litespeed_query_key, site.litespeed_access_key
                ),
                content_type: ctx.content_type.clone(),
            }),
        DeliveryMethod::Direct | DeliveryMethod::Auto => Some(direct(ctx)),
    };

    match delivery {
        Some(delivery) => Ok(delivery),
        None if forced => Err(GateError::Misconfigured(format!(
            "no internal path for {} delivery of {}",
            resolved.as_str(),
            ctx.path.display()
        ))),
        None => {
            debug!(method = resolved.as_str(), "no internal path, streaming directly");
            Ok(direct(ctx))
        }
    }
}

fn direct(ctx: &DeliveryContext) -> Delivery {
    let content_type = ctx.content_type.clone().unwrap_or_else(|| {
        mime_guess::from_path(&ctx.path)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    });
    Delivery::Direct {
        path: ctx.path.clone(),
        content_type,
    }
}

/// Re-ground an absolute file path under a URL prefix by stripping the
/// document root (or the install root as fallback).
fn internal_location(site: &SiteConfig, path: &Path, url_prefix: &str) -> Option<String> {
    for root in [site.document_root.as_deref(), site.abs_path.as_deref()]
        .into_iter()
        .flatten()
    {
        if root.is_empty() {
            continue;
        }
        if let Ok(rel) = path.strip_prefix(root) {
            let rel = rel.to_string_lossy().replace('\\', "/");
            let prefix = url_prefix.trim_end_matches('/');
            return Some(format!("{}/{}", prefix, rel));
        }
    }
    None
}

/// Result of evaluating a `Range` header against a file size.
///
/// A present `Range` header never downgrades to a plain 200: it is either
/// honored with 206 (a whole-file range included) or rejected with 416.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// Serve `start..=end` with 206.
    Partial { start: u64, end: u64 },
    /// Respond 416 with `Content-Range: bytes */<size>`.
    Unsatisfiable,
}

/// Evaluate a single-range `Range` header.
///
/// One deterministic rule set: malformed headers, multiple ranges, and any
/// effective start offset at or past the file size are rejected as
/// unsatisfiable. A suffix range larger than the file clamps to the whole
/// file; an explicit end past the last byte clamps to it.
pub fn parse_range(header: &str, size: u64) -> RangeOutcome {
    let Some(spec) = header.strip_prefix("bytes=") else {
        return RangeOutcome::Unsatisfiable;
    };
    if spec.contains(',') {
        return RangeOutcome::Unsatisfiable;
    }

    let Some((start_part, end_part)) = spec.split_once('-') else {
        return RangeOutcome::Unsatisfiable;
    };

    if start_part.is_empty() {
        // Suffix range: last N bytes.
        let Ok(suffix) = end_part.parse::<u64>() else {
            return RangeOutcome::Unsatisfiable;
        };
        if suffix == 0 || size == 0 {
            return RangeOutcome::Unsatisfiable;
        }
        return RangeOutcome::Partial {
            start: size.saturating_sub(suffix),
            end: size - 1,
        };
    }

    let Ok(start) = start_part.parse::<u64>() else {
        return RangeOutcome::Unsatisfiable;
    };
    if start >= size {
        return RangeOutcome::Unsatisfiable;
    }

    let end = if end_part.is_empty() {
        size - 1
    } else {
        match end_part.parse::<u64>() {
            Ok(end) if end >= start => end.min(size - 1),
            _ => return RangeOutcome::Unsatisfiable,
        }
    };

    RangeOutcome::Partial { start, end }
}

/// `inline` for representations a browser can safely render in place,
/// `attachment` for everything else.
pub fn disposition(content_type: &str, filename: &str) -> String {
    let inline = content_type.starts_with("image/")
        || content_type.starts_with("audio/")
        || content_type.starts_with("video/")
        || matches!(
            content_type,
            "text/plain"
                | "text/css"
                | "application/pdf"
                | "application/javascript"
                | "text/javascript"
        );
    let kind = if inline { "inline" } else { "attachment" };
    let safe_name: String = filename
        .chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect();
    format!("{}; filename=\"{}\"", kind, safe_name)
}

/// Long-lived public caching for static presentation assets, short-lived
/// private caching for everything else.
pub fn cache_control(content_type: &str) -> &'static str {
    if content_type.starts_with("image/")
        || content_type == "text/css"
        || content_type == "application/javascript"
        || content_type == "text/javascript"
    {
        "public, max-age=31536000"
    } else {
        "private, max-age=60"
    }
}
