//! Entry-point guard.
//!
//! The gate must only be reachable through the web-server rewrite rule
//! that injects the shared marker. A direct public hit carries no marker
//! and is rejected before any configuration or filesystem work happens,
//! so probers cannot observe behavior differences between sites.

use subtle::ConstantTimeEq;

use crate::config::SiteConfig;
use crate::gate::GateError;

/// First check of the pipeline: the marker must be present and non-empty.
pub fn require_marker(marker: Option<&str>) -> Result<(), GateError> {
    match marker {
        Some(value) if !value.is_empty() => Ok(()),
        _ => Err(GateError::Guard),
    }
}

/// Second check, after config resolution: the marker must equal the
/// resolved site's gate key. An empty configured key fails closed.
pub fn require_key_match(marker: Option<&str>, site: &SiteConfig) -> Result<(), GateError> {
    let marker = marker.ok_or(GateError::Guard)?;
    if site.media_gate_key.is_empty() {
        return Err(GateError::Guard);
    }
    let equal: bool = marker
        .as_bytes()
        .ct_eq(site.media_gate_key.as_bytes())
        .into();
    if equal { Ok(()) } else { Err(GateError::Guard) }
}
