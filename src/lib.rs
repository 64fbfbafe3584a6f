//! mediagate - a fast gate for password-protected static media
//!
//! This crate provides the authorization and delivery-handoff path that a
//! web server invokes directly for protected files, bypassing the full
//! application stack:
//! - Per-site configuration resolution (multi-tenant, host fallback)
//! - Path normalization hardened against traversal and double-encoding
//! - Protected-file map lookup (exact match, fail closed)
//! - Gate-cookie verification (HMAC-SHA256 over id|token|expiry)
//! - Delivery via X-Sendfile / X-Accel-Redirect / X-LiteSpeed-Location,
//!   or direct streaming with single-range support

pub mod cli;
pub mod config;
pub mod gate;
pub mod server;

pub use config::SiteConfig;
