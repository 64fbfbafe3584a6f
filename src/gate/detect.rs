//! Delivery-method selection.
//!
//! A closed enum rather than ad-hoc string sniffing scattered around the
//! dispatcher: configuration always takes precedence, and `Auto` resolves
//! through [`detect`] on the server-software string so tests can inject
//! the enum directly.

use serde::{Deserialize, Serialize};

/// How the file leaves the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod {
    /// Detect from the server software, fall back to direct streaming.
    #[default]
    Auto,
    /// `X-Sendfile` header handoff.
    Apache,
    /// `X-LiteSpeed-Location` header handoff.
    LiteSpeed,
    /// `X-Accel-Redirect` header handoff.
    Nginx,
    /// Stream the body from the gate process.
    Direct,
}

impl DeliveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMethod::Auto => "auto",
            DeliveryMethod::Apache => "apache",
            DeliveryMethod::LiteSpeed => "litespeed",
            DeliveryMethod::Nginx => "nginx",
            DeliveryMethod::Direct => "direct",
        }
    }
}

/// Map a server-software string (e.g. `nginx/1.25.3`) to a method.
///
/// Unknown software streams directly; that is always correct, just slower.
pub fn detect(server_software: &str) -> DeliveryMethod {
    let software = server_software.to_ascii_lowercase();
    if software.contains("litespeed") {
        DeliveryMethod::LiteSpeed
    } else if software.contains("nginx") {
        DeliveryMethod::Nginx
    } else if software.contains("apache") {
        DeliveryMethod::Apache
    } else {
        DeliveryMethod::Direct
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_servers() {
        assert_eq!(detect("nginx/1.25.3"), DeliveryMethod::Nginx);
        assert_eq!(detect("Apache/2.4.58 (Ubuntu)"), DeliveryMethod::Apache);
        assert_eq!(detect("LiteSpeed"), DeliveryMethod::LiteSpeed);
        assert_eq!(detect("OpenLiteSpeed/1.7.19"), DeliveryMethod::LiteSpeed);
    }

    #[test]
    fn unknown_falls_back_to_direct() {
        assert_eq!(detect(""), DeliveryMethod::Direct);
        assert_eq!(detect("Caddy"), DeliveryMethod::Direct);
    }

    #[test]
    fn config_spelling_round_trips() {
        #[derive(serde::Deserialize)]
        struct Wrap {
            v: DeliveryMethod,
        }
        let wrap: Wrap = toml::from_str("v = \"litespeed\"").unwrap();
        assert_eq!(wrap.v, DeliveryMethod::LiteSpeed);
        let wrap: Wrap = toml::from_str("v = \"auto\"").unwrap();
        assert_eq!(wrap.v, DeliveryMethod::Auto);
    }
}
