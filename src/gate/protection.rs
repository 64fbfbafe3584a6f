//! Protected-file map: load and exact-match lookup.
//!
//! The map is produced by the external configuration writer and published
//! atomically (write-then-rename), so a reader never sees a half-written
//! document. Two shapes are accepted: a flat `{relpath: protection_id}`
//! object, or an object with an `items` field holding that mapping plus
//! optional tenant metadata.
//!
//! Absence of an entry means "not protected". An unreadable or corrupt map
//! is a hard failure: lookup cannot distinguish protected from unprotected
//! without it, so the request fails closed instead of fail-open.

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::warn;

use crate::gate::GateError;

/// Parsed protected-file map for one site.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtectedMap {
    items: HashMap<String, String>,
    pub site_id: Option<u64>,
    pub site_url: Option<String>,
    pub site_slug: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MapDocument {
    Wrapped {
        items: HashMap<String, String>,
        #[serde(default)]
        site_id: Option<u64>,
        #[serde(default)]
        site_url: Option<String>,
        #[serde(default)]
        site_slug: Option<String>,
    },
    Flat(HashMap<String, String>),
}

/// Load the map, failing closed on any read or parse error.
pub fn load(path: &Path) -> Result<ProtectedMap, GateError> {
    let content = fs::read_to_string(path).map_err(|e| {
        warn!("Protected map {} unreadable: {}", path.display(), e);
        GateError::MapUnreadable
    })?;

    let document: MapDocument = serde_json::from_str(&content).map_err(|e| {
        warn!("Protected map {} corrupt: {}", path.display(), e);
        GateError::MapUnreadable
    })?;

    Ok(match document {
        MapDocument::Wrapped {
            items,
            site_id,
            site_url,
            site_slug,
        } => ProtectedMap {
            items,
            site_id,
            site_url,
            site_slug,
        },
        MapDocument::Flat(items) => ProtectedMap {
            items,
            ..ProtectedMap::default()
        },
    })
}

impl ProtectedMap {
    /// Exact-match lookup on the full normalized relative path.
    ///
    /// No prefix or glob matching here: directory-level protection is
    /// expanded into individual file entries when the map is built.
    pub fn lookup(&self, relpath: &str) -> Option<&str> {
        self.items.get(relpath).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
