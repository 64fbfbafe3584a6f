//! Alternate-representation substitution.
//!
//! A site may keep pre-generated variants of its media (converted or
//! compressed formats) under a separate root. When one exists for the
//! requested file it is delivered instead, but every authorization
//! decision stays keyed to the original file identity: the lookup and the
//! cookie check have already happened by the time this runs.

use std::path::Path;
use tracing::debug;

use crate::config::SiteConfig;
use crate::gate::DeliveryContext;

/// Substitute a variant into the context if one applies.
pub fn apply(site: &SiteConfig, ctx: &mut DeliveryContext) {
    let Some(ref base) = site.variant_base else {
        return;
    };
    if base.is_empty() {
        return;
    }

    let Ok(root) = Path::new(base).canonicalize() else {
        return;
    };

    let candidate_rel = rewrite_extension(&ctx.relpath, site);
    let Ok(resolved) = root.join(&candidate_rel).canonicalize() else {
        return;
    };
    // Same containment rule as the upload root; a variant tree with a
    // stray symlink must not widen what the gate will serve.
    if !resolved.starts_with(&root) || !resolved.is_file() {
        return;
    }

    debug!(original = %ctx.relpath, variant = %candidate_rel, "serving variant");
    ctx.content_type = Some(
        mime_guess::from_path(&resolved)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    );
    ctx.path = resolved;
}

/// Apply the configured extension rewrite, if any.
fn rewrite_extension(relpath: &str, site: &SiteConfig) -> String {
    let Some((stem, ext)) = relpath.rsplit_once('.') else {
        return relpath.to_string();
    };
    match site.variant_ext_map.get(&ext.to_ascii_lowercase()) {
        Some(new_ext) => format!("{stem}.{new_ext}"),
        None => relpath.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn ctx(path: PathBuf, relpath: &str) -> DeliveryContext {
        DeliveryContext {
            path,
            relpath: relpath.to_string(),
            protection_id: None,
            content_type: None,
        }
    }

    #[test]
    fn no_variant_base_is_a_no_op() {
        let site = SiteConfig::default();
        let mut context = ctx(PathBuf::from("/srv/uploads/a.jpg"), "a.jpg");
        apply(&site, &mut context);
        assert_eq!(context.path, PathBuf::from("/srv/uploads/a.jpg"));
        assert!(context.content_type.is_none());
    }

    #[test]
    fn existing_variant_is_substituted() {
        let tmp = tempfile::tempdir().unwrap();
        let variants = tmp.path().join("variants");
        fs::create_dir_all(variants.join("2024")).unwrap();
        fs::write(variants.join("2024/pic.webp"), b"webp").unwrap();

        let site = SiteConfig {
            variant_base: Some(variants.to_string_lossy().into_owned()),
            variant_ext_map: [("jpg".to_string(), "webp".to_string())].into(),
            ..SiteConfig::default()
        };

        let mut context = ctx(tmp.path().join("uploads/2024/pic.jpg"), "2024/pic.jpg");
        apply(&site, &mut context);

        assert!(context.path.ends_with("variants/2024/pic.webp"));
        assert_eq!(context.content_type.as_deref(), Some("image/webp"));
        // Authorization identity unchanged
        assert_eq!(context.relpath, "2024/pic.jpg");
    }

    #[test]
    fn missing_variant_passes_original_through() {
        let tmp = tempfile::tempdir().unwrap();
        let variants = tmp.path().join("variants");
        fs::create_dir_all(&variants).unwrap();

        let site = SiteConfig {
            variant_base: Some(variants.to_string_lossy().into_owned()),
            ..SiteConfig::default()
        };

        let original = tmp.path().join("uploads/doc.pdf");
        let mut context = ctx(original.clone(), "doc.pdf");
        apply(&site, &mut context);
        assert_eq!(context.path, original);
        assert!(context.content_type.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn variant_symlink_escape_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let variants = tmp.path().join("variants");
        fs::create_dir_all(&variants).unwrap();
        let outside = tmp.path().join("outside.bin");
        fs::write(&outside, b"x").unwrap();
        std::os::unix::fs::symlink(&outside, variants.join("a.jpg")).unwrap();

        let site = SiteConfig {
            variant_base: Some(variants.to_string_lossy().into_owned()),
            ..SiteConfig::default()
        };

        let original = tmp.path().join("uploads/a.jpg");
        let mut context = ctx(original.clone(), "a.jpg");
        apply(&site, &mut context);
        assert_eq!(context.path, original);
    }
}
