//! Request-path normalization and containment.
//!
//! Two independent layers, both required:
//! 1. String-level: strip null bytes, percent-decode until stable (bounded),
//!    normalize separators, and drop `.`/`..`/empty segments outright.
//!    Segments are removed, not resolved, which is intentionally
//!    conservative: `a/../b` becomes `a/b`, never `b`.
//! 2. Filesystem-level: canonicalize the joined path (resolving symlinks)
//!    and accept it only if it is still beneath the canonical upload root
//!    and refers to an existing regular file.

use percent_encoding::percent_decode_str;
use std::path::{Path, PathBuf};

use crate::gate::GateError;

/// Upper bound on decode iterations; enough to neutralize double and
/// triple encoding without looping on crafted input.
const MAX_DECODE_ROUNDS: usize = 3;

/// Normalize a raw `file` parameter into a safe relative path.
pub fn normalize_relpath(raw: &str) -> Result<String, GateError> {
    let mut current = raw.replace('\0', "");

    for _ in 0..MAX_DECODE_ROUNDS {
        let decoded = percent_decode_str(&current)
            .decode_utf8_lossy()
            .into_owned();
        if decoded == current {
            break;
        }
        current = decoded;
    }

    // A decode round may have produced fresh null bytes.
    let current = current.replace('\0', "").replace('\\', "/");

    let segments: Vec<&str> = current
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != "." && *seg != "..")
        .collect();

    if segments.is_empty() {
        return Err(GateError::BadRequest);
    }

    Ok(segments.join("/"))
}

/// Resolve a normalized relative path to a real file beneath the root.
///
/// Canonicalizes both sides so symlinks cannot smuggle the result outside
/// the root. Anything that fails to resolve, escapes the root, or is not
/// a regular file is a 404.
pub fn resolve_under_root(relpath: &str, upload_base: &Path) -> Result<PathBuf, GateError> {
    if upload_base.as_os_str().is_empty() {
        return Err(GateError::NotFound);
    }

    let root = upload_base.canonicalize().map_err(|_| GateError::NotFound)?;
    let resolved = root
        .join(relpath)
        .canonicalize()
        .map_err(|_| GateError::NotFound)?;

    if !resolved.starts_with(&root) || !resolved.is_file() {
        return Err(GateError::NotFound);
    }

    Ok(resolved)
}
