//! Destination filename resolution for overlay files
//!
//! An overlay file lands at the payload top level under its own basename.
//! When that name is taken the prefix is prepended again and again until the
//! candidate is free, so `a.csv` escalates to `overlay_a.csv`, then
//! `overlay_overlay_a.csv`.

use std::collections::HashSet;

use crate::error::CoreError;
use crate::paths;

/// Resolve a non-colliding top-level name for `overlay_path`.
///
/// Terminates because every iteration lengthens the candidate while
/// `existing` is finite.
pub fn resolve_filename(
    overlay_path: &str,
    existing: &HashSet<String>,
    prefix: &str,
) -> Result<String, CoreError> {
    let mut candidate = paths::basename(overlay_path)
        .ok_or_else(|| CoreError::InvalidPath(format!("'{}' has no file name", overlay_path)))?
        .to_string();

    if prefix.is_empty() && existing.contains(&candidate) {
        return Err(CoreError::InvalidPath(format!(
            "'{}' collides and no filename prefix is configured",
            candidate
        )));
    }

    while existing.contains(&candidate) {
        candidate = format!("{}{}", prefix, candidate);
    }
    Ok(candidate)
}
