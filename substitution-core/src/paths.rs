//! Tree-relative path handling
//!
//! Paths inside a compendium tree are `/`-separated and relative to the
//! artifact root. A bagged compendium keeps its payload under a payload
//! directory (`data/`); everything the container sees is relative to that
//! payload root.

use crate::error::CoreError;

/// Normalize a tree-relative file path.
///
/// Empty and `.` segments are dropped. Absolute paths, `..` segments and
/// paths ending in a separator (directory markers) are rejected.
pub fn normalize(path: &str) -> Result<String, CoreError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidPath("path is empty".to_string()));
    }
    if trimmed.starts_with('/') || trimmed.starts_with('\\') {
        return Err(CoreError::InvalidPath(format!(
            "'{}' is absolute, expected a path inside the compendium",
            path
        )));
    }
    if trimmed.ends_with('/') {
        return Err(CoreError::InvalidPath(format!("'{}' does not name a file", path)));
    }

    let mut segments = Vec::new();
    for segment in trimmed.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(CoreError::InvalidPath(format!(
                    "'{}' points outside the compendium",
                    path
                )))
            }
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return Err(CoreError::InvalidPath(format!("'{}' does not name a file", path)));
    }
    Ok(segments.join("/"))
}

/// Final segment of a normalized path
pub fn basename(path: &str) -> Option<&str> {
    path.rsplit('/').next().filter(|s| !s.is_empty())
}

/// First segment of a normalized path
pub fn top_level_name(path: &str) -> &str {
    path.split('/').next().unwrap_or(path)
}

/// Re-root a tree path at the payload root.
///
/// With an empty `payload_root` the path is returned unchanged. Otherwise the
/// path must live under `payload_root/`; paths outside it yield `None`.
pub fn strip_payload_root(path: &str, payload_root: &str) -> Option<String> {
    if payload_root.is_empty() {
        return Some(path.to_string());
    }
    path.strip_prefix(payload_root)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|rest| !rest.is_empty())
        .map(str::to_string)
}

/// Tree path of a payload-relative path
pub fn join_payload_root(payload_path: &str, payload_root: &str) -> String {
    if payload_root.is_empty() {
        payload_path.to_string()
    } else {
        format!("{}/{}", payload_root, payload_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_accepts_plain_paths() {
        assert_eq!(normalize("data/BerlinMit.csv").unwrap(), "data/BerlinMit.csv");
        assert_eq!(normalize("./files//BerlinOhne.csv").unwrap(), "files/BerlinOhne.csv");
        assert_eq!(normalize("BerlinMit.csv").unwrap(), "BerlinMit.csv");
    }

    #[test]
    fn test_normalize_rejects_escapes() {
        assert!(matches!(normalize("../secret"), Err(CoreError::InvalidPath(_))));
        assert!(matches!(normalize("data/../../x"), Err(CoreError::InvalidPath(_))));
        assert!(matches!(normalize("/etc/passwd"), Err(CoreError::InvalidPath(_))));
    }

    #[test]
    fn test_normalize_rejects_directory_markers() {
        assert!(normalize("data/").is_err());
        assert!(normalize("").is_err());
        assert!(normalize("./.").is_err());
    }

    #[test]
    fn test_basename_and_top_level() {
        assert_eq!(basename("files/BerlinOhne.csv"), Some("BerlinOhne.csv"));
        assert_eq!(basename("BerlinOhne.csv"), Some("BerlinOhne.csv"));
        assert_eq!(top_level_name("files/BerlinOhne.csv"), "files");
        assert_eq!(top_level_name("erc.yml"), "erc.yml");
    }

    #[test]
    fn test_strip_payload_root() {
        assert_eq!(
            strip_payload_root("data/BerlinMit.csv", "data").as_deref(),
            Some("BerlinMit.csv")
        );
        assert_eq!(strip_payload_root("bagit.txt", "data"), None);
        assert_eq!(strip_payload_root("database/x.csv", "data"), None);
        assert_eq!(
            strip_payload_root("files/BerlinMit.csv", "").as_deref(),
            Some("files/BerlinMit.csv")
        );
        assert_eq!(join_payload_root("erc.yml", "data"), "data/erc.yml");
        assert_eq!(join_payload_root("erc.yml", ""), "erc.yml");
    }
}
