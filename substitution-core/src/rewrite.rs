//! Metadata path rewriting
//!
//! Re-homes a metadata document under a new compendium identifier. Only the
//! configured fields are touched, wherever they appear in the document:
//! string values get every occurrence of the old identifier replaced, string
//! arrays get the same treatment element-wise.
//!
//! Replacement is textual. Identifiers are fixed-length random tokens, so a
//! bare id (`xjiYy`), a leading path segment (`xjiYy/data/main.Rmd`) and an
//! embedded URL segment (`/api/v1/compendium/xjiYy/data`) are all covered.

use serde_json::Value;

/// Rewrites identifier-bearing fields of a metadata document
#[derive(Debug, Clone)]
pub struct MetadataRewriter {
    fields: Vec<String>,
}

impl MetadataRewriter {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    /// Rewrite `old_id` to `new_id` in place; returns the number of string
    /// values that changed.
    pub fn rewrite(&self, metadata: &mut Value, old_id: &str, new_id: &str) -> usize {
        if old_id.is_empty() || old_id == new_id {
            return 0;
        }
        self.walk(metadata, old_id, new_id)
    }

    fn walk(&self, value: &mut Value, old_id: &str, new_id: &str) -> usize {
        let mut changed = 0;
        match value {
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    if self.fields.iter().any(|f| f == key) {
                        changed += replace_in_field(child, old_id, new_id);
                    }
                    changed += self.walk(child, old_id, new_id);
                }
            }
            Value::Array(items) => {
                for item in items.iter_mut() {
                    changed += self.walk(item, old_id, new_id);
                }
            }
            _ => {}
        }
        changed
    }
}

fn replace_in_field(value: &mut Value, old_id: &str, new_id: &str) -> usize {
    match value {
        Value::String(s) => replace_in_string(s, old_id, new_id),
        Value::Array(items) => items
            .iter_mut()
            .map(|item| match item {
                Value::String(s) => replace_in_string(s, old_id, new_id),
                _ => 0,
            })
            .sum(),
        _ => 0,
    }
}

fn replace_in_string(s: &mut String, old_id: &str, new_id: &str) -> usize {
    if s.contains(old_id) {
        *s = s.replace(old_id, new_id);
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubstitutionConfig;
    use serde_json::json;

    fn rewriter() -> MetadataRewriter {
        MetadataRewriter::new(SubstitutionConfig::default().metadata_fields)
    }

    #[test]
    fn test_scalar_field() {
        let mut metadata = json!({ "ercIdentifier": "xjiYy" });
        assert_eq!(rewriter().rewrite(&mut metadata, "xjiYy", "ab12c"), 1);
        assert_eq!(metadata["ercIdentifier"], "ab12c");
    }

    #[test]
    fn test_sequence_field_keeps_order_and_length() {
        let mut metadata = json!({
            "inputfiles": ["xjiYy/data/BerlinMit.csv", "other/file.csv", "xjiYy/data/b.csv"]
        });
        rewriter().rewrite(&mut metadata, "xjiYy", "ab12c");
        assert_eq!(
            metadata["inputfiles"],
            json!(["ab12c/data/BerlinMit.csv", "other/file.csv", "ab12c/data/b.csv"])
        );
    }

    #[test]
    fn test_nested_fields_and_urls() {
        let mut out = json!({
            "o2r": {
                "mainfile": "xjiYy/data/main.Rmd",
                "displayfile": "/api/v1/compendium/xjiYy/data/data/erc.yml",
                "codefiles": ["xjiYy/data/main.Rmd"],
                "title": "About xjiYy"
            }
        });
        assert_eq!(rewriter().rewrite(&mut out, "xjiYy", "ab12c"), 3);
        assert_eq!(out["o2r"]["mainfile"], "ab12c/data/main.Rmd");
        assert_eq!(out["o2r"]["displayfile"], "/api/v1/compendium/ab12c/data/data/erc.yml");
        assert_eq!(out["o2r"]["codefiles"], json!(["ab12c/data/main.Rmd"]));
        // not a configured field
        assert_eq!(out["o2r"]["title"], "About xjiYy");
    }

    #[test]
    fn test_absent_fields_and_foreign_types_are_skipped() {
        let mut metadata = json!({
            "mainfile_candidates": ["xjiYy/a.Rmd", 3, null],
            "mainfile": 42,
            "unrelated": "xjiYy"
        });
        assert_eq!(rewriter().rewrite(&mut metadata, "xjiYy", "ab12c"), 1);
        assert_eq!(metadata["mainfile_candidates"], json!(["ab12c/a.Rmd", 3, null]));
        assert_eq!(metadata["mainfile"], 42);
        assert_eq!(metadata["unrelated"], "xjiYy");
    }

    #[test]
    fn test_alternate_field_list() {
        let custom = MetadataRewriter::new(vec!["identifier".to_string()]);
        let mut metadata = json!({ "identifier": "xjiYy", "ercIdentifier": "xjiYy" });
        custom.rewrite(&mut metadata, "xjiYy", "ab12c");
        assert_eq!(metadata["identifier"], "ab12c");
        assert_eq!(metadata["ercIdentifier"], "xjiYy");
    }

    #[test]
    fn test_same_id_is_noop() {
        let mut metadata = json!({ "ercIdentifier": "xjiYy" });
        assert_eq!(rewriter().rewrite(&mut metadata, "xjiYy", "xjiYy"), 0);
        assert_eq!(rewriter().rewrite(&mut metadata, "", "ab12c"), 0);
    }
}
