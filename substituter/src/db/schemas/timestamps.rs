//! Bookkeeping timestamps for documents
//!
//! Kept under `timestamps` because `metadata` already holds the research
//! metadata of a compendium.

use bson::DateTime;
use serde::{Deserialize, Serialize};

/// Creation, update and soft deletion bookkeeping
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Timestamps {
    /// Whether this document has been soft-deleted
    #[serde(default)]
    pub is_deleted: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,
}

impl Timestamps {
    /// Timestamps for a document created now
    pub fn new() -> Self {
        let now = DateTime::now();
        Self {
            is_deleted: false,
            deleted_at: None,
            updated_at: Some(now),
            created_at: Some(now),
        }
    }
}
