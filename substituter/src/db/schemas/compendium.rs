//! Compendium document schema

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutTimestamps};
use crate::db::schemas::Timestamps;
use crate::storage::CompendiumRecord;

/// Collection name for compendia
pub const COMPENDIUM_COLLECTION: &str = "compendia";

/// Compendium document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CompendiumDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub timestamps: Timestamps,

    /// Identifier, research metadata and flags
    #[serde(flatten)]
    pub record: CompendiumRecord,
}

impl CompendiumDoc {
    pub fn new(record: CompendiumRecord) -> Self {
        Self {
            _id: None,
            timestamps: Timestamps::new(),
            record,
        }
    }
}

impl From<CompendiumDoc> for CompendiumRecord {
    fn from(doc: CompendiumDoc) -> Self {
        doc.record
    }
}

impl IntoIndexes for CompendiumDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Identifiers are handed out by the substituter and the compendium service
            (
                doc! { "id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("id_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "substituted": 1 },
                Some(
                    IndexOptions::builder()
                        .name("substituted_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutTimestamps for CompendiumDoc {
    fn mut_timestamps(&mut self) -> &mut Timestamps {
        &mut self.timestamps
    }
}
