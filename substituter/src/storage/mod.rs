//! Storage collaborators
//!
//! The orchestrator talks to two backends through traits so they can be
//! swapped for tests and dev mode:
//!
//! - [`CompendiumStore`]: compendium records (identifier, metadata, flags)
//! - [`FileStorage`]: compendium file trees
//!
//! A composite tree is described up front as a [`TreePlan`] and handed to
//! [`FileStorage::materialize`] in one call, so a backend can make the whole
//! tree appear at once or not at all.

pub mod fs;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use substitution_core::{paths, SubstitutionConfig};

use crate::types::Result;

pub use fs::FsStorage;
pub use memory::{MemoryFileStorage, MemoryStore};

// ============================================================================
// Records
// ============================================================================

/// Compendium record as kept by the metadata store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompendiumRecord {
    /// Short alphanumeric identifier
    pub id: String,
    /// Research metadata document
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Payload kept under the bag payload directory (`data/`)
    #[serde(default)]
    pub bag: bool,
    /// Not yet published
    #[serde(default)]
    pub candidate: bool,
    #[serde(default)]
    pub compendium: bool,
    /// Created by substitution
    #[serde(default)]
    pub substituted: bool,
}

impl CompendiumRecord {
    /// Tree directory the container sees as its working directory
    pub fn payload_root<'a>(&self, config: &'a SubstitutionConfig) -> &'a str {
        if self.bag {
            &config.payload_dir
        } else {
            ""
        }
    }

    /// Tree path of this compendium's recipe file
    pub fn recipe_path(&self, config: &SubstitutionConfig) -> String {
        paths::join_payload_root(&config.recipe_file, self.payload_root(config))
    }
}

/// A compendium resolved from both collaborators
#[derive(Debug, Clone)]
pub struct Compendium {
    pub record: CompendiumRecord,
    /// Tree-relative file paths, sorted
    pub files: Vec<String>,
}

impl Compendium {
    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.files.binary_search_by(|f| f.as_str().cmp(path)).is_ok()
    }
}

// ============================================================================
// Tree plans
// ============================================================================

/// Where the content of a planned file comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    /// Copy of an existing file in another compendium's tree
    Copy { compendium: String, path: String },
    /// Content produced during substitution
    Inline(Bytes),
}

/// One file of a tree to be created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    /// Tree-relative destination path
    pub dest: String,
    pub source: FileSource,
}

/// Complete description of a new compendium tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreePlan {
    pub files: Vec<PlannedFile>,
}

impl TreePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn copy(&mut self, dest: impl Into<String>, compendium: &str, path: &str) {
        self.files.push(PlannedFile {
            dest: dest.into(),
            source: FileSource::Copy {
                compendium: compendium.to_string(),
                path: path.to_string(),
            },
        });
    }

    pub fn inline(&mut self, dest: impl Into<String>, content: impl Into<Bytes>) {
        self.files.push(PlannedFile {
            dest: dest.into(),
            source: FileSource::Inline(content.into()),
        });
    }

    /// Number of files the tree will hold
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

// ============================================================================
// Collaborator traits
// ============================================================================

/// Compendium record store
#[async_trait]
pub trait CompendiumStore: Send + Sync {
    /// Fetch a record by identifier
    async fn get(&self, id: &str) -> Result<Option<CompendiumRecord>>;

    /// Whether any record (including deleted ones) uses `id`
    async fn exists(&self, id: &str) -> Result<bool>;

    /// Insert a new record; fails if the identifier is taken
    async fn insert(&self, record: CompendiumRecord) -> Result<()>;

    /// Identifiers of all compendia created by substitution
    async fn list_substituted(&self) -> Result<Vec<String>>;

    /// Backend name for status reporting
    fn backend(&self) -> &'static str;
}

/// Compendium file tree storage
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// All file paths of a tree, sorted; `None` if the tree does not exist
    async fn list_files(&self, id: &str) -> Result<Option<Vec<String>>>;

    /// Whether a tree exists for `id`
    async fn tree_exists(&self, id: &str) -> Result<bool>;

    /// Whether `path` names a regular file in the tree of `id`
    async fn file_exists(&self, id: &str, path: &str) -> Result<bool>;

    /// Read one file
    async fn read_file(&self, id: &str, path: &str) -> Result<Bytes>;

    /// Create the tree of `id` from `plan`. Either the complete tree becomes
    /// visible or nothing does.
    async fn materialize(&self, id: &str, plan: &TreePlan) -> Result<()>;

    /// Delete the tree of `id`
    async fn remove_tree(&self, id: &str) -> Result<()>;

    /// Backend name for status reporting
    fn backend(&self) -> &'static str;
}
