//! In-memory storage backends
//!
//! Used by tests and by dev mode when MongoDB is unreachable.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{CompendiumRecord, CompendiumStore, FileSource, FileStorage, TreePlan};
use crate::types::{Result, SubstituterError};

// ============================================================================
// Records
// ============================================================================

/// Compendium records held in a map
#[derive(Debug, Clone)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<String, CompendiumRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompendiumStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<CompendiumRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.records.read().await.contains_key(id))
    }

    async fn insert(&self, record: CompendiumRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(SubstituterError::Database(format!(
                "compendium '{}' already exists",
                record.id
            )));
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn list_substituted(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.substituted)
            .map(|r| r.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

// ============================================================================
// File trees
// ============================================================================

type Tree = BTreeMap<String, Bytes>;

/// Compendium file trees held in a map of path to content
#[derive(Debug, Clone)]
pub struct MemoryFileStorage {
    trees: Arc<RwLock<HashMap<String, Tree>>>,
}

impl MemoryFileStorage {
    pub fn new() -> Self {
        Self {
            trees: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a tree directly, replacing any existing one
    pub async fn put_tree<I, P, C>(&self, id: &str, files: I)
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<Bytes>,
    {
        let tree = files
            .into_iter()
            .map(|(path, content)| (path.into(), content.into()))
            .collect();
        self.trees.write().await.insert(id.to_string(), tree);
    }
}

impl Default for MemoryFileStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileStorage for MemoryFileStorage {
    async fn list_files(&self, id: &str) -> Result<Option<Vec<String>>> {
        Ok(self
            .trees
            .read()
            .await
            .get(id)
            .map(|tree| tree.keys().cloned().collect()))
    }

    async fn tree_exists(&self, id: &str) -> Result<bool> {
        Ok(self.trees.read().await.contains_key(id))
    }

    async fn file_exists(&self, id: &str, path: &str) -> Result<bool> {
        Ok(self
            .trees
            .read()
            .await
            .get(id)
            .map_or(false, |tree| tree.contains_key(path)))
    }

    async fn read_file(&self, id: &str, path: &str) -> Result<Bytes> {
        self.trees
            .read()
            .await
            .get(id)
            .and_then(|tree| tree.get(path))
            .cloned()
            .ok_or_else(|| SubstituterError::NotFound(format!("file '{}' in compendium '{}'", path, id)))
    }

    async fn materialize(&self, id: &str, plan: &TreePlan) -> Result<()> {
        let mut trees = self.trees.write().await;
        if trees.contains_key(id) {
            return Err(SubstituterError::Storage(format!(
                "tree for compendium '{}' already exists",
                id
            )));
        }

        let mut tree = Tree::new();
        for file in &plan.files {
            let content = match &file.source {
                FileSource::Inline(content) => content.clone(),
                FileSource::Copy { compendium, path } => trees
                    .get(compendium)
                    .and_then(|t| t.get(path))
                    .cloned()
                    .ok_or_else(|| {
                        SubstituterError::Storage(format!(
                            "source file '{}' in compendium '{}' disappeared",
                            path, compendium
                        ))
                    })?,
            };
            tree.insert(file.dest.clone(), content);
        }

        trees.insert(id.to_string(), tree);
        Ok(())
    }

    async fn remove_tree(&self, id: &str) -> Result<()> {
        self.trees.write().await.remove(id);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
