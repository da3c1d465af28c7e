//! MongoDB-backed compendium store

use async_trait::async_trait;
use bson::doc;

use crate::db::mongo::{MongoClient, MongoCollection};
use crate::db::schemas::{CompendiumDoc, COMPENDIUM_COLLECTION};
use crate::storage::{CompendiumRecord, CompendiumStore};
use crate::types::Result;

/// Compendium records in the shared `compendia` collection
#[derive(Debug, Clone)]
pub struct MongoStore {
    compendia: MongoCollection<CompendiumDoc>,
}

impl MongoStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            compendia: client.collection(COMPENDIUM_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl CompendiumStore for MongoStore {
    async fn get(&self, id: &str) -> Result<Option<CompendiumRecord>> {
        Ok(self
            .compendia
            .find_one(doc! { "id": id })
            .await?
            .map(CompendiumRecord::from))
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        // Soft-deleted compendia still own their identifier
        Ok(self.compendia.count(doc! { "id": id }).await? > 0)
    }

    async fn insert(&self, record: CompendiumRecord) -> Result<()> {
        self.compendia.insert_one(CompendiumDoc::new(record)).await
    }

    async fn list_substituted(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .compendia
            .find_many(doc! { "substituted": true })
            .await?
            .into_iter()
            .map(|doc| doc.record.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn backend(&self) -> &'static str {
        "mongodb"
    }
}
