//! Substitution orchestrator
//!
//! Builds a composite compendium from a base and an overlay:
//!
//! ```text
//! request ─► policy ─► resolve base/overlay ─► recipe check ─► path checks
//!                                                                  │
//!   persist ◄─ merge metadata ◄─ mutate recipe ◄─ compose tree ◄─ allocate id
//! ```
//!
//! Every check runs before anything is written. Persistence materializes the
//! tree first and inserts the record second; a failed insert removes the tree
//! again, so callers never observe a half-created composite.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use substitution_core::{
    paths, resolve_filename, CoreError, ExecutionRecipe, IdGenerator, MetadataHandling,
    MetadataRewriter, MountSubstitution, RandomIdGenerator, RecipeMutator, SubstitutionBlock,
    SubstitutionConfig, SubstitutionFileRecord, SubstitutionRequest,
};
use tracing::{debug, error, info, warn};

use crate::storage::{Compendium, CompendiumRecord, CompendiumStore, FileStorage, TreePlan};
use crate::types::{Result, SubstituterError};

// ============================================================================
// Types
// ============================================================================

/// Outcome of a successful substitution
#[derive(Debug, Clone, Serialize)]
pub struct CompositeCompendium {
    /// Identifier of the new compendium
    pub id: String,
    /// Persisted record, metadata included
    pub record: CompendiumRecord,
    /// Recipe written to the composite tree
    #[serde(skip)]
    pub recipe: ExecutionRecipe,
    /// One entry per requested pair, in request order
    pub substitution_files: Vec<SubstitutionFileRecord>,
}

/// A validated file pairing
#[derive(Debug, Clone)]
struct CheckedPair {
    /// Normalized tree path in the base
    base: String,
    /// Normalized tree path in the overlay
    overlay: String,
    /// Base path relative to the base payload root
    internal: String,
}

// ============================================================================
// Service
// ============================================================================

/// Coordinates validation, tree composition, recipe mutation, metadata merge
/// and persistence of composite compendia
pub struct SubstitutionService {
    config: Arc<SubstitutionConfig>,
    store: Arc<dyn CompendiumStore>,
    files: Arc<dyn FileStorage>,
    ids: Arc<dyn IdGenerator>,
    mutator: RecipeMutator,
    rewriter: MetadataRewriter,
}

impl SubstitutionService {
    pub fn new(
        config: SubstitutionConfig,
        store: Arc<dyn CompendiumStore>,
        files: Arc<dyn FileStorage>,
    ) -> Self {
        let ids = Arc::new(RandomIdGenerator::new(config.id_length));
        let mutator = RecipeMutator::new(&config);
        let rewriter = MetadataRewriter::new(config.metadata_fields.clone());
        Self {
            config: Arc::new(config),
            store,
            files,
            ids,
            mutator,
            rewriter,
        }
    }

    /// Replace the identifier source
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn config(&self) -> &SubstitutionConfig {
        &self.config
    }

    pub fn store_backend(&self) -> &'static str {
        self.store.backend()
    }

    pub fn file_backend(&self) -> &'static str {
        self.files.backend()
    }

    /// Identifiers of all compendia created by substitution
    pub async fn list_substitutions(&self) -> Result<Vec<String>> {
        self.store.list_substituted().await
    }

    /// Create a composite compendium for `request`
    pub async fn substitute(&self, request: SubstitutionRequest) -> Result<CompositeCompendium> {
        let policy = request.policy()?;
        if request.base.trim().is_empty() || request.overlay.trim().is_empty() {
            return Err(SubstituterError::BadRequest(
                "base and overlay compendium identifiers are required".to_string(),
            ));
        }
        if request.substitution_files.is_empty() {
            return Err(SubstituterError::BadRequest(
                "substitutionFiles must name at least one file pair".to_string(),
            ));
        }

        info!(
            base = %request.base,
            overlay = %request.overlay,
            files = request.substitution_files.len(),
            "Starting substitution"
        );

        let base = self.resolve(&request.base, "base").await?;
        let overlay = self.resolve(&request.overlay, "overlay").await?;

        let recipe = self.load_recipe(&base).await?;
        let pairs = self.check_pairs(&request, &base, &overlay)?;

        let id = self.allocate_id(&base, &overlay).await?;
        debug!(id = %id, "Allocated composite identifier");

        let (mut plan, records, mounts) = self.compose(&base, &overlay, &pairs)?;

        let image = self.config.image_for(base.id());
        let mutated = self.mutator.mutate(&recipe, &image, &mounts)?;
        plan.inline(self.config.recipe_file.clone(), mutated.to_yaml()?);

        let block = SubstitutionBlock {
            base: base.id().to_string(),
            overlay: overlay.id().to_string(),
            substitution_files: records.clone(),
        };
        let metadata = self.merge_metadata(policy, &base, &id, &block)?;

        let record = CompendiumRecord {
            id: id.clone(),
            metadata,
            bag: false,
            candidate: true,
            compendium: true,
            substituted: true,
        };
        self.persist(&id, &plan, record.clone()).await?;

        info!(
            id = %id,
            base = %base.id(),
            overlay = %overlay.id(),
            files = plan.file_count(),
            "Created substituted compendium"
        );

        Ok(CompositeCompendium {
            id,
            record,
            recipe: mutated,
            substitution_files: records,
        })
    }

    // ------------------------------------------------------------------------
    // Resolution and validation
    // ------------------------------------------------------------------------

    async fn resolve(&self, id: &str, role: &str) -> Result<Compendium> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| SubstituterError::NotFound(format!("{} compendium '{}'", role, id)))?;

        let files = self.files.list_files(id).await?.ok_or_else(|| {
            SubstituterError::NotFound(format!("files of {} compendium '{}'", role, id))
        })?;

        Ok(Compendium { record, files })
    }

    /// Read and check the base recipe; any problem is a missing configuration
    async fn load_recipe(&self, base: &Compendium) -> Result<ExecutionRecipe> {
        let path = base.record.recipe_path(&self.config);
        if !base.has_file(&path) {
            warn!(base = %base.id(), path = %path, "Base compendium has no recipe");
            return Err(SubstituterError::MissingConfiguration);
        }

        let raw = self.files.read_file(base.id(), &path).await?;
        let text = std::str::from_utf8(&raw).map_err(|_| {
            warn!(base = %base.id(), "Base recipe is not UTF-8");
            SubstituterError::MissingConfiguration
        })?;
        let recipe = ExecutionRecipe::from_yaml(text)?;
        recipe.validate()?;
        Ok(recipe)
    }

    fn check_pairs(
        &self,
        request: &SubstitutionRequest,
        base: &Compendium,
        overlay: &Compendium,
    ) -> Result<Vec<CheckedPair>> {
        let base_root = base.record.payload_root(&self.config);
        let base_recipe = base.record.recipe_path(&self.config);
        let overlay_recipe = overlay.record.recipe_path(&self.config);

        let mut seen = HashSet::new();
        let mut pairs = Vec::with_capacity(request.substitution_files.len());

        for file in &request.substitution_files {
            let base_path = paths::normalize(&file.base)?;
            let overlay_path = paths::normalize(&file.overlay)?;

            if base_path == base_recipe {
                return Err(CoreError::InvalidPath(format!(
                    "'{}' is the recipe of the base compendium",
                    file.base
                ))
                .into());
            }
            if overlay_path == overlay_recipe {
                return Err(CoreError::InvalidPath(format!(
                    "'{}' is the recipe of the overlay compendium",
                    file.overlay
                ))
                .into());
            }
            if !base.has_file(&base_path) {
                return Err(SubstituterError::InvalidPath(format!(
                    "'{}' does not exist in base compendium '{}'",
                    file.base,
                    base.id()
                )));
            }
            if !overlay.has_file(&overlay_path) {
                return Err(SubstituterError::InvalidPath(format!(
                    "'{}' does not exist in overlay compendium '{}'",
                    file.overlay,
                    overlay.id()
                )));
            }

            let internal = paths::strip_payload_root(&base_path, base_root).ok_or_else(|| {
                SubstituterError::InvalidPath(format!(
                    "'{}' is outside the payload of base compendium '{}'",
                    file.base,
                    base.id()
                ))
            })?;
            if internal.contains(':') {
                return Err(SubstituterError::InvalidPath(format!(
                    "'{}' cannot be mounted, ':' is not allowed",
                    file.base
                )));
            }
            if paths::basename(&overlay_path).map_or(true, |name| name.contains(':')) {
                return Err(SubstituterError::InvalidPath(format!(
                    "'{}' cannot be mounted, ':' is not allowed",
                    file.overlay
                )));
            }
            if !seen.insert(internal.clone()) {
                return Err(SubstituterError::InvalidPath(format!(
                    "'{}' is substituted more than once",
                    file.base
                )));
            }

            pairs.push(CheckedPair {
                base: base_path,
                overlay: overlay_path,
                internal,
            });
        }

        Ok(pairs)
    }

    async fn allocate_id(&self, base: &Compendium, overlay: &Compendium) -> Result<String> {
        for attempt in 1..=self.config.max_id_attempts {
            let candidate = self.ids.generate();
            if candidate == base.id() || candidate == overlay.id() {
                continue;
            }
            if self.store.exists(&candidate).await? || self.files.tree_exists(&candidate).await? {
                debug!(candidate = %candidate, attempt, "Identifier taken, retrying");
                continue;
            }
            return Ok(candidate);
        }

        error!(
            attempts = self.config.max_id_attempts,
            "Could not allocate a free compendium identifier"
        );
        Err(SubstituterError::Storage(format!(
            "no free compendium identifier after {} attempts",
            self.config.max_id_attempts
        )))
    }

    // ------------------------------------------------------------------------
    // Composition
    // ------------------------------------------------------------------------

    /// Plan the composite tree: the base payload re-rooted at the top, then
    /// every overlay file under a collision-free top-level name
    fn compose(
        &self,
        base: &Compendium,
        overlay: &Compendium,
        pairs: &[CheckedPair],
    ) -> Result<(TreePlan, Vec<SubstitutionFileRecord>, Vec<MountSubstitution>)> {
        let base_root = base.record.payload_root(&self.config);
        let mut plan = TreePlan::new();
        let mut names = HashSet::new();
        names.insert(self.config.recipe_file.clone());

        for path in &base.files {
            let Some(rel) = paths::strip_payload_root(path, base_root) else {
                continue;
            };
            if rel == self.config.recipe_file {
                continue;
            }
            names.insert(paths::top_level_name(&rel).to_string());
            plan.copy(rel, base.id(), path);
        }

        let mut records = Vec::with_capacity(pairs.len());
        let mut mounts = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let filename =
                resolve_filename(&pair.overlay, &names, &self.config.filename_prefix)?;
            names.insert(filename.clone());
            plan.copy(filename.clone(), overlay.id(), &pair.overlay);

            debug!(
                base = %pair.base,
                overlay = %pair.overlay,
                filename = %filename,
                "Placed overlay file"
            );

            mounts.push(MountSubstitution::new(pair.internal.clone(), filename.clone()));
            records.push(SubstitutionFileRecord {
                base: pair.base.clone(),
                overlay: pair.overlay.clone(),
                filename,
            });
        }

        Ok((plan, records, mounts))
    }

    fn merge_metadata(
        &self,
        policy: MetadataHandling,
        base: &Compendium,
        id: &str,
        block: &SubstitutionBlock,
    ) -> Result<Value> {
        let mut metadata = match policy {
            MetadataHandling::KeepBase => match &base.record.metadata {
                Value::Object(map) => Value::Object(map.clone()),
                _ => Value::Object(serde_json::Map::new()),
            },
        };

        let rewritten = self.rewriter.rewrite(&mut metadata, base.id(), id);
        debug!(id = %id, rewritten, "Rewrote identifier-bearing metadata fields");

        let block = serde_json::to_value(block)
            .map_err(|e| SubstituterError::Internal(format!("substitution block: {}", e)))?;
        if let Value::Object(map) = &mut metadata {
            map.insert("substitution".to_string(), block);
        }
        Ok(metadata)
    }

    async fn persist(&self, id: &str, plan: &TreePlan, record: CompendiumRecord) -> Result<()> {
        self.files.materialize(id, plan).await?;

        if let Err(e) = self.store.insert(record).await {
            error!(id = %id, error = %e, "Failed to store compendium record, removing files");
            if let Err(cleanup) = self.files.remove_tree(id).await {
                error!(id = %id, error = %cleanup, "Failed to remove orphaned compendium files");
            }
            return Err(e);
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryFileStorage, MemoryStore};
    use crate::types::MISSING_CONFIGURATION_MESSAGE;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use substitution_core::SubstitutionFile;

    const RECIPE: &str = "id: xjiYy\nexecution:\n  cmd: \"Rscript -e 'rmarkdown::render(\\\"main.Rmd\\\")'\"\n";

    /// Hands out a fixed sequence of identifiers
    struct SequenceIds(Mutex<Vec<&'static str>>);

    impl SequenceIds {
        fn new(ids: &[&'static str]) -> Arc<Self> {
            let mut ids = ids.to_vec();
            ids.reverse();
            Arc::new(Self(Mutex::new(ids)))
        }
    }

    impl IdGenerator for SequenceIds {
        fn generate(&self) -> String {
            self.0.lock().unwrap().pop().unwrap_or("zzzzz").to_string()
        }
    }

    /// Store whose inserts always fail
    struct RejectingStore(MemoryStore);

    #[async_trait]
    impl CompendiumStore for RejectingStore {
        async fn get(&self, id: &str) -> Result<Option<CompendiumRecord>> {
            self.0.get(id).await
        }
        async fn exists(&self, id: &str) -> Result<bool> {
            self.0.exists(id).await
        }
        async fn insert(&self, _record: CompendiumRecord) -> Result<()> {
            Err(SubstituterError::Database("write concern failed".into()))
        }
        async fn list_substituted(&self) -> Result<Vec<String>> {
            self.0.list_substituted().await
        }
        fn backend(&self) -> &'static str {
            "rejecting"
        }
    }

    async fn fixture() -> (MemoryStore, MemoryFileStorage) {
        let store = MemoryStore::new();
        let files = MemoryFileStorage::new();

        store
            .insert(CompendiumRecord {
                id: "xjiYy".into(),
                metadata: json!({
                    "o2r": {
                        "ercIdentifier": "xjiYy",
                        "inputfiles": ["xjiYy/data/BerlinMit.csv"],
                        "mainfile": "xjiYy/data/main.Rmd"
                    }
                }),
                bag: true,
                compendium: true,
                ..Default::default()
            })
            .await
            .unwrap();
        files
            .put_tree(
                "xjiYy",
                [
                    ("bagit.txt", "BagIt-Version: 0.97\n"),
                    ("data/BerlinMit.csv", "1990,18186"),
                    ("data/main.Rmd", "---\n"),
                    ("data/erc.yml", RECIPE),
                ],
            )
            .await;

        store
            .insert(CompendiumRecord {
                id: "Ab12c".into(),
                metadata: json!({ "o2r": { "ercIdentifier": "Ab12c", "title": "overlay" } }),
                ..Default::default()
            })
            .await
            .unwrap();
        files
            .put_tree("Ab12c", [("files/BerlinOhne.csv", "1990,61568")])
            .await;

        (store, files)
    }

    fn service(store: MemoryStore, files: MemoryFileStorage) -> SubstitutionService {
        SubstitutionService::new(SubstitutionConfig::default(), Arc::new(store), Arc::new(files))
    }

    fn request(pairs: &[(&str, &str)]) -> SubstitutionRequest {
        SubstitutionRequest::new(
            "xjiYy",
            "Ab12c",
            pairs
                .iter()
                .map(|(b, o)| SubstitutionFile::new(*b, *o))
                .collect(),
            MetadataHandling::KeepBase,
        )
    }

    #[tokio::test]
    async fn test_substitute_bag_base() {
        let (store, files) = fixture().await;
        let svc = service(store.clone(), files.clone())
            .with_id_generator(SequenceIds::new(&["new01"]));

        let composite = svc
            .substitute(request(&[("data/BerlinMit.csv", "files/BerlinOhne.csv")]))
            .await
            .unwrap();
        assert_eq!(composite.id, "new01");
        assert_eq!(composite.substitution_files[0].filename, "BerlinOhne.csv");

        let tree = files.list_files("new01").await.unwrap().unwrap();
        assert_eq!(tree, vec!["BerlinMit.csv", "BerlinOhne.csv", "erc.yml", "main.Rmd"]);

        let cmd = composite.recipe.cmd().unwrap();
        assert!(cmd.contains("BerlinOhne.csv:/erc/BerlinMit.csv:ro"), "{}", cmd);
        assert!(cmd.ends_with("erc:xjiYy"), "{}", cmd);

        let record = store.get("new01").await.unwrap().unwrap();
        assert!(record.candidate && record.substituted && !record.bag);
        assert_eq!(record.metadata["o2r"]["ercIdentifier"], "new01");
        assert_eq!(record.metadata["o2r"]["inputfiles"][0], "new01/data/BerlinMit.csv");
        assert_eq!(record.metadata["substitution"]["base"], "xjiYy");
        assert_eq!(
            record.metadata["substitution"]["substitutionFiles"][0],
            json!({
                "base": "data/BerlinMit.csv",
                "overlay": "files/BerlinOhne.csv",
                "filename": "BerlinOhne.csv"
            })
        );
        // keepBase drops overlay-only fields
        assert!(record.metadata["o2r"].get("title").is_none());
    }

    #[tokio::test]
    async fn test_missing_recipe_is_missing_configuration() {
        let (store, files) = fixture().await;
        files
            .put_tree(
                "xjiYy",
                [("data/BerlinMit.csv", "1990,18186")],
            )
            .await;
        let svc = service(store.clone(), files.clone());

        let err = svc
            .substitute(request(&[("data/BerlinMit.csv", "files/BerlinOhne.csv")]))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), MISSING_CONFIGURATION_MESSAGE);
        assert!(err.is_client_error());
        assert!(store.list_substituted().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recipe_without_cmd_is_missing_configuration() {
        let (store, files) = fixture().await;
        files
            .put_tree(
                "xjiYy",
                [("data/BerlinMit.csv", "1990,18186"), ("data/erc.yml", "id: xjiYy\n")],
            )
            .await;
        let err = service(store, files)
            .substitute(request(&[("data/BerlinMit.csv", "files/BerlinOhne.csv")]))
            .await
            .unwrap_err();
        assert!(matches!(err, SubstituterError::MissingConfiguration));
    }

    #[tokio::test]
    async fn test_unknown_compendium_is_not_found() {
        let (store, files) = fixture().await;
        let svc = service(store, files);
        let mut req = request(&[("data/BerlinMit.csv", "files/BerlinOhne.csv")]);
        req.overlay = "nope1".into();
        assert!(matches!(
            svc.substitute(req).await,
            Err(SubstituterError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_paths_rejected() {
        let (store, files) = fixture().await;
        let svc = service(store.clone(), files.clone());

        for pairs in [
            vec![("data/Missing.csv", "files/BerlinOhne.csv")],
            vec![("data/BerlinMit.csv", "files/Missing.csv")],
            vec![("../xjiYy/data/BerlinMit.csv", "files/BerlinOhne.csv")],
            vec![("data/erc.yml", "files/BerlinOhne.csv")],
            vec![("bagit.txt", "files/BerlinOhne.csv")],
            vec![
                ("data/BerlinMit.csv", "files/BerlinOhne.csv"),
                ("./data/BerlinMit.csv", "files/BerlinOhne.csv"),
            ],
        ] {
            let err = svc.substitute(request(&pairs)).await.unwrap_err();
            assert!(matches!(err, SubstituterError::InvalidPath(_)), "{:?}: {}", pairs, err);
        }
        assert!(store.list_substituted().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_policy_and_empty_request_rejected() {
        let (store, files) = fixture().await;
        let svc = service(store, files);

        let mut req = request(&[("data/BerlinMit.csv", "files/BerlinOhne.csv")]);
        req.metadata_handling = Some("keepOverlay".into());
        assert!(matches!(
            svc.substitute(req).await,
            Err(SubstituterError::UnsupportedPolicy(_))
        ));

        let mut req = request(&[("data/BerlinMit.csv", "files/BerlinOhne.csv")]);
        req.metadata_handling = None;
        assert!(matches!(
            svc.substitute(req).await,
            Err(SubstituterError::UnsupportedPolicy(_))
        ));

        assert!(matches!(
            svc.substitute(request(&[])).await,
            Err(SubstituterError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_id_allocation_skips_taken_ids() {
        let (store, files) = fixture().await;
        store
            .insert(CompendiumRecord {
                id: "taken".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let svc = service(store, files)
            .with_id_generator(SequenceIds::new(&["xjiYy", "Ab12c", "taken", "fresh"]));

        let composite = svc
            .substitute(request(&[("data/BerlinMit.csv", "files/BerlinOhne.csv")]))
            .await
            .unwrap();
        assert_eq!(composite.id, "fresh");
    }

    #[tokio::test]
    async fn test_id_exhaustion_is_storage_failure() {
        let (store, files) = fixture().await;
        let config = SubstitutionConfig {
            max_id_attempts: 2,
            ..SubstitutionConfig::default()
        };
        let svc = SubstitutionService::new(config, Arc::new(store), Arc::new(files.clone()))
            .with_id_generator(SequenceIds::new(&["xjiYy", "xjiYy", "later"]));

        let err = svc
            .substitute(request(&[("data/BerlinMit.csv", "files/BerlinOhne.csv")]))
            .await
            .unwrap_err();
        assert!(matches!(err, SubstituterError::Storage(_)));
        assert!(!files.tree_exists("later").await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_insert_removes_tree() {
        let (store, files) = fixture().await;
        let svc = SubstitutionService::new(
            SubstitutionConfig::default(),
            Arc::new(RejectingStore(store)),
            Arc::new(files.clone()),
        )
        .with_id_generator(SequenceIds::new(&["new01"]));

        let err = svc
            .substitute(request(&[("data/BerlinMit.csv", "files/BerlinOhne.csv")]))
            .await
            .unwrap_err();
        assert!(matches!(err, SubstituterError::Database(_)));
        assert!(!files.tree_exists("new01").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_substitutions() {
        let (store, files) = fixture().await;
        let svc = service(store, files).with_id_generator(SequenceIds::new(&["new01"]));
        svc.substitute(request(&[("data/BerlinMit.csv", "files/BerlinOhne.csv")]))
            .await
            .unwrap();
        assert_eq!(svc.list_substitutions().await.unwrap(), vec!["new01"]);
    }
}
