//! End-to-end substitution over the filesystem backend

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use substitution_core::{
    ExecutionRecipe, IdGenerator, MetadataHandling, SubstitutionConfig, SubstitutionFile,
    SubstitutionRequest,
};
use substituter::storage::{CompendiumRecord, CompendiumStore, FileStorage, FsStorage, MemoryStore};
use substituter::types::MISSING_CONFIGURATION_MESSAGE;
use substituter::{SubstituterError, SubstitutionService};
use tempfile::TempDir;

struct FixedId(&'static str);

impl IdGenerator for FixedId {
    fn generate(&self) -> String {
        self.0.to_string()
    }
}

fn write(root: &Path, id: &str, files: &[(&str, &str)]) {
    for (path, content) in files {
        let full = root.join(id).join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
    }
}

struct Fixture {
    _tmp: TempDir,
    root: std::path::PathBuf,
    store: MemoryStore,
    files: Arc<FsStorage>,
}

impl Fixture {
    async fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("compendium");
        let files = Arc::new(FsStorage::new(&root).await.unwrap());
        Self {
            _tmp: tmp,
            root,
            store: MemoryStore::new(),
            files,
        }
    }

    async fn add(&self, id: &str, bag: bool, metadata: serde_json::Value, files: &[(&str, &str)]) {
        self.store
            .insert(CompendiumRecord {
                id: id.to_string(),
                metadata,
                bag,
                compendium: true,
                ..Default::default()
            })
            .await
            .unwrap();
        write(&self.root, id, files);
    }

    fn service(&self, new_id: &'static str) -> SubstitutionService {
        SubstitutionService::new(
            SubstitutionConfig::default(),
            Arc::new(self.store.clone()),
            self.files.clone(),
        )
        .with_id_generator(Arc::new(FixedId(new_id)))
    }

    fn read(&self, id: &str, path: &str) -> String {
        std::fs::read_to_string(self.root.join(id).join(path)).unwrap()
    }
}

fn request(base: &str, overlay: &str, pairs: &[(&str, &str)]) -> SubstitutionRequest {
    SubstitutionRequest::new(
        base,
        overlay,
        pairs.iter().map(|(b, o)| SubstitutionFile::new(*b, *o)).collect(),
        MetadataHandling::KeepBase,
    )
}

#[tokio::test]
async fn berlin_scenario_places_overlay_and_mounts_it() {
    let fx = Fixture::new().await;
    fx.add(
        "xjiYy",
        true,
        json!({
            "o2r": {
                "ercIdentifier": "xjiYy",
                "mainfile": "xjiYy/data/main.Rmd",
                "inputfiles": ["xjiYy/data/BerlinMit.csv"],
                "displayfile": "/api/v1/compendium/xjiYy/data/display.html"
            }
        }),
        &[
            ("bagit.txt", "BagIt-Version: 0.97\n"),
            ("data/BerlinMit.csv", "1990,18186"),
            ("data/main.Rmd", "---\ntitle: Berlin\n---\n"),
            (
                "data/erc.yml",
                "id: xjiYy\nspec_version: 1\nexecution:\n  cmd: \"docker run -it --rm erc:xjiYy\"\n",
            ),
        ],
    )
    .await;
    fx.add(
        "Ab12c",
        false,
        json!({ "o2r": { "ercIdentifier": "Ab12c" } }),
        &[("files/BerlinOhne.csv", "1990,61568")],
    )
    .await;

    let composite = fx
        .service("ab12c")
        .substitute(request("xjiYy", "Ab12c", &[("data/BerlinMit.csv", "files/BerlinOhne.csv")]))
        .await
        .unwrap();
    assert_eq!(composite.id, "ab12c");

    // Base content is untouched, overlay content sits under its own name
    assert_eq!(fx.read("ab12c", "BerlinMit.csv"), "1990,18186");
    assert_eq!(fx.read("ab12c", "BerlinOhne.csv"), "1990,61568");
    assert!(!fx.root.join("ab12c").join("bagit.txt").exists());

    let recipe = ExecutionRecipe::from_yaml(&fx.read("ab12c", "erc.yml")).unwrap();
    let cmd = recipe.cmd().unwrap();
    assert!(cmd.contains("BerlinOhne.csv:/erc/BerlinMit.csv:ro"), "{}", cmd);
    assert!(cmd.starts_with("docker run -it --rm --volume $(pwd)/BerlinOhne.csv"), "{}", cmd);
    assert_eq!(recipe.document()["spec_version"].as_u64(), Some(1));

    let record = fx.store.get("ab12c").await.unwrap().unwrap();
    assert!(record.candidate);
    assert!(record.substituted);
    let metadata = &record.metadata;
    assert_eq!(
        metadata["substitution"],
        json!({
            "base": "xjiYy",
            "overlay": "Ab12c",
            "substitutionFiles": [{
                "base": "data/BerlinMit.csv",
                "overlay": "files/BerlinOhne.csv",
                "filename": "BerlinOhne.csv"
            }]
        })
    );
    assert_eq!(metadata["o2r"]["ercIdentifier"], "ab12c");
    assert_eq!(metadata["o2r"]["mainfile"], "ab12c/data/main.Rmd");
    assert_eq!(metadata["o2r"]["inputfiles"], json!(["ab12c/data/BerlinMit.csv"]));
    assert_eq!(
        metadata["o2r"]["displayfile"],
        "/api/v1/compendium/ab12c/data/display.html"
    );

    // Sources are read-only during substitution
    assert_eq!(fx.read("xjiYy", "data/BerlinMit.csv"), "1990,18186");
    assert!(fx.read("xjiYy", "data/erc.yml").contains("erc:xjiYy\""));
}

#[tokio::test]
async fn colliding_names_escalate_and_replace_existing_mount() {
    let fx = Fixture::new().await;
    fx.add(
        "base2",
        false,
        json!({}),
        &[
            ("files/BerlinMit.csv", "1990,18186"),
            ("BerlinOhne.csv", "old"),
            ("overlay_BerlinOhne.csv", "older"),
            (
                "erc.yml",
                "execution:\n  cmd: \"docker run -it --rm -v $(pwd)/files/BerlinMit.csv:/erc/files/BerlinMit.csv erc:base2\"\n",
            ),
        ],
    )
    .await;
    fx.add(
        "over2",
        true,
        json!({}),
        &[("data/BerlinOhne.csv", "1990,61568")],
    )
    .await;

    let composite = fx
        .service("new02")
        .substitute(request("base2", "over2", &[("files/BerlinMit.csv", "data/BerlinOhne.csv")]))
        .await
        .unwrap();

    let filename = &composite.substitution_files[0].filename;
    assert_eq!(filename, "overlay_overlay_BerlinOhne.csv");
    assert_eq!(fx.read("new02", filename), "1990,61568");
    assert_eq!(fx.read("new02", "BerlinOhne.csv"), "old");
    assert_eq!(fx.read("new02", "files/BerlinMit.csv"), "1990,18186");

    let cmd = composite.recipe.cmd().unwrap().to_string();
    assert!(
        cmd.contains("overlay_overlay_BerlinOhne.csv:/erc/files/BerlinMit.csv:ro"),
        "{}",
        cmd
    );
    // The base mount for the same container path is replaced, not duplicated
    assert_eq!(cmd.matches(":/erc/files/BerlinMit.csv").count(), 1, "{}", cmd);
    assert!(!cmd.contains(" -v "), "{}", cmd);
}

#[tokio::test]
async fn two_overlays_with_same_name_get_distinct_names() {
    let fx = Fixture::new().await;
    fx.add(
        "base3",
        false,
        json!({}),
        &[
            ("a/input.csv", "a"),
            ("b/input.csv", "b"),
            ("erc.yml", "execution:\n  cmd: Rscript main.R\n"),
        ],
    )
    .await;
    fx.add(
        "over3",
        false,
        json!({}),
        &[("x/input.csv", "x"), ("y/input.csv", "y")],
    )
    .await;

    let composite = fx
        .service("new03")
        .substitute(request(
            "base3",
            "over3",
            &[("a/input.csv", "x/input.csv"), ("b/input.csv", "y/input.csv")],
        ))
        .await
        .unwrap();

    let names: Vec<&str> = composite
        .substitution_files
        .iter()
        .map(|f| f.filename.as_str())
        .collect();
    assert_eq!(names, vec!["input.csv", "overlay_input.csv"]);
    assert_eq!(fx.read("new03", "input.csv"), "x");
    assert_eq!(fx.read("new03", "overlay_input.csv"), "y");

    // Plain in-container command is wrapped into a run of the base image
    let cmd = composite.recipe.cmd().unwrap();
    assert!(cmd.starts_with("docker run -it --rm "), "{}", cmd);
    assert!(cmd.ends_with(" erc:base3"), "{}", cmd);
    assert!(cmd.contains("$(pwd)/input.csv:/erc/a/input.csv:ro"), "{}", cmd);
    assert!(cmd.contains("$(pwd)/overlay_input.csv:/erc/b/input.csv:ro"), "{}", cmd);
}

#[tokio::test]
async fn base_without_recipe_fails_with_literal_message_and_writes_nothing() {
    let fx = Fixture::new().await;
    fx.add("base4", true, json!({}), &[("data/BerlinMit.csv", "1990,18186")])
        .await;
    fx.add("over4", false, json!({}), &[("BerlinOhne.csv", "1990,61568")])
        .await;

    let err = fx
        .service("new04")
        .substitute(request("base4", "over4", &[("data/BerlinMit.csv", "BerlinOhne.csv")]))
        .await
        .unwrap_err();

    assert!(matches!(err, SubstituterError::MissingConfiguration));
    assert_eq!(err.to_string(), MISSING_CONFIGURATION_MESSAGE);
    assert!(!fx.files.tree_exists("new04").await.unwrap());
    assert!(fx.store.get("new04").await.unwrap().is_none());
}

#[tokio::test]
async fn invalid_overlay_path_writes_nothing() {
    let fx = Fixture::new().await;
    fx.add(
        "base5",
        false,
        json!({}),
        &[("a.csv", "a"), ("erc.yml", "execution:\n  cmd: Rscript main.R\n")],
    )
    .await;
    fx.add("over5", false, json!({}), &[("b.csv", "b")]).await;

    let err = fx
        .service("new05")
        .substitute(request("base5", "over5", &[("a.csv", "missing.csv")]))
        .await
        .unwrap_err();

    assert!(matches!(err, SubstituterError::InvalidPath(_)));
    assert!(!fx.files.tree_exists("new05").await.unwrap());
}
