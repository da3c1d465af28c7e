//! Filesystem-backed compendium trees
//!
//! Every compendium lives in `<root>/<id>/`. New trees are assembled in
//! `<root>/.staging/` and renamed into place once complete, so a reader never
//! sees a partial tree. Whatever a previous process left in the staging area
//! is swept when the storage is opened.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use substitution_core::paths;
use tokio::fs;
use tracing::{debug, info, warn};

use super::{FileSource, FileStorage, TreePlan};
use crate::types::{Result, SubstituterError};

const STAGING_DIR: &str = ".staging";

/// Compendium trees on local disk
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Open the storage rooted at `root`, creating the directory if needed
    pub async fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;

        let staging_root = root.join(STAGING_DIR);
        match fs::remove_dir_all(&staging_root).await {
            Ok(()) => info!(path = %staging_root.display(), "Swept stale staging area"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!(path = %root.display(), "Initialized compendium storage");

        Ok(Self { root })
    }

    fn tree_path(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty()
            || id.starts_with('.')
            || id.contains('/')
            || id.contains('\\')
            || id.contains('\0')
        {
            return Err(SubstituterError::InvalidPath(format!(
                "'{}' is not a valid compendium identifier",
                id
            )));
        }
        Ok(self.root.join(id))
    }

    fn file_path(&self, id: &str, path: &str) -> Result<PathBuf> {
        let normalized = paths::normalize(path)?;
        let mut full = self.tree_path(id)?;
        for segment in normalized.split('/') {
            full.push(segment);
        }
        Ok(full)
    }

    async fn is_dir(path: &Path) -> Result<bool> {
        match fs::metadata(path).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Regular files below `dir` as `/`-joined relative paths
    async fn walk(dir: &Path) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let mut pending = vec![(dir.to_path_buf(), String::new())];

        while let Some((current, prefix)) = pending.pop() {
            let mut entries = fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = match entry.file_name().into_string() {
                    Ok(name) => name,
                    Err(raw) => {
                        warn!(dir = %current.display(), name = ?raw, "Skipping non UTF-8 file name");
                        continue;
                    }
                };
                let rel = if prefix.is_empty() {
                    name
                } else {
                    format!("{}/{}", prefix, name)
                };

                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push((entry.path(), rel));
                } else if file_type.is_file() {
                    files.push(rel);
                }
            }
        }

        files.sort();
        Ok(files)
    }

    async fn populate(&self, staging: &Path, plan: &TreePlan) -> Result<()> {
        for file in &plan.files {
            let dest = {
                let normalized = paths::normalize(&file.dest)?;
                let mut dest = staging.to_path_buf();
                for segment in normalized.split('/') {
                    dest.push(segment);
                }
                dest
            };
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).await?;
            }

            match &file.source {
                FileSource::Inline(content) => fs::write(&dest, content).await?,
                FileSource::Copy { compendium, path } => {
                    let source = self.file_path(compendium, path)?;
                    fs::copy(&source, &dest).await.map_err(|e| {
                        SubstituterError::Storage(format!(
                            "copying '{}' from compendium '{}': {}",
                            path, compendium, e
                        ))
                    })?;
                }
            }
        }
        Ok(())
    }
}

/// Removes a staging directory unless it has been moved into place.
///
/// Failures are cleaned up with [`StagingDir::remove`]. A guard dropped while
/// still armed (the request timed out mid-copy) hands the removal to the
/// blocking pool. A file operation that was already running there can still
/// recreate part of the directory; the sweep in [`FsStorage::new`] collects
/// that.
struct StagingDir {
    path: PathBuf,
    armed: bool,
}

impl StagingDir {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    async fn remove(mut self) {
        self.disarm();
        if let Err(e) = fs::remove_dir_all(&self.path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove staging directory");
            }
        }
    }
}

fn remove_staging(path: &Path) {
    if let Err(e) = std::fs::remove_dir_all(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove staging directory");
        }
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_staging(&path));
            }
            Err(_) => remove_staging(&path),
        }
    }
}

#[async_trait]
impl FileStorage for FsStorage {
    async fn list_files(&self, id: &str) -> Result<Option<Vec<String>>> {
        let dir = self.tree_path(id)?;
        if !Self::is_dir(&dir).await? {
            return Ok(None);
        }
        Self::walk(&dir).await.map(Some)
    }

    async fn tree_exists(&self, id: &str) -> Result<bool> {
        Self::is_dir(&self.tree_path(id)?).await
    }

    async fn file_exists(&self, id: &str, path: &str) -> Result<bool> {
        let full = self.file_path(id, path)?;
        match fs::metadata(&full).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_file(&self, id: &str, path: &str) -> Result<Bytes> {
        let full = self.file_path(id, path)?;
        match fs::read(&full).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(SubstituterError::NotFound(format!(
                "file '{}' in compendium '{}'",
                path, id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn materialize(&self, id: &str, plan: &TreePlan) -> Result<()> {
        let target = self.tree_path(id)?;
        if Self::is_dir(&target).await? {
            return Err(SubstituterError::Storage(format!(
                "tree for compendium '{}' already exists",
                id
            )));
        }

        let staging_root = self.root.join(STAGING_DIR);
        fs::create_dir_all(&staging_root).await?;
        let mut staging = StagingDir::new(staging_root.join(format!("{}-{}", id, uuid::Uuid::new_v4())));

        let staged = async {
            fs::create_dir(&staging.path).await?;
            self.populate(&staging.path, plan).await?;
            fs::rename(&staging.path, &target).await.map_err(|e| {
                SubstituterError::Storage(format!(
                    "moving tree for compendium '{}' into place: {}",
                    id, e
                ))
            })
        }
        .await;

        if let Err(e) = staged {
            staging.remove().await;
            return Err(e);
        }
        staging.disarm();

        debug!(id = %id, files = plan.file_count(), "Materialized compendium tree");
        Ok(())
    }

    async fn remove_tree(&self, id: &str) -> Result<()> {
        let dir = self.tree_path(id)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(id = %id, "Removed compendium tree");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn backend(&self) -> &'static str {
        "filesystem"
    }
}
