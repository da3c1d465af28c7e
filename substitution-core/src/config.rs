//! Immutable configuration consumed by the substitution core.
//!
//! Built once at startup (see the service's `Args::substitution_config`) and
//! shared by reference; nothing here is mutated after construction.

use serde::{Deserialize, Serialize};

/// Metadata fields whose values embed an artifact identifier or path.
pub const DEFAULT_METADATA_FIELDS: &[&str] = &[
    "mainfile_candidates", // xjiYy/data/main.Rmd
    "mainfile",            // xjiYy/data/main.Rmd
    "inputfiles",          // xjiYy/data/BerlinMit.csv
    "ercIdentifier",       // xjiYy
    "displayfile",         // /api/v1/compendium/xjiYy/data/data/erc.yml
    "codefiles",           // xjiYy/data/main.Rmd
];

/// Settings for the bind-mount clauses written into the execution command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    /// Flag introducing a volume clause
    pub flag: String,
    /// Host-side prefix for mounted files, expanded by the shell at run time
    pub host_base: String,
    /// Container working directory the payload is visible under
    pub container_workdir: String,
    /// Mode suffix appended to every clause
    pub mode: String,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            flag: "--volume".to_string(),
            host_base: "$(pwd)".to_string(),
            container_workdir: "/erc".to_string(),
            mode: ":ro".to_string(),
        }
    }
}

/// Configuration for one substitution engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionConfig {
    /// Length of generated composite identifiers
    pub id_length: usize,
    /// Upper bound on identifier allocation attempts
    pub max_id_attempts: u32,
    /// Prefix prepended to a colliding destination filename
    pub filename_prefix: String,
    /// Name of the recipe file at the payload root
    pub recipe_file: String,
    /// Payload directory inside a bagged compendium
    pub payload_dir: String,
    /// Container-run invocation used when a recipe has to be wrapped
    pub run_command: String,
    /// Prefix of the image built for a compendium (`erc:<id>`)
    pub image_name_prefix: String,
    /// Mount clause settings
    pub mount: MountConfig,
    /// Ordered list of metadata fields eligible for identifier rewriting
    pub metadata_fields: Vec<String>,
}

impl Default for SubstitutionConfig {
    fn default() -> Self {
        Self {
            id_length: 5,
            max_id_attempts: 64,
            filename_prefix: "overlay_".to_string(),
            recipe_file: "erc.yml".to_string(),
            payload_dir: "data".to_string(),
            run_command: "docker run -it --rm".to_string(),
            image_name_prefix: "erc:".to_string(),
            mount: MountConfig::default(),
            metadata_fields: DEFAULT_METADATA_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }
}

impl SubstitutionConfig {
    /// Image reference of the container built for `compendium_id`
    pub fn image_for(&self, compendium_id: &str) -> String {
        format!("{}{}", self.image_name_prefix, compendium_id)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.id_length == 0 {
            return Err("id_length must be greater than zero".to_string());
        }
        if self.max_id_attempts == 0 {
            return Err("max_id_attempts must be greater than zero".to_string());
        }
        if self.filename_prefix.is_empty() {
            return Err("filename_prefix must not be empty".to_string());
        }
        if !self.mount.container_workdir.starts_with('/') {
            return Err(format!(
                "container workdir must be absolute, got '{}'",
                self.mount.container_workdir
            ));
        }
        if self.run_command.split_whitespace().count() < 2 {
            return Err("run_command must contain at least a program and a subcommand".to_string());
        }
        Ok(())
    }
}
