//! Configuration for the substituter
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use substitution_core::config::DEFAULT_METADATA_FIELDS;
use substitution_core::{MountConfig, SubstitutionConfig};

/// Substituter - composite compendia from a base and an overlay
#[derive(Parser, Debug, Clone)]
#[command(name = "substituter")]
#[command(about = "Substitution service for reproducible research compendia")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "SUBSTITUTER_LISTEN", default_value = "0.0.0.0:8090")]
    pub listen: SocketAddr,

    /// MongoDB connection URI
    #[arg(long, env = "SUBSTITUTER_MONGODB", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name (shared with the compendium service)
    #[arg(long, env = "SUBSTITUTER_MONGODB_DATABASE", default_value = "muncher")]
    pub mongodb_db: String,

    /// Base directory for compendium files; trees live under `<base>/compendium/<id>`
    #[arg(long, env = "SUBSTITUTER_BASEPATH", default_value = "/tmp/o2r")]
    pub base_path: PathBuf,

    /// Enable development mode (in-memory records when MongoDB is unreachable)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Working directory of the compendium inside the container
    #[arg(long, env = "SUBSTITUTER_CONTAINER_WORKDIR", default_value = "/erc")]
    pub container_workdir: String,

    /// Length of generated compendium identifiers
    #[arg(long, env = "SUBSTITUTER_ID_LENGTH", default_value = "5")]
    pub id_length: usize,

    /// Prefix prepended to overlay filenames that collide with base files
    #[arg(long, env = "SUBSTITUTER_FILENAME_PREFIX", default_value = "overlay_")]
    pub filename_prefix: String,

    /// Comma-separated metadata fields whose identifiers are rewritten
    /// (defaults to mainfile_candidates,mainfile,inputfiles,ercIdentifier,displayfile,codefiles)
    #[arg(long, env = "SUBSTITUTER_METADATA_FIELDS")]
    pub metadata_fields: Option<String>,
}

impl Args {
    /// Directory holding one subdirectory per compendium
    pub fn compendium_path(&self) -> PathBuf {
        self.base_path.join("compendium")
    }

    /// Metadata fields eligible for rewriting, in order
    pub fn metadata_field_list(&self) -> Vec<String> {
        match self.metadata_fields {
            Some(ref fields) => fields
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => DEFAULT_METADATA_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Immutable configuration handed to the substitution engine
    pub fn substitution_config(&self) -> SubstitutionConfig {
        SubstitutionConfig {
            id_length: self.id_length,
            filename_prefix: self.filename_prefix.clone(),
            mount: MountConfig {
                container_workdir: self.container_workdir.clone(),
                ..MountConfig::default()
            },
            metadata_fields: self.metadata_field_list(),
            ..SubstitutionConfig::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.request_timeout_ms == 0 {
            return Err("REQUEST_TIMEOUT_MS must be greater than zero".to_string());
        }
        if self.metadata_field_list().is_empty() {
            return Err("SUBSTITUTER_METADATA_FIELDS must name at least one field".to_string());
        }
        self.substitution_config().validate()
    }
}
