//! Substitution core for research compendia
//!
//! Pure building blocks used by the substituter service to compose a new
//! compendium out of a base and an overlay:
//!
//! - **ids**: short alphanumeric identifiers for composite artifacts
//! - **paths**: tree-relative path validation and payload re-rooting
//! - **filename**: collision-free destination names at the payload top level
//! - **recipe**: `erc.yml` parsing and read-only bind-mount injection
//! - **rewrite**: identifier re-homing across well-known metadata fields
//!
//! Nothing in this crate performs I/O. Storage, persistence and the HTTP
//! boundary live in the `substituter` crate.

pub mod config;
pub mod error;
pub mod filename;
pub mod ids;
pub mod paths;
pub mod recipe;
pub mod rewrite;
pub mod types;

pub use config::{MountConfig, SubstitutionConfig};
pub use error::CoreError;
pub use filename::resolve_filename;
pub use ids::{IdGenerator, RandomIdGenerator};
pub use recipe::{ExecutionRecipe, MountSubstitution, RecipeMutator};
pub use rewrite::MetadataRewriter;
pub use types::{
    MetadataHandling, SubstitutionBlock, SubstitutionFile, SubstitutionFileRecord,
    SubstitutionRequest,
};
