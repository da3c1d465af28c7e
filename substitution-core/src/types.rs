//! Request and record types shared by the core and the service

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// One requested file pairing, both paths tree-relative
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionFile {
    /// File in the base compendium to be shadowed
    pub base: String,
    /// File in the overlay compendium providing the new content
    pub overlay: String,
}

impl SubstitutionFile {
    pub fn new(base: impl Into<String>, overlay: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            overlay: overlay.into(),
        }
    }
}

/// Body of `POST /api/v1/substitution`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubstitutionRequest {
    /// Base compendium identifier
    pub base: String,
    /// Overlay compendium identifier
    pub overlay: String,
    #[serde(default)]
    pub substitution_files: Vec<SubstitutionFile>,
    /// Kept as free text so unknown values fail as a policy error, not a parse error
    #[serde(default)]
    pub metadata_handling: Option<String>,
}

impl SubstitutionRequest {
    pub fn new(
        base: impl Into<String>,
        overlay: impl Into<String>,
        substitution_files: Vec<SubstitutionFile>,
        metadata_handling: MetadataHandling,
    ) -> Self {
        Self {
            base: base.into(),
            overlay: overlay.into(),
            substitution_files,
            metadata_handling: Some(metadata_handling.to_string()),
        }
    }

    /// Requested metadata policy; missing or unknown values are rejected
    pub fn policy(&self) -> Result<MetadataHandling, CoreError> {
        match self.metadata_handling.as_deref() {
            Some(value) => value.parse(),
            None => Err(CoreError::UnsupportedPolicy(
                "metadataHandling is required".to_string(),
            )),
        }
    }
}

/// How base and overlay metadata are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataHandling {
    /// Base metadata is the template; overlay metadata only shows up in the
    /// `substitution` block
    #[serde(rename = "keepBase")]
    KeepBase,
}

impl FromStr for MetadataHandling {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keepBase" => Ok(Self::KeepBase),
            other => Err(CoreError::UnsupportedPolicy(format!(
                "'{}' is not a supported metadataHandling value",
                other
            ))),
        }
    }
}

impl fmt::Display for MetadataHandling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeepBase => write!(f, "keepBase"),
        }
    }
}

/// Persisted outcome of one file pairing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionFileRecord {
    pub base: String,
    pub overlay: String,
    /// Top-level destination name of the overlay content in the composite
    pub filename: String,
}

/// `metadata.substitution` of a composite compendium
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubstitutionBlock {
    pub base: String,
    pub overlay: String,
    pub substitution_files: Vec<SubstitutionFileRecord>,
}
