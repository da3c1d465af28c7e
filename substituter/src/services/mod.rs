//! Services layer for the substituter
//!
//! - **Substitution**: composite compendium orchestration

pub mod substitution;

pub use substitution::{CompositeCompendium, SubstitutionService};
