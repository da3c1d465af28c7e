//! Identifier generation for composite compendia
//!
//! Identifiers are short `[0-9a-zA-Z]` strings. Generation never checks for
//! uniqueness itself; the caller re-invokes `generate` until the storage
//! collaborator reports a free identifier.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Source of candidate identifiers
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Generator drawing uniformly from `[0-9a-zA-Z]` using the thread RNG
#[derive(Debug, Clone)]
pub struct RandomIdGenerator {
    length: usize,
}

impl RandomIdGenerator {
    pub fn new(length: usize) -> Self {
        Self { length }
    }
}

impl Default for RandomIdGenerator {
    fn default() -> Self {
        Self::new(5)
    }
}

impl IdGenerator for RandomIdGenerator {
    fn generate(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.length)
            .map(char::from)
            .collect()
    }
}
