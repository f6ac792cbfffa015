//! Engine configuration.

use std::path::{Path, PathBuf};

use crate::storage::{BranchName, FormatVersion, Signature};

/// Configuration shared by every database an engine serves.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// directory holding one bare repository per database; `None` keeps
    /// every database in memory
    pub root: Option<PathBuf>,
    /// create databases on first bind instead of failing
    pub create_if_missing: bool,
    /// default branch of newly created databases
    pub default_branch: BranchName,
    /// storage format of newly created databases
    pub format: FormatVersion,
    /// how many times a ref edit is replayed after losing a manifest race
    pub max_cas_retries: usize,
    /// author of commits made through sessions
    pub signature: Signature,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: Some(PathBuf::from(".revdb")),
            create_if_missing: false,
            default_branch: BranchName::main(),
            format: FormatVersion::LATEST,
            max_cas_retries: 8,
            signature: Signature::revdb(),
        }
    }
}

impl EngineConfig {
    /// Create a new configuration rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Default::default()
        }
    }

    /// configuration whose databases live only in memory
    pub fn in_memory() -> Self {
        Self {
            root: None,
            create_if_missing: true,
            ..Default::default()
        }
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn default_branch(mut self, branch: BranchName) -> Self {
        self.default_branch = branch;
        self
    }

    pub fn format(mut self, format: FormatVersion) -> Self {
        self.format = format;
        self
    }

    pub fn max_cas_retries(mut self, retries: usize) -> Self {
        self.max_cas_retries = retries;
        self
    }

    pub fn signature(mut self, signature: Signature) -> Self {
        self.signature = signature;
        self
    }

    /// on-disk location of a database, if the engine is disk backed
    pub fn database_path(&self, database: &str) -> Option<PathBuf> {
        self.root.as_deref().map(|root: &Path| root.join(database))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = EngineConfig::new("/tmp/dbs")
            .create_if_missing(true)
            .format(FormatVersion::V1)
            .max_cas_retries(3);

        assert!(config.create_if_missing);
        assert_eq!(config.format, FormatVersion::V1);
        assert_eq!(config.max_cas_retries, 3);
        assert_eq!(config.default_branch, BranchName::main());
        assert_eq!(config.database_path("shop"), Some(PathBuf::from("/tmp/dbs/shop")));
    }

    #[test]
    fn test_in_memory_has_no_paths() {
        let config = EngineConfig::in_memory();
        assert!(config.database_path("shop").is_none());
        assert!(config.create_if_missing);
    }
}
