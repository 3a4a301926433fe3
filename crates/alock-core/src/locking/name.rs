//! Lock name validation and resolution to lock file paths
//!
//! Two processes that agree on a name and a lock directory always compute the
//! same [`ResourceLocator`]. The file name is derived from a SHA-256 digest of
//! the name, so arbitrary (valid) names never leak into the path itself.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

/// Maximum length of a lock name in bytes
pub const MAX_NAME_LEN: usize = 255;

const FILE_PREFIX: &str = "alock-";
const FILE_EXTENSION: &str = "lock";

/// A validated lock name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockName(String);

impl LockName {
    /// Validate a caller-supplied name
    pub fn parse(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::invalid_name(name, "name is empty"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(Error::invalid_name(
                name,
                format!("name is longer than {MAX_NAME_LEN} bytes"),
            ));
        }
        if name.contains(['/', '\\']) {
            return Err(Error::invalid_name(name, "name contains a path separator"));
        }
        if name.contains("..") {
            return Err(Error::invalid_name(name, "name contains '..'"));
        }
        if name.chars().any(char::is_control) {
            return Err(Error::invalid_name(name, "name contains control characters"));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Concrete lock file backing a [`LockName`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceLocator {
    name: LockName,
    path: PathBuf,
}

impl ResourceLocator {
    pub fn name(&self) -> &LockName {
        &self.name
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for ResourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.path.display())
    }
}

/// Maps lock names onto files inside a shared lock directory
#[derive(Debug, Clone)]
pub struct NameResolver {
    lock_dir: PathBuf,
}

impl NameResolver {
    pub fn new(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            lock_dir: lock_dir.into(),
        }
    }

    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }

    /// Resolve a name to its lock file. Pure: no file is touched.
    pub fn resolve(&self, name: &str) -> Result<ResourceLocator> {
        let name = LockName::parse(name)?;
        let digest = hex::encode(Sha256::digest(name.as_str().as_bytes()));
        let path = self
            .lock_dir
            .join(format!("{FILE_PREFIX}{digest}.{FILE_EXTENSION}"));

        Ok(ResourceLocator { name, path })
    }
}
