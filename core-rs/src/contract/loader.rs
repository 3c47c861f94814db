//! Contract files under the contracts directory

use std::fs;
use std::path::{Path, PathBuf};

use super::{group_by_pair, Contract};
use crate::errors::{HarnessError, Result};

/// Reads contracts by name from one directory
#[derive(Debug, Clone)]
pub struct ContractLoader {
    dir: PathBuf,
}

impl ContractLoader {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File a contract name refers to; `.json` is appended when missing
    pub fn path_for(&self, name: &str) -> PathBuf {
        if name.ends_with(".json") {
            self.dir.join(name)
        } else {
            self.dir.join(format!("{}.json", name))
        }
    }

    /// Read and parse one contract
    ///
    /// # Errors
    /// `Contract` naming the file when it cannot be read or parsed.
    pub fn read(&self, name: &str) -> Result<Contract> {
        let path = self.path_for(name);
        let bytes = fs::read(&path).map_err(|e| {
            HarnessError::Contract(format!("Failed to read contract {}: {}", path.display(), e))
        })?;

        serde_json::from_slice(&bytes).map_err(|e| {
            HarnessError::Contract(format!("Invalid contract {}: {}", path.display(), e))
        })
    }

    pub fn read_all<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Contract>> {
        names.iter().map(|name| self.read(name.as_ref())).collect()
    }

    /// [`read_all`](Self::read_all) merged per (provider, consumer)
    pub fn read_grouped<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Contract>> {
        Ok(group_by_pair(self.read_all(names)?))
    }

    /// Every `*.json` file below the directory, sorted
    pub fn discover(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for entry in walkdir::WalkDir::new(&self.dir) {
            let entry = entry.map_err(|e| {
                HarnessError::Contract(format!("Failed to scan {}: {}", self.dir.display(), e))
            })?;

            if entry.file_type().is_file()
                && entry.path().extension().and_then(|s| s.to_str()) == Some("json")
            {
                found.push(entry.into_path());
            }
        }

        found.sort();
        Ok(found)
    }

    /// Contract names (paths relative to the directory) as accepted by [`read`](Self::read)
    pub fn discover_names(&self) -> Result<Vec<String>> {
        Ok(self
            .discover()?
            .iter()
            .filter_map(|path| path.strip_prefix(&self.dir).ok())
            .map(|rel| rel.to_string_lossy().into_owned())
            .collect())
    }
}
