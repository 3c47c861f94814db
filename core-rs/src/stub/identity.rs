//! Persisted stub identities
//!
//! One JSON file per (provider, consumer) under the pid directory:
//! `{pid_dir}/pact-{provider}-{consumer}.json` (see [`StubKey::file_stem`]).
//! A later test process finds
//! the file, confirms the mock service still answers, and reuses it instead
//! of spawning a duplicate.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{StubDescriptor, StubKey, StubRecord};
use crate::errors::Result;
use crate::interaction::InteractionClient;

/// Identity Store - stub descriptors persisted on disk
#[derive(Debug, Clone)]
pub struct IdentityStore {
    dir: PathBuf,
    client: InteractionClient,
}

impl IdentityStore {
    /// Store rooted at `dir`; `client` is used for liveness checks on load
    pub fn new<P: AsRef<Path>>(dir: P, client: InteractionClient) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            client,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Identity file for `key`
    pub fn path_for(&self, key: &StubKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.file_stem()))
    }

    /// Load a persisted descriptor and confirm it is alive
    ///
    /// Never returns a descriptor without a successful liveness request. A
    /// record that does not answer, or cannot be parsed, is deleted.
    pub async fn load(&self, key: &StubKey) -> Option<StubDescriptor> {
        let path = self.path_for(key);

        let record = match self.read_record(key) {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!(file = %path.display(), error = %e, "unable to read stub identity file");
                self.discard(key);
                return None;
            }
        };

        // Written by hand or by an older naming scheme; belongs to someone else
        if record.key() != *key {
            tracing::warn!(
                provider = %key.provider,
                consumer = %key.consumer,
                file = %path.display(),
                found = %record.key(),
                "identity file belongs to another pair, ignoring it"
            );
            return None;
        }

        let mut descriptor = match record.into_descriptor() {
            Ok(descriptor) => descriptor,
            Err(e) => {
                tracing::error!(file = %path.display(), error = %e, "corrupt stub identity file");
                self.discard(key);
                return None;
            }
        };

        if let Err(e) = self.client.ping(&descriptor.base_url()).await {
            tracing::warn!(
                provider = %key.provider,
                consumer = %key.consumer,
                pid = descriptor.pid(),
                file = %path.display(),
                error = %e,
                "persisted mock service no longer responding, will start a new one"
            );
            self.discard(key);
            return None;
        }

        descriptor.mark_running();
        tracing::info!(
            provider = %key.provider,
            base_url = %descriptor.base_url(),
            pid = descriptor.pid(),
            "reusing existing mock service"
        );
        Some(descriptor)
    }

    /// Read the raw record without any liveness check
    pub fn read_record(&self, key: &StubKey) -> Result<Option<StubRecord>> {
        Self::read_file(&self.path_for(key))
    }

    /// Every record in the store, unchecked
    pub fn list(&self) -> Result<Vec<StubRecord>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_identity = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("pact-") && n.ends_with(".json"))
                .unwrap_or(false);
            if !is_identity {
                continue;
            }

            match Self::read_file(&path) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "skipping unreadable identity file")
                }
            }
        }

        records.sort_by_key(|r| r.key());
        Ok(records)
    }

    /// Persist `descriptor`, replacing any earlier record for its key
    pub fn save(&self, descriptor: &StubDescriptor) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let path = self.path_for(descriptor.key());
        let json = serde_json::to_vec(&descriptor.to_record())?;

        // Readers in other processes must never see a half-written file
        let tmp = path.with_extension(format!("json.{}.tmp", std::process::id()));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Remove the record for `key`; absence is not an error
    pub fn delete(&self, key: &StubKey) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn discard(&self, key: &StubKey) {
        if let Err(e) = self.delete(key) {
            tracing::warn!(file = %self.path_for(key).display(), error = %e, "unable to remove stale identity file");
        }
    }

    fn read_file(path: &Path) -> Result<Option<StubRecord>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}
