//! Stub descriptor and its persisted form

use reqwest::Url;
use serde::{Deserialize, Serialize};

use super::StubKey;
use crate::errors::{HarnessError, Result};

/// Scheme every mock service is reached on
pub const STUB_SCHEME: &str = "http";

/// Identity and connection info for one mock service process
///
/// The base URL is always derived from the bind address and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubDescriptor {
    key: StubKey,
    host: String,
    port: u16,
    pid: u32,
    running: bool,
}

impl StubDescriptor {
    /// New descriptor, not yet running
    pub fn new(key: StubKey, host: impl Into<String>, port: u16, pid: u32) -> Self {
        Self {
            key,
            host: host.into(),
            port,
            pid,
            running: false,
        }
    }

    pub fn key(&self) -> &StubKey {
        &self.key
    }

    pub fn provider(&self) -> &str {
        &self.key.provider
    }

    pub fn consumer(&self) -> &str {
        &self.key.consumer
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// `http://{host}:{port}`
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", STUB_SCHEME, self.host, self.port)
    }

    /// In-memory only, never read back from disk
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub(crate) fn mark_running(&mut self) {
        self.running = true;
    }

    pub(crate) fn mark_stopped(&mut self) {
        self.running = false;
    }

    /// Persisted form of this descriptor
    pub fn to_record(&self) -> StubRecord {
        StubRecord {
            port: self.port,
            base_url: self.base_url(),
            consumer: self.key.consumer.clone(),
            provider: self.key.provider.clone(),
            pid: self.pid,
        }
    }
}

/// Persisted identity file format
///
/// ```json
/// {"port":41234,"base_url":"http://127.0.0.1:41234","consumer":"harness","provider":"serviceA","pid":4242}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StubRecord {
    pub port: u16,
    pub base_url: String,
    pub consumer: String,
    pub provider: String,
    pub pid: u32,
}

impl StubRecord {
    pub fn key(&self) -> StubKey {
        StubKey::new(&self.provider, &self.consumer)
    }

    /// Rebuild a descriptor, rejecting records whose URL disagrees with the port
    ///
    /// The descriptor comes back not running; liveness is for the caller to
    /// confirm.
    pub fn into_descriptor(self) -> Result<StubDescriptor> {
        let url = Url::parse(&self.base_url).map_err(|e| {
            HarnessError::Contract(format!("Invalid base_url {:?}: {}", self.base_url, e))
        })?;

        let host = url
            .host_str()
            .ok_or_else(|| HarnessError::Contract(format!("No host in base_url {:?}", self.base_url)))?
            .to_string();

        if url.scheme() != STUB_SCHEME || url.port_or_known_default() != Some(self.port) {
            return Err(HarnessError::Contract(format!(
                "base_url {:?} does not match port {}",
                self.base_url, self.port
            )));
        }

        Ok(StubDescriptor::new(self.key(), host, self.port, self.pid))
    }
}
