//! Stub (mock service) lifecycle
//!
//! - [`StubDescriptor`]: identity and address of one mock service process
//! - [`IdentityStore`]: descriptors persisted across test processes
//! - [`ChildProcess`] / [`StubLauncher`]: OS process handle abstraction
//! - [`StubSupervisor`]: one live mock service per (provider, consumer)

mod descriptor;
mod identity;
mod process;
mod supervisor;

pub use descriptor::{StubDescriptor, StubRecord, STUB_SCHEME};
pub use identity::IdentityStore;
pub use process::{
    is_process_running, AdoptedProcess, ChildProcess, LaunchSpec, MockServiceLauncher,
    ProcessExit, SpawnedProcess, StubLauncher,
};
pub use supervisor::{StopOutcome, StubState, StubSupervisor};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Natural key of a stub: the two parties of a contract
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StubKey {
    pub provider: String,
    pub consumer: String,
}

impl StubKey {
    pub fn new(provider: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            consumer: consumer.into(),
        }
    }

    /// File name stem unique to this pair: `pact-{provider}-{consumer}`
    ///
    /// `-`, `%` and path separators inside a name are percent-escaped, so
    /// `("a-b", "c")` and `("a", "b-c")` never share a file.
    pub fn file_stem(&self) -> String {
        format!(
            "pact-{}-{}",
            escape_name(&self.provider),
            escape_name(&self.consumer)
        )
    }
}

fn escape_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '-' => escaped.push_str("%2D"),
            '/' => escaped.push_str("%2F"),
            '\\' => escaped.push_str("%5C"),
            c => escaped.push(c),
        }
    }
    escaped
}

impl fmt::Display for StubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.consumer)
    }
}
