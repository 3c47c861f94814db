//! Error types for the pact harness

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Port allocation error: {0}")]
    Allocation(#[source] std::io::Error),

    #[error("Failed to spawn mock service `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "Mock service for {provider}/{consumer} (pid {pid}) did not report healthy after {attempts} attempt(s): {reason}\nstdout: {output}"
    )]
    HealthCheckTimeout {
        provider: String,
        consumer: String,
        pid: u32,
        attempts: u32,
        reason: String,
        output: String,
    },

    #[error("Interaction rejected with status {status}: {body}\npayload: {payload}")]
    InteractionRejected {
        status: u16,
        body: String,
        payload: String,
    },

    #[error("Pact verification failed: {details}")]
    VerificationFailed { details: String },

    #[error(
        "Pact interactions not matched for {provider}/{consumer} after {attempts} attempt(s) - for details see {}\n{details}",
        log_file.display()
    )]
    VerificationExhausted {
        provider: String,
        consumer: String,
        attempts: u32,
        details: String,
        log_file: PathBuf,
    },

    #[error("Transport error talking to {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Unexpected status {status} from {url}: {body}")]
    UnexpectedStatus {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Failed to signal pid {pid}: {message}")]
    Signal { pid: u32, message: String },

    #[error("No running mock service for {provider}/{consumer}")]
    NotRunning { provider: String, consumer: String },

    #[error("Failed to stop {} mock service(s): {}", failures.len(), failures.join("; "))]
    StopAll { failures: Vec<String> },

    #[error("Contract error: {0}")]
    Contract(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl HarnessError {
    /// True when the stub could not be reached at all, as opposed to the stub
    /// answering with a rejection. Callers use this to decide on a restart.
    pub fn is_transport(&self) -> bool {
        matches!(self, HarnessError::Transport { .. })
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
