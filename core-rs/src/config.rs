/**
 * config.rs
 * Harness configuration: defaults, optional .pacttesting.yaml, environment
 *
 * Format:
 * ```yaml
 * bind_address: 0.0.0.0
 * executable: /opt/pact/bin/pact-mock-service
 * specification_version: 3
 * contracts_dir: pacts
 * pact_dir: target
 * log_dir: pact/logs
 * pid_dir: pact/pids
 * expose_env: true
 * request_timeout_ms: 5000
 * ```
 *
 * Precedence: environment > file > defaults. Relative paths in the file are
 * resolved against the work directory.
 */

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::errors::{HarnessError, Result};
use crate::retry::RetryPolicy;

/// Name of the optional config file inside the work directory
pub const CONFIG_FILE_NAME: &str = ".pacttesting.yaml";

/// Mock service executable looked up on the search paths
pub const MOCK_SERVICE_BINARY: &str = "pact-mock-service";

pub const ENV_BIND_ADDRESS: &str = "PACT_BIND_ADDRESS";
pub const ENV_MOCK_SERVICE: &str = "PACTTESTING_MOCK_SERVICE";
pub const ENV_SEARCH_PATH: &str = "PACTTESTING_PATH";
pub const ENV_KEEP_ALIVE: &str = "PACTTESTING_KEEP_ALIVE";

static GLOBAL_CONFIG: OnceCell<HarnessConfig> = OnceCell::new();

/// .pacttesting.yaml file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specification_version: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contracts_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pact_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expose_env: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
}

impl ConfigFile {
    /// Load a config file, `Ok(None)` when it does not exist
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path).map_err(|e| {
            HarnessError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let file: ConfigFile = serde_yaml::from_str(&content).map_err(|e| {
            HarnessError::Config(format!("Invalid {}: {}", path.display(), e))
        })?;

        Ok(Some(file))
    }
}

/// Process-wide harness configuration
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    /// Address the mock services bind to and are reached on
    pub bind_address: String,
    /// Explicit mock service executable; `None` means resolve on search paths
    pub executable: Option<PathBuf>,
    /// Extra directories searched for the mock service executable
    pub search_paths: Vec<PathBuf>,
    /// Pact specification version passed to the mock service
    pub specification_version: u8,
    pub work_dir: PathBuf,
    /// Where contract files are read from
    pub contracts_dir: PathBuf,
    /// Where the mock service writes merged pact files
    pub pact_dir: PathBuf,
    /// Per-provider mock service logs
    pub log_dir: PathBuf,
    /// Persisted stub identities
    pub pid_dir: PathBuf,
    /// Leave stubs running at teardown so later runs can reuse them
    pub keep_alive: bool,
    /// Export `PACTTESTING_<PROVIDER>` with each stub's base URL
    pub expose_env: bool,
    pub request_timeout: Duration,
    pub health_check: RetryPolicy,
    pub shutdown: RetryPolicy,
    pub verification: RetryPolicy,
}

impl HarnessConfig {
    /// Defaults rooted at `work_dir`, no file or environment applied
    pub fn for_dir<P: AsRef<Path>>(work_dir: P) -> Self {
        let work_dir = work_dir.as_ref().to_path_buf();
        Self {
            bind_address: "127.0.0.1".to_string(),
            executable: None,
            search_paths: Vec::new(),
            specification_version: crate::DEFAULT_SPECIFICATION_VERSION,
            contracts_dir: work_dir.join("pacts"),
            pact_dir: work_dir.join("target"),
            log_dir: work_dir.join("pact").join("logs"),
            pid_dir: work_dir.join("pact").join("pids"),
            keep_alive: false,
            expose_env: true,
            request_timeout: Duration::from_secs(5),
            health_check: RetryPolicy::HEALTH_CHECK,
            shutdown: RetryPolicy::SHUTDOWN,
            verification: RetryPolicy::VERIFICATION,
            work_dir,
        }
    }

    /// Full configuration for the current directory
    pub fn from_env() -> Result<Self> {
        let work_dir = std::env::current_dir()?;
        let mut config = Self::for_dir(&work_dir);

        if let Some(file) = ConfigFile::load(work_dir.join(CONFIG_FILE_NAME))? {
            config = config.with_file(file);
        }

        config = config.with_env(|key| std::env::var(key).ok());

        if config.search_paths.is_empty() {
            if let Some(top) = git_top_level_dir() {
                config.search_paths = vec![
                    top.join("pact").join("bin"),
                    top.join("tools").join("pact").join("bin"),
                ];
            }
        }

        Ok(config)
    }

    /// Configuration shared by the default supervisor, read once per process
    pub fn global() -> &'static HarnessConfig {
        GLOBAL_CONFIG.get_or_init(|| match Self::from_env() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "falling back to default harness configuration");
                Self::for_dir(".")
            }
        })
    }

    /// Layer a parsed config file over this configuration
    pub fn with_file(mut self, file: ConfigFile) -> Self {
        let resolve = |p: PathBuf| {
            if p.is_absolute() {
                p
            } else {
                self.work_dir.join(p)
            }
        };

        let contracts_dir = file.contracts_dir.map(resolve);
        let pact_dir = file.pact_dir.map(resolve);
        let log_dir = file.log_dir.map(resolve);
        let pid_dir = file.pid_dir.map(resolve);
        let executable = file.executable.map(resolve);

        if let Some(v) = file.bind_address {
            self.bind_address = v;
        }
        if executable.is_some() {
            self.executable = executable;
        }
        if let Some(v) = file.specification_version {
            self.specification_version = v;
        }
        if let Some(v) = contracts_dir {
            self.contracts_dir = v;
        }
        if let Some(v) = pact_dir {
            self.pact_dir = v;
        }
        if let Some(v) = log_dir {
            self.log_dir = v;
        }
        if let Some(v) = pid_dir {
            self.pid_dir = v;
        }
        if let Some(v) = file.keep_alive {
            self.keep_alive = v;
        }
        if let Some(v) = file.expose_env {
            self.expose_env = v;
        }
        if let Some(ms) = file.request_timeout_ms {
            self.request_timeout = Duration::from_millis(ms);
        }
        self
    }

    /// Layer environment overrides using `lookup` (normally `std::env::var`)
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(bind) = non_empty(ENV_BIND_ADDRESS) {
            self.bind_address = bind;
        }
        if let Some(exe) = non_empty(ENV_MOCK_SERVICE) {
            self.executable = Some(PathBuf::from(exe));
        }
        if let Some(paths) = non_empty(ENV_SEARCH_PATH) {
            self.search_paths = std::env::split_paths(&paths).collect();
        }
        if let Some(flag) = non_empty(ENV_KEEP_ALIVE) {
            self.keep_alive = matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        self
    }

    /// Executable to launch: explicit override, first hit on the search
    /// paths, or the bare name left to the OS `PATH` lookup.
    pub fn resolve_executable(&self) -> PathBuf {
        if let Some(exe) = &self.executable {
            return exe.clone();
        }

        self.search_paths
            .iter()
            .map(|dir| dir.join(MOCK_SERVICE_BINARY))
            .find(|candidate| candidate.is_file())
            .unwrap_or_else(|| PathBuf::from(MOCK_SERVICE_BINARY))
    }

    /// Log file the mock service for `provider` writes to
    pub fn provider_log_file(&self, provider: &str) -> PathBuf {
        self.log_dir.join(format!("pact-{}.log", provider))
    }
}

/// Top level of the enclosing git checkout, if any
fn git_top_level_dir() -> Option<PathBuf> {
    let output = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let top = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
    if top.is_empty() {
        None
    } else {
        Some(PathBuf::from(top))
    }
}
