//! Stub Service Supervisor
//!
//! Owns the registry of mock services for this process and drives each
//! (provider, consumer) key through
//! `ABSENT → STARTING → RUNNING → STOPPING → ABSENT`.
//!
//! Locking:
//! - the registry map lock is held only to look up or insert an entry
//! - each entry carries an async `op` lock serializing ensure/stop/restart
//!   on that key across process spawn and HTTP polling
//! - the entry's slot lock guards the in-memory state and is never held
//!   across an `.await`
//!
//! A slow health check therefore blocks only callers of the same key.

use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use super::process::{ChildProcess, LaunchSpec, MockServiceLauncher, StubLauncher};
use super::{IdentityStore, StubDescriptor, StubKey, STUB_SCHEME};
use crate::config::HarnessConfig;
use crate::errors::{HarnessError, Result};
use crate::interaction::InteractionClient;
use crate::port::PortAllocator;
use crate::retry::{retry, Attempt, RetryPolicy};

static DEFAULT_SUPERVISOR: OnceCell<StubSupervisor> = OnceCell::new();

/// Lifecycle state of one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StubState {
    #[default]
    Absent,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for StubState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StubState::Absent => "absent",
            StubState::Starting => "starting",
            StubState::Running => "running",
            StubState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// How a stop request was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited after SIGTERM
    Graceful,
    /// Ignored SIGTERM and was killed
    Escalated,
    /// Already gone when the signal was sent
    AlreadyExited,
    /// Nothing was running for the key
    NotRunning,
}

#[derive(Debug, Default)]
struct StubSlot {
    state: StubState,
    descriptor: Option<StubDescriptor>,
    process: Option<Box<dyn ChildProcess>>,
}

impl StubSlot {
    fn running_url(&self) -> Option<String> {
        match (&self.state, &self.descriptor) {
            (StubState::Running, Some(d)) => Some(d.base_url()),
            _ => None,
        }
    }

    fn clear(&mut self) {
        *self = StubSlot::default();
    }
}

#[derive(Debug, Default)]
struct StubEntry {
    op: tokio::sync::Mutex<()>,
    slot: Mutex<StubSlot>,
}

impl StubEntry {
    fn slot(&self) -> MutexGuard<'_, StubSlot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Supervisor of the mock service processes used by a test run
///
/// Independent instances do not share state, which keeps tests isolated.
/// [`StubSupervisor::global`] provides a process-wide default.
pub struct StubSupervisor {
    config: HarnessConfig,
    ports: PortAllocator,
    identity: IdentityStore,
    client: InteractionClient,
    launcher: Arc<dyn StubLauncher>,
    registry: Mutex<HashMap<StubKey, Arc<StubEntry>>>,
}

impl fmt::Debug for StubSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StubSupervisor")
            .field("bind_address", &self.config.bind_address)
            .field("pid_dir", &self.config.pid_dir)
            .field("keys", &self.lock_registry().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StubSupervisor {
    /// Supervisor launching the real mock service executable
    pub fn new(config: HarnessConfig) -> Result<Self> {
        let launcher = Arc::new(MockServiceLauncher::from_config(&config));
        Self::with_launcher(config, launcher)
    }

    /// Supervisor launching through `launcher`
    pub fn with_launcher(config: HarnessConfig, launcher: Arc<dyn StubLauncher>) -> Result<Self> {
        let client = InteractionClient::new(config.request_timeout)?;
        Ok(Self {
            ports: PortAllocator::new(config.bind_address.clone()),
            identity: IdentityStore::new(&config.pid_dir, client.clone()),
            client,
            launcher,
            registry: Mutex::new(HashMap::new()),
            config,
        })
    }

    /// Process-wide supervisor built from [`HarnessConfig::global`]
    pub fn global() -> Result<&'static StubSupervisor> {
        DEFAULT_SUPERVISOR.get_or_try_init(|| Self::new(HarnessConfig::global().clone()))
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn client(&self) -> &InteractionClient {
        &self.client
    }

    pub fn identity(&self) -> &IdentityStore {
        &self.identity
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    /// Base URL of a running mock service for the pair, starting one if needed
    ///
    /// 1. Registry hit: returned without I/O
    /// 2. Live persisted identity: adopted
    /// 3. Otherwise a new process is launched and health-checked
    ///
    /// # Errors
    /// `Allocation`, `Spawn` or `HealthCheckTimeout`; the key is left ABSENT.
    pub async fn ensure_running(&self, provider: &str, consumer: &str) -> Result<String> {
        let key = StubKey::new(provider, consumer);
        let entry = self.entry(&key);

        let running = entry.slot().running_url();
        if let Some(url) = running {
            return Ok(url);
        }

        let _op = entry.op.lock().await;

        // Another caller may have finished starting it while we waited
        let running = entry.slot().running_url();
        if let Some(url) = running {
            return Ok(url);
        }

        if let Some(descriptor) = self.identity.load(&key).await {
            return Ok(self.adopt(&entry, descriptor));
        }

        self.start(&key, &entry).await
    }

    /// Stop the mock service for the pair
    ///
    /// A key unknown to this process is looked up in the identity store, so a
    /// mock service left running by an earlier run can be stopped too.
    ///
    /// # Errors
    /// `Signal` when the process is alive but cannot be signalled; the key
    /// stays RUNNING in that case.
    pub async fn stop(&self, provider: &str, consumer: &str) -> Result<StopOutcome> {
        let key = StubKey::new(provider, consumer);
        let entry = self.entry(&key);
        let _op = entry.op.lock().await;

        let taken = {
            let mut slot = entry.slot();
            match (slot.state, slot.descriptor.clone(), slot.process.take()) {
                (StubState::Running, Some(descriptor), Some(process)) => {
                    slot.state = StubState::Stopping;
                    Some((descriptor, process))
                }
                (_, _, process) => {
                    slot.process = process;
                    None
                }
            }
        };

        let (mut descriptor, mut process) = match taken {
            Some(taken) => taken,
            None => match self.identity.load(&key).await {
                Some(descriptor) => {
                    let process = self.launcher.adopt(descriptor.pid());
                    let mut slot = entry.slot();
                    slot.state = StubState::Stopping;
                    slot.descriptor = Some(descriptor.clone());
                    (descriptor, process)
                }
                None => {
                    entry.slot().clear();
                    tracing::debug!(provider, consumer, "no mock service to stop");
                    return Ok(StopOutcome::NotRunning);
                }
            },
        };

        let outcome = match self.shutdown(&mut process).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let mut slot = entry.slot();
                slot.state = StubState::Running;
                slot.descriptor = Some(descriptor);
                slot.process = Some(process);
                return Err(e);
            }
        };

        descriptor.mark_stopped();
        if let Err(e) = self.identity.delete(&key) {
            tracing::warn!(
                provider,
                consumer,
                file = %self.identity.path_for(&key).display(),
                error = %e,
                "unable to remove identity file"
            );
        }
        entry.slot().clear();

        tracing::info!(
            provider,
            consumer,
            pid = descriptor.pid(),
            outcome = ?outcome,
            "stopped mock service"
        );
        Ok(outcome)
    }

    /// Stop every RUNNING mock service
    ///
    /// Every key is attempted even when an earlier one fails; failures are
    /// reported together as `StopAll`.
    pub async fn stop_all(&self) -> Result<Vec<(StubKey, StopOutcome)>> {
        let keys: Vec<StubKey> = self.running().into_iter().map(|d| d.key().clone()).collect();

        let mut outcomes = Vec::with_capacity(keys.len());
        let mut failures = Vec::new();

        for key in keys {
            match self.stop(&key.provider, &key.consumer).await {
                Ok(outcome) => outcomes.push((key, outcome)),
                Err(e) => {
                    tracing::error!(provider = %key.provider, consumer = %key.consumer, error = %e, "failed to stop mock service");
                    failures.push(format!("{}: {}", key, e));
                }
            }
        }

        if failures.is_empty() {
            Ok(outcomes)
        } else {
            Err(HarnessError::StopAll { failures })
        }
    }

    /// Stop then start the pair's mock service
    pub async fn restart(&self, provider: &str, consumer: &str) -> Result<String> {
        let outcome = self.stop(provider, consumer).await?;
        tracing::info!(provider, consumer, outcome = ?outcome, "restarting mock service");
        self.ensure_running(provider, consumer).await
    }

    /// Settle the base URL a pair will use without spawning anything
    ///
    /// Adopts a live persisted mock service, otherwise reserves a port.
    pub async fn preassign(&self, provider: &str, consumer: &str) -> Result<String> {
        let key = StubKey::new(provider, consumer);
        let entry = self.entry(&key);
        let _op = entry.op.lock().await;

        let running = entry.slot().running_url();
        if let Some(url) = running {
            return Ok(url);
        }

        if let Some(descriptor) = self.identity.load(&key).await {
            return Ok(self.adopt(&entry, descriptor));
        }

        let port = self.ports.assign(&key)?;
        Ok(format!("{}://{}:{}", STUB_SCHEME, self.config.bind_address, port))
    }

    /// Adopt every live persisted mock service into the registry
    pub async fn adopt_persisted(&self) -> Result<Vec<StubDescriptor>> {
        let mut adopted = Vec::new();

        for record in self.identity.list()? {
            let key = record.key();
            let entry = self.entry(&key);
            let _op = entry.op.lock().await;

            if entry.slot().running_url().is_some() {
                continue;
            }
            if let Some(descriptor) = self.identity.load(&key).await {
                self.adopt(&entry, descriptor.clone());
                adopted.push(descriptor);
            }
        }

        Ok(adopted)
    }

    /// Poll the mock service's verification endpoint under `policy`
    ///
    /// # Errors
    /// - `NotRunning` if the pair has no running mock service
    /// - `VerificationExhausted` naming the provider log once the policy runs out
    /// - `Transport` as soon as the mock service stops answering
    pub async fn verify_interactions(
        &self,
        provider: &str,
        consumer: &str,
        policy: RetryPolicy,
    ) -> Result<()> {
        let base_url = self
            .base_url(provider, consumer)
            .ok_or_else(|| HarnessError::NotRunning {
                provider: provider.to_string(),
                consumer: consumer.to_string(),
            })?;

        let client = &self.client;
        let base_url = base_url.as_str();

        let result = retry(policy, || async move {
            match client.verify(base_url).await {
                Ok(()) => Ok(()),
                Err(e @ HarnessError::VerificationFailed { .. }) => Err(Attempt::Retry(e)),
                Err(e) => Err(Attempt::Abort(e)),
            }
        })
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(err) if err.aborted => Err(err.last),
            Err(err) => {
                let details = match err.last {
                    HarnessError::VerificationFailed { details } => details,
                    other => other.to_string(),
                };
                Err(HarnessError::VerificationExhausted {
                    provider: provider.to_string(),
                    consumer: consumer.to_string(),
                    attempts: err.attempts,
                    details,
                    log_file: self.config.provider_log_file(provider),
                })
            }
        }
    }

    /// Current state of the pair
    pub fn state(&self, provider: &str, consumer: &str) -> StubState {
        let key = StubKey::new(provider, consumer);
        let entry = self.lock_registry().get(&key).cloned();
        entry.as_ref().map(|e| e.slot().state).unwrap_or_default()
    }

    /// Base URL of the pair if it is RUNNING
    pub fn base_url(&self, provider: &str, consumer: &str) -> Option<String> {
        let key = StubKey::new(provider, consumer);
        let entry = self.lock_registry().get(&key).cloned();
        entry.as_ref().and_then(|e| e.slot().running_url())
    }

    /// Snapshot of every RUNNING descriptor, ordered by key
    pub fn running(&self) -> Vec<StubDescriptor> {
        let entries: Vec<Arc<StubEntry>> = self.lock_registry().values().cloned().collect();

        let mut running: Vec<StubDescriptor> = entries
            .iter()
            .filter_map(|entry| {
                let slot = entry.slot();
                match slot.state {
                    StubState::Running => slot.descriptor.clone(),
                    _ => None,
                }
            })
            .collect();
        running.sort_by(|a, b| a.key().cmp(b.key()));
        running
    }

    /// Forget every entry and port reservation without touching processes
    ///
    /// Makes this supervisor behave like a freshly started test process;
    /// meant for tests exercising cross-run reuse.
    pub fn reset_registry(&self) {
        self.lock_registry().clear();
        self.ports.clear();
    }

    fn entry(&self, key: &StubKey) -> Arc<StubEntry> {
        self.lock_registry()
            .entry(key.clone())
            .or_default()
            .clone()
    }

    fn lock_registry(&self) -> MutexGuard<'_, HashMap<StubKey, Arc<StubEntry>>> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn adopt(&self, entry: &StubEntry, descriptor: StubDescriptor) -> String {
        self.ports.reserve(descriptor.key(), descriptor.port());
        let process = self.launcher.adopt(descriptor.pid());
        let url = descriptor.base_url();

        let mut slot = entry.slot();
        slot.state = StubState::Running;
        slot.descriptor = Some(descriptor);
        slot.process = Some(process);
        url
    }

    async fn start(&self, key: &StubKey, entry: &StubEntry) -> Result<String> {
        let port = self.ports.assign(key)?;
        let spec = LaunchSpec::from_config(&self.config, key, port);

        entry.slot().state = StubState::Starting;

        let mut process = match self.launcher.launch(&spec) {
            Ok(process) => process,
            Err(e) => {
                entry.slot().clear();
                return Err(e);
            }
        };

        let mut descriptor =
            StubDescriptor::new(key.clone(), &self.config.bind_address, port, process.pid());
        entry.slot().descriptor = Some(descriptor.clone());

        tracing::info!(
            provider = %key.provider,
            consumer = %key.consumer,
            pid = descriptor.pid(),
            port,
            "started mock service, waiting for it to answer"
        );

        if let Err((attempts, reason)) = self.await_healthy(process.as_mut(), &descriptor.base_url()).await {
            if process.is_alive() {
                if let Err(e) = process.kill() {
                    tracing::warn!(pid = descriptor.pid(), error = %e, "unable to kill unhealthy mock service");
                }
            }
            let output = process.output();
            self.ports.release(key);
            entry.slot().clear();

            return Err(HarnessError::HealthCheckTimeout {
                provider: key.provider.clone(),
                consumer: key.consumer.clone(),
                pid: descriptor.pid(),
                attempts,
                reason,
                output,
            });
        }

        descriptor.mark_running();
        if let Err(e) = self.identity.save(&descriptor) {
            tracing::warn!(
                provider = %key.provider,
                consumer = %key.consumer,
                error = %e,
                "unable to persist mock service identity, it will not be reused"
            );
        }

        let url = descriptor.base_url();
        let mut slot = entry.slot();
        slot.state = StubState::Running;
        slot.descriptor = Some(descriptor);
        slot.process = Some(process);
        Ok(url)
    }

    /// Ping until healthy; a process exit ends the wait at once
    async fn await_healthy(
        &self,
        process: &mut dyn ChildProcess,
        base_url: &str,
    ) -> std::result::Result<(), (u32, String)> {
        let mut clock = self.config.health_check.clock();
        let mut reason = String::from("never polled");

        while clock.next_attempt().await {
            if let Some(exit) = process.try_exit() {
                return Err((clock.attempts(), format!("process {}", exit)));
            }

            match self.client.ping(base_url).await {
                Ok(()) => {
                    tracing::debug!(base_url, attempts = clock.attempts(), "mock service is healthy");
                    return Ok(());
                }
                Err(e) => reason = e.to_string(),
            }
        }

        Err((clock.attempts(), reason))
    }

    /// SIGTERM, wait under the shutdown policy, then SIGKILL
    async fn shutdown(&self, process: &mut Box<dyn ChildProcess>) -> Result<StopOutcome> {
        let pid = process.pid();

        if let Err(e) = process.terminate() {
            if !process.is_alive() {
                return Ok(StopOutcome::AlreadyExited);
            }
            return Err(HarnessError::Signal {
                pid,
                message: e.to_string(),
            });
        }

        let mut clock = self.config.shutdown.clock();
        while clock.next_attempt().await {
            if !process.is_alive() {
                return Ok(StopOutcome::Graceful);
            }
        }

        tracing::warn!(
            pid,
            attempts = clock.attempts(),
            "mock service still alive after SIGTERM, sending SIGKILL"
        );

        if let Err(e) = process.kill() {
            if process.is_alive() {
                return Err(HarnessError::Signal {
                    pid,
                    message: e.to_string(),
                });
            }
        }
        Ok(StopOutcome::Escalated)
    }
}
