//! Test-facing flows on top of the supervisor
//!
//! A consumer test names the contracts it relies on; the harness makes sure
//! a mock service runs for every (provider, consumer) pair, pushes the
//! interactions, runs the test body and clears the interactions again.

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::HarnessConfig;
use crate::contract::{Contract, ContractLoader};
use crate::errors::Result;
use crate::retry::RetryPolicy;
use crate::stub::{StopOutcome, StubKey, StubSupervisor};

/// Prefix of the environment variables carrying stub base URLs
pub const ENV_URL_PREFIX: &str = "PACTTESTING_";

/// Environment variable holding the base URL of `provider`'s stub
///
/// `"user-service"` becomes `PACTTESTING_USER_SERVICE`.
pub fn env_key(provider: &str) -> String {
    let suffix: String = provider
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}{}", ENV_URL_PREFIX, suffix)
}

/// Interactions pushed to each pair since its last reset
type Registered = HashMap<StubKey, Vec<JsonValue>>;

/// Contract-driven test flows against one supervisor
///
/// Clones share the record of pushed interactions, which is replayed onto a
/// mock service that had to be restarted.
#[derive(Debug, Clone)]
pub struct PactHarness<'s> {
    supervisor: &'s StubSupervisor,
    loader: ContractLoader,
    registered: Arc<Mutex<Registered>>,
}

impl PactHarness<'static> {
    /// Harness over [`StubSupervisor::global`]
    pub fn global() -> Result<Self> {
        Ok(Self::new(StubSupervisor::global()?))
    }
}

impl<'s> PactHarness<'s> {
    /// Harness reading contracts from the supervisor's configured contracts dir
    pub fn new(supervisor: &'s StubSupervisor) -> Self {
        let loader = ContractLoader::new(&supervisor.config().contracts_dir);
        Self::with_loader(supervisor, loader)
    }

    pub fn with_loader(supervisor: &'s StubSupervisor, loader: ContractLoader) -> Self {
        Self {
            supervisor,
            loader,
            registered: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn supervisor(&self) -> &'s StubSupervisor {
        self.supervisor
    }

    pub fn loader(&self) -> &ContractLoader {
        &self.loader
    }

    pub fn config(&self) -> &HarnessConfig {
        self.supervisor.config()
    }

    /// Fix the base URL of every pair named by `contracts` before any stub
    /// is started, so the code under test can be configured up front
    ///
    /// Safe to call repeatedly for the same contracts.
    pub async fn preassign_ports<S: AsRef<str>>(&self, contracts: &[S]) -> Result<Vec<(StubKey, String)>> {
        let mut assigned = Vec::new();

        for contract in self.loader.read_grouped(contracts)? {
            let key = contract.key();
            let url = self.supervisor.preassign(&key.provider, &key.consumer).await?;
            self.expose_url(&key.provider, &url);
            assigned.push((key, url));
        }

        Ok(assigned)
    }

    /// Run `body` with stubs serving `contracts`; calls are not verified
    pub async fn test_with_stub_services<S, F, Fut, T>(&self, contracts: &[S], body: F) -> Result<T>
    where
        S: AsRef<str>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.run(contracts, body, None).await
    }

    /// Run `body` with stubs serving `contracts`, then verify every pair the
    /// contracts name under `policy`
    ///
    /// # Errors
    /// `VerificationExhausted` for the first pair whose interactions were not
    /// all matched.
    pub async fn run_integration_test<S, F, Fut, T>(
        &self,
        contracts: &[S],
        body: F,
        policy: Option<RetryPolicy>,
    ) -> Result<T>
    where
        S: AsRef<str>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let policy = policy.unwrap_or(self.config().verification);
        self.run(contracts, body, Some(policy)).await
    }

    /// Start stubs for one contract and register its interactions
    pub async fn add_pact(&self, name: &str) -> Result<()> {
        for contract in self.loader.read_grouped(&[name])? {
            self.serve(&contract).await?;
        }
        Ok(())
    }

    /// Register one interaction, starting the pair's stub if needed
    pub async fn add_interaction(&self, provider: &str, consumer: &str, payload: &JsonValue) -> Result<()> {
        let url = self.supervisor.ensure_running(provider, consumer).await?;
        self.expose_url(provider, &url);
        self.push(provider, consumer, &url, payload).await
    }

    /// Verify one pair, retrying under `policy` (default: configured verification policy)
    pub async fn verify_interactions(
        &self,
        provider: &str,
        consumer: &str,
        policy: Option<RetryPolicy>,
    ) -> Result<()> {
        let policy = policy.unwrap_or(self.config().verification);
        self.supervisor
            .verify_interactions(provider, consumer, policy)
            .await?;
        tracing::info!(provider, consumer, "pacts verified successfully");
        Ok(())
    }

    /// Verify every running stub once, without retrying
    pub async fn verify_all(&self) -> Result<()> {
        for descriptor in self.supervisor.running() {
            self.supervisor.client().verify(&descriptor.base_url()).await?;
        }
        Ok(())
    }

    /// Clear interactions on every running stub; failures are only logged
    pub async fn reset_pacts(&self) {
        for descriptor in self.supervisor.running() {
            match self
                .supervisor
                .client()
                .delete_interactions(&descriptor.base_url())
                .await
            {
                Ok(()) => {
                    self.lock_registered().remove(descriptor.key());
                }
                Err(e) => tracing::error!(
                    provider = descriptor.provider(),
                    consumer = descriptor.consumer(),
                    error = %e,
                    "unable to delete configured interactions"
                ),
            }
        }
    }

    /// End-of-suite cleanup: stop every stub unless keep-alive is configured
    pub async fn teardown(&self) -> Result<Vec<(StubKey, StopOutcome)>> {
        if self.config().keep_alive {
            tracing::info!(
                running = self.supervisor.running().len(),
                "keep-alive set, leaving mock services running for reuse"
            );
            return Ok(Vec::new());
        }

        let stopped = self.supervisor.stop_all().await?;
        let mut registered = self.lock_registered();
        for (key, _) in &stopped {
            registered.remove(key);
        }
        Ok(stopped)
    }

    async fn run<S, F, Fut, T>(&self, names: &[S], body: F, verify: Option<RetryPolicy>) -> Result<T>
    where
        S: AsRef<str>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.preassign_ports(names).await?;
        let contracts = self.loader.read_grouped(names)?;

        // Stale interactions from an earlier test would make verification lie
        self.reset_pacts().await;

        let outcome = self.serve_and_run(&contracts, body, verify).await;
        self.reset_pacts().await;
        outcome
    }

    async fn serve_and_run<F, Fut, T>(
        &self,
        contracts: &[Contract],
        body: F,
        verify: Option<RetryPolicy>,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        for contract in contracts {
            self.serve(contract).await?;
        }

        let output = body().await;

        if let Some(policy) = verify {
            // Only the pairs this test declared
            for contract in contracts {
                let key = contract.key();
                self.supervisor
                    .verify_interactions(&key.provider, &key.consumer, policy)
                    .await?;
            }
            tracing::info!(pairs = contracts.len(), "pacts verified successfully");
        }

        Ok(output)
    }

    async fn serve(&self, contract: &Contract) -> Result<()> {
        let key = contract.key();
        let url = self
            .supervisor
            .ensure_running(&key.provider, &key.consumer)
            .await?;
        self.expose_url(&key.provider, &url);

        for interaction in &contract.interactions {
            self.push(&key.provider, &key.consumer, &url, interaction).await?;
        }
        Ok(())
    }

    /// Add one interaction; a stub that cannot be reached is restarted once
    ///
    /// The restarted process starts empty, so every interaction pushed to the
    /// pair since its last reset is registered again before `payload`.
    async fn push(&self, provider: &str, consumer: &str, url: &str, payload: &JsonValue) -> Result<()> {
        let key = StubKey::new(provider, consumer);

        match self.supervisor.client().add_interaction(url, payload).await {
            Ok(()) => {}
            Err(e) if e.is_transport() => {
                tracing::warn!(provider, consumer, error = %e, "mock service unreachable, restarting it");
                let url = self.supervisor.restart(provider, consumer).await?;
                self.expose_url(provider, &url);

                let earlier = self.lock_registered().get(&key).cloned().unwrap_or_default();
                if !earlier.is_empty() {
                    tracing::info!(provider, consumer, count = earlier.len(), "re-registering interactions");
                }
                for interaction in &earlier {
                    self.supervisor.client().add_interaction(&url, interaction).await?;
                }
                self.supervisor.client().add_interaction(&url, payload).await?;
            }
            Err(e) => return Err(e),
        }

        self.lock_registered()
            .entry(key)
            .or_default()
            .push(payload.clone());
        Ok(())
    }

    fn lock_registered(&self) -> MutexGuard<'_, Registered> {
        self.registered.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn expose_url(&self, provider: &str, url: &str) {
        if self.config().expose_env {
            std::env::set_var(env_key(provider), url);
        }
    }
}
