//! # Pact Harness - mock service supervision for consumer contract tests
//!
//! Consumer tests talk to local `pact-mock-service` processes standing in for
//! real providers. This crate keeps exactly one such stub alive per
//! (provider, consumer) pair, reuses stubs left running by earlier test
//! processes, registers interactions on them and verifies that the code under
//! test exercised every one.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ PactHarness (contracts → stubs → verify)     │
//! └──────────────────────┬───────────────────────┘
//!                        │
//! ┌──────────────────────┴───────────────────────┐
//! │ StubSupervisor                               │
//! │  ABSENT → STARTING → RUNNING → STOPPING      │
//! ├──────────────┬───────────────┬───────────────┤
//! │ PortAllocator│ IdentityStore │ StubLauncher  │
//! │              │ (pid files)   │ ChildProcess  │
//! └──────────────┴───────┬───────┴───────────────┘
//!                        │ HTTP
//!              ┌─────────┴──────────┐
//!              │ InteractionClient  │──► pact-mock-service
//!              └────────────────────┘
//! ```
//!
//! ## Key Features
//!
//! - Cross-process stub reuse, always re-checked for liveness
//! - SIGTERM → poll → SIGKILL shutdown with a recorded outcome
//! - Retry policies as plain values
//! - Swappable process launcher for tests

pub mod errors;
pub mod config;
pub mod retry;
pub mod port;
pub mod stub;
pub mod interaction;
pub mod contract;
pub mod harness;

pub use errors::{HarnessError, Result};
pub use config::{ConfigFile, HarnessConfig};
pub use retry::{retry, Attempt, RetryClock, RetryError, RetryPolicy};
pub use port::PortAllocator;
pub use stub::{
    AdoptedProcess, ChildProcess, IdentityStore, LaunchSpec, MockServiceLauncher, ProcessExit,
    SpawnedProcess, StopOutcome, StubDescriptor, StubKey, StubLauncher, StubRecord, StubState,
    StubSupervisor,
};
pub use interaction::InteractionClient;
pub use contract::{group_by_pair, split_bulk_file, Contract, ContractLoader, Pacticipant, RequestFilter};
pub use harness::{env_key, PactHarness};

/// Version of this harness
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Pact specification version requested from the mock service by default
pub const DEFAULT_SPECIFICATION_VERSION: u8 = 3;
