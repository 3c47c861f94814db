/**
 * allocator.rs
 * Per-process port reservation for mock services
 *
 * Each (provider, consumer) pair gets one port for the lifetime of the
 * process:
 * - First request: the OS picks a free port (bind to port 0, read it back,
 *   release the listener so the spawned mock service can take it)
 * - Later requests: the same port is handed back
 *
 * Reservations are in memory only. A port the OS handed out can still be
 * grabbed by someone else before the mock service binds it; the health check
 * that follows a spawn is what catches that race.
 */

use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::Mutex;

use crate::errors::{HarnessError, Result};
use crate::stub::StubKey;

/// Port Allocator - hands out stable free ports per stub key
#[derive(Debug)]
pub struct PortAllocator {
    bind_address: String,
    assignments: Mutex<HashMap<StubKey, u16>>,
}

impl PortAllocator {
    /// Create an allocator probing ports on `bind_address`
    pub fn new(bind_address: impl Into<String>) -> Self {
        Self {
            bind_address: bind_address.into(),
            assignments: Mutex::new(HashMap::new()),
        }
    }

    /// Ask the OS for a free port on `bind_address`
    ///
    /// The listener is dropped before returning, so the port is only
    /// reserved momentarily.
    ///
    /// # Errors
    /// `HarnessError::Allocation` if the OS cannot provide a port.
    pub fn allocate(bind_address: &str) -> Result<u16> {
        let listener = TcpListener::bind((bind_address, 0)).map_err(HarnessError::Allocation)?;
        let port = listener
            .local_addr()
            .map_err(HarnessError::Allocation)?
            .port();
        Ok(port)
    }

    /// Test if port is free on `bind_address`
    pub fn is_port_available(bind_address: &str, port: u16) -> bool {
        TcpListener::bind((bind_address, port)).is_ok()
    }

    /// Port for `key`, allocating one on first use
    ///
    /// Deterministic within the process: the same key always gets the same
    /// port until it is released.
    pub fn assign(&self, key: &StubKey) -> Result<u16> {
        let mut assignments = self.lock();

        if let Some(&port) = assignments.get(key) {
            return Ok(port);
        }

        let port = Self::allocate(&self.bind_address)?;
        assignments.insert(key.clone(), port);
        tracing::debug!(provider = %key.provider, consumer = %key.consumer, port, "assigned port");
        Ok(port)
    }

    /// Record a port chosen elsewhere, e.g. by a reused mock service
    pub fn reserve(&self, key: &StubKey, port: u16) {
        self.lock().insert(key.clone(), port);
    }

    /// Get assigned port for `key`
    pub fn get(&self, key: &StubKey) -> Option<u16> {
        self.lock().get(key).copied()
    }

    /// Release the assignment for `key`
    ///
    /// # Returns
    /// true if released, false if nothing was assigned
    pub fn release(&self, key: &StubKey) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Snapshot of all assignments
    pub fn assignments(&self) -> HashMap<StubKey, u16> {
        self.lock().clone()
    }

    /// Forget every assignment
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<StubKey, u16>> {
        // The map holds plain values; a panic elsewhere cannot leave it torn.
        self.assignments
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
