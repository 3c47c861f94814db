//! Bounded fixed-delay retry
//!
//! Every wait in the harness (health confirmation, graceful shutdown,
//! verification polling) is expressed as a [`RetryPolicy`]: an attempt
//! ceiling, a fixed delay between attempts and an optional wall-clock bound.
//! Whichever bound triggers first ends the loop.

use std::future::Future;
use std::time::{Duration, Instant};

/// Attempt ceiling, fixed delay and optional overall timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub timeout: Option<Duration>,
}

impl RetryPolicy {
    /// Waiting for a freshly spawned mock service to answer
    pub const HEALTH_CHECK: RetryPolicy = RetryPolicy {
        max_attempts: 200,
        delay: Duration::from_millis(25),
        timeout: None,
    };

    /// Waiting for a process to exit after SIGTERM before escalating
    pub const SHUTDOWN: RetryPolicy = RetryPolicy {
        max_attempts: 25,
        delay: Duration::from_millis(200),
        timeout: None,
    };

    /// Waiting for asynchronous interactions to be fulfilled
    pub const VERIFICATION: RetryPolicy = RetryPolicy {
        max_attempts: 150_000,
        delay: Duration::from_millis(200),
        timeout: Some(Duration::from_secs(60)),
    };

    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            timeout: None,
        }
    }

    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Start counting attempts against this policy
    pub fn clock(&self) -> RetryClock {
        RetryClock {
            policy: *self,
            attempts: 0,
            started: Instant::now(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::VERIFICATION
    }
}

/// Attempt counter for a single retry loop
///
/// ```no_run
/// # use pact_harness::RetryPolicy;
/// # async fn example() {
/// let mut clock = RetryPolicy::SHUTDOWN.clock();
/// while clock.next_attempt().await {
///     // probe, break on success
/// }
/// # }
/// ```
#[derive(Debug)]
pub struct RetryClock {
    policy: RetryPolicy,
    attempts: u32,
    started: Instant,
}

impl RetryClock {
    /// Sleep as needed and report whether another attempt is allowed.
    ///
    /// The first attempt never sleeps. A later attempt is refused once the
    /// ceiling is reached or when its delay would cross the timeout.
    pub async fn next_attempt(&mut self) -> bool {
        if self.attempts >= self.policy.max_attempts.max(1) {
            return false;
        }

        if self.attempts > 0 {
            if let Some(timeout) = self.policy.timeout {
                if self.started.elapsed() + self.policy.delay > timeout {
                    return false;
                }
            }
            tokio::time::sleep(self.policy.delay).await;
        }

        self.attempts += 1;
        true
    }

    /// Attempts started so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Outcome of a single attempt that did not succeed
#[derive(Debug)]
pub enum Attempt<E> {
    /// Try again if the policy allows
    Retry(E),
    /// Stop immediately, retrying cannot help
    Abort(E),
}

/// Final error of [`retry`]
#[derive(Debug)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub aborted: bool,
    pub last: E,
}

/// Run `op` until it succeeds, aborts, or `policy` is exhausted.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Attempt<E>>>,
{
    let mut clock = policy.clock();
    // The first attempt is always granted
    clock.next_attempt().await;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(Attempt::Abort(err)) => {
                return Err(RetryError {
                    attempts: clock.attempts(),
                    aborted: true,
                    last: err,
                })
            }
            Err(Attempt::Retry(err)) => {
                if !clock.next_attempt().await {
                    return Err(RetryError {
                        attempts: clock.attempts(),
                        aborted: false,
                        last: err,
                    });
                }
            }
        }
    }
}
