//! # Failure Breaker
//!
//! A per-resource circuit breaker. The scaler consults it before acting, and
//! callers wrap calls to the protected resource in [`FailureBreaker::execute`]
//! so that repeated failures stop reaching the resource at all.
//!
//! ```text
//!            failure_threshold consecutive failures
//!   Closed ─────────────────────────────────────────▶ Open
//!     ▲                                               │
//!     │ success_threshold                 open_timeout│ (observed lazily)
//!     │ consecutive successes                         ▼
//!     └──────────────────────────────────────────── HalfOpen
//!                      any failure ──▶ Open
//! ```
//!
//! There is no background timer. The `Open` to `HalfOpen` transition is
//! applied whenever the state is read, so it is only as fresh as the most
//! recent call.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::BreakerConfig;
use crate::error::{TidewatchError, TidewatchResult};
use crate::types::{ResourceId, Timestamp};
use crate::utils::current_timestamp;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BreakerState {
    /// Normal operation
    Closed,
    /// Failing fast
    Open,
    /// Probing recovery
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

/// Point-in-time counters for a breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerStats {
    pub resource_id: ResourceId,
    pub state: BreakerState,
    /// Consecutive failures while closed
    pub failure_count: u32,
    /// Consecutive successes while half-open
    pub success_count: u32,
    pub last_failure_at: Option<Timestamp>,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub state_transitions: u64,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Timestamp>,
    opened_at: Option<Instant>,
    total_calls: u64,
    rejected_calls: u64,
    successful_calls: u64,
    failed_calls: u64,
    state_transitions: u64,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            opened_at: None,
            total_calls: 0,
            rejected_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            state_transitions: 0,
        }
    }
}

/// Circuit breaker guarding one resource
#[derive(Debug)]
pub struct FailureBreaker {
    resource_id: ResourceId,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl FailureBreaker {
    pub fn new<S: Into<ResourceId>>(resource_id: S, config: BreakerConfig) -> Self {
        Self {
            resource_id: resource_id.into(),
            config,
            inner: Mutex::new(Inner::new()),
        }
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state, applying the open timeout if it has elapsed
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    pub fn is_open(&self) -> bool {
        self.state() == BreakerState::Open
    }

    /// Run `op` through the breaker.
    ///
    /// While open, `op` is not invoked and the caller gets a
    /// [`TidewatchError::BreakerOpen`] converted into its own error type. The
    /// lock is released while `op` runs.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<TidewatchError>,
    {
        self.admit()?;
        let result = op().await;
        self.record(result.is_ok());
        result
    }

    /// Synchronous counterpart of [`execute`](Self::execute)
    pub fn call<F, T, E>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<TidewatchError>,
    {
        self.admit()?;
        let result = op();
        self.record(result.is_ok());
        result
    }

    /// Record the outcome of a call made outside [`execute`](Self::execute)
    pub fn record_success(&self) {
        self.record(true);
    }

    pub fn record_failure(&self) {
        self.record(false);
    }

    /// Counters and state for reporting
    pub fn stats(&self) -> BreakerStats {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        BreakerStats {
            resource_id: self.resource_id.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_at: inner.last_failure_at,
            total_calls: inner.total_calls,
            rejected_calls: inner.rejected_calls,
            successful_calls: inner.successful_calls,
            failed_calls: inner.failed_calls,
            state_transitions: inner.state_transitions,
        }
    }

    /// Back to `Closed` with cleared counters
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, BreakerState::Closed);
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.opened_at = None;
        info!(resource = %self.resource_id, "breaker reset");
    }

    fn admit(&self) -> TidewatchResult<()> {
        let mut inner = self.inner.lock();
        inner.total_calls += 1;
        self.refresh(&mut inner);
        if inner.state == BreakerState::Open {
            inner.rejected_calls += 1;
            debug!(resource = %self.resource_id, "call rejected, breaker open");
            return Err(TidewatchError::breaker_open(self.resource_id.clone()));
        }
        Ok(())
    }

    fn record(&self, success: bool) {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);

        if success {
            inner.successful_calls += 1;
            match inner.state {
                BreakerState::Closed => inner.failure_count = 0,
                BreakerState::HalfOpen => {
                    inner.success_count += 1;
                    if inner.success_count >= self.config.success_threshold {
                        self.transition(&mut inner, BreakerState::Closed);
                    }
                }
                // A call admitted before the breaker tripped.
                BreakerState::Open => {}
            }
        } else {
            inner.failed_calls += 1;
            inner.last_failure_at = Some(current_timestamp());
            match inner.state {
                BreakerState::Closed => {
                    inner.failure_count += 1;
                    if inner.failure_count >= self.config.failure_threshold {
                        self.transition(&mut inner, BreakerState::Open);
                    }
                }
                BreakerState::HalfOpen => self.transition(&mut inner, BreakerState::Open),
                BreakerState::Open => {}
            }
        }
    }

    fn refresh(&self, inner: &mut Inner) {
        if inner.state != BreakerState::Open {
            return;
        }
        let elapsed = inner.opened_at.map_or(Duration::MAX, |at| at.elapsed());
        if elapsed >= self.config.open_timeout() {
            self.transition(inner, BreakerState::HalfOpen);
        }
    }

    fn transition(&self, inner: &mut Inner, next: BreakerState) {
        if inner.state == next {
            return;
        }
        let previous = inner.state;
        inner.state = next;
        inner.state_transitions += 1;

        match next {
            BreakerState::Open => {
                inner.opened_at = Some(Instant::now());
                inner.success_count = 0;
                warn!(
                    resource = %self.resource_id,
                    from = %previous,
                    failures = inner.failure_count,
                    "breaker opened"
                );
            }
            BreakerState::HalfOpen => {
                inner.success_count = 0;
                info!(resource = %self.resource_id, "breaker half-open, probing");
            }
            BreakerState::Closed => {
                inner.failure_count = 0;
                inner.success_count = 0;
                inner.opened_at = None;
                info!(resource = %self.resource_id, from = %previous, "breaker closed");
            }
        }
    }
}

/// Breakers keyed by resource name
///
/// Owned by the caller and shared explicitly; there is no global instance.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: Mutex<HashMap<ResourceId, Arc<FailureBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Existing breaker for `resource_id`, or a new one built from the registry config
    pub fn get_or_create(&self, resource_id: &str) -> Arc<FailureBreaker> {
        let mut breakers = self.breakers.lock();
        Arc::clone(breakers.entry(resource_id.to_string()).or_insert_with(|| {
            debug!(resource = %resource_id, "creating breaker");
            Arc::new(FailureBreaker::new(resource_id, self.config.clone()))
        }))
    }

    pub fn get(&self, resource_id: &str) -> Option<Arc<FailureBreaker>> {
        self.breakers.lock().get(resource_id).cloned()
    }

    pub fn remove(&self, resource_id: &str) -> Option<Arc<FailureBreaker>> {
        self.breakers.lock().remove(resource_id)
    }

    pub fn stats(&self) -> Vec<BreakerStats> {
        let breakers: Vec<Arc<FailureBreaker>> = self.breakers.lock().values().cloned().collect();
        let mut stats: Vec<BreakerStats> = breakers.iter().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        stats
    }

    pub fn len(&self) -> usize {
        self.breakers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.lock().is_empty()
    }
}
