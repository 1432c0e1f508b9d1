// src/callbacks.rs

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{TidewatchError, TidewatchResult};
use crate::types::{ResourceId, ScaleDecision, Timestamp};

/// Context handed to every callback
#[derive(Debug, Clone)]
pub struct CallbackContext {
    /// When the decision was made
    pub timestamp: Timestamp,
    /// Resource the decision is for
    pub resource_id: ResourceId,
    /// Any additional metadata from the scaler
    pub metadata: HashMap<String, String>,
}

impl CallbackContext {
    pub fn new<S: Into<ResourceId>>(resource_id: S, timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            resource_id: resource_id.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Trait for executing scaling actions
///
/// Implement this to actually add or remove capacity.
/// This is where you integrate with your infrastructure (K8s, AWS, etc.).
///
/// An `Err` from either method is logged and counted by the scaler but never
/// propagated to the caller of `check_and_scale`.
#[async_trait]
pub trait ScalingExecutor: Send + Sync {
    /// Add capacity
    ///
    /// # Arguments
    /// * `decision` - The decision that triggered the action, with the metrics behind it
    /// * `context` - Additional context for the callback
    async fn scale_up(&self, decision: &ScaleDecision, context: &CallbackContext) -> TidewatchResult<()>;

    /// Remove capacity
    ///
    /// Only invoked when load, latency and error rate are all comfortably low.
    async fn scale_down(
        &self,
        decision: &ScaleDecision,
        context: &CallbackContext,
    ) -> TidewatchResult<()>;
}

/// Trait for receiving scaling events
///
/// Implement this to get notified about decisions for logging, alerting or
/// audit trails. Observer errors are logged and otherwise ignored.
#[async_trait]
pub trait ScalingObserver: Send + Sync {
    /// Called for every evaluated decision, after any callback has run
    async fn on_decision(
        &self,
        _decision: &ScaleDecision,
        _context: &CallbackContext,
    ) -> TidewatchResult<()> {
        Ok(())
    }

    /// Called when the failure breaker suppressed an evaluation
    async fn on_suppressed(
        &self,
        _decision: &ScaleDecision,
        _context: &CallbackContext,
    ) -> TidewatchResult<()> {
        Ok(())
    }

    /// Called when the executor returned an error
    async fn on_callback_error(
        &self,
        _decision: &ScaleDecision,
        _error: &TidewatchError,
        _context: &CallbackContext,
    ) -> TidewatchResult<()> {
        Ok(())
    }
}

/// Executor plus observers for one scaler
#[derive(Clone)]
pub struct TidewatchCallbacks {
    pub executor: Arc<dyn ScalingExecutor>,
    pub observers: Vec<Arc<dyn ScalingObserver>>,
}

impl TidewatchCallbacks {
    pub fn new(executor: Arc<dyn ScalingExecutor>) -> Self {
        Self {
            executor,
            observers: Vec::new(),
        }
    }

    /// Add an observer to receive scaling events
    pub fn add_observer(mut self, observer: Arc<dyn ScalingObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Add multiple observers at once
    pub fn add_observers(mut self, observers: Vec<Arc<dyn ScalingObserver>>) -> Self {
        self.observers.extend(observers);
        self
    }
}

impl std::fmt::Debug for TidewatchCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TidewatchCallbacks")
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

/// Executor that accepts every action and does nothing
///
/// Handy for dry runs where only the observers matter.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExecutor;

#[async_trait]
impl ScalingExecutor for NoopExecutor {
    async fn scale_up(&self, _decision: &ScaleDecision, _context: &CallbackContext) -> TidewatchResult<()> {
        Ok(())
    }

    async fn scale_down(
        &self,
        _decision: &ScaleDecision,
        _context: &CallbackContext,
    ) -> TidewatchResult<()> {
        Ok(())
    }
}
