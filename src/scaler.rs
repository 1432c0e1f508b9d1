//! # Predictive Scaler
//!
//! Tracks live request counters, combines them with the nearest forecast
//! peak and the failure breaker, and turns the result into scale decisions.
//!
//! Scaling up needs any single signal: request count, mean latency or the
//! forecast. Scaling down needs every signal to be comfortable at once, so a
//! single green metric never removes capacity while another is degraded.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::breaker::{BreakerState, FailureBreaker};
use crate::callbacks::{CallbackContext, TidewatchCallbacks};
use crate::config::ScalerConfig;
use crate::error::TidewatchError;
use crate::forecast::nearest_peak;
use crate::types::{DecisionOutcome, Prediction, ResourceId, ScaleDecision, Timestamp};
use crate::utils::{current_timestamp, mean_duration};

/// Live counters owned by the scaler
#[derive(Debug, Default)]
struct ScalerState {
    in_flight: u64,
    response_times: VecDeque<Duration>,
    request_starts: VecDeque<Instant>,
    errors: VecDeque<Instant>,
    error_totals: HashMap<String, u64>,
    last_action: Option<Instant>,
    last_action_at: Option<Timestamp>,
    scale_ups: u64,
    scale_downs: u64,
    suppressed: u64,
    callback_failures: u64,
}

impl ScalerState {
    fn prune(&mut self, now: Instant, window: Duration) {
        for events in [&mut self.request_starts, &mut self.errors] {
            while events
                .front()
                .map_or(false, |at| now.saturating_duration_since(*at) > window)
            {
                events.pop_front();
            }
        }
    }

    fn load(&self) -> LoadSnapshot {
        let requests = self.request_starts.len() as u64;
        let errors = self.errors.len() as u64;
        let error_rate = match (requests, errors) {
            (_, 0) => 0.0,
            (0, _) => 1.0,
            (requests, errors) => (errors as f64 / requests as f64).min(1.0),
        };
        LoadSnapshot {
            requests_per_window: requests,
            avg_response_time: mean_duration(&self.response_times),
            error_rate,
        }
    }
}

/// Live metrics a decision is based on
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadSnapshot {
    /// Request starts within the request window
    pub requests_per_window: u64,
    /// Mean of the response-time window, zero when empty
    pub avg_response_time: Duration,
    /// Errors per request start within the request window
    pub error_rate: f64,
}

/// Everything [`evaluate`] looks at
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionInputs {
    pub load: LoadSnapshot,
    /// Highest predicted load at the nearest forecast horizon
    pub predicted_peak: Option<f64>,
    pub breaker_open: bool,
    /// A scaling action succeeded within the cooldown
    pub cooling_down: bool,
}

/// Read-only view of the scaler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerMetrics {
    pub resource_id: ResourceId,
    pub in_flight: u64,
    pub load: LoadSnapshot,
    pub response_window_len: usize,
    /// Errors recorded since creation, by kind
    pub error_totals: HashMap<String, u64>,
    pub scale_ups: u64,
    pub scale_downs: u64,
    pub suppressed: u64,
    pub callback_failures: u64,
    pub last_scale_action_at: Option<Timestamp>,
    pub breaker_state: Option<BreakerState>,
}

/// Pure decision function.
///
/// Returns the outcome and a human-readable reason.
pub fn evaluate(config: &ScalerConfig, inputs: &DecisionInputs) -> (DecisionOutcome, String) {
    let load = &inputs.load;

    if inputs.breaker_open {
        return (
            DecisionOutcome::Suppressed,
            "failure breaker open, capacity left unchanged".to_string(),
        );
    }

    let requests = load.requests_per_window as f64;
    let mut up_reasons = Vec::new();
    if requests > config.scale_up_threshold {
        up_reasons.push(format!(
            "{} requests per window above {}",
            load.requests_per_window, config.scale_up_threshold
        ));
    }
    if load.avg_response_time > config.high_latency_threshold() {
        up_reasons.push(format!(
            "mean response time {:?} above {:?}",
            load.avg_response_time,
            config.high_latency_threshold()
        ));
    }
    if let Some(peak) = inputs.predicted_peak {
        if peak > config.scale_up_threshold {
            up_reasons.push(format!(
                "predicted load {:.1} above {}",
                peak, config.scale_up_threshold
            ));
        }
    }

    let candidate = if !up_reasons.is_empty() {
        Some((DecisionOutcome::ScaleUp, up_reasons.join("; ")))
    } else if requests < config.scale_down_threshold
        && load.avg_response_time < config.low_latency_threshold()
        && load.error_rate < config.error_rate_ceiling
    {
        Some((
            DecisionOutcome::ScaleDown,
            format!(
                "{} requests per window, mean response time {:?}, error rate {:.4}",
                load.requests_per_window, load.avg_response_time, load.error_rate
            ),
        ))
    } else {
        None
    };

    match candidate {
        Some((outcome, reason)) if inputs.cooling_down => (
            DecisionOutcome::CoolingDown,
            format!("{:?} deferred by cooldown: {}", outcome, reason),
        ),
        Some(decision) => decision,
        None => (DecisionOutcome::NoAction, "metrics within thresholds".to_string()),
    }
}

/// Scale decisions for one resource
pub struct PredictiveScaler {
    resource_id: ResourceId,
    config: ScalerConfig,
    callbacks: TidewatchCallbacks,
    breaker: Option<Arc<FailureBreaker>>,
    state: Mutex<ScalerState>,
}

impl PredictiveScaler {
    pub fn new<S: Into<ResourceId>>(
        resource_id: S,
        config: ScalerConfig,
        callbacks: TidewatchCallbacks,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            config,
            callbacks,
            breaker: None,
            state: Mutex::new(ScalerState::default()),
        }
    }

    /// Consult `breaker` before every decision
    pub fn with_breaker(mut self, breaker: Arc<FailureBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn config(&self) -> &ScalerConfig {
        &self.config
    }

    pub fn breaker(&self) -> Option<&Arc<FailureBreaker>> {
        self.breaker.as_ref()
    }

    pub fn record_request_start(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.in_flight += 1;
        state.request_starts.push_back(now);
        state.prune(now, self.config.request_window());
    }

    pub fn record_request_end(&self, duration: Duration) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.response_times.push_back(duration);
        while state.response_times.len() > self.config.response_window_size {
            state.response_times.pop_front();
        }
    }

    pub fn record_error(&self, kind: &str) {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.errors.push_back(now);
        *state.error_totals.entry(kind.to_string()).or_insert(0) += 1;
        state.prune(now, self.config.request_window());
    }

    /// Current live metrics, with expired window entries dropped
    pub fn load(&self) -> LoadSnapshot {
        let mut state = self.state.lock();
        state.prune(Instant::now(), self.config.request_window());
        state.load()
    }

    /// Evaluate current metrics against `forecast` and run the matching callback.
    ///
    /// Executor errors are logged, counted and reported to observers; the
    /// returned decision then has `executed == false`.
    pub async fn check_and_scale(&self, forecast: &[Prediction]) -> ScaleDecision {
        let now = Instant::now();
        let (load, cooling_down) = {
            let mut state = self.state.lock();
            state.prune(now, self.config.request_window());
            let cooldown = self.config.scale_cooldown();
            let cooling_down = !cooldown.is_zero()
                && state
                    .last_action
                    .map_or(false, |at| now.saturating_duration_since(at) < cooldown);
            (state.load(), cooling_down)
        };

        let inputs = DecisionInputs {
            load,
            predicted_peak: nearest_peak(forecast),
            breaker_open: self.breaker.as_ref().map_or(false, |b| b.is_open()),
            cooling_down,
        };
        let (outcome, reason) = evaluate(&self.config, &inputs);

        let mut decision = ScaleDecision {
            resource_id: self.resource_id.clone(),
            outcome,
            reason,
            requests_per_window: load.requests_per_window,
            avg_response_time: load.avg_response_time,
            error_rate: load.error_rate,
            predicted_load: inputs.predicted_peak,
            executed: false,
            timestamp: current_timestamp(),
        };
        let context = CallbackContext::new(self.resource_id.clone(), decision.timestamp)
            .with_metadata("outcome", format!("{:?}", outcome));

        match outcome {
            DecisionOutcome::ScaleUp | DecisionOutcome::ScaleDown => {
                let result = if outcome == DecisionOutcome::ScaleUp {
                    self.callbacks.executor.scale_up(&decision, &context).await
                } else {
                    self.callbacks.executor.scale_down(&decision, &context).await
                };
                match result {
                    Ok(()) => {
                        decision.executed = true;
                        let mut state = self.state.lock();
                        state.last_action = Some(Instant::now());
                        state.last_action_at = Some(decision.timestamp);
                        if outcome == DecisionOutcome::ScaleUp {
                            state.scale_ups += 1;
                        } else {
                            state.scale_downs += 1;
                        }
                        info!(
                            resource = %self.resource_id,
                            decision = ?outcome,
                            reason = %decision.reason,
                            "scaling action executed"
                        );
                    }
                    Err(e) => {
                        self.state.lock().callback_failures += 1;
                        let e = match e {
                            e @ TidewatchError::CallbackFailed { .. } => e,
                            other => TidewatchError::callback_failed(
                                format!("{:?}", outcome),
                                other.to_string(),
                            ),
                        };
                        error!(
                            resource = %self.resource_id,
                            decision = ?outcome,
                            error = %e,
                            "scaling callback failed"
                        );
                        self.notify_callback_error(&decision, &e, &context).await;
                    }
                }
            }
            DecisionOutcome::Suppressed => {
                self.state.lock().suppressed += 1;
                warn!(resource = %self.resource_id, reason = %decision.reason, "scaling suppressed");
                self.notify_suppressed(&decision, &context).await;
            }
            DecisionOutcome::CoolingDown | DecisionOutcome::NoAction => {
                debug!(resource = %self.resource_id, decision = ?outcome, reason = %decision.reason, "no scaling action");
            }
        }

        self.notify_decision(&decision, &context).await;
        decision
    }

    pub fn get_metrics(&self) -> ScalerMetrics {
        let mut state = self.state.lock();
        state.prune(Instant::now(), self.config.request_window());
        ScalerMetrics {
            resource_id: self.resource_id.clone(),
            in_flight: state.in_flight,
            load: state.load(),
            response_window_len: state.response_times.len(),
            error_totals: state.error_totals.clone(),
            scale_ups: state.scale_ups,
            scale_downs: state.scale_downs,
            suppressed: state.suppressed,
            callback_failures: state.callback_failures,
            last_scale_action_at: state.last_action_at,
            breaker_state: self.breaker.as_ref().map(|b| b.state()),
        }
    }

    async fn notify_decision(&self, decision: &ScaleDecision, context: &CallbackContext) {
        let results = join_all(
            self.callbacks
                .observers
                .iter()
                .map(|observer| observer.on_decision(decision, context)),
        )
        .await;
        self.log_observer_errors("on_decision", results);
    }

    async fn notify_suppressed(&self, decision: &ScaleDecision, context: &CallbackContext) {
        let results = join_all(
            self.callbacks
                .observers
                .iter()
                .map(|observer| observer.on_suppressed(decision, context)),
        )
        .await;
        self.log_observer_errors("on_suppressed", results);
    }

    async fn notify_callback_error(
        &self,
        decision: &ScaleDecision,
        error: &TidewatchError,
        context: &CallbackContext,
    ) {
        let results = join_all(
            self.callbacks
                .observers
                .iter()
                .map(|observer| observer.on_callback_error(decision, error, context)),
        )
        .await;
        self.log_observer_errors("on_callback_error", results);
    }

    fn log_observer_errors(&self, hook: &str, results: Vec<Result<(), TidewatchError>>) {
        for e in results.into_iter().filter_map(Result::err) {
            warn!(resource = %self.resource_id, hook, error = %e, "observer failed");
        }
    }
}

impl std::fmt::Debug for PredictiveScaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictiveScaler")
            .field("resource_id", &self.resource_id)
            .field("config", &self.config)
            .field("callbacks", &self.callbacks)
            .field("breaker", &self.breaker.as_ref().map(|b| b.resource_id()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::{ScalingExecutor, ScalingObserver};
    use crate::config::BreakerConfig;
    use crate::error::TidewatchResult;
    use crate::types::PatternType;
    use async_trait::async_trait;
    use mockall::mock;

    mock! {
        pub Executor {}

        #[async_trait]
        impl ScalingExecutor for Executor {
            async fn scale_up(&self, decision: &ScaleDecision, context: &CallbackContext) -> TidewatchResult<()>;
            async fn scale_down(&self, decision: &ScaleDecision, context: &CallbackContext) -> TidewatchResult<()>;
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        decisions: Mutex<Vec<DecisionOutcome>>,
        suppressed: Mutex<u32>,
        errors: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ScalingObserver for RecordingObserver {
        async fn on_decision(&self, decision: &ScaleDecision, _context: &CallbackContext) -> TidewatchResult<()> {
            self.decisions.lock().push(decision.outcome);
            Ok(())
        }

        async fn on_suppressed(&self, _decision: &ScaleDecision, _context: &CallbackContext) -> TidewatchResult<()> {
            *self.suppressed.lock() += 1;
            Ok(())
        }

        async fn on_callback_error(
            &self,
            _decision: &ScaleDecision,
            error: &TidewatchError,
            _context: &CallbackContext,
        ) -> TidewatchResult<()> {
            self.errors.lock().push(error.to_string());
            Ok(())
        }
    }

    fn config() -> ScalerConfig {
        ScalerConfig::default()
            .scale_up_threshold(10.0)
            .scale_down_threshold(3.0)
            .high_latency_threshold_ms(500)
            .low_latency_threshold_ms(100)
            .error_rate_ceiling(0.05)
            .scale_cooldown_seconds(0)
    }

    fn scaler(executor: MockExecutor, config: ScalerConfig) -> PredictiveScaler {
        PredictiveScaler::new("web", config, TidewatchCallbacks::new(Arc::new(executor)))
    }

    fn inputs(requests: u64, latency_ms: u64, error_rate: f64) -> DecisionInputs {
        DecisionInputs {
            load: LoadSnapshot {
                requests_per_window: requests,
                avg_response_time: Duration::from_millis(latency_ms),
                error_rate,
            },
            predicted_peak: None,
            breaker_open: false,
            cooling_down: false,
        }
    }

    fn prediction(horizon_secs: u64, load: f64) -> Prediction {
        Prediction {
            timestamp: current_timestamp(),
            predicted_load: load,
            confidence: 0.9,
            source_pattern_type: Some(PatternType::Daily),
            horizon: Duration::from_secs(horizon_secs),
            factors: vec!["daily".to_string()],
        }
    }

    #[test]
    fn test_scale_up_on_any_signal() {
        let config = config();
        assert_eq!(evaluate(&config, &inputs(11, 50, 0.0)).0, DecisionOutcome::ScaleUp);
        assert_eq!(evaluate(&config, &inputs(5, 600, 0.0)).0, DecisionOutcome::ScaleUp);

        let mut forecast_only = inputs(5, 200, 0.0);
        forecast_only.predicted_peak = Some(25.0);
        assert_eq!(evaluate(&config, &forecast_only).0, DecisionOutcome::ScaleUp);
    }

    #[test]
    fn test_scale_down_requires_all_three() {
        let config = config();
        assert_eq!(evaluate(&config, &inputs(1, 50, 0.0)).0, DecisionOutcome::ScaleDown);

        // Two of three comfortable is not enough.
        assert_eq!(evaluate(&config, &inputs(1, 50, 0.5)).0, DecisionOutcome::NoAction);
        assert_eq!(evaluate(&config, &inputs(1, 300, 0.0)).0, DecisionOutcome::NoAction);
        assert_eq!(evaluate(&config, &inputs(5, 50, 0.0)).0, DecisionOutcome::NoAction);
    }

    #[test]
    fn test_open_breaker_and_cooldown_override() {
        let config = config();
        let mut extreme = inputs(10_000, 5_000, 1.0);
        extreme.breaker_open = true;
        extreme.cooling_down = true;
        assert_eq!(evaluate(&config, &extreme).0, DecisionOutcome::Suppressed);

        let mut cooling = inputs(10_000, 50, 0.0);
        cooling.cooling_down = true;
        let (outcome, reason) = evaluate(&config, &cooling);
        assert_eq!(outcome, DecisionOutcome::CoolingDown);
        assert!(reason.contains("ScaleUp"));

        let mut steady = inputs(5, 300, 0.0);
        steady.cooling_down = true;
        assert_eq!(evaluate(&config, &steady).0, DecisionOutcome::NoAction);
    }

    #[tokio::test]
    async fn test_scale_up_invokes_executor() {
        let mut executor = MockExecutor::new();
        executor
            .expect_scale_up()
            .withf(|decision, context| decision.requests_per_window == 12 && context.resource_id == "web")
            .times(1)
            .returning(|_, _| Ok(()));
        executor.expect_scale_down().times(0);

        let scaler = scaler(executor, config());
        for _ in 0..12 {
            scaler.record_request_start();
        }
        let decision = scaler.check_and_scale(&[]).await;

        assert_eq!(decision.outcome, DecisionOutcome::ScaleUp);
        assert!(decision.executed);
        let metrics = scaler.get_metrics();
        assert_eq!(metrics.scale_ups, 1);
        assert_eq!(metrics.in_flight, 12);
        assert!(metrics.last_scale_action_at.is_some());
    }

    #[tokio::test]
    async fn test_forecast_peak_triggers_scale_up() {
        let mut executor = MockExecutor::new();
        executor
            .expect_scale_up()
            .withf(|decision, _| decision.predicted_load == Some(40.0))
            .times(1)
            .returning(|_, _| Ok(()));

        let scaler = scaler(executor, config());
        scaler.record_request_start();
        scaler.record_request_end(Duration::from_millis(200));

        // The far horizon is ignored even though it is larger.
        let forecast = [prediction(900, 5.0), prediction(900, 40.0), prediction(1800, 900.0)];
        let decision = scaler.check_and_scale(&forecast).await;
        assert_eq!(decision.outcome, DecisionOutcome::ScaleUp);
    }

    #[tokio::test]
    async fn test_idle_resource_scales_down() {
        let mut executor = MockExecutor::new();
        executor.expect_scale_down().times(1).returning(|_, _| Ok(()));

        let scaler = scaler(executor, config());
        scaler.record_request_start();
        scaler.record_request_end(Duration::from_millis(20));

        let decision = scaler.check_and_scale(&[]).await;
        assert_eq!(decision.outcome, DecisionOutcome::ScaleDown);
        assert_eq!(scaler.get_metrics().scale_downs, 1);
    }

    #[tokio::test]
    async fn test_errors_without_requests_block_scale_down() {
        let mut executor = MockExecutor::new();
        executor.expect_scale_down().times(0);

        let scaler = scaler(executor, config());
        scaler.record_error("timeout");
        scaler.record_error("timeout");
        scaler.record_error("refused");

        let decision = scaler.check_and_scale(&[]).await;
        assert_eq!(decision.outcome, DecisionOutcome::NoAction);
        assert_eq!(decision.error_rate, 1.0);

        let metrics = scaler.get_metrics();
        assert_eq!(metrics.error_totals.get("timeout"), Some(&2));
        assert_eq!(metrics.error_totals.get("refused"), Some(&1));
    }

    #[tokio::test]
    async fn test_open_breaker_suppresses() {
        let mut executor = MockExecutor::new();
        executor.expect_scale_up().times(0);
        executor.expect_scale_down().times(0);

        let breaker = Arc::new(FailureBreaker::new(
            "web",
            BreakerConfig::default().failure_threshold(1),
        ));
        breaker.record_failure();

        let observer = Arc::new(RecordingObserver::default());
        let callbacks = TidewatchCallbacks::new(Arc::new(executor)).add_observer(observer.clone());
        let scaler = PredictiveScaler::new("web", config(), callbacks).with_breaker(breaker);

        for _ in 0..1000 {
            scaler.record_request_start();
        }
        scaler.record_request_end(Duration::from_secs(5));

        let decision = scaler.check_and_scale(&[prediction(60, 1e6)]).await;
        assert_eq!(decision.outcome, DecisionOutcome::Suppressed);
        assert!(!decision.executed);
        assert_eq!(*observer.suppressed.lock(), 1);
        assert_eq!(*observer.decisions.lock(), vec![DecisionOutcome::Suppressed]);

        let metrics = scaler.get_metrics();
        assert_eq!(metrics.suppressed, 1);
        assert_eq!(metrics.breaker_state, Some(BreakerState::Open));
    }

    #[tokio::test]
    async fn test_callback_failure_is_swallowed() {
        let mut executor = MockExecutor::new();
        executor
            .expect_scale_up()
            .times(2)
            .returning(|_, _| Err(TidewatchError::unexpected("api unavailable")));

        let observer = Arc::new(RecordingObserver::default());
        let callbacks = TidewatchCallbacks::new(Arc::new(executor)).add_observer(observer.clone());
        let scaler = PredictiveScaler::new("web", config().scale_cooldown_seconds(60), callbacks);
        for _ in 0..20 {
            scaler.record_request_start();
        }

        let first = scaler.check_and_scale(&[]).await;
        assert_eq!(first.outcome, DecisionOutcome::ScaleUp);
        assert!(!first.executed);

        // A failed action does not start the cooldown.
        let second = scaler.check_and_scale(&[]).await;
        assert_eq!(second.outcome, DecisionOutcome::ScaleUp);

        let metrics = scaler.get_metrics();
        assert_eq!(metrics.callback_failures, 2);
        assert_eq!(metrics.scale_ups, 0);
        assert!(metrics.last_scale_action_at.is_none());

        let errors = observer.errors.lock();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("api unavailable"));
    }

    #[tokio::test]
    async fn test_cooldown_after_successful_action() {
        let mut executor = MockExecutor::new();
        executor.expect_scale_up().times(1).returning(|_, _| Ok(()));

        let scaler = scaler(executor, config().scale_cooldown_seconds(60));
        for _ in 0..20 {
            scaler.record_request_start();
        }
        assert_eq!(scaler.check_and_scale(&[]).await.outcome, DecisionOutcome::ScaleUp);
        assert_eq!(scaler.check_and_scale(&[]).await.outcome, DecisionOutcome::CoolingDown);
    }

    #[test]
    fn test_response_window_is_bounded() {
        let scaler = scaler(MockExecutor::new(), config().response_window_size(3));
        for millis in [10, 20, 30, 40, 50] {
            scaler.record_request_start();
            scaler.record_request_end(Duration::from_millis(millis));
        }
        let metrics = scaler.get_metrics();
        assert_eq!(metrics.response_window_len, 3);
        assert_eq!(metrics.load.avg_response_time, Duration::from_millis(40));
        assert_eq!(metrics.in_flight, 0);
        assert_eq!(metrics.load.requests_per_window, 5);
    }

    #[test]
    fn test_error_rate_over_request_window() {
        let scaler = scaler(MockExecutor::new(), config());
        assert_eq!(scaler.load().error_rate, 0.0);
        for _ in 0..4 {
            scaler.record_request_start();
        }
        scaler.record_error("http_500");
        assert_eq!(scaler.load().error_rate, 0.25);
    }
}
