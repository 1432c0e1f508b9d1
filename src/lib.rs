//! # Tidewatch - Predictive Traffic Scaling
//!
//! Tidewatch watches the traffic of a resource, learns its recurring shapes
//! (daily, weekly and seasonal cycles plus linear drift), forecasts the load
//! ahead and turns live metrics and forecasts into scale decisions. A failure
//! breaker sits in front of the scaler so capacity is never changed on top of
//! a cascading failure.
//!
//! ## 🎯 Core Philosophy
//!
//! - **Infrastructure-agnostic**: you bring the scale-up/scale-down callbacks
//! - **Asymmetric by design**: any one hot signal scales up, only all-green scales down
//! - **Degrade, don't fail**: missing data means fewer patterns, never an aborted cycle
//! - **Explicit ownership**: one analyzer, scaler and breaker per resource, no globals
//!
//! ## 📊 Architecture Overview
//!
//! ```text
//!   samples ──▶ ┌──────────────┐ snapshot ┌─────────────────┐ patterns ┌────────────┐
//!               │ HistoryStore │ ───────▶ │ PatternDetector │ ───────▶ │ Forecaster │
//!               └──────────────┘          └─────────────────┘          └─────┬──────┘
//!                        TrafficAnalyzer                                     │ predictions
//!                                                                            ▼
//!   record_request_* ───────────────────────────────────────────▶ ┌──────────────────┐
//!                                         ┌────────────────┐ ───▶ │ PredictiveScaler │
//!   execute(op) ────────────────────────▶ │ FailureBreaker │      └────────┬─────────┘
//!                                         └────────────────┘               │
//!                                                                ┌─────────▼─────────┐
//!                                                                │   Your Callbacks  │
//!                                                                │ • ScalingExecutor │
//!                                                                │ • ScalingObserver │
//!                                                                └───────────────────┘
//! ```
//!
//! [`ControlLoop`] ties the pieces together on a fixed interval.
//!
//! ## 🚀 Feature Matrix
//!
//! | Feature | Default | `config-toml` | `prometheus-metrics` |
//! |---------|---------|---------------|----------------------|
//! | Pattern detection & forecasting | ✅ | ✅ | ✅ |
//! | Predictive scaling & breaker | ✅ | ✅ | ✅ |
//! | TOML configuration files | ❌ | ✅ | ❌ |
//! | Prometheus exporter | ❌ | ❌ | ✅ |
//!
//! ## 🎛️ Usage
//!
//! ```rust,no_run
//! use tidewatch::{
//!     CallbackContext, ControlLoop, Sample, ScaleDecision, ScalingExecutor,
//!     TidewatchCallbacks, TidewatchConfig, TidewatchResult,
//! };
//! use std::sync::Arc;
//!
//! struct MyScalingExecutor;
//!
//! #[async_trait::async_trait]
//! impl ScalingExecutor for MyScalingExecutor {
//!     async fn scale_up(&self, decision: &ScaleDecision, _ctx: &CallbackContext) -> TidewatchResult<()> {
//!         println!("adding capacity: {}", decision.reason);
//!         Ok(())
//!     }
//!
//!     async fn scale_down(&self, decision: &ScaleDecision, _ctx: &CallbackContext) -> TidewatchResult<()> {
//!         println!("removing capacity: {}", decision.reason);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> TidewatchResult<()> {
//!     // 1. Configuration (validated on build)
//!     let config = TidewatchConfig::builder()
//!         .evaluation_interval(30)
//!         .build()?;
//!
//!     // 2. One control loop per resource
//!     let callbacks = TidewatchCallbacks::new(Arc::new(MyScalingExecutor));
//!     let control = ControlLoop::from_config("checkout-api", config, callbacks)?;
//!     let analyzer = control.analyzer().clone();
//!     let scaler = control.scaler().clone();
//!     let handle = control.handle();
//!     tokio::spawn(control.start());
//!
//!     // 3. Feed it from your request path
//!     scaler.record_request_start();
//!     scaler.record_request_end(std::time::Duration::from_millis(42));
//!     analyzer.add_sample(Sample::new(chrono::Utc::now(), 120.0))?;
//!
//!     handle.shutdown().await
//! }
//! ```

pub mod analyzer;
pub mod breaker;
pub mod callbacks;
pub mod config;
pub mod engine;
pub mod error;
pub mod forecast;
pub mod history;
#[cfg(feature = "prometheus-metrics")]
pub mod metrics;
pub mod patterns;
pub mod policies;
pub mod scaler;
pub mod types;
pub mod utils;


// Re-export common types for convenience
pub use types::{
    DecisionOutcome, Metadata, Pattern, PatternType, Prediction, ResourceId, Sample,
    ScaleDecision, ScaleDirection, Timestamp, TrendDirection, TrendFit,
};

pub use error::{TidewatchError, TidewatchResult};

pub use config::{
    AnalyzerConfig, BreakerConfig, ForecastConfig, ScalerConfig, TidewatchConfig,
    TidewatchConfigBuilder,
};

pub use analyzer::{AnalyzerStats, TrafficAnalyzer};
pub use breaker::{BreakerRegistry, BreakerState, BreakerStats, FailureBreaker};
pub use callbacks::{
    CallbackContext, NoopExecutor, ScalingExecutor, ScalingObserver, TidewatchCallbacks,
};
pub use engine::{ControlLoop, ControlLoopHandle, LoopStatus};
pub use forecast::Forecaster;
pub use history::HistoryStore;
pub use patterns::{PatternDetector, PatternRegistry};
pub use scaler::{DecisionInputs, LoadSnapshot, PredictiveScaler, ScalerMetrics};

#[cfg(feature = "prometheus-metrics")]
pub use metrics::MetricsExporter;
