//! Configuration for the analyzer, forecaster, scaler, breaker and control loop
//!
//! Every section has documented defaults and can be built fluently or loaded
//! from TOML (with the `config-toml` feature):
//!
//! ```rust,ignore
//! let config = TidewatchConfig::builder()
//!     .evaluation_interval(15)
//!     .scaler(ScalerConfig::default().scale_up_threshold(1200.0))
//!     .breaker(BreakerConfig::default().failure_threshold(3))
//!     .build()?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{TidewatchError, TidewatchResult};

/// Settings for the history store and pattern detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Samples older than this are evicted (seconds)
    pub retention_window_seconds: u64,
    /// How often the control loop re-runs pattern detection (seconds)
    pub analysis_interval_seconds: u64,
    /// Minimum confidence for a pattern to be kept (0.0 to 1.0)
    pub pattern_confidence_threshold: f64,
    /// Slopes with a smaller magnitude count as a stable trend
    pub trend_sensitivity: f64,
    pub min_daily_samples: usize,
    pub min_weekly_samples: usize,
    pub min_trend_samples: usize,
    pub min_seasonal_samples: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            retention_window_seconds: 24 * 3600,
            analysis_interval_seconds: 300,
            pattern_confidence_threshold: 0.7,
            trend_sensitivity: 0.01,
            min_daily_samples: 24,
            min_weekly_samples: 168,
            min_trend_samples: 10,
            min_seasonal_samples: 720,
        }
    }
}

impl AnalyzerConfig {
    pub fn retention_window(&self) -> Duration {
        Duration::from_secs(self.retention_window_seconds)
    }

    pub fn analysis_interval(&self) -> Duration {
        Duration::from_secs(self.analysis_interval_seconds)
    }

    pub fn retention_window_seconds(mut self, seconds: u64) -> Self {
        self.retention_window_seconds = seconds;
        self
    }

    pub fn analysis_interval_seconds(mut self, seconds: u64) -> Self {
        self.analysis_interval_seconds = seconds;
        self
    }

    pub fn pattern_confidence_threshold(mut self, threshold: f64) -> Self {
        self.pattern_confidence_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn trend_sensitivity(mut self, sensitivity: f64) -> Self {
        self.trend_sensitivity = sensitivity.abs();
        self
    }

    fn validate(&self) -> TidewatchResult<()> {
        if self.retention_window_seconds == 0 {
            return Err(TidewatchError::config("retention window must be greater than zero"));
        }
        if self.analysis_interval_seconds == 0 {
            return Err(TidewatchError::config("analysis interval must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.pattern_confidence_threshold) {
            return Err(TidewatchError::config("pattern confidence threshold must be within [0, 1]"));
        }
        if self.min_trend_samples < 2 {
            return Err(TidewatchError::config("trend detection needs at least 2 samples"));
        }
        Ok(())
    }
}

/// Settings for forward predictions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// How far ahead the control loop forecasts (seconds)
    pub horizon_seconds: u64,
    /// Spacing between forecast points (seconds)
    pub step_seconds: u64,
    /// Confidence attached to first/last-point extrapolation
    pub fallback_confidence: f64,
    /// Samples needed for the first/last-point extrapolation
    pub fallback_min_samples: usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            horizon_seconds: 3600,
            step_seconds: 900,
            fallback_confidence: 0.5,
            fallback_min_samples: 2,
        }
    }
}

impl ForecastConfig {
    pub fn horizon(&self) -> Duration {
        Duration::from_secs(self.horizon_seconds)
    }

    pub fn step(&self) -> Duration {
        Duration::from_secs(self.step_seconds)
    }

    pub fn horizon_seconds(mut self, seconds: u64) -> Self {
        self.horizon_seconds = seconds;
        self
    }

    pub fn step_seconds(mut self, seconds: u64) -> Self {
        self.step_seconds = seconds;
        self
    }

    pub fn fallback_confidence(mut self, confidence: f64) -> Self {
        self.fallback_confidence = confidence.clamp(0.0, 1.0);
        self
    }

    fn validate(&self) -> TidewatchResult<()> {
        if self.horizon_seconds == 0 {
            return Err(TidewatchError::config("forecast horizon must be greater than zero"));
        }
        if self.step_seconds == 0 {
            return Err(TidewatchError::config("forecast step must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.fallback_confidence) {
            return Err(TidewatchError::config("fallback confidence must be within [0, 1]"));
        }
        if self.fallback_min_samples < 2 {
            return Err(TidewatchError::config("fallback extrapolation needs at least 2 samples"));
        }
        Ok(())
    }
}

/// Thresholds for scale decisions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalerConfig {
    /// Scale up when requests per window (or predicted load) exceed this
    pub scale_up_threshold: f64,
    /// Scale down only when requests per window are below this
    pub scale_down_threshold: f64,
    /// Scale up when mean response time exceeds this (milliseconds)
    pub high_latency_threshold_ms: u64,
    /// Scale down only when mean response time is below this (milliseconds)
    pub low_latency_threshold_ms: u64,
    /// Scale down only when the error rate is below this
    pub error_rate_ceiling: f64,
    /// Number of most recent response times kept
    pub response_window_size: usize,
    /// Window over which request starts and errors are counted (seconds)
    pub request_window_seconds: u64,
    /// Minimum time between successful scaling actions (seconds, 0 disables)
    pub scale_cooldown_seconds: u64,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            scale_up_threshold: 1000.0,
            scale_down_threshold: 100.0,
            high_latency_threshold_ms: 500,
            low_latency_threshold_ms: 100,
            error_rate_ceiling: 0.01,
            response_window_size: 100,
            request_window_seconds: 60,
            scale_cooldown_seconds: 60,
        }
    }
}

impl ScalerConfig {
    pub fn high_latency_threshold(&self) -> Duration {
        Duration::from_millis(self.high_latency_threshold_ms)
    }

    pub fn low_latency_threshold(&self) -> Duration {
        Duration::from_millis(self.low_latency_threshold_ms)
    }

    pub fn request_window(&self) -> Duration {
        Duration::from_secs(self.request_window_seconds)
    }

    pub fn scale_cooldown(&self) -> Duration {
        Duration::from_secs(self.scale_cooldown_seconds)
    }

    pub fn scale_up_threshold(mut self, threshold: f64) -> Self {
        self.scale_up_threshold = threshold;
        self
    }

    pub fn scale_down_threshold(mut self, threshold: f64) -> Self {
        self.scale_down_threshold = threshold;
        self
    }

    pub fn high_latency_threshold_ms(mut self, millis: u64) -> Self {
        self.high_latency_threshold_ms = millis;
        self
    }

    pub fn low_latency_threshold_ms(mut self, millis: u64) -> Self {
        self.low_latency_threshold_ms = millis;
        self
    }

    pub fn error_rate_ceiling(mut self, ceiling: f64) -> Self {
        self.error_rate_ceiling = ceiling.clamp(0.0, 1.0);
        self
    }

    pub fn response_window_size(mut self, size: usize) -> Self {
        self.response_window_size = size;
        self
    }

    pub fn request_window_seconds(mut self, seconds: u64) -> Self {
        self.request_window_seconds = seconds;
        self
    }

    pub fn scale_cooldown_seconds(mut self, seconds: u64) -> Self {
        self.scale_cooldown_seconds = seconds;
        self
    }

    fn validate(&self) -> TidewatchResult<()> {
        if self.scale_down_threshold >= self.scale_up_threshold {
            return Err(TidewatchError::config(format!(
                "scale_down_threshold ({}) must be below scale_up_threshold ({})",
                self.scale_down_threshold, self.scale_up_threshold
            )));
        }
        if self.low_latency_threshold_ms >= self.high_latency_threshold_ms {
            return Err(TidewatchError::config(format!(
                "low latency threshold ({}ms) must be below high latency threshold ({}ms)",
                self.low_latency_threshold_ms, self.high_latency_threshold_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.error_rate_ceiling) {
            return Err(TidewatchError::config("error rate ceiling must be within [0, 1]"));
        }
        if self.response_window_size == 0 {
            return Err(TidewatchError::config("response window must hold at least one entry"));
        }
        if self.request_window_seconds == 0 {
            return Err(TidewatchError::config("request window must be greater than zero"));
        }
        Ok(())
    }
}

/// Failure breaker thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// Time spent open before probing (milliseconds)
    pub open_timeout_ms: u64,
    /// Consecutive half-open successes that close the breaker
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout_ms: 30_000,
            success_threshold: 3,
        }
    }
}

impl BreakerConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn open_timeout_ms(mut self, millis: u64) -> Self {
        self.open_timeout_ms = millis;
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub(crate) fn validate(&self) -> TidewatchResult<()> {
        if self.failure_threshold == 0 {
            return Err(TidewatchError::config("breaker failure threshold must be at least 1"));
        }
        if self.success_threshold == 0 {
            return Err(TidewatchError::config("breaker success threshold must be at least 1"));
        }
        Ok(())
    }
}

/// Main configuration for a monitored resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TidewatchConfig {
    /// How often the control loop ticks (seconds)
    pub evaluation_interval_seconds: u64,
    pub analyzer: AnalyzerConfig,
    pub forecast: ForecastConfig,
    pub scaler: ScalerConfig,
    pub breaker: BreakerConfig,
}

impl Default for TidewatchConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_seconds: 30,
            analyzer: AnalyzerConfig::default(),
            forecast: ForecastConfig::default(),
            scaler: ScalerConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

impl TidewatchConfig {
    pub fn builder() -> TidewatchConfigBuilder {
        TidewatchConfigBuilder::new()
    }

    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_seconds)
    }

    /// Check that the settings are consistent with each other
    pub fn validate(&self) -> TidewatchResult<()> {
        if self.evaluation_interval_seconds == 0 {
            return Err(TidewatchError::config("evaluation interval must be greater than zero"));
        }
        self.analyzer.validate()?;
        self.forecast.validate()?;
        self.scaler.validate()?;
        self.breaker.validate()?;
        Ok(())
    }

    /// Parse and validate a TOML document
    #[cfg(feature = "config-toml")]
    pub fn from_toml_str(document: &str) -> TidewatchResult<Self> {
        let config: Self = toml::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    #[cfg(feature = "config-toml")]
    pub fn from_toml_file<P: AsRef<std::path::Path>>(path: P) -> TidewatchResult<Self> {
        let document = std::fs::read_to_string(path)?;
        Self::from_toml_str(&document)
    }

    #[cfg(feature = "config-toml")]
    pub fn to_toml_string(&self) -> TidewatchResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| TidewatchError::config(format!("failed to serialize config: {}", e)))
    }
}

/// Builder for creating configurations easily
#[derive(Debug, Default)]
pub struct TidewatchConfigBuilder {
    config: TidewatchConfig,
}

impl TidewatchConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluation_interval(mut self, seconds: u64) -> Self {
        self.config.evaluation_interval_seconds = seconds;
        self
    }

    pub fn analyzer(mut self, analyzer: AnalyzerConfig) -> Self {
        self.config.analyzer = analyzer;
        self
    }

    pub fn forecast(mut self, forecast: ForecastConfig) -> Self {
        self.config.forecast = forecast;
        self
    }

    pub fn scaler(mut self, scaler: ScalerConfig) -> Self {
        self.config.scaler = scaler;
        self
    }

    pub fn breaker(mut self, breaker: BreakerConfig) -> Self {
        self.config.breaker = breaker;
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> TidewatchResult<TidewatchConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
