//! Prometheus exposition for analyzer, scaler and breaker state
//!
//! The exporter owns its own [`Registry`] rather than using the process-wide
//! default, so several exporters (or tests) can coexist. Values are pulled
//! from the `get_stats`/`get_metrics`/`stats` snapshots and written as gauges.

use prometheus::{Encoder, GaugeVec, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::analyzer::AnalyzerStats;
use crate::breaker::{BreakerState, BreakerStats};
use crate::error::{TidewatchError, TidewatchResult};
use crate::scaler::ScalerMetrics;
use crate::types::PatternType;

/// Gauges for one or more monitored resources
#[derive(Clone)]
pub struct MetricsExporter {
    registry: Registry,
    stored_samples: IntGaugeVec,
    patterns_detected: IntGaugeVec,
    pattern_confidence: GaugeVec,
    analysis_cycles: IntGaugeVec,
    in_flight: IntGaugeVec,
    requests_per_window: IntGaugeVec,
    avg_response_time_seconds: GaugeVec,
    error_rate: GaugeVec,
    scale_actions: IntGaugeVec,
    callback_failures: IntGaugeVec,
    breaker_state: IntGaugeVec,
}

impl MetricsExporter {
    pub fn new() -> TidewatchResult<Self> {
        let registry = Registry::new();

        let exporter = Self {
            stored_samples: int_gauge_vec(
                &registry,
                "tidewatch_stored_samples",
                "Samples currently held in the history window",
                &["resource"],
            )?,
            patterns_detected: int_gauge_vec(
                &registry,
                "tidewatch_patterns_detected",
                "Patterns that survived the latest analysis cycle",
                &["resource"],
            )?,
            pattern_confidence: gauge_vec(
                &registry,
                "tidewatch_pattern_confidence",
                "Confidence of each active pattern, 0 when not detected",
                &["resource", "pattern"],
            )?,
            analysis_cycles: int_gauge_vec(
                &registry,
                "tidewatch_analysis_cycles_total",
                "Analysis cycles run",
                &["resource"],
            )?,
            in_flight: int_gauge_vec(
                &registry,
                "tidewatch_requests_in_flight",
                "Requests started and not yet finished",
                &["resource"],
            )?,
            requests_per_window: int_gauge_vec(
                &registry,
                "tidewatch_requests_per_window",
                "Request starts within the request window",
                &["resource"],
            )?,
            avg_response_time_seconds: gauge_vec(
                &registry,
                "tidewatch_avg_response_time_seconds",
                "Mean of the response-time window",
                &["resource"],
            )?,
            error_rate: gauge_vec(
                &registry,
                "tidewatch_error_rate",
                "Errors per request start within the request window",
                &["resource"],
            )?,
            scale_actions: int_gauge_vec(
                &registry,
                "tidewatch_scale_actions_total",
                "Successful scaling actions",
                &["resource", "direction"],
            )?,
            callback_failures: int_gauge_vec(
                &registry,
                "tidewatch_callback_failures_total",
                "Scaling callbacks that returned an error",
                &["resource"],
            )?,
            breaker_state: int_gauge_vec(
                &registry,
                "tidewatch_breaker_state",
                "Failure breaker state (0 closed, 1 half-open, 2 open)",
                &["resource"],
            )?,
            registry,
        };
        Ok(exporter)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn observe_analyzer(&self, stats: &AnalyzerStats) {
        let resource = stats.resource_id.as_str();
        self.stored_samples
            .with_label_values(&[resource])
            .set(stats.sample_count as i64);
        self.patterns_detected
            .with_label_values(&[resource])
            .set(stats.pattern_confidence.len() as i64);
        self.analysis_cycles
            .with_label_values(&[resource])
            .set(stats.analysis_cycles as i64);

        for pattern_type in PatternType::ALL {
            let confidence = stats
                .pattern_confidence
                .get(pattern_type.as_str())
                .copied()
                .unwrap_or(0.0);
            self.pattern_confidence
                .with_label_values(&[resource, pattern_type.as_str()])
                .set(confidence);
        }
    }

    pub fn observe_scaler(&self, metrics: &ScalerMetrics) {
        let resource = metrics.resource_id.as_str();
        self.in_flight
            .with_label_values(&[resource])
            .set(metrics.in_flight as i64);
        self.requests_per_window
            .with_label_values(&[resource])
            .set(metrics.load.requests_per_window as i64);
        self.avg_response_time_seconds
            .with_label_values(&[resource])
            .set(metrics.load.avg_response_time.as_secs_f64());
        self.error_rate
            .with_label_values(&[resource])
            .set(metrics.load.error_rate);
        self.scale_actions
            .with_label_values(&[resource, "up"])
            .set(metrics.scale_ups as i64);
        self.scale_actions
            .with_label_values(&[resource, "down"])
            .set(metrics.scale_downs as i64);
        self.callback_failures
            .with_label_values(&[resource])
            .set(metrics.callback_failures as i64);
    }

    pub fn observe_breaker(&self, stats: &BreakerStats) {
        let value = match stats.state {
            BreakerState::Closed => 0,
            BreakerState::HalfOpen => 1,
            BreakerState::Open => 2,
        };
        self.breaker_state
            .with_label_values(&[stats.resource_id.as_str()])
            .set(value);
    }

    /// Render every registered metric in the text exposition format
    pub fn encode(&self) -> TidewatchResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| TidewatchError::unexpected(format!("metrics are not valid UTF-8: {}", e)))
    }
}

impl std::fmt::Debug for MetricsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsExporter").finish_non_exhaustive()
    }
}

fn int_gauge_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> TidewatchResult<IntGaugeVec> {
    let gauge = IntGaugeVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn gauge_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> TidewatchResult<GaugeVec> {
    let gauge = GaugeVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::FailureBreaker;
    use crate::config::BreakerConfig;
    use std::collections::BTreeMap;

    #[test]
    fn test_exporters_do_not_collide() {
        assert!(MetricsExporter::new().is_ok());
        assert!(MetricsExporter::new().is_ok());
    }

    #[test]
    fn test_encode_analyzer_and_breaker() {
        let exporter = MetricsExporter::new().unwrap();
        exporter.observe_analyzer(&AnalyzerStats {
            resource_id: "api".to_string(),
            sample_count: 42,
            oldest_sample: None,
            newest_sample: None,
            analysis_cycles: 3,
            last_analysis_at: None,
            pattern_confidence: BTreeMap::from([("daily".to_string(), 0.95)]),
        });

        let breaker = FailureBreaker::new("api", BreakerConfig::default().failure_threshold(1));
        breaker.record_failure();
        exporter.observe_breaker(&breaker.stats());

        let text = exporter.encode().unwrap();
        assert!(text.contains("tidewatch_stored_samples{resource=\"api\"} 42"));
        assert!(text.contains("tidewatch_pattern_confidence{pattern=\"daily\",resource=\"api\"} 0.95"));
        assert!(text.contains("tidewatch_pattern_confidence{pattern=\"weekly\",resource=\"api\"} 0"));
        assert!(text.contains("tidewatch_breaker_state{resource=\"api\"} 2"));
    }
}
