//! Convenience presets for common scaling profiles
//!
//! Each preset keeps the scale-down threshold well below the scale-up
//! threshold; how wide that gap is decides how eagerly capacity follows load.

use crate::config::{BreakerConfig, ScalerConfig, TidewatchConfig};

/// Slow to add capacity, slower to remove it
pub fn conservative_scaler(scale_up_threshold: f64) -> ScalerConfig {
    ScalerConfig::default()
        .scale_up_threshold(scale_up_threshold)
        .scale_down_threshold(scale_up_threshold * 0.05)
        .high_latency_threshold_ms(1_000)
        .low_latency_threshold_ms(100)
        .error_rate_ceiling(0.001)
        .scale_cooldown_seconds(600)
}

/// The library defaults scaled to `scale_up_threshold`
pub fn balanced_scaler(scale_up_threshold: f64) -> ScalerConfig {
    ScalerConfig::default()
        .scale_up_threshold(scale_up_threshold)
        .scale_down_threshold(scale_up_threshold * 0.1)
        .scale_cooldown_seconds(120)
}

/// Reacts quickly to latency and gives capacity back early
pub fn aggressive_scaler(scale_up_threshold: f64) -> ScalerConfig {
    ScalerConfig::default()
        .scale_up_threshold(scale_up_threshold)
        .scale_down_threshold(scale_up_threshold * 0.3)
        .high_latency_threshold_ms(250)
        .low_latency_threshold_ms(150)
        .error_rate_ceiling(0.02)
        .request_window_seconds(30)
        .scale_cooldown_seconds(30)
}

/// Breaker that tolerates brief failure bursts and probes slowly
pub fn patient_breaker() -> BreakerConfig {
    BreakerConfig::default()
        .failure_threshold(10)
        .open_timeout_ms(60_000)
        .success_threshold(5)
}

/// Breaker that trips early and probes quickly
pub fn sensitive_breaker() -> BreakerConfig {
    BreakerConfig::default()
        .failure_threshold(3)
        .open_timeout_ms(10_000)
        .success_threshold(2)
}

/// Full configuration for a conservative profile
pub fn conservative(scale_up_threshold: f64) -> TidewatchConfig {
    TidewatchConfig {
        evaluation_interval_seconds: 60,
        scaler: conservative_scaler(scale_up_threshold),
        breaker: patient_breaker(),
        ..TidewatchConfig::default()
    }
}

/// Full configuration with default analysis and breaker settings
pub fn balanced(scale_up_threshold: f64) -> TidewatchConfig {
    TidewatchConfig {
        scaler: balanced_scaler(scale_up_threshold),
        ..TidewatchConfig::default()
    }
}

/// Full configuration for an aggressive profile
pub fn aggressive(scale_up_threshold: f64) -> TidewatchConfig {
    TidewatchConfig {
        evaluation_interval_seconds: 10,
        scaler: aggressive_scaler(scale_up_threshold),
        breaker: sensitive_breaker(),
        ..TidewatchConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        for config in [conservative(500.0), balanced(500.0), aggressive(500.0)] {
            assert!(config.validate().is_ok(), "{:?}", config.scaler);
        }
    }

    #[test]
    fn test_presets_order_by_eagerness() {
        let slow = conservative_scaler(1000.0);
        let mid = balanced_scaler(1000.0);
        let fast = aggressive_scaler(1000.0);

        assert!(slow.scale_cooldown_seconds > mid.scale_cooldown_seconds);
        assert!(mid.scale_cooldown_seconds > fast.scale_cooldown_seconds);
        assert!(slow.scale_down_threshold < mid.scale_down_threshold);
        assert!(mid.scale_down_threshold < fast.scale_down_threshold);
        assert!(fast.high_latency_threshold_ms < slow.high_latency_threshold_ms);
    }

    #[test]
    fn test_breaker_presets() {
        assert!(patient_breaker().failure_threshold > sensitive_breaker().failure_threshold);
        assert_eq!(sensitive_breaker().open_timeout_ms, 10_000);
    }
}
