//! # Forecasting
//!
//! Turns detected patterns into forward predictions. Every applicable pattern
//! contributes its own prediction for each future point; nothing is blended
//! here, so consumers pick their own combination (the scaler takes the
//! maximum at the nearest horizon).
//!
//! When no pattern survived detection, the forecaster draws a line through
//! the first and last samples and marks the result with a fixed, low
//! confidence.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{Datelike, Timelike};
use tracing::debug;

use crate::config::ForecastConfig;
use crate::error::{TidewatchError, TidewatchResult};
use crate::types::{Pattern, PatternType, Prediction, Sample, Timestamp};
use crate::utils::{current_timestamp, seconds_between};

/// Produces predictions from samples and detected patterns
#[derive(Debug, Clone)]
pub struct Forecaster {
    config: ForecastConfig,
}

impl Forecaster {
    pub fn new(config: ForecastConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    /// Predict load at each forecast step within `horizon`
    pub fn predict(
        &self,
        samples: &[Sample],
        patterns: &HashMap<String, Pattern>,
        horizon: Duration,
    ) -> TidewatchResult<Vec<Prediction>> {
        self.predict_at(samples, patterns, horizon, current_timestamp())
    }

    /// Same as [`predict`](Self::predict) with an explicit notion of "now"
    pub fn predict_at(
        &self,
        samples: &[Sample],
        patterns: &HashMap<String, Pattern>,
        horizon: Duration,
        now: Timestamp,
    ) -> TidewatchResult<Vec<Prediction>> {
        if horizon.is_zero() {
            return Err(TidewatchError::config("forecast horizon must be greater than zero"));
        }

        // The fallback has the smallest appetite of all strategies.
        let required = self.config.fallback_min_samples;
        if samples.len() < required {
            return Err(TidewatchError::insufficient_data("forecast", required, samples.len()));
        }

        let offsets = self.offsets(horizon);

        if patterns.is_empty() {
            debug!(points = offsets.len(), "no patterns available, using linear fallback");
            return self.fallback(samples, &offsets, now);
        }

        // Stable ordering so consumers see the same layout every call.
        let mut ordered: Vec<&Pattern> = patterns.values().collect();
        ordered.sort_by(|a, b| a.pattern_type.cmp(&b.pattern_type).then_with(|| a.id.cmp(&b.id)));

        let mut predictions = Vec::with_capacity(offsets.len() * ordered.len());
        for offset in &offsets {
            let Some(timestamp) = now.checked_add_signed(to_chrono(*offset)) else {
                break;
            };
            for pattern in &ordered {
                if let Some(load) = predict_from_pattern(pattern, timestamp) {
                    predictions.push(Prediction {
                        timestamp,
                        predicted_load: load.max(0.0),
                        confidence: pattern.confidence,
                        source_pattern_type: Some(pattern.pattern_type),
                        horizon: *offset,
                        factors: vec![pattern.id.clone()],
                    });
                }
            }
        }

        if predictions.is_empty() {
            debug!(patterns = ordered.len(), "no pattern covers the horizon, using linear fallback");
            return self.fallback(samples, &offsets, now);
        }

        Ok(predictions)
    }

    /// Offsets `step, 2*step, ...` up to and including the horizon
    fn offsets(&self, horizon: Duration) -> Vec<Duration> {
        let step = if self.config.step_seconds == 0 {
            horizon
        } else {
            self.config.step().min(horizon)
        };
        let steps = (horizon.as_secs_f64() / step.as_secs_f64()).ceil().max(1.0) as u32;
        (1..=steps).map(|k| (step * k).min(horizon)).collect()
    }

    fn fallback(
        &self,
        samples: &[Sample],
        offsets: &[Duration],
        now: Timestamp,
    ) -> TidewatchResult<Vec<Prediction>> {
        let (first, last) = match (samples.first(), samples.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                return Err(TidewatchError::insufficient_data(
                    "linear fallback",
                    self.config.fallback_min_samples,
                    samples.len(),
                ))
            }
        };

        let elapsed = seconds_between(first.timestamp, last.timestamp);
        let rate_per_second = if elapsed > 0.0 {
            (last.request_rate - first.request_rate) / elapsed
        } else {
            0.0
        };

        Ok(offsets
            .iter()
            .map_while(|offset| {
                let timestamp = now.checked_add_signed(to_chrono(*offset))?;
                let load = last.request_rate
                    + rate_per_second * seconds_between(last.timestamp, timestamp);
                Some(Prediction {
                    timestamp,
                    predicted_load: load.max(0.0),
                    confidence: self.config.fallback_confidence,
                    source_pattern_type: None,
                    horizon: *offset,
                    factors: Vec::new(),
                })
            })
            .collect())
    }
}

fn predict_from_pattern(pattern: &Pattern, timestamp: Timestamp) -> Option<f64> {
    match pattern.pattern_type {
        PatternType::Daily => pattern.bucket(timestamp.hour()),
        PatternType::Weekly => pattern.bucket(timestamp.weekday().num_days_from_monday()),
        PatternType::Seasonal => pattern.bucket(timestamp.month()),
        PatternType::Trend => pattern.trend.as_ref().map(|fit| fit.value_at(timestamp)),
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// Highest predicted load among the predictions closest to now
pub fn nearest_peak(predictions: &[Prediction]) -> Option<f64> {
    let nearest = predictions.iter().map(|p| p.horizon).min()?;
    predictions
        .iter()
        .filter(|p| p.horizon == nearest)
        .map(|p| p.predicted_load)
        .fold(None, |acc: Option<f64>, load| Some(acc.map_or(load, |a| a.max(load))))
}
