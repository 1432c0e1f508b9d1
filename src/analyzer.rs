//! # Traffic Analyzer
//!
//! One analyzer per monitored resource. It owns the sample history, the
//! pattern registry and the detector/forecaster pair, and makes sure no lock
//! is held while detection or forecasting runs: samples and patterns are
//! copied out first.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{AnalyzerConfig, ForecastConfig, TidewatchConfig};
use crate::error::TidewatchResult;
use crate::forecast::Forecaster;
use crate::history::HistoryStore;
use crate::patterns::{PatternDetector, PatternRegistry};
use crate::types::{Pattern, Prediction, ResourceId, Sample, Timestamp};
use crate::utils::{current_timestamp, seconds_between};

/// Summary of an analyzer's state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerStats {
    pub resource_id: ResourceId,
    pub sample_count: usize,
    pub oldest_sample: Option<Timestamp>,
    pub newest_sample: Option<Timestamp>,
    pub analysis_cycles: u64,
    pub last_analysis_at: Option<Timestamp>,
    /// Confidence of each currently active pattern, by id
    pub pattern_confidence: BTreeMap<String, f64>,
}

#[derive(Debug, Default)]
struct CycleLog {
    cycles: u64,
    last_analysis_at: Option<Timestamp>,
}

/// History, pattern detection and forecasting for one resource
#[derive(Debug)]
pub struct TrafficAnalyzer {
    resource_id: ResourceId,
    config: AnalyzerConfig,
    history: HistoryStore,
    detector: PatternDetector,
    forecaster: Forecaster,
    registry: Mutex<PatternRegistry>,
    cycles: Mutex<CycleLog>,
}

impl TrafficAnalyzer {
    pub fn new<S: Into<ResourceId>>(
        resource_id: S,
        config: AnalyzerConfig,
        forecast: ForecastConfig,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            history: HistoryStore::new(config.retention_window()),
            detector: PatternDetector::new(config.clone()),
            forecaster: Forecaster::new(forecast),
            registry: Mutex::new(PatternRegistry::new()),
            cycles: Mutex::new(CycleLog::default()),
            config,
        }
    }

    /// Analyzer built from the `analyzer` and `forecast` sections
    pub fn from_config<S: Into<ResourceId>>(resource_id: S, config: &TidewatchConfig) -> Self {
        Self::new(resource_id, config.analyzer.clone(), config.forecast.clone())
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn add_sample(&self, sample: Sample) -> TidewatchResult<()> {
        self.history.add_sample(sample)
    }

    pub fn add_sample_at(&self, sample: Sample, now: Timestamp) -> TidewatchResult<()> {
        self.history.add_sample_at(sample, now)
    }

    pub fn snapshot(&self) -> Vec<Sample> {
        self.history.snapshot()
    }

    /// Run one detection cycle and return the patterns that survived it
    pub fn analyze(&self) -> Vec<Pattern> {
        self.analyze_at(current_timestamp())
    }

    pub fn analyze_at(&self, now: Timestamp) -> Vec<Pattern> {
        let samples = self.history.snapshot();
        let detected = self.detector.detect_patterns_at(&samples, now);

        let patterns = {
            let mut registry = self.registry.lock();
            registry.apply_cycle(detected);
            registry.patterns()
        };
        {
            let mut cycles = self.cycles.lock();
            cycles.cycles += 1;
            cycles.last_analysis_at = Some(now);
        }

        info!(
            resource = %self.resource_id,
            samples = samples.len(),
            patterns = patterns.len(),
            "analysis cycle complete"
        );
        patterns
    }

    /// Whether the analysis interval has passed since the last cycle
    pub fn is_analysis_due(&self, now: Timestamp) -> bool {
        match self.cycles.lock().last_analysis_at {
            None => true,
            Some(last) => {
                seconds_between(last, now) >= self.config.analysis_interval().as_secs_f64()
            }
        }
    }

    /// Forecast from the current history and active patterns
    pub fn predict(&self, horizon: Duration) -> TidewatchResult<Vec<Prediction>> {
        self.predict_at(horizon, current_timestamp())
    }

    pub fn predict_at(&self, horizon: Duration, now: Timestamp) -> TidewatchResult<Vec<Prediction>> {
        let samples = self.history.snapshot();
        let patterns = self.get_patterns();
        let predictions = self.forecaster.predict_at(&samples, &patterns, horizon, now)?;
        debug!(
            resource = %self.resource_id,
            points = predictions.len(),
            horizon_secs = horizon.as_secs(),
            "forecast produced"
        );
        Ok(predictions)
    }

    /// Copy of the active patterns keyed by id
    pub fn get_patterns(&self) -> HashMap<String, Pattern> {
        self.registry.lock().as_map()
    }

    pub fn get_stats(&self) -> AnalyzerStats {
        let range = self.history.time_range();
        let pattern_confidence = self
            .registry
            .lock()
            .patterns()
            .into_iter()
            .map(|p| (p.id, p.confidence))
            .collect();
        let cycles = self.cycles.lock();
        AnalyzerStats {
            resource_id: self.resource_id.clone(),
            sample_count: self.history.len(),
            oldest_sample: range.map(|(oldest, _)| oldest),
            newest_sample: range.map(|(_, newest)| newest),
            analysis_cycles: cycles.cycles,
            last_analysis_at: cycles.last_analysis_at,
            pattern_confidence,
        }
    }
}
