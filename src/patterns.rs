//! # Pattern Detection
//!
//! Finds recurring shapes and linear drift in a snapshot of traffic samples.
//!
//! Four detectors run independently on every analysis cycle:
//!
//! | Detector | Bucket | Minimum samples | Confidence |
//! |----------|--------|-----------------|------------|
//! | Daily    | hour of day (0-23) | 24  | `1 / (1 + within / between)` |
//! | Weekly   | weekday (0 = Monday) | 168 | `1 / (1 + within / between)` |
//! | Trend    | none, OLS on sample index | 10 | R² |
//! | Seasonal | calendar month (1-12) | 720 | `1 / (1 + within / between)` |
//!
//! For the cyclic detectors `within` is the pooled standard deviation of each
//! bucket around its own mean, and `between` is the standard deviation of the
//! bucket means. A shape that repeats exactly scores 1.0 however pronounced it
//! is. Noise that makes the same hour look different from one day to the next
//! pulls the score down, and a flat profile scores 0. When no bucket has been
//! seen twice yet, the score falls back to `1 / (1 + CV)` over the bucket means.
//!
//! A detector that lacks data or confidence simply contributes nothing to the
//! cycle. Missing patterns are the normal state for a young history.

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, Timelike};
use tracing::debug;

use crate::config::AnalyzerConfig;
use crate::error::{TidewatchError, TidewatchResult};
use crate::types::{Metadata, Pattern, PatternType, Sample, Timestamp, TrendDirection, TrendFit};
use crate::utils::{current_timestamp, linear_regression, mean, seconds_between};

/// Runs the daily, weekly, trend and seasonal detectors over sample snapshots
#[derive(Debug, Clone)]
pub struct PatternDetector {
    config: AnalyzerConfig,
}

impl PatternDetector {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Run every detector and keep whatever passes its gates
    pub fn detect_patterns(&self, samples: &[Sample]) -> Vec<Pattern> {
        self.detect_patterns_at(samples, current_timestamp())
    }

    /// Same as [`detect_patterns`](Self::detect_patterns), stamping results with `now`
    pub fn detect_patterns_at(&self, samples: &[Sample], now: Timestamp) -> Vec<Pattern> {
        let mut patterns = Vec::with_capacity(PatternType::ALL.len());

        for pattern_type in PatternType::ALL {
            match self.detect(pattern_type, samples, now) {
                Ok(pattern) => {
                    debug!(
                        pattern = %pattern_type,
                        confidence = pattern.confidence,
                        "pattern detected"
                    );
                    patterns.push(pattern);
                }
                Err(e) if e.is_recoverable() => {
                    debug!(pattern = %pattern_type, reason = %e, "pattern omitted");
                }
                Err(e) => {
                    debug!(pattern = %pattern_type, error = %e, "pattern detector failed");
                }
            }
        }

        patterns
    }

    /// Run a single detector
    pub fn detect(
        &self,
        pattern_type: PatternType,
        samples: &[Sample],
        now: Timestamp,
    ) -> TidewatchResult<Pattern> {
        match pattern_type {
            PatternType::Daily => self.detect_daily(samples, now),
            PatternType::Weekly => self.detect_weekly(samples, now),
            PatternType::Trend => self.detect_trend(samples, now),
            PatternType::Seasonal => self.detect_seasonal(samples, now),
        }
    }

    pub fn detect_daily(&self, samples: &[Sample], now: Timestamp) -> TidewatchResult<Pattern> {
        self.detect_cyclic(PatternType::Daily, samples, self.config.min_daily_samples, now, |s| {
            s.timestamp.hour()
        })
    }

    pub fn detect_weekly(&self, samples: &[Sample], now: Timestamp) -> TidewatchResult<Pattern> {
        self.detect_cyclic(PatternType::Weekly, samples, self.config.min_weekly_samples, now, |s| {
            s.timestamp.weekday().num_days_from_monday()
        })
    }

    pub fn detect_seasonal(&self, samples: &[Sample], now: Timestamp) -> TidewatchResult<Pattern> {
        self.detect_cyclic(
            PatternType::Seasonal,
            samples,
            self.config.min_seasonal_samples,
            now,
            |s| s.timestamp.month(),
        )
    }

    /// Least-squares trend of request rate against sample index
    pub fn detect_trend(&self, samples: &[Sample], now: Timestamp) -> TidewatchResult<Pattern> {
        let required = self.config.min_trend_samples.max(2);
        if samples.len() < required {
            return Err(TidewatchError::insufficient_data("trend pattern", required, samples.len()));
        }

        let values: Vec<f64> = samples.iter().map(|s| s.request_rate).collect();
        let fit = linear_regression(&values)
            .ok_or_else(|| TidewatchError::insufficient_data("trend pattern", 2, values.len()))?;

        let direction = if fit.slope.abs() < self.config.trend_sensitivity {
            TrendDirection::Stable
        } else if fit.slope > 0.0 {
            TrendDirection::Increasing
        } else {
            TrendDirection::Decreasing
        };

        let confidence = fit.r_squared;
        self.check_confidence(PatternType::Trend, confidence)?;

        let (oldest, newest) = time_span(samples);
        let sample_interval_seconds = seconds_between(oldest, newest) / (samples.len() - 1) as f64;

        let mut metadata = Metadata::new();
        metadata.insert("sample_count".to_string(), samples.len().into());
        metadata.insert("slope".to_string(), fit.slope.into());

        Ok(Pattern {
            id: PatternType::Trend.as_str().to_string(),
            pattern_type: PatternType::Trend,
            confidence,
            frequency: None,
            trend_direction: Some(direction),
            buckets: BTreeMap::new(),
            trend: Some(TrendFit {
                slope: fit.slope,
                intercept: fit.intercept,
                sample_count: samples.len(),
                sample_interval_seconds,
                anchor: newest,
            }),
            last_detected_at: now,
            detection_count: 1,
            metadata,
        })
    }

    fn detect_cyclic<F>(
        &self,
        pattern_type: PatternType,
        samples: &[Sample],
        min_samples: usize,
        now: Timestamp,
        bucket_of: F,
    ) -> TidewatchResult<Pattern>
    where
        F: Fn(&Sample) -> u32,
    {
        let method = format!("{} pattern", pattern_type);
        if samples.len() < min_samples {
            return Err(TidewatchError::insufficient_data(method, min_samples, samples.len()));
        }

        let mut groups: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
        for sample in samples {
            groups.entry(bucket_of(sample)).or_default().push(sample.request_rate);
        }

        // A single bucket has no shape.
        if groups.len() < 2 {
            return Err(TidewatchError::insufficient_data(
                format!("{} (distinct buckets)", method),
                2,
                groups.len(),
            ));
        }

        let buckets: BTreeMap<u32, f64> = groups
            .iter()
            .filter_map(|(key, values)| mean(values).map(|m| (*key, m)))
            .collect();

        let confidence = cyclic_confidence(&groups, &buckets);
        self.check_confidence(pattern_type, confidence)?;

        let mut metadata = Metadata::new();
        metadata.insert("sample_count".to_string(), samples.len().into());
        metadata.insert("buckets_observed".to_string(), buckets.len().into());

        Ok(Pattern {
            id: pattern_type.as_str().to_string(),
            pattern_type,
            confidence,
            frequency: pattern_type.frequency(),
            trend_direction: None,
            buckets,
            trend: None,
            last_detected_at: now,
            detection_count: 1,
            metadata,
        })
    }

    fn check_confidence(&self, pattern_type: PatternType, confidence: f64) -> TidewatchResult<()> {
        let threshold = self.config.pattern_confidence_threshold;
        if confidence < threshold {
            return Err(TidewatchError::low_confidence(pattern_type.as_str(), confidence, threshold));
        }
        Ok(())
    }
}

/// `1 / (1 + within / between)`, always within [0, 1].
///
/// Without any repeated bucket there is no within-bucket spread to measure, so
/// the coefficient of variation of the bucket means stands in for the ratio.
fn cyclic_confidence(groups: &BTreeMap<u32, Vec<f64>>, bucket_means: &BTreeMap<u32, f64>) -> f64 {
    let means: Vec<f64> = bucket_means.values().copied().collect();
    let level = match mean(&means) {
        Some(level) if level > f64::EPSILON => level,
        _ => return 0.0,
    };
    let between = population_std(&means, level);
    if between <= f64::EPSILON * level {
        return 0.0;
    }

    let mut squared_deviation = 0.0;
    let mut observations = 0usize;
    for (key, values) in groups {
        if values.len() < 2 {
            continue;
        }
        let bucket_mean = bucket_means[key];
        squared_deviation += values.iter().map(|v| (v - bucket_mean).powi(2)).sum::<f64>();
        observations += values.len();
    }

    let ratio = if observations == 0 {
        between / level
    } else {
        (squared_deviation / observations as f64).sqrt() / between
    };
    (1.0 / (1.0 + ratio)).clamp(0.0, 1.0)
}

fn population_std(values: &[f64], center: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sum: f64 = values.iter().map(|v| (v - center).powi(2)).sum();
    (sum / values.len() as f64).sqrt()
}

fn time_span(samples: &[Sample]) -> (Timestamp, Timestamp) {
    let oldest = samples.iter().map(|s| s.timestamp).min();
    let newest = samples.iter().map(|s| s.timestamp).max();
    match (oldest, newest) {
        (Some(oldest), Some(newest)) => (oldest, newest),
        _ => {
            let now = current_timestamp();
            (now, now)
        }
    }
}

/// Latest detected pattern per id
///
/// Owned by whoever runs the analysis cycle; readers get clones.
#[derive(Debug, Clone, Default)]
pub struct PatternRegistry {
    patterns: HashMap<String, Pattern>,
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the result of an analysis cycle.
    ///
    /// A pattern detected again keeps counting from its previous
    /// `detection_count`. Patterns absent from this cycle are removed.
    pub fn apply_cycle(&mut self, detected: Vec<Pattern>) {
        let mut next = HashMap::with_capacity(detected.len());
        for mut pattern in detected {
            if let Some(previous) = self.patterns.get(&pattern.id) {
                pattern.detection_count = previous.detection_count + 1;
            }
            next.insert(pattern.id.clone(), pattern);
        }
        for id in self.patterns.keys() {
            if !next.contains_key(id) {
                debug!(pattern = %id, "pattern no longer detected");
            }
        }
        self.patterns = next;
    }

    pub fn get(&self, id: &str) -> Option<&Pattern> {
        self.patterns.get(id)
    }

    pub fn by_type(&self, pattern_type: PatternType) -> Option<&Pattern> {
        self.patterns.values().find(|p| p.pattern_type == pattern_type)
    }

    /// All patterns, ordered by type
    pub fn patterns(&self) -> Vec<Pattern> {
        let mut patterns: Vec<Pattern> = self.patterns.values().cloned().collect();
        patterns.sort_by_key(|p| p.pattern_type);
        patterns
    }

    /// Copy of the registry keyed by pattern id
    pub fn as_map(&self) -> HashMap<String, Pattern> {
        self.patterns.clone()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn clear(&mut self) {
        self.patterns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn start() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn hourly<F: FnMut(usize) -> f64>(count: usize, mut rate: F) -> Vec<Sample> {
        (0..count)
            .map(|i| Sample::new(start() + Duration::hours(i as i64), rate(i)))
            .collect()
    }

    /// Deterministic uniform noise in [-1, 1)
    struct Lcg(u64);

    impl Lcg {
        fn next_unit(&mut self) -> f64 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((self.0 >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
        }
    }

    fn daily_sine(i: usize) -> f64 {
        100.0 + 50.0 * ((i % 24) as f64).sin()
    }

    #[test]
    fn test_noise_free_daily_pattern_is_confident() {
        let detector = PatternDetector::new(AnalyzerConfig::default());
        let samples = hourly(48, daily_sine);

        let pattern = detector.detect_daily(&samples, start()).unwrap();
        assert_eq!(pattern.pattern_type, PatternType::Daily);
        assert!(pattern.confidence > 0.9, "confidence was {}", pattern.confidence);
        assert_eq!(pattern.buckets.len(), 24);
        assert!((pattern.bucket(3).unwrap() - daily_sine(3)).abs() < 1e-9);
        assert_eq!(pattern.frequency, Some(std::time::Duration::from_secs(86_400)));
    }

    #[test]
    fn test_noisy_daily_pattern_is_dropped_at_default_threshold() {
        let detector = PatternDetector::new(AnalyzerConfig::default());
        let mut noise = Lcg(42);
        let noisy: Vec<Sample> = hourly(48, daily_sine)
            .into_iter()
            .map(|mut s| {
                s.request_rate += 40.0 * noise.next_unit();
                s
            })
            .collect();

        match detector.detect_daily(&noisy, start()) {
            Err(TidewatchError::LowConfidence { confidence, .. }) => assert!(confidence < 0.7),
            Ok(pattern) => assert!(pattern.confidence < 0.5, "confidence was {}", pattern.confidence),
            Err(other) => panic!("unexpected error: {}", other),
        }

        let lenient = PatternDetector::new(AnalyzerConfig::default().pattern_confidence_threshold(0.0));
        let scored = lenient.detect_daily(&noisy, start()).unwrap();
        assert!(scored.confidence > 0.0 && scored.confidence < 0.7);
    }

    #[test]
    fn test_one_day_of_distinct_hours_is_enough() {
        let detector = PatternDetector::new(AnalyzerConfig::default());
        let pattern = detector.detect_daily(&hourly(24, daily_sine), start()).unwrap();
        assert_eq!(pattern.buckets.len(), 24);
        assert!(pattern.confidence > 0.7 && pattern.confidence < 1.0);

        let lenient = PatternDetector::new(AnalyzerConfig::default().pattern_confidence_threshold(0.0));
        let patterns = lenient.detect_patterns_at(&hourly(24, daily_sine), start());
        assert!(patterns.iter().any(|p| p.pattern_type == PatternType::Daily));
    }

    #[test]
    fn test_one_erratic_hour_lowers_confidence() {
        let detector = PatternDetector::new(AnalyzerConfig::default().pattern_confidence_threshold(0.0));
        let spike = |i: usize| if i % 24 == 12 { 1_200.0 } else { 300.0 };
        let clean = detector.detect_daily(&hourly(48, spike), start()).unwrap();
        let erratic = detector
            .detect_daily(&hourly(48, |i| spike(i) + if i == 29 { 500.0 } else { 0.0 }), start())
            .unwrap();

        assert!((clean.confidence - 1.0).abs() < 1e-9);
        assert!(erratic.confidence < clean.confidence);
        assert!(erratic.confidence > 0.5);
    }

    #[test]
    fn test_flat_profile_has_no_daily_shape() {
        let detector = PatternDetector::new(AnalyzerConfig::default().pattern_confidence_threshold(0.0));
        // Day one runs slightly hot and day two slightly cold, but every hour averages 100.
        let samples = hourly(48, |i| 100.0 + if i < 24 { 2.0 } else { -2.0 });
        let pattern = detector.detect_daily(&samples, start()).unwrap();
        assert_eq!(pattern.confidence, 0.0);
    }

    #[test]
    fn test_arithmetic_progression_trend() {
        let detector = PatternDetector::new(AnalyzerConfig::default());
        let samples = hourly(20, |i| 50.0 + 5.0 * i as f64);

        let pattern = detector.detect_trend(&samples, start()).unwrap();
        assert_eq!(pattern.trend_direction, Some(TrendDirection::Increasing));
        assert!((pattern.confidence - 1.0).abs() < 1e-9);
        assert!(pattern.frequency.is_none());

        let fit = pattern.trend.unwrap();
        assert!((fit.slope - 5.0).abs() < 1e-9);
        assert_eq!(fit.sample_count, 20);
        assert!((fit.sample_interval_seconds - 3600.0).abs() < 1e-9);
        assert!((fit.value_at(fit.anchor + Duration::hours(1)) - 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_decreasing_and_flat_trends() {
        let detector = PatternDetector::new(AnalyzerConfig::default());
        let falling = hourly(15, |i| 300.0 - 10.0 * i as f64);
        let pattern = detector.detect_trend(&falling, start()).unwrap();
        assert_eq!(pattern.trend_direction, Some(TrendDirection::Decreasing));

        // A flat line leaves nothing for R² to explain.
        let flat = hourly(15, |_| 42.0);
        assert!(matches!(
            detector.detect_trend(&flat, start()),
            Err(TidewatchError::LowConfidence { .. })
        ));

        let lenient = PatternDetector::new(AnalyzerConfig::default().pattern_confidence_threshold(0.0));
        let pattern = lenient.detect_trend(&flat, start()).unwrap();
        assert_eq!(pattern.trend_direction, Some(TrendDirection::Stable));
    }

    #[test]
    fn test_minimum_data_gating() {
        let detector = PatternDetector::new(AnalyzerConfig::default().pattern_confidence_threshold(0.0));
        let has = |patterns: &[Pattern], t: PatternType| patterns.iter().any(|p| p.pattern_type == t);

        let patterns = detector.detect_patterns_at(&hourly(9, |i| 10.0 + i as f64), start());
        assert!(!has(&patterns, PatternType::Trend));

        let patterns = detector.detect_patterns_at(&hourly(23, daily_sine), start());
        assert!(!has(&patterns, PatternType::Daily));

        let patterns = detector.detect_patterns_at(&hourly(167, daily_sine), start());
        assert!(has(&patterns, PatternType::Daily));
        assert!(!has(&patterns, PatternType::Weekly));

        let patterns = detector.detect_patterns_at(&hourly(719, daily_sine), start());
        assert!(has(&patterns, PatternType::Weekly));
        assert!(!has(&patterns, PatternType::Seasonal));
    }

    #[test]
    fn test_seasonal_pattern_spanning_two_months() {
        let detector = PatternDetector::new(AnalyzerConfig::default().pattern_confidence_threshold(0.0));
        // 40 days from Jan 1 covers January and part of February.
        let samples = hourly(960, |i| (if i < 31 * 24 { 200.0 } else { 120.0 }) + (i % 3) as f64);

        let pattern = detector.detect_seasonal(&samples, start()).unwrap();
        assert_eq!(pattern.buckets.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert!(pattern.confidence > 0.9);
    }

    #[test]
    fn test_single_bucket_is_insufficient() {
        let detector = PatternDetector::new(AnalyzerConfig::default().pattern_confidence_threshold(0.0));
        // 720 samples, all in January.
        let samples: Vec<Sample> = (0..720)
            .map(|i| Sample::new(start() + Duration::minutes(i), 10.0))
            .collect();
        assert!(matches!(
            detector.detect_seasonal(&samples, start()),
            Err(TidewatchError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_confidence_bounds() {
        let detector = PatternDetector::new(AnalyzerConfig::default().pattern_confidence_threshold(0.0));
        let mut noise = Lcg(7);
        let series: Vec<Vec<Sample>> = vec![
            hourly(200, daily_sine),
            hourly(200, |i| (i as f64).powi(2)),
            hourly(200, |_| 0.0),
            hourly(200, |i| if i % 2 == 0 { 0.0 } else { 1000.0 }),
            hourly(200, |_| 500.0 * (noise.next_unit() + 1.0)),
        ];

        for samples in &series {
            for pattern in detector.detect_patterns_at(samples, start()) {
                assert!((0.0..=1.0).contains(&pattern.confidence), "{:?}", pattern);
            }
        }
    }

    #[test]
    fn test_registry_replaces_and_counts() {
        let detector = PatternDetector::new(AnalyzerConfig::default());
        let samples = hourly(48, daily_sine);
        let mut registry = PatternRegistry::new();

        registry.apply_cycle(detector.detect_patterns_at(&samples, start()));
        registry.apply_cycle(detector.detect_patterns_at(&samples, start() + Duration::hours(1)));

        let daily = registry.get("daily").unwrap();
        assert_eq!(daily.detection_count, 2);
        assert_eq!(daily.last_detected_at, start() + Duration::hours(1));
        assert_eq!(registry.patterns().iter().filter(|p| p.id == "daily").count(), 1);

        registry.apply_cycle(Vec::new());
        assert!(registry.is_empty());
    }
}
