// src/types.rs

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a monitored resource (e.g., "checkout-api")
pub type ResourceId = String;

/// Point in time, always UTC
pub type Timestamp = DateTime<Utc>;

/// Free-form diagnostic data carried alongside samples and patterns.
/// Nothing in the analysis reads from it.
pub type Metadata = HashMap<String, serde_json::Value>;

/// One traffic observation for a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// When the observation was taken
    pub timestamp: Timestamp,
    /// Requests seen during the sample interval
    pub request_rate: f64,
    /// Typical response time during the interval
    pub response_time: Duration,
    /// Fraction of failed requests (0.0 to 1.0)
    pub error_rate: f64,
    /// CPU utilisation (fraction or percent, caller's choice)
    pub cpu_usage: f64,
    /// Memory utilisation
    pub memory_usage: f64,
    /// Concurrent users
    pub active_users: u64,
    /// Pending work items
    pub queue_length: u64,
    /// Pass-through diagnostics
    #[serde(default)]
    pub metadata: Metadata,
}

impl Sample {
    /// Create a sample carrying only a request rate; everything else is zeroed
    pub fn new(timestamp: Timestamp, request_rate: f64) -> Self {
        Self {
            timestamp,
            request_rate,
            response_time: Duration::ZERO,
            error_rate: 0.0,
            cpu_usage: 0.0,
            memory_usage: 0.0,
            active_users: 0,
            queue_length: 0,
            metadata: Metadata::new(),
        }
    }

    pub fn with_response_time(mut self, response_time: Duration) -> Self {
        self.response_time = response_time;
        self
    }

    pub fn with_error_rate(mut self, error_rate: f64) -> Self {
        self.error_rate = error_rate;
        self
    }

    pub fn with_cpu_usage(mut self, cpu_usage: f64) -> Self {
        self.cpu_usage = cpu_usage;
        self
    }

    pub fn with_memory_usage(mut self, memory_usage: f64) -> Self {
        self.memory_usage = memory_usage;
        self
    }

    pub fn with_active_users(mut self, active_users: u64) -> Self {
        self.active_users = active_users;
        self
    }

    pub fn with_queue_length(mut self, queue_length: u64) -> Self {
        self.queue_length = queue_length;
        self
    }

    pub fn with_metadata<K: Into<String>>(mut self, key: K, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Kind of regularity found in the traffic history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    /// Repeats every day, bucketed by hour-of-day
    Daily,
    /// Repeats every week, bucketed by weekday
    Weekly,
    /// Linear drift over the whole history
    Trend,
    /// Repeats every year, bucketed by calendar month
    Seasonal,
}

impl PatternType {
    pub const ALL: [PatternType; 4] = [
        PatternType::Daily,
        PatternType::Weekly,
        PatternType::Trend,
        PatternType::Seasonal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Daily => "daily",
            PatternType::Weekly => "weekly",
            PatternType::Trend => "trend",
            PatternType::Seasonal => "seasonal",
        }
    }

    /// Cycle length, `None` for trends
    pub fn frequency(&self) -> Option<Duration> {
        match self {
            PatternType::Daily => Some(Duration::from_secs(24 * 3600)),
            PatternType::Weekly => Some(Duration::from_secs(7 * 24 * 3600)),
            PatternType::Seasonal => Some(Duration::from_secs(365 * 24 * 3600)),
            PatternType::Trend => None,
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trend direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TrendDirection {
    /// Load is increasing over time
    Increasing,
    /// Load is decreasing over time
    Decreasing,
    /// No significant slope
    Stable,
}

/// Least-squares line fitted against sample index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendFit {
    /// Change in request rate per sample
    pub slope: f64,
    /// Fitted value at index 0
    pub intercept: f64,
    /// Number of samples the line was fitted on
    pub sample_count: usize,
    /// Mean spacing between consecutive samples
    pub sample_interval_seconds: f64,
    /// Timestamp of the last fitted sample (index `sample_count - 1`)
    pub anchor: Timestamp,
}

impl TrendFit {
    /// Value of the fitted line at a (possibly fractional) sample index
    pub fn value_at_index(&self, index: f64) -> f64 {
        self.intercept + self.slope * index
    }

    /// Value of the fitted line at a wall-clock time
    pub fn value_at(&self, timestamp: Timestamp) -> f64 {
        let last_index = self.sample_count.saturating_sub(1) as f64;
        if self.sample_interval_seconds <= 0.0 {
            return self.value_at_index(last_index);
        }
        let offset_seconds = (timestamp - self.anchor).num_milliseconds() as f64 / 1000.0;
        self.value_at_index(last_index + offset_seconds / self.sample_interval_seconds)
    }
}

/// A detected regularity in the traffic history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    /// Registry key; re-detection under the same id replaces the old entry
    pub id: String,
    pub pattern_type: PatternType,
    /// How well the pattern explains the history (0.0 to 1.0)
    pub confidence: f64,
    /// Cycle length, absent for trends
    pub frequency: Option<Duration>,
    /// Only set for trend patterns
    pub trend_direction: Option<TrendDirection>,
    /// Mean request rate per bucket (hour 0-23, weekday 0-6 from Monday, month 1-12)
    pub buckets: BTreeMap<u32, f64>,
    /// Only set for trend patterns
    pub trend: Option<TrendFit>,
    pub last_detected_at: Timestamp,
    pub detection_count: u64,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Pattern {
    /// Bucket mean for a key, if that bucket had any samples
    pub fn bucket(&self, key: u32) -> Option<f64> {
        self.buckets.get(&key).copied()
    }
}

/// One forecast point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// When the load is predicted for
    pub timestamp: Timestamp,
    /// Predicted request rate, never negative
    pub predicted_load: f64,
    pub confidence: f64,
    /// `None` when produced by the first/last-point fallback
    pub source_pattern_type: Option<PatternType>,
    /// Offset of `timestamp` from the moment the forecast was made
    pub horizon: Duration,
    /// Ids of the patterns that produced this point
    pub factors: Vec<String>,
}

/// Direction to scale a resource
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ScaleDirection {
    /// Scale up (add capacity)
    Up,
    /// Scale down (remove capacity)
    Down,
}

/// What the scaler decided on one check
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DecisionOutcome {
    ScaleUp,
    ScaleDown,
    /// Metrics are between the thresholds
    NoAction,
    /// A scaling action succeeded too recently
    CoolingDown,
    /// The failure breaker is open; capacity is left untouched
    Suppressed,
}

impl DecisionOutcome {
    pub fn direction(&self) -> Option<ScaleDirection> {
        match self {
            DecisionOutcome::ScaleUp => Some(ScaleDirection::Up),
            DecisionOutcome::ScaleDown => Some(ScaleDirection::Down),
            _ => None,
        }
    }
}

/// A scaling decision together with the metrics it was based on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleDecision {
    pub resource_id: ResourceId,
    pub outcome: DecisionOutcome,
    /// Human-readable explanation
    pub reason: String,
    /// Request starts within the request window
    pub requests_per_window: u64,
    /// Mean of the response-time window
    pub avg_response_time: Duration,
    /// Errors per request within the request window
    pub error_rate: f64,
    /// Highest predicted load at the nearest forecast horizon
    pub predicted_load: Option<f64>,
    /// Whether the executor callback returned successfully
    pub executed: bool,
    pub timestamp: Timestamp,
}
