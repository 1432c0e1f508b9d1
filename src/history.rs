//! Time-bounded sample history
//!
//! Producers append from request-handling code; the analyzer copies the
//! contents out before running any detection so producers are never blocked
//! behind an analysis pass.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::{TidewatchError, TidewatchResult};
use crate::types::{Sample, Timestamp};
use crate::utils::current_timestamp;

/// Timestamp-ordered samples newer than the retention window
#[derive(Debug)]
pub struct HistoryStore {
    retention: chrono::Duration,
    samples: Mutex<VecDeque<Sample>>,
}

impl HistoryStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention: chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX),
            samples: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a sample and evict everything older than the retention window
    pub fn add_sample(&self, sample: Sample) -> TidewatchResult<()> {
        self.add_sample_at(sample, current_timestamp())
    }

    /// Same as [`add_sample`](Self::add_sample) with an explicit notion of "now"
    pub fn add_sample_at(&self, sample: Sample, now: Timestamp) -> TidewatchResult<()> {
        validate(&sample)?;
        let cutoff = now
            .checked_sub_signed(self.retention)
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);

        let mut samples = self.samples.lock();
        let late = samples.back().map_or(false, |last| sample.timestamp < last.timestamp);
        if late {
            let position = samples.partition_point(|s| s.timestamp <= sample.timestamp);
            samples.insert(position, sample);
        } else {
            samples.push_back(sample);
        }

        while samples.front().map_or(false, |s| s.timestamp <= cutoff) {
            samples.pop_front();
        }
        trace!(stored = samples.len(), "sample recorded");
        Ok(())
    }

    /// Independent copy of the stored samples, oldest first
    pub fn snapshot(&self) -> Vec<Sample> {
        self.samples.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Timestamps of the oldest and newest stored samples
    pub fn time_range(&self) -> Option<(Timestamp, Timestamp)> {
        let samples = self.samples.lock();
        let oldest = samples.iter().map(|s| s.timestamp).min()?;
        let newest = samples.iter().map(|s| s.timestamp).max()?;
        Some((oldest, newest))
    }

    pub fn clear(&self) {
        self.samples.lock().clear();
    }

    pub fn retention(&self) -> chrono::Duration {
        self.retention
    }
}

fn validate(sample: &Sample) -> TidewatchResult<()> {
    if !sample.request_rate.is_finite() || sample.request_rate < 0.0 {
        return Err(TidewatchError::invalid_sample(format!(
            "request_rate must be a finite non-negative number, got {}",
            sample.request_rate
        )));
    }
    if !(0.0..=1.0).contains(&sample.error_rate) {
        return Err(TidewatchError::invalid_sample(format!(
            "error_rate must be within [0, 1], got {}",
            sample.error_rate
        )));
    }
    for (name, value) in [("cpu_usage", sample.cpu_usage), ("memory_usage", sample.memory_usage)] {
        if !value.is_finite() || value < 0.0 {
            return Err(TidewatchError::invalid_sample(format!(
                "{} must be a finite non-negative number, got {}",
                name, value
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn at(hour: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap() + chrono::Duration::hours(hour)
    }

    #[test]
    fn test_eviction_on_insert() {
        let store = HistoryStore::new(Duration::from_secs(24 * 3600));
        for hour in 0..30 {
            store.add_sample_at(Sample::new(at(hour), 10.0), at(hour)).unwrap();
        }
        // Samples at hours 6..=29 satisfy timestamp > now - 24h with now = hour 29.
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 24);
        assert_eq!(snapshot[0].timestamp, at(6));
        assert!(snapshot.iter().all(|s| s.timestamp > at(29) - chrono::Duration::hours(24)));
    }

    #[test]
    fn test_out_of_order_sample_is_evicted() {
        let store = HistoryStore::new(Duration::from_secs(3600));
        store.add_sample_at(Sample::new(at(10), 1.0), at(10)).unwrap();
        store.add_sample_at(Sample::new(at(8), 1.0), at(10)).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.time_range(), Some((at(10), at(10))));
    }

    #[test]
    fn test_late_sample_does_not_shield_stale_ones() {
        let store = HistoryStore::new(Duration::from_secs(3600));
        let minutes = |m: i64| at(0) + chrono::Duration::minutes(m);

        store.add_sample_at(Sample::new(minutes(60), 1.0), minutes(60)).unwrap();
        store.add_sample_at(Sample::new(minutes(30), 2.0), minutes(60)).unwrap();
        assert_eq!(store.snapshot()[0].timestamp, minutes(30));

        // The cutoff moves to 00:40, past the late 00:30 sample.
        store.add_sample_at(Sample::new(minutes(100), 3.0), minutes(100)).unwrap();
        let timestamps: Vec<_> = store.snapshot().iter().map(|s| s.timestamp).collect();
        assert_eq!(timestamps, vec![minutes(60), minutes(100)]);
    }

    #[test]
    fn test_unbounded_retention_keeps_everything() {
        let store = HistoryStore::new(Duration::MAX);
        assert_eq!(store.retention(), chrono::Duration::MAX);
        store.add_sample_at(Sample::new(at(0), 1.0), at(0)).unwrap();
        store.add_sample_at(Sample::new(at(10_000), 1.0), at(10_000)).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_snapshot_is_idempotent_and_independent() {
        let store = HistoryStore::new(Duration::from_secs(3600));
        let now = current_timestamp();
        store.add_sample_at(Sample::new(now, 5.0), now).unwrap();
        store.add_sample_at(Sample::new(now, 6.0), now).unwrap();

        let first = store.snapshot();
        let second = store.snapshot();
        assert_eq!(first, second);

        let mut copy = store.snapshot();
        copy.clear();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_invalid_samples_rejected() {
        let store = HistoryStore::new(Duration::from_secs(3600));
        let now = current_timestamp();
        assert!(matches!(
            store.add_sample(Sample::new(now, f64::NAN)),
            Err(TidewatchError::InvalidSample { .. })
        ));
        assert!(store.add_sample(Sample::new(now, -1.0)).is_err());
        assert!(store.add_sample(Sample::new(now, 1.0).with_error_rate(1.5)).is_err());
        assert!(store.add_sample(Sample::new(now, 1.0).with_cpu_usage(f64::INFINITY)).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_producers() {
        let store = Arc::new(HistoryStore::new(Duration::from_secs(3600)));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        store.add_sample(Sample::new(current_timestamp(), i as f64)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 1000);
    }
}
