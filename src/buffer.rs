//! Rolling per-metric analysis window.
//!
//! Pure data structure: no I/O, no locking. The collector is the sole
//! writer and serializes access. Contents are rebuildable from storage, so
//! the buffer is discarded when a session ends.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};

use crate::db::models::MetricType;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedValue {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug)]
pub struct TimeSeriesBuffer {
    retention: Duration,
    series: HashMap<MetricType, VecDeque<TimedValue>>,
}

impl TimeSeriesBuffer {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            series: HashMap::new(),
        }
    }

    /// Insert a reading, keeping the series timestamp-ordered. Readings are
    /// expected monotonic per metric, but a late arrival is placed at its
    /// sorted position rather than rejected.
    pub fn append(&mut self, metric: MetricType, timestamp: DateTime<Utc>, value: f64) {
        let series = self.series.entry(metric).or_default();
        let entry = TimedValue { timestamp, value };

        match series.back() {
            Some(last) if last.timestamp > timestamp => {
                let pos = series.partition_point(|existing| existing.timestamp <= timestamp);
                series.insert(pos, entry);
            }
            _ => series.push_back(entry),
        }
    }

    /// Readings of `metric` with timestamps in the inclusive range.
    pub fn window(
        &self,
        metric: MetricType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> impl Iterator<Item = &TimedValue> {
        self.series
            .get(&metric)
            .into_iter()
            .flatten()
            .filter(move |entry| entry.timestamp >= from && entry.timestamp <= to)
    }

    pub fn series(&self, metric: MetricType) -> impl Iterator<Item = &TimedValue> {
        self.series.get(&metric).into_iter().flatten()
    }

    pub fn latest(&self, metric: MetricType) -> Option<&TimedValue> {
        self.series.get(&metric).and_then(|series| series.back())
    }

    pub fn len(&self, metric: MetricType) -> usize {
        self.series.get(&metric).map_or(0, |series| series.len())
    }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(|series| series.is_empty())
    }

    /// Evict entries older than the retention horizon relative to `now`.
    pub fn trim(&mut self, now: DateTime<Utc>) {
        let horizon = now - self.retention;
        for series in self.series.values_mut() {
            while series
                .front()
                .is_some_and(|entry| entry.timestamp < horizon)
            {
                series.pop_front();
            }
        }
    }

    pub fn clear(&mut self) {
        self.series.clear();
    }
}
