//! Rolling query statistics
//!
//! Latency samples, cache hits and query-pattern frequency. Patterns are
//! compared by their canonical serialized form.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Latency samples retained for windowed queries
const MAX_QUERY_TIMES: usize = 1000;

/// Aggregate view over the statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub query_count: u64,
    pub cache_hits: u64,
    pub cache_hit_rate: f64,
    /// Mean query time in seconds
    pub avg_query_time: f64,
    pub max_query_time: f64,
    pub distinct_patterns: usize,
}

#[derive(Debug, Default)]
struct StatisticsInner {
    query_count: u64,
    cache_hits: u64,
    total_query_time: f64,
    query_times: VecDeque<(Instant, f64)>,
    patterns: HashMap<String, (Value, u64)>,
}

/// Thread-safe rolling statistics for one optimizer
#[derive(Debug, Default)]
pub struct QueryStatistics {
    inner: Mutex<StatisticsInner>,
}

impl QueryStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one executed query's wall time in seconds
    pub fn record_query_time(&self, seconds: f64) {
        if !seconds.is_finite() || seconds < 0.0 {
            return;
        }
        let mut inner = self.inner.lock();
        inner.query_count += 1;
        inner.total_query_time += seconds;
        inner.query_times.push_back((Instant::now(), seconds));
        while inner.query_times.len() > MAX_QUERY_TIMES {
            inner.query_times.pop_front();
        }
    }

    pub fn record_cache_hit(&self) {
        self.inner.lock().cache_hits += 1;
    }

    pub fn record_pattern(&self, pattern: &Value) {
        let key = pattern.to_string();
        let mut inner = self.inner.lock();
        inner
            .patterns
            .entry(key)
            .or_insert_with(|| (pattern.clone(), 0))
            .1 += 1;
    }

    pub fn query_count(&self) -> u64 {
        self.inner.lock().query_count
    }

    pub fn avg_query_time(&self) -> f64 {
        let inner = self.inner.lock();
        if inner.query_count == 0 {
            0.0
        } else {
            inner.total_query_time / inner.query_count as f64
        }
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let inner = self.inner.lock();
        if inner.query_count == 0 {
            0.0
        } else {
            (inner.cache_hits as f64 / inner.query_count as f64).min(1.0)
        }
    }

    /// Query times recorded within the last `window_seconds`
    pub fn recent_query_times(&self, window_seconds: f64) -> Vec<f64> {
        let window = if window_seconds.is_finite() {
            Duration::from_secs_f64(window_seconds.max(0.0))
        } else {
            Duration::MAX
        };
        self.inner
            .lock()
            .query_times
            .iter()
            .filter(|(at, _)| at.elapsed() <= window)
            .map(|(_, seconds)| *seconds)
            .collect()
    }

    /// Most frequent patterns, highest count first
    pub fn common_patterns(&self, top_n: usize) -> Vec<(Value, u64)> {
        let inner = self.inner.lock();
        let mut patterns: Vec<(&String, &(Value, u64))> = inner.patterns.iter().collect();
        patterns.sort_by(|a, b| b.1 .1.cmp(&a.1 .1).then_with(|| a.0.cmp(b.0)));
        patterns
            .into_iter()
            .take(top_n)
            .map(|(_, (pattern, count))| (pattern.clone(), *count))
            .collect()
    }

    pub fn performance_summary(&self) -> PerformanceSummary {
        let inner = self.inner.lock();
        let avg = if inner.query_count == 0 {
            0.0
        } else {
            inner.total_query_time / inner.query_count as f64
        };
        let hit_rate = if inner.query_count == 0 {
            0.0
        } else {
            (inner.cache_hits as f64 / inner.query_count as f64).min(1.0)
        };
        PerformanceSummary {
            query_count: inner.query_count,
            cache_hits: inner.cache_hits,
            cache_hit_rate: hit_rate,
            avg_query_time: avg,
            max_query_time: inner
                .query_times
                .iter()
                .map(|(_, s)| *s)
                .fold(0.0, f64::max),
            distinct_patterns: inner.patterns.len(),
        }
    }

    pub fn reset(&self) {
        *self.inner.lock() = StatisticsInner::default();
    }
}
