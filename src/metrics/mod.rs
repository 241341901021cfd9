//! Per-query metrics collection
//!
//! Each query gets a record with hierarchical phase timings, optional process
//! resource samples, custom metrics and a results summary. Finished records go
//! into a bounded history and, when a metrics directory is configured, one
//! JSON document per query. Serialization problems never fail a query; the
//! sanitizer substitutes a placeholder instead.

use crate::config::MetricsConfig;
use crate::errors::{ErrorContext, OptimizerResult, SerializationError};
use crate::sanitize::{to_safe_value, Sanitize};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::time::Instant;
use sysinfo::{Pid, System};
use tracing::{debug, warn};

/// Timing for one phase path within a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Accumulated over repeated entries of the same phase
    pub total_ms: f64,
    pub count: u64,
    pub durations_ms: Vec<f64>,
    #[serde(skip_serializing_if = "Value::is_null", default)]
    pub metadata: Value,
}

/// Process resource sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub label: String,
    pub timestamp: DateTime<Utc>,
    pub memory_mb: f64,
    pub cpu_percent: f32,
}

/// Custom metric recorded during a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomMetric {
    pub value: Value,
    pub category: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultsSummary {
    pub count: usize,
    pub quality_score: Option<f64>,
}

/// Completed metrics for one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMetricsRecord {
    pub query_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds
    pub duration: f64,
    pub phases: BTreeMap<String, PhaseRecord>,
    pub resources: Vec<ResourceSample>,
    pub results: ResultsSummary,
    pub metrics: BTreeMap<String, CustomMetric>,
    pub metadata: Value,
}

impl QueryMetricsRecord {
    pub fn peak_memory_mb(&self) -> Option<f64> {
        self.resources
            .iter()
            .map(|s| s.memory_mb)
            .fold(None, |peak, m| Some(peak.map_or(m, |p: f64| p.max(m))))
    }
}

/// Aggregate timing for one phase path
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub total_ms: f64,
    pub count: u64,
}

/// Aggregated report with tuning recommendations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub query_count: usize,
    pub avg_duration_ms: f64,
    pub phases: BTreeMap<String, PhaseSummary>,
    pub peak_memory_mb: Option<f64>,
    pub recommendations: Vec<String>,
}

#[derive(Debug)]
struct ActiveQuery {
    started_at: DateTime<Utc>,
    start: Instant,
    phases: BTreeMap<String, PhaseRecord>,
    phase_stack: Vec<String>,
    resources: Vec<ResourceSample>,
    metrics: BTreeMap<String, CustomMetric>,
    metadata: Value,
}

/// Collects timing and resource metrics for queries
pub struct MetricsCollector {
    config: MetricsConfig,
    active: Mutex<HashMap<String, ActiveQuery>>,
    history: Mutex<VecDeque<QueryMetricsRecord>>,
    system: Mutex<System>,
}

impl MetricsCollector {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            active: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            system: Mutex::new(System::new()),
        }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Begin tracking a query; generates an id when none is given
    pub fn start(&self, query_id: Option<&str>, params: Value) -> String {
        let query_id = query_id
            .map(str::to_string)
            .unwrap_or_else(crate::utils::generate_query_id);
        if !self.config.enabled {
            return query_id;
        }

        let mut active = ActiveQuery {
            started_at: Utc::now(),
            start: Instant::now(),
            phases: BTreeMap::new(),
            phase_stack: Vec::new(),
            resources: Vec::new(),
            metrics: BTreeMap::new(),
            metadata: params.sanitize(),
        };
        if let Some(sample) = self.sample_resources("start") {
            active.resources.push(sample);
        }
        self.active.lock().insert(query_id.clone(), active);
        debug!(query_id = %query_id, "Metrics collection started");
        query_id
    }

    /// Time a phase until the returned guard drops
    ///
    /// Nested guards produce `parent.child` paths. Re-entering a path adds to
    /// its total and call count.
    pub fn time_phase(&self, query_id: &str, name: &str, metadata: Option<Value>) -> PhaseGuard<'_> {
        let mut path = None;
        if self.config.enabled {
            let mut active = self.active.lock();
            if let Some(query) = active.get_mut(query_id) {
                query.phase_stack.push(name.to_string());
                let full = query.phase_stack.join(".");
                let entry = query.phases.entry(full.clone()).or_insert_with(|| PhaseRecord {
                    started_at: Utc::now(),
                    ended_at: None,
                    total_ms: 0.0,
                    count: 0,
                    durations_ms: Vec::new(),
                    metadata: Value::Null,
                });
                if let Some(metadata) = metadata {
                    entry.metadata = metadata.sanitize();
                }
                path = Some(full);
            }
        }

        PhaseGuard {
            collector: self,
            query_id: query_id.to_string(),
            path,
            start: Instant::now(),
        }
    }

    fn finish_phase(&self, query_id: &str, path: &str, elapsed_ms: f64) {
        let sample = self.sample_resources(path);
        let mut active = self.active.lock();
        let Some(query) = active.get_mut(query_id) else {
            return;
        };
        query.phase_stack.pop();
        if let Some(phase) = query.phases.get_mut(path) {
            phase.ended_at = Some(Utc::now());
            phase.total_ms += elapsed_ms;
            phase.count += 1;
            phase.durations_ms.push(elapsed_ms);
        }
        if let Some(sample) = sample {
            query.resources.push(sample);
        }
    }

    /// Record a custom metric; values that cannot be serialized become placeholders
    pub fn record_metric<T: Serialize + ?Sized>(
        &self,
        query_id: &str,
        name: &str,
        value: &T,
        category: &str,
    ) {
        if !self.config.enabled {
            return;
        }
        if let Some(query) = self.active.lock().get_mut(query_id) {
            query.metrics.insert(
                name.to_string(),
                CustomMetric {
                    value: to_safe_value(value),
                    category: category.to_string(),
                    timestamp: Utc::now(),
                },
            );
        }
    }

    /// Finish a query, store its record and persist it when configured
    pub fn end(
        &self,
        query_id: &str,
        results_count: usize,
        quality_score: Option<f64>,
    ) -> Option<QueryMetricsRecord> {
        let query = self.active.lock().remove(query_id)?;
        let mut resources = query.resources;
        if let Some(sample) = self.sample_resources("end") {
            resources.push(sample);
        }

        let record = QueryMetricsRecord {
            query_id: query_id.to_string(),
            started_at: query.started_at,
            ended_at: Utc::now(),
            duration: query.start.elapsed().as_secs_f64() * 1000.0,
            phases: query.phases,
            resources,
            results: ResultsSummary {
                count: results_count,
                quality_score,
            },
            metrics: query.metrics,
            metadata: query.metadata,
        };

        {
            let mut history = self.history.lock();
            history.push_back(record.clone());
            while history.len() > self.config.max_history_size {
                history.pop_front();
            }
        }

        if let Some(dir) = &self.config.metrics_dir {
            if let Err(e) = persist_record(dir, &record) {
                warn!(query_id = %query_id, error = %e, "Failed to persist query metrics");
            }
        }

        debug!(
            query_id = %query_id,
            duration_ms = record.duration,
            results = results_count,
            "Metrics collection finished"
        );
        Some(record)
    }

    pub fn metrics(&self, query_id: &str) -> Option<QueryMetricsRecord> {
        self.history
            .lock()
            .iter()
            .rev()
            .find(|r| r.query_id == query_id)
            .cloned()
    }

    /// Most recent records, newest first
    pub fn recent(&self, n: usize) -> Vec<QueryMetricsRecord> {
        self.history.lock().iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.history.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.history.lock().clear();
    }

    /// Per-phase avg/min/max/total/count over one query or the whole history
    pub fn phase_timing_summary(&self, query_id: Option<&str>) -> BTreeMap<String, PhaseSummary> {
        let records = self.select(query_id);
        summarize_phases(&records)
    }

    pub fn performance_report(&self, query_id: Option<&str>) -> PerformanceReport {
        let records = self.select(query_id);
        if records.is_empty() {
            return PerformanceReport::default();
        }

        let durations: Vec<f64> = records.iter().map(|r| r.duration).collect();
        let avg_duration_ms = mean(&durations);
        let phases = summarize_phases(&records);
        let peak_memory_mb = records
            .iter()
            .filter_map(QueryMetricsRecord::peak_memory_mb)
            .fold(None, |peak: Option<f64>, m| Some(peak.map_or(m, |p| p.max(m))));

        let mut recommendations = Vec::new();
        let total_ms: f64 = durations.iter().sum();
        if let Some((name, phase)) = phases
            .iter()
            .filter(|(name, _)| !name.contains('.'))
            .max_by(|a, b| a.1.total_ms.total_cmp(&b.1.total_ms))
        {
            if total_ms > 0.0 && phase.total_ms / total_ms > 0.5 {
                recommendations.push(format!(
                    "Phase '{}' accounts for {:.0}% of query time; consider tightening its budget or caching its output",
                    name,
                    100.0 * phase.total_ms / total_ms
                ));
            }
        }
        if durations.len() >= 2 && avg_duration_ms > 0.0 {
            let cv = std_dev(&durations) / avg_duration_ms;
            if cv > 0.5 {
                recommendations.push(format!(
                    "Query time varies widely (coefficient of variation {:.2}); consider caching or adaptive budgets",
                    cv
                ));
            }
        }
        if let Some(peak) = peak_memory_mb {
            if peak > self.config.memory_warning_mb {
                recommendations.push(format!(
                    "Peak memory {:.0} MB exceeds {:.0} MB; consider lowering node limits or batch sizes",
                    peak, self.config.memory_warning_mb
                ));
            }
        }

        PerformanceReport {
            query_count: records.len(),
            avg_duration_ms,
            phases,
            peak_memory_mb,
            recommendations,
        }
    }

    /// Write the whole history as one JSON array
    pub fn export_json(&self, path: &Path) -> OptimizerResult<()> {
        let records: Vec<QueryMetricsRecord> = self.history.lock().iter().cloned().collect();
        let body = serde_json::to_string_pretty(&to_safe_value(&records))
            .map_err(SerializationError::from)?;
        std::fs::write(path, body).with_io_context(path)
    }

    /// Write one CSV row per query
    pub fn export_csv(&self, path: &Path) -> OptimizerResult<()> {
        let records: Vec<QueryMetricsRecord> = self.history.lock().iter().cloned().collect();
        let mut writer = csv::Writer::from_path(path).map_err(SerializationError::from)?;
        writer
            .write_record([
                "query_id",
                "started_at",
                "duration_ms",
                "phase_count",
                "result_count",
                "quality_score",
                "peak_memory_mb",
            ])
            .map_err(SerializationError::from)?;
        for record in &records {
            writer
                .write_record([
                    record.query_id.clone(),
                    record.started_at.to_rfc3339(),
                    format!("{:.3}", record.duration),
                    record.phases.len().to_string(),
                    record.results.count.to_string(),
                    record
                        .results
                        .quality_score
                        .map(|q| format!("{:.4}", q))
                        .unwrap_or_default(),
                    record
                        .peak_memory_mb()
                        .map(|m| format!("{:.1}", m))
                        .unwrap_or_default(),
                ])
                .map_err(SerializationError::from)?;
        }
        writer.flush().with_io_context(path)
    }

    fn select(&self, query_id: Option<&str>) -> Vec<QueryMetricsRecord> {
        let history = self.history.lock();
        match query_id {
            Some(id) => history.iter().filter(|r| r.query_id == id).cloned().collect(),
            None => history.iter().cloned().collect(),
        }
    }

    fn sample_resources(&self, label: &str) -> Option<ResourceSample> {
        if !self.config.track_resources {
            return None;
        }
        let pid: Pid = sysinfo::get_current_pid().ok()?;
        let mut system = self.system.lock();
        system.refresh_process(pid);
        let process = system.process(pid)?;
        Some(ResourceSample {
            label: label.to_string(),
            timestamp: Utc::now(),
            memory_mb: process.memory() as f64 / (1024.0 * 1024.0),
            cpu_percent: process.cpu_usage(),
        })
    }
}

/// Scoped phase timer returned by [`MetricsCollector::time_phase`]
pub struct PhaseGuard<'a> {
    collector: &'a MetricsCollector,
    query_id: String,
    path: Option<String>,
    start: Instant,
}

impl PhaseGuard<'_> {
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
            self.collector.finish_phase(&self.query_id, &path, elapsed_ms);
        }
    }
}

fn persist_record(dir: &Path, record: &QueryMetricsRecord) -> OptimizerResult<()> {
    std::fs::create_dir_all(dir).with_io_context(dir)?;
    let file = dir.join(format!(
        "query_{}_{}.json",
        record.started_at.format("%Y%m%dT%H%M%S%.3f"),
        record.query_id
    ));
    let body =
        serde_json::to_string_pretty(&to_safe_value(record)).map_err(SerializationError::from)?;
    std::fs::write(&file, body).with_io_context(&file)
}

fn summarize_phases(records: &[QueryMetricsRecord]) -> BTreeMap<String, PhaseSummary> {
    let mut durations: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for record in records {
        for (name, phase) in &record.phases {
            durations
                .entry(name.clone())
                .or_default()
                .extend(phase.durations_ms.iter().copied());
        }
    }
    durations
        .into_iter()
        .filter(|(_, values)| !values.is_empty())
        .map(|(name, values)| {
            let total: f64 = values.iter().sum();
            let summary = PhaseSummary {
                avg_ms: total / values.len() as f64,
                min_ms: values.iter().copied().fold(f64::INFINITY, f64::min),
                max_ms: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                total_ms: total,
                count: values.len() as u64,
            };
            (name, summary)
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn std_dev(values: &[f64]) -> f64 {
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len().max(1) as f64;
    variance.sqrt()
}
