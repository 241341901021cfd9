//! Resource budgets and early stopping
//!
//! A [`Budget`] bounds every execution phase. Allocation scales configured
//! defaults by estimated query complexity and caller priority, then pulls each
//! limit toward what comparable executions actually consumed. Each execution
//! tracks consumption in its own [`BudgetTracker`], starting from zero;
//! finished trackers feed a rolling per-resource history and become the
//! manager's latest consumption report.

use crate::config::BudgetConfig;
use crate::query::{Priority, Query};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use tracing::debug;

/// Budgeted resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    VectorSearchMs,
    GraphTraversalMs,
    RankingMs,
    MaxNodes,
    MaxEdges,
    TimeoutMs,
}

impl Resource {
    pub const ALL: [Resource; 6] = [
        Resource::VectorSearchMs,
        Resource::GraphTraversalMs,
        Resource::RankingMs,
        Resource::MaxNodes,
        Resource::MaxEdges,
        Resource::TimeoutMs,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Resource::VectorSearchMs => "vector_search_ms",
            Resource::GraphTraversalMs => "graph_traversal_ms",
            Resource::RankingMs => "ranking_ms",
            Resource::MaxNodes => "max_nodes",
            Resource::MaxEdges => "max_edges",
            Resource::TimeoutMs => "timeout_ms",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One value per budgeted resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMap {
    pub vector_search_ms: f64,
    pub graph_traversal_ms: f64,
    pub ranking_ms: f64,
    pub max_nodes: f64,
    pub max_edges: f64,
    pub timeout_ms: f64,
}

/// Per-resource limits
pub type Budget = ResourceMap;
/// Per-resource consumption during one execution
pub type Consumption = ResourceMap;

impl ResourceMap {
    pub fn get(&self, resource: Resource) -> f64 {
        match resource {
            Resource::VectorSearchMs => self.vector_search_ms,
            Resource::GraphTraversalMs => self.graph_traversal_ms,
            Resource::RankingMs => self.ranking_ms,
            Resource::MaxNodes => self.max_nodes,
            Resource::MaxEdges => self.max_edges,
            Resource::TimeoutMs => self.timeout_ms,
        }
    }

    pub fn get_mut(&mut self, resource: Resource) -> &mut f64 {
        match resource {
            Resource::VectorSearchMs => &mut self.vector_search_ms,
            Resource::GraphTraversalMs => &mut self.graph_traversal_ms,
            Resource::RankingMs => &mut self.ranking_ms,
            Resource::MaxNodes => &mut self.max_nodes,
            Resource::MaxEdges => &mut self.max_edges,
            Resource::TimeoutMs => &mut self.timeout_ms,
        }
    }

    pub fn map(&self, f: impl Fn(Resource, f64) -> f64) -> Self {
        let mut out = *self;
        for resource in Resource::ALL {
            *out.get_mut(resource) = f(resource, self.get(resource));
        }
        out
    }
}

impl From<&BudgetConfig> for ResourceMap {
    fn from(config: &BudgetConfig) -> Self {
        Self {
            vector_search_ms: config.vector_search_ms,
            graph_traversal_ms: config.graph_traversal_ms,
            ranking_ms: config.ranking_ms,
            max_nodes: config.max_nodes,
            max_edges: config.max_edges,
            timeout_ms: config.timeout_ms,
        }
    }
}

/// Estimated query complexity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl Complexity {
    /// Budget multiplier for this complexity level
    pub fn multiplier(self) -> f64 {
        match self {
            Complexity::Low => 0.75,
            Complexity::Medium => 1.0,
            Complexity::High => 1.5,
            Complexity::VeryHigh => 2.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Complexity::Low => "low",
            Complexity::Medium => "medium",
            Complexity::High => "high",
            Complexity::VeryHigh => "very_high",
        }
    }
}

/// top_k and edge count weigh linearly, depth quadratically
pub fn complexity_score(query: &Query) -> f64 {
    let depth = query.max_depth() as f64;
    query.top_k() as f64 * 0.1 + depth * depth * 0.5 + query.edge_types().len() as f64 * 0.3
}

pub fn estimate_complexity(query: &Query) -> Complexity {
    let score = complexity_score(query);
    if score < 3.0 {
        Complexity::Low
    } else if score < 7.0 {
        Complexity::Medium
    } else if score < 15.0 {
        Complexity::High
    } else {
        Complexity::VeryHigh
    }
}

/// Whether results are already good (or sparse) enough to stop early
///
/// True with fewer than 3 results; with more, true when most of the budget is
/// spent and the top 3 average above 0.85, or when the top score leads the
/// fifth by more than 0.3.
pub fn suggest_early_stop(scores: &[f64], consumed_ratio: f64) -> bool {
    if scores.len() < 3 {
        return true;
    }
    let mut sorted = scores.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));

    let top3 = (sorted[0] + sorted[1] + sorted[2]) / 3.0;
    if consumed_ratio > 0.7 && top3 > 0.85 {
        return true;
    }
    sorted.len() >= 5 && sorted[0] - sorted[4] > 0.3
}

/// Consumption relative to a budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionReport {
    pub consumption: Consumption,
    pub budget: Budget,
    pub ratios: BTreeMap<Resource, f64>,
    /// Mean of the per-resource ratios
    pub overall_ratio: f64,
}

/// Budget plus consumption for one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetTracker {
    budget: Budget,
    consumption: Consumption,
}

impl BudgetTracker {
    pub fn new(budget: Budget) -> Self {
        Self {
            budget,
            consumption: Consumption::default(),
        }
    }

    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    pub fn consumption(&self) -> &Consumption {
        &self.consumption
    }

    /// Add consumption; negative or non-finite amounts are ignored
    pub fn track(&mut self, resource: Resource, amount: f64) {
        if amount.is_finite() && amount > 0.0 {
            *self.consumption.get_mut(resource) += amount;
        }
    }

    pub fn is_exceeded(&self, resource: Resource) -> bool {
        self.consumption.get(resource) > self.budget.get(resource)
    }

    /// First exceeded resource, if any
    pub fn exceeded(&self) -> Option<Resource> {
        Resource::ALL.into_iter().find(|r| self.is_exceeded(*r))
    }

    pub fn consumed_ratio(&self) -> f64 {
        self.report().overall_ratio
    }

    pub fn report(&self) -> ConsumptionReport {
        let ratios: BTreeMap<Resource, f64> = Resource::ALL
            .into_iter()
            .map(|r| {
                let limit = self.budget.get(r);
                let ratio = if limit > 0.0 {
                    self.consumption.get(r) / limit
                } else {
                    0.0
                };
                (r, ratio)
            })
            .collect();
        let overall_ratio = ratios.values().sum::<f64>() / ratios.len() as f64;
        ConsumptionReport {
            consumption: self.consumption,
            budget: self.budget,
            ratios,
            overall_ratio,
        }
    }
}

/// Allocates budgets and keeps consumption history
pub struct BudgetManager {
    defaults: Budget,
    history_size: usize,
    history: RwLock<HashMap<Resource, VecDeque<f64>>>,
    latest: Mutex<Option<BudgetTracker>>,
}

impl BudgetManager {
    pub fn new(config: &BudgetConfig) -> Self {
        let defaults = Budget::from(config);
        Self {
            defaults,
            history_size: config.history_size.max(1),
            history: RwLock::new(HashMap::new()),
            latest: Mutex::new(None),
        }
    }

    pub fn defaults(&self) -> &Budget {
        &self.defaults
    }

    /// Scale the defaults for `query` and blend in consumption history
    pub fn allocate(&self, query: &Query, priority: Priority) -> Budget {
        let complexity = estimate_complexity(query);
        let factor = complexity.multiplier() * priority.multiplier();
        let history = self.history.read();

        let budget = self.defaults.map(|resource, default| {
            let scaled = default * factor;
            match history.get(&resource) {
                Some(samples) if !samples.is_empty() => {
                    let (mean, p95) = mean_and_p95(samples);
                    ((mean + p95) / 2.0).max(0.8 * scaled)
                }
                _ => scaled,
            }
        });
        drop(history);

        debug!(
            complexity = complexity.as_str(),
            priority = ?priority,
            timeout_ms = budget.timeout_ms,
            "Allocated execution budget"
        );
        budget
    }

    /// Zeroed consumption tracker for one execution of an allocated budget
    pub fn tracker(&self, budget: Budget) -> BudgetTracker {
        BudgetTracker::new(budget)
    }

    /// Append a finished execution's consumption to the history
    pub fn record_completion(&self, tracker: &BudgetTracker) {
        {
            let mut history = self.history.write();
            for resource in Resource::ALL {
                let samples = history.entry(resource).or_default();
                samples.push_back(tracker.consumption.get(resource));
                while samples.len() > self.history_size {
                    samples.pop_front();
                }
            }
        }
        *self.latest.lock() = Some(tracker.clone());
    }

    pub fn history_len(&self, resource: Resource) -> usize {
        self.history.read().get(&resource).map_or(0, VecDeque::len)
    }

    pub fn suggest_early_stop(&self, scores: &[f64], consumed_ratio: f64) -> bool {
        suggest_early_stop(scores, consumed_ratio)
    }

    /// Consumption of the most recently completed execution
    pub fn consumption_report(&self) -> Option<ConsumptionReport> {
        self.latest.lock().as_ref().map(BudgetTracker::report)
    }
}

fn mean_and_p95(samples: &VecDeque<f64>) -> (f64, f64) {
    let mut sorted: Vec<f64> = samples.iter().copied().collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
    let rank = ((sorted.len() as f64) * 0.95).ceil() as usize;
    let p95 = sorted[rank.clamp(1, sorted.len()) - 1];
    (mean, p95)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> BudgetManager {
        BudgetManager::new(&BudgetConfig::default())
    }

    fn deep_query() -> Query {
        let mut query = Query::default();
        query.traversal.max_depth = Some(5);
        query.traversal.edge_types = (0..10).map(|i| format!("rel_{}", i)).collect();
        query
    }

    #[test]
    fn test_complexity_levels() {
        let mut shallow = Query::default();
        shallow.traversal.max_depth = Some(1);
        assert_eq!(estimate_complexity(&shallow), Complexity::Low);
        assert!(estimate_complexity(&deep_query()) >= Complexity::High);
    }

    #[test]
    fn test_deep_query_gets_larger_budget() {
        let manager = manager();
        let mut shallow = Query::default();
        shallow.traversal.max_depth = Some(1);

        let small = manager.allocate(&shallow, Priority::Normal);
        let large = manager.allocate(&deep_query(), Priority::Normal);
        for resource in Resource::ALL {
            assert!(large.get(resource) >= small.get(resource));
        }
    }

    #[test]
    fn test_priority_monotonic() {
        let manager = manager();
        let query = Query::default();
        let low = manager.allocate(&query, Priority::Low);
        let critical = manager.allocate(&query, Priority::Critical);
        for resource in Resource::ALL {
            assert!(critical.get(resource) >= low.get(resource));
        }
    }

    #[test]
    fn test_history_adjusts_budget() {
        let manager = manager();
        let query = Query::default();
        let base = manager.allocate(&query, Priority::Normal);

        let mut tracker = manager.tracker(base);
        tracker.track(Resource::MaxNodes, 10_000.0);
        manager.record_completion(&tracker);

        let adjusted = manager.allocate(&query, Priority::Normal);
        assert_eq!(adjusted.max_nodes, 10_000.0);
        // Unused resources never drop below 80% of the scaled default
        assert_eq!(adjusted.ranking_ms, 0.8 * base.ranking_ms);
    }

    #[test]
    fn test_tracking_and_exceeded() {
        let manager = manager();
        let budget = manager.allocate(&Query::default(), Priority::Normal);
        let mut tracker = manager.tracker(budget);
        tracker.track(Resource::RankingMs, budget.ranking_ms + 1.0);
        tracker.track(Resource::RankingMs, -50.0);
        assert!(tracker.is_exceeded(Resource::RankingMs));
        assert!(!tracker.is_exceeded(Resource::MaxNodes));
        assert_eq!(tracker.exceeded(), Some(Resource::RankingMs));
        assert!(manager.consumption_report().is_none());

        manager.record_completion(&tracker);
        assert_eq!(manager.history_len(Resource::RankingMs), 1);
        let report = manager.consumption_report().unwrap();
        assert!(report.ratios[&Resource::RankingMs] > 1.0);

        let next = manager.tracker(manager.allocate(&Query::default(), Priority::Normal));
        assert!(!next.is_exceeded(Resource::RankingMs));
        assert_eq!(next.consumption().ranking_ms, 0.0);
    }

    #[test]
    fn test_history_is_bounded() {
        let manager = BudgetManager::new(&BudgetConfig {
            history_size: 3,
            ..BudgetConfig::default()
        });
        let tracker = manager.tracker(*manager.defaults());
        for _ in 0..5 {
            manager.record_completion(&tracker);
        }
        assert_eq!(manager.history_len(Resource::TimeoutMs), 3);
    }

    #[test]
    fn test_suggest_early_stop() {
        assert!(suggest_early_stop(&[0.95, 0.9, 0.88, 0.5, 0.4], 0.1));
        assert!(suggest_early_stop(&[0.9, 0.8], 0.0));
        assert!(suggest_early_stop(&[0.9, 0.9, 0.9], 0.8));
        assert!(!suggest_early_stop(&[0.9, 0.9, 0.9], 0.5));
        assert!(!suggest_early_stop(&[0.6, 0.6, 0.55, 0.5, 0.45], 0.9));
    }
}
