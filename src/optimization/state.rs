//! Process-wide optimizer state
//!
//! Traversal statistics, strategy performance and the entity-importance cache
//! each sit behind their own lock so readers of one never wait on writers of
//! another. The whole state round-trips through a versioned JSON snapshot.

use crate::config::LearningConfig;
use crate::errors::{ErrorContext, OptimizerResult, SerializationError};
use crate::processor::ScoredResult;
use crate::query::{GraphType, QueryPattern, TraversalStrategy};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;

/// Snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Weight of a new observation in rolling scores
const ROLLING_ALPHA: f64 = 0.3;

/// What a learned rule changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    PreferStrategy(TraversalStrategy),
    PrioritizeRelations(Vec<String>),
    /// Pruning threshold as a fraction of the mean entity score
    ImportanceThresholdFactor(f64),
}

impl RuleAction {
    /// Query parameter the action writes
    pub fn target_path(&self) -> &'static str {
        match self {
            RuleAction::PreferStrategy(_) => "traversal.strategy",
            RuleAction::PrioritizeRelations(_) => "traversal.edge_types",
            RuleAction::ImportanceThresholdFactor(_) => "traversal.importance_threshold",
        }
    }
}

/// When a learned rule applies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCondition {
    Always,
    Pattern(QueryPattern),
    GraphType(GraphType),
}

impl RuleCondition {
    /// Higher for narrower conditions
    pub fn specificity(&self) -> u8 {
        match self {
            RuleCondition::Always => 0,
            RuleCondition::GraphType(_) => 1,
            RuleCondition::Pattern(_) => 2,
        }
    }

    pub fn matches(&self, pattern: QueryPattern, graph_type: GraphType) -> bool {
        match self {
            RuleCondition::Always => true,
            RuleCondition::Pattern(p) => *p == pattern,
            RuleCondition::GraphType(g) => *g == graph_type,
        }
    }
}

/// Rule produced by the learning cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRule {
    pub name: String,
    pub action: RuleAction,
    pub condition: RuleCondition,
    /// In [0, 1]
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl OptimizationRule {
    pub fn new(name: &str, action: RuleAction, condition: RuleCondition, confidence: f64) -> Self {
        Self {
            name: name.to_string(),
            action,
            condition,
            confidence: confidence.clamp(0.0, 1.0),
            created_at: Utc::now(),
        }
    }
}

/// Outcome of one learning cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningOutcome {
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub rules_generated: usize,
    pub analyzed_paths: usize,
    pub duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One explored result path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExploredPath {
    pub entities: Vec<String>,
    pub relations: Vec<String>,
    pub score: f64,
    pub strategy: TraversalStrategy,
    #[serde(default)]
    pub pattern: QueryPattern,
    #[serde(default)]
    pub graph_type: GraphType,
}

/// Plan attributes attached to every path an execution explored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathOrigin {
    pub strategy: TraversalStrategy,
    pub pattern: QueryPattern,
    pub graph_type: GraphType,
}

impl PathOrigin {
    pub fn new(strategy: TraversalStrategy) -> Self {
        Self {
            strategy,
            pattern: QueryPattern::General,
            graph_type: GraphType::General,
        }
    }
}

/// Size bounds of the traversal statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionLimits {
    pub max_explored_paths: usize,
    /// Bound on `entity_frequency` and on `path_scores`
    pub max_tracked_keys: usize,
}

impl From<&LearningConfig> for RetentionLimits {
    fn from(config: &LearningConfig) -> Self {
        Self {
            max_explored_paths: config.max_explored_paths,
            max_tracked_keys: config.max_tracked_keys.max(1),
        }
    }
}

/// Statistics gathered from executed traversals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalStats {
    pub entity_frequency: HashMap<String, u64>,
    pub entity_connectivity: HashMap<String, f64>,
    /// Rolling usefulness in [0, 1]
    pub relation_usefulness: HashMap<String, f64>,
    /// Rolling score per relation-sequence key
    pub path_scores: HashMap<String, f64>,
    pub paths_explored: VecDeque<ExploredPath>,
    pub optimization_rules: Vec<OptimizationRule>,
    pub learning_results: VecDeque<LearningOutcome>,
}

fn rolling(previous: Option<f64>, observation: f64) -> f64 {
    match previous {
        Some(old) => old * (1.0 - ROLLING_ALPHA) + observation * ROLLING_ALPHA,
        None => observation,
    }
}

/// Keep the `keep` highest-ranked entries once `map` grows past `limit`
///
/// Pruning goes below the limit so the sort is not repeated on every insert.
fn prune_map<V, F>(map: &mut HashMap<String, V>, limit: usize, rank: F)
where
    F: Fn(&V, &V) -> std::cmp::Ordering,
{
    if map.len() <= limit {
        return;
    }
    let keep = limit - limit / 4;
    let mut entries: Vec<(String, V)> = map.drain().collect();
    entries.sort_by(|a, b| rank(&b.1, &a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(keep.max(1));
    map.extend(entries);
}

impl TraversalStats {
    /// Fold an execution's result paths into the statistics
    pub fn record_results(
        &mut self,
        results: &[ScoredResult],
        origin: PathOrigin,
        limits: RetentionLimits,
    ) {
        for result in results {
            let score = if result.score.is_finite() {
                result.score.clamp(0.0, 1.0)
            } else {
                0.0
            };
            for entity in result.entities() {
                *self.entity_frequency.entry(entity).or_insert(0) += 1;
            }
            let Some(key) = result.path_key() else {
                continue;
            };
            let previous = self.path_scores.get(&key).copied();
            self.path_scores.insert(key, rolling(previous, score));

            let relations: Vec<String> = result.relations().map(str::to_string).collect();
            for relation in &relations {
                let previous = self.relation_usefulness.get(relation).copied();
                self.relation_usefulness
                    .insert(relation.clone(), rolling(previous, score).clamp(0.0, 1.0));
            }
            self.paths_explored.push_back(ExploredPath {
                entities: result.entities(),
                relations,
                score,
                strategy: origin.strategy,
                pattern: origin.pattern,
                graph_type: origin.graph_type,
            });
        }
        while self.paths_explored.len() > limits.max_explored_paths {
            self.paths_explored.pop_front();
        }
        prune_map(&mut self.entity_frequency, limits.max_tracked_keys, |a, b| a.cmp(b));
        prune_map(&mut self.path_scores, limits.max_tracked_keys, |a, b| a.total_cmp(b));
    }

    pub fn record_connectivity(&mut self, entity_id: &str, connections: usize) {
        self.entity_connectivity
            .insert(entity_id.to_string(), connections as f64);
    }

    pub fn mean_connectivity(&self) -> Option<f64> {
        if self.entity_connectivity.is_empty() {
            None
        } else {
            Some(
                self.entity_connectivity.values().sum::<f64>()
                    / self.entity_connectivity.len() as f64,
            )
        }
    }

    pub fn relation_usefulness(&self, relation: &str) -> Option<f64> {
        self.relation_usefulness.get(relation).copied()
    }

    /// Highest-scoring path keys, ties broken by key
    pub fn top_paths(&self, n: usize) -> Vec<String> {
        let mut paths: Vec<(&String, &f64)> = self.path_scores.iter().collect();
        paths.sort_by(|a, b| b.1.total_cmp(a.1).then_with(|| a.0.cmp(b.0)));
        paths.into_iter().take(n).map(|(k, _)| k.clone()).collect()
    }

    /// Replace rules by name, keeping at most `max_rules` (oldest dropped first)
    pub fn merge_rules(&mut self, rules: Vec<OptimizationRule>, max_rules: usize) {
        for rule in rules {
            self.optimization_rules.retain(|r| r.name != rule.name);
            self.optimization_rules.push(rule);
        }
        let excess = self.optimization_rules.len().saturating_sub(max_rules);
        self.optimization_rules.drain(..excess);
    }

    pub fn push_learning_outcome(&mut self, outcome: LearningOutcome, max_results: usize) {
        self.learning_results.push_back(outcome);
        while self.learning_results.len() > max_results {
            self.learning_results.pop_front();
        }
    }

    /// Whether any rolling statistic holds a non-finite value
    pub fn has_non_finite(&self) -> bool {
        self.relation_usefulness.values().any(|v| !v.is_finite())
            || self.path_scores.values().any(|v| !v.is_finite())
            || self.entity_connectivity.values().any(|v| !v.is_finite())
            || self.paths_explored.iter().any(|p| !p.score.is_finite())
    }
}

/// Rolling effectiveness of one traversal strategy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyPerformance {
    pub count: u64,
    pub avg_relevance: f64,
    pub avg_time_ms: f64,
}

impl StrategyPerformance {
    /// Exponentially weighted update; the first sample seeds both averages
    pub fn record(&mut self, relevance: f64, time_ms: f64) {
        let seeded = self.count > 0;
        self.count += 1;
        self.avg_relevance = rolling(seeded.then_some(self.avg_relevance), relevance);
        self.avg_time_ms = rolling(seeded.then_some(self.avg_time_ms), time_ms);
    }

    /// Relevance per second of execution
    pub fn effectiveness(&self) -> f64 {
        self.avg_relevance / (self.avg_time_ms / 1000.0).max(1e-3)
    }
}

/// Serializable copy of the learned state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub learning_enabled: bool,
    pub cycle_length: u64,
    pub traversal_stats: TraversalStats,
    pub entity_importance: BTreeMap<String, f64>,
    pub strategy_performance: BTreeMap<TraversalStrategy, StrategyPerformance>,
}

impl LearningSnapshot {
    pub fn save(&self, path: &Path) -> OptimizerResult<()> {
        let body = serde_json::to_string_pretty(self).map_err(SerializationError::from)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_io_context(parent)?;
        }
        std::fs::write(path, body).with_io_context(path)
    }

    pub fn load(path: &Path) -> OptimizerResult<Self> {
        let body = std::fs::read_to_string(path).with_io_context(path)?;
        let snapshot: Self = serde_json::from_str(&body).map_err(|e| {
            SerializationError::DeserializationFailed {
                expected_type: "LearningSnapshot".to_string(),
                reason: e.to_string(),
            }
        })?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SerializationError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: snapshot.version,
            }
            .into());
        }
        Ok(snapshot)
    }
}

/// Shared mutable state, one lock per structure
#[derive(Debug, Default)]
pub struct OptimizerState {
    pub traversal: RwLock<TraversalStats>,
    pub strategy_performance: RwLock<HashMap<TraversalStrategy, StrategyPerformance>>,
    pub entity_importance: DashMap<String, f64>,
}

impl OptimizerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_strategy(&self, strategy: TraversalStrategy, relevance: f64, time_ms: f64) {
        if relevance.is_finite() && time_ms.is_finite() {
            self.strategy_performance
                .write()
                .entry(strategy)
                .or_default()
                .record(relevance, time_ms);
        }
    }

    /// Strategy with the highest relevance per time among those with enough samples
    pub fn best_strategy(&self, min_samples: u64) -> Option<TraversalStrategy> {
        let performance = self.strategy_performance.read();
        TraversalStrategy::ALL
            .into_iter()
            .filter_map(|s| performance.get(&s).map(|p| (s, p)))
            .filter(|(_, p)| p.count >= min_samples)
            .max_by(|a, b| a.1.effectiveness().total_cmp(&b.1.effectiveness()))
            .map(|(s, _)| s)
    }

    pub fn snapshot(&self, learning_enabled: bool, cycle_length: u64) -> LearningSnapshot {
        LearningSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            learning_enabled,
            cycle_length,
            traversal_stats: self.traversal.read().clone(),
            entity_importance: self
                .entity_importance
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            strategy_performance: self
                .strategy_performance
                .read()
                .iter()
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
        }
    }

    pub fn restore(&self, snapshot: LearningSnapshot) {
        *self.traversal.write() = snapshot.traversal_stats;
        *self.strategy_performance.write() = snapshot.strategy_performance.into_iter().collect();
        self.entity_importance.clear();
        for (id, score) in snapshot.entity_importance {
            self.entity_importance.insert(id, score);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::PathStep;

    fn limits(max_explored_paths: usize) -> RetentionLimits {
        RetentionLimits {
            max_explored_paths,
            max_tracked_keys: 1000,
        }
    }

    fn result_with_path(id: &str, score: f64, relations: &[&str]) -> ScoredResult {
        let mut result = ScoredResult::new(id, score);
        let mut from = "seed".to_string();
        for (i, relation) in relations.iter().enumerate() {
            let to = if i + 1 == relations.len() {
                id.to_string()
            } else {
                format!("hop{}", i)
            };
            result.path.push(PathStep {
                from: from.clone(),
                relation: relation.to_string(),
                to: to.clone(),
            });
            from = to;
        }
        result
    }

    #[test]
    fn test_record_results_updates_rolling_scores() {
        let mut stats = TraversalStats::default();
        let results = vec![
            result_with_path("a", 0.9, &["instance_of"]),
            result_with_path("b", 0.5, &["instance_of", "part_of"]),
            ScoredResult::new("seed", 1.0),
        ];
        stats.record_results(&results, PathOrigin::new(TraversalStrategy::Default), limits(10));

        assert_eq!(stats.paths_explored.len(), 2);
        assert_eq!(stats.path_scores["instance_of"], 0.9);
        let usefulness = stats.relation_usefulness("instance_of").unwrap();
        assert!((usefulness - (0.9 * 0.7 + 0.5 * 0.3)).abs() < 1e-9);
        assert_eq!(stats.entity_frequency["seed"], 3);
        assert_eq!(stats.top_paths(1), vec!["instance_of".to_string()]);
    }

    #[test]
    fn test_explored_paths_capped() {
        let mut stats = TraversalStats::default();
        let results: Vec<_> = (0..5)
            .map(|i| result_with_path(&format!("n{}", i), 0.5, &["rel"]))
            .collect();
        stats.record_results(&results, PathOrigin::new(TraversalStrategy::Default), limits(3));
        assert_eq!(stats.paths_explored.len(), 3);
    }

    #[test]
    fn test_entity_and_path_maps_pruned() {
        let mut stats = TraversalStats::default();
        let bounds = RetentionLimits {
            max_explored_paths: 100,
            max_tracked_keys: 8,
        };
        let hub = result_with_path("hub", 0.9, &["instance_of"]);
        for _ in 0..3 {
            stats.record_results(&[hub.clone()], PathOrigin::new(TraversalStrategy::Default), bounds);
        }
        for i in 0..20 {
            let relation = format!("rel_{}", i);
            let result = result_with_path(&format!("leaf{}", i), 0.1, &[relation.as_str()]);
            stats.record_results(&[result], PathOrigin::new(TraversalStrategy::Default), bounds);
        }

        assert!(stats.entity_frequency.len() <= 8);
        assert!(stats.path_scores.len() <= 8);
        assert_eq!(stats.entity_frequency["seed"], 23);
        assert_eq!(stats.entity_frequency["hub"], 3);
        assert_eq!(stats.path_scores["instance_of"], 0.9);
    }

    #[test]
    fn test_strategy_performance_decays_old_samples() {
        let mut performance = StrategyPerformance::default();
        performance.record(0.2, 100.0);
        assert_eq!(performance.avg_relevance, 0.2);
        for _ in 0..20 {
            performance.record(0.9, 10.0);
        }
        assert_eq!(performance.count, 21);
        assert!(performance.avg_relevance > 0.89);
        assert!(performance.avg_time_ms < 11.0);
    }

    #[test]
    fn test_merge_rules_by_name_and_bound() {
        let mut stats = TraversalStats::default();
        let rule = |name: &str, confidence: f64| {
            OptimizationRule::new(
                name,
                RuleAction::ImportanceThresholdFactor(0.6),
                RuleCondition::Always,
                confidence,
            )
        };
        stats.merge_rules(vec![rule("a", 0.5), rule("b", 0.5)], 2);
        stats.merge_rules(vec![rule("a", 0.9)], 2);
        assert_eq!(stats.optimization_rules.len(), 2);
        assert_eq!(stats.optimization_rules[1].confidence, 0.9);

        stats.merge_rules(vec![rule("c", 0.7)], 2);
        let names: Vec<&str> = stats.optimization_rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn test_best_strategy_requires_samples() {
        let state = OptimizerState::new();
        for _ in 0..5 {
            state.record_strategy(TraversalStrategy::Bidirectional, 0.9, 100.0);
        }
        for _ in 0..4 {
            state.record_strategy(TraversalStrategy::Sampling, 1.0, 1.0);
        }
        assert_eq!(state.best_strategy(5), Some(TraversalStrategy::Bidirectional));
        assert_eq!(state.best_strategy(6), None);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("learning.json");

        let state = OptimizerState::new();
        state.entity_importance.insert("Q42".to_string(), 0.8);
        state.record_strategy(TraversalStrategy::DagTraversal, 0.7, 20.0);
        state.traversal.write().record_connectivity("Q42", 12);
        state.snapshot(true, 25).save(&path).unwrap();

        let restored = OptimizerState::new();
        let snapshot = LearningSnapshot::load(&path).unwrap();
        assert_eq!(snapshot.cycle_length, 25);
        restored.restore(snapshot);
        assert_eq!(*restored.entity_importance.get("Q42").unwrap(), 0.8);
        assert_eq!(restored.traversal.read().mean_connectivity(), Some(12.0));
    }

    #[test]
    fn test_snapshot_version_checked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("learning.json");
        let mut snapshot = OptimizerState::new().snapshot(true, 50);
        snapshot.version = 99;
        snapshot.save(&path).unwrap();

        assert!(matches!(
            LearningSnapshot::load(&path),
            Err(crate::errors::OptimizerError::Serialization(
                SerializationError::VersionMismatch { found: 99, .. }
            ))
        ));
    }
}
