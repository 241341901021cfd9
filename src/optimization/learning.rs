//! Statistical learning over executed traversals
//!
//! Every `cycle_length` optimized queries the learner analyses strategy
//! effectiveness, relation usefulness and entity co-occurrence, overall and
//! per query pattern and graph type, and turns what it finds into
//! [`OptimizationRule`]s. The cycle runs behind a
//! [`LearningCircuitBreaker`]; its failures (panics included) are recorded
//! there and never reach the caller.

use crate::config::LearningConfig;
use crate::errors::{FailureSeverity, LearningError, LearningResult};
use crate::logging::{learning_span, log_learning_outcome};
use crate::optimization::circuit_breaker::{BreakerConfig, BreakerState, LearningCircuitBreaker};
use crate::optimization::rewriter::apply_importance_pruning;
use crate::optimization::state::{
    LearningOutcome, OptimizationRule, OptimizerState, RuleAction, RuleCondition, TraversalStats,
};
use crate::query::{GraphType, Query, QueryPattern, TraversalStrategy};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

/// Usefulness at which a relation is worth prioritizing
const USEFUL_RELATION_THRESHOLD: f64 = 0.6;
/// Most frequent entities considered for correlation
const CORRELATION_ENTITY_LIMIT: usize = 32;
/// Bounds of the learned importance-threshold factor
const MIN_IMPORTANCE_FACTOR: f64 = 0.4;
const MAX_IMPORTANCE_FACTOR: f64 = 0.7;

pub const PREFERRED_STRATEGY_RULE: &str = "preferred_strategy";
pub const PRIORITY_RELATIONS_RULE: &str = "priority_relations";
pub const IMPORTANCE_THRESHOLD_RULE: &str = "importance_threshold";

/// A frequent query shape recorded by one graph type's optimizer
#[derive(Debug, Clone, PartialEq)]
pub struct PatternFrequency {
    pub graph_type: GraphType,
    pub signature: Value,
    pub count: u64,
}

/// Externally visible learning state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningStatus {
    pub enabled: bool,
    pub cycle_length: u64,
    pub queries_since_cycle: u64,
    pub cycles_run: u64,
    pub breaker_state: BreakerState,
    pub failure_count: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_backoff_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<String>,
}

#[derive(Debug)]
struct LearnerInner {
    enabled: bool,
    cycle_length: u64,
    queries_since_cycle: u64,
    cycles_run: u64,
    breaker: LearningCircuitBreaker,
}

pub struct StatisticalLearner {
    config: LearningConfig,
    inner: Mutex<LearnerInner>,
}

impl StatisticalLearner {
    pub fn new(config: LearningConfig) -> Self {
        let inner = LearnerInner {
            enabled: config.enabled,
            cycle_length: config.cycle_length.max(1),
            queries_since_cycle: 0,
            cycles_run: 0,
            breaker: LearningCircuitBreaker::new(BreakerConfig::from(&config)),
        };
        Self {
            config,
            inner: Mutex::new(inner),
        }
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    pub fn enable(&self, enabled: bool, cycle_length: u64) {
        let mut inner = self.inner.lock();
        inner.enabled = enabled;
        inner.cycle_length = cycle_length.max(1);
        inner.queries_since_cycle = 0;
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().enabled
    }

    pub fn cycle_length(&self) -> u64 {
        self.inner.lock().cycle_length
    }

    pub fn status(&self) -> LearningStatus {
        let inner = self.inner.lock();
        LearningStatus {
            enabled: inner.enabled,
            cycle_length: inner.cycle_length,
            queries_since_cycle: inner.queries_since_cycle,
            cycles_run: inner.cycles_run,
            breaker_state: inner.breaker.state(),
            failure_count: inner.breaker.failure_count(),
            remaining_backoff_ms: inner
                .breaker
                .remaining_backoff()
                .map(|d| d.as_millis() as u64),
            last_failure: inner.breaker.last_failure().map(str::to_string),
        }
    }

    /// Count one optimized query; true once a full cycle of queries has passed
    pub fn on_query_optimized(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.enabled {
            return false;
        }
        inner.queries_since_cycle += 1;
        if inner.queries_since_cycle < inner.cycle_length {
            return false;
        }
        inner.queries_since_cycle = 0;
        true
    }

    /// Report a failure observed outside the cycle itself
    pub fn record_failure(&self, severity: FailureSeverity, reason: &str) {
        self.inner.lock().breaker.record_failure(severity, reason);
    }

    /// Run one learning cycle unless the breaker is open
    ///
    /// Returns `None` when the breaker refused the attempt.
    pub fn run_cycle(
        &self,
        state: &OptimizerState,
        common_patterns: &[PatternFrequency],
    ) -> Option<LearningOutcome> {
        let cycle = {
            let mut inner = self.inner.lock();
            if !inner.breaker.allows_attempt() {
                return None;
            }
            inner.cycles_run += 1;
            inner.cycles_run
        };

        let span = learning_span(cycle);
        let _entered = span.enter();
        let started = Instant::now();

        let analysed = catch_unwind(AssertUnwindSafe(|| self.analyse(state, common_patterns)))
            .unwrap_or_else(|panic| {
                Err(LearningError::AnalysisPanicked {
                    reason: panic_message(panic.as_ref()),
                })
            });

        let analyzed_paths = state.traversal.read().paths_explored.len();
        let outcome = match analysed {
            Ok(rules) => {
                let generated = rules.len();
                state
                    .traversal
                    .write()
                    .merge_rules(rules, self.config.max_rules);
                self.inner.lock().breaker.record_success();
                LearningOutcome {
                    cycle,
                    timestamp: Utc::now(),
                    success: true,
                    rules_generated: generated,
                    analyzed_paths,
                    duration_ms: elapsed_ms(started.elapsed()),
                    error: None,
                }
            }
            Err(error) => {
                let reason = error.to_string();
                self.inner
                    .lock()
                    .breaker
                    .record_failure(error.severity(), &reason);
                LearningOutcome {
                    cycle,
                    timestamp: Utc::now(),
                    success: false,
                    rules_generated: 0,
                    analyzed_paths,
                    duration_ms: elapsed_ms(started.elapsed()),
                    error: Some(reason),
                }
            }
        };

        span.record("rules_generated", outcome.rules_generated as u64);
        span.record("outcome", if outcome.success { "success" } else { "failure" });
        log_learning_outcome(
            cycle,
            outcome.success,
            outcome.rules_generated,
            outcome.error.as_deref(),
        );
        state
            .traversal
            .write()
            .push_learning_outcome(outcome.clone(), self.config.max_learning_results);
        Some(outcome)
    }

    fn analyse(
        &self,
        state: &OptimizerState,
        common_patterns: &[PatternFrequency],
    ) -> LearningResult<Vec<OptimizationRule>> {
        let mut rules = Vec::new();

        let strategy_rule = {
            let performance = state.strategy_performance.read();
            if performance
                .values()
                .any(|p| !(p.avg_relevance.is_finite() && p.avg_time_ms.is_finite()))
            {
                return Err(LearningError::InvalidStatistics {
                    reason: "non-finite strategy performance".to_string(),
                });
            }
            drop(performance);
            state
                .best_strategy(self.config.min_strategy_samples)
                .and_then(|strategy| {
                    let performance = state.strategy_performance.read();
                    performance.get(&strategy).map(|p| {
                        OptimizationRule::new(
                            PREFERRED_STRATEGY_RULE,
                            RuleAction::PreferStrategy(strategy),
                            RuleCondition::Always,
                            p.avg_relevance,
                        )
                    })
                })
        };
        rules.extend(strategy_rule);

        let stats = state.traversal.read();
        if stats.has_non_finite() {
            return Err(LearningError::InvalidStatistics {
                reason: "non-finite traversal statistics".to_string(),
            });
        }
        rules.extend(priority_relations_rule(&stats));
        rules.extend(pattern_strategy_rules(
            &stats,
            self.config.min_strategy_samples,
        ));
        rules.extend(graph_type_relation_rules(&stats, common_patterns));

        let correlations = entity_correlations(&stats, self.config.correlation_threshold);
        drop(stats);
        if let Some(rule) = importance_threshold_rule(&correlations)? {
            rules.push(rule);
        }

        crate::learning_info!(
            patterns = common_patterns.len(),
            dominant_pattern_count = common_patterns.first().map_or(0, |p| p.count),
            correlated_pairs = correlations.len(),
            rules = rules.len(),
            "Learning analysis finished"
        );
        Ok(rules)
    }
}

/// Relations whose rolling usefulness clears the threshold, most useful first
fn priority_relations_rule(stats: &TraversalStats) -> Option<OptimizationRule> {
    let mut useful: Vec<(&String, f64)> = stats
        .relation_usefulness
        .iter()
        .map(|(r, u)| (r, *u))
        .filter(|(_, u)| *u >= USEFUL_RELATION_THRESHOLD)
        .collect();
    if useful.is_empty() {
        return None;
    }
    useful.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let confidence = useful.iter().map(|(_, u)| u).sum::<f64>() / useful.len() as f64;
    Some(OptimizationRule::new(
        PRIORITY_RELATIONS_RULE,
        RuleAction::PrioritizeRelations(useful.into_iter().map(|(r, _)| r.clone()).collect()),
        RuleCondition::Always,
        confidence,
    ))
}

/// Per query pattern, the best-scoring of at least two well-sampled strategies
fn pattern_strategy_rules(stats: &TraversalStats, min_samples: u64) -> Vec<OptimizationRule> {
    let mut totals: BTreeMap<(QueryPattern, TraversalStrategy), (u64, f64)> = BTreeMap::new();
    for path in &stats.paths_explored {
        let entry = totals.entry((path.pattern, path.strategy)).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += path.score;
    }

    QueryPattern::ALL
        .into_iter()
        .filter_map(|pattern| {
            let mut qualified: Vec<(TraversalStrategy, f64)> = totals
                .iter()
                .filter(|((p, _), (count, _))| *p == pattern && *count >= min_samples)
                .map(|((_, strategy), (count, sum))| (*strategy, sum / *count as f64))
                .collect();
            if qualified.len() < 2 {
                return None;
            }
            qualified.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            let (strategy, mean_score) = qualified[0];
            Some(OptimizationRule::new(
                &format!("{}:{}", PREFERRED_STRATEGY_RULE, pattern),
                RuleAction::PreferStrategy(strategy),
                RuleCondition::Pattern(pattern),
                mean_score,
            ))
        })
        .collect()
}

/// Per graph type, the relations of its frequent query shapes ordered by usefulness
fn graph_type_relation_rules(
    stats: &TraversalStats,
    patterns: &[PatternFrequency],
) -> Vec<OptimizationRule> {
    let mut frequency: BTreeMap<GraphType, HashMap<String, u64>> = BTreeMap::new();
    for pattern in patterns {
        let Some(edges) = pattern.signature.get("edge_types").and_then(Value::as_array) else {
            continue;
        };
        let relations = frequency.entry(pattern.graph_type).or_default();
        for edge in edges.iter().filter_map(Value::as_str) {
            *relations.entry(edge.to_string()).or_insert(0) += pattern.count;
        }
    }

    frequency
        .into_iter()
        .filter_map(|(graph_type, relations)| {
            let mut ranked: Vec<(String, f64, u64)> = relations
                .into_iter()
                .filter_map(|(r, n)| stats.relation_usefulness(&r).map(|u| (r, u, n)))
                .collect();
            if ranked.iter().all(|(_, u, _)| *u < USEFUL_RELATION_THRESHOLD) {
                return None;
            }
            ranked.sort_by(|a, b| {
                b.1.total_cmp(&a.1)
                    .then_with(|| b.2.cmp(&a.2))
                    .then_with(|| a.0.cmp(&b.0))
            });
            let confidence = ranked.iter().map(|r| r.1).sum::<f64>() / ranked.len() as f64;
            Some(OptimizationRule::new(
                &format!("{}:{}", PRIORITY_RELATIONS_RULE, graph_type),
                RuleAction::PrioritizeRelations(ranked.into_iter().map(|r| r.0).collect()),
                RuleCondition::GraphType(graph_type),
                confidence,
            ))
        })
        .collect()
}

/// Jaccard similarity of path membership for the most frequent entity pairs
fn entity_correlations(stats: &TraversalStats, threshold: f64) -> Vec<(String, String, f64)> {
    let mut frequent: Vec<(&String, &u64)> = stats.entity_frequency.iter().collect();
    frequent.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    let candidates: Vec<&String> = frequent
        .into_iter()
        .take(CORRELATION_ENTITY_LIMIT)
        .map(|(e, _)| e)
        .collect();

    let mut membership: HashMap<&str, HashSet<usize>> = HashMap::new();
    for (i, path) in stats.paths_explored.iter().enumerate() {
        for entity in &path.entities {
            if candidates.iter().any(|c| *c == entity) {
                membership.entry(entity.as_str()).or_default().insert(i);
            }
        }
    }

    let mut pairs = Vec::new();
    for (i, a) in candidates.iter().enumerate() {
        let Some(paths_a) = membership.get(a.as_str()) else {
            continue;
        };
        for b in &candidates[i + 1..] {
            let Some(paths_b) = membership.get(b.as_str()) else {
                continue;
            };
            let union = paths_a.union(paths_b).count();
            if union == 0 {
                continue;
            }
            let jaccard = paths_a.intersection(paths_b).count() as f64 / union as f64;
            if jaccard >= threshold {
                pairs.push(((*a).clone(), (*b).clone(), jaccard));
            }
        }
    }
    pairs
}

/// Strongly correlated neighbourhoods tolerate more aggressive pruning
fn importance_threshold_rule(
    correlations: &[(String, String, f64)],
) -> LearningResult<Option<OptimizationRule>> {
    if correlations.is_empty() {
        return Ok(None);
    }
    let mean = correlations.iter().map(|c| c.2).sum::<f64>() / correlations.len() as f64;
    let factor = (MAX_IMPORTANCE_FACTOR - 0.2 * mean).clamp(MIN_IMPORTANCE_FACTOR, MAX_IMPORTANCE_FACTOR);
    if !factor.is_finite() {
        return Err(LearningError::RuleDerivationFailed {
            rule: IMPORTANCE_THRESHOLD_RULE.to_string(),
            reason: format!("non-finite factor from mean correlation {}", mean),
        });
    }
    Ok(Some(OptimizationRule::new(
        IMPORTANCE_THRESHOLD_RULE,
        RuleAction::ImportanceThresholdFactor(factor),
        RuleCondition::Always,
        mean,
    )))
}

fn matching_rules<'a>(
    rules: &'a [OptimizationRule],
    pattern: QueryPattern,
    graph_type: GraphType,
    min_confidence: f64,
) -> impl Iterator<Item = &'a OptimizationRule> {
    rules
        .iter()
        .filter(move |r| r.confidence >= min_confidence && r.condition.matches(pattern, graph_type))
}

/// Strategy preferred by the most specific matching rule, with the rule's name
pub fn learned_strategy(
    rules: &[OptimizationRule],
    pattern: QueryPattern,
    graph_type: GraphType,
    min_confidence: f64,
) -> Option<(TraversalStrategy, &str)> {
    matching_rules(rules, pattern, graph_type, min_confidence)
        .filter_map(|rule| match rule.action {
            RuleAction::PreferStrategy(strategy) => Some((rule, strategy)),
            _ => None,
        })
        .max_by(|a, b| {
            a.0.condition
                .specificity()
                .cmp(&b.0.condition.specificity())
                .then_with(|| a.0.confidence.total_cmp(&b.0.confidence))
        })
        .map(|(rule, strategy)| (strategy, rule.name.as_str()))
}

/// Apply matching query-rewriting rules, most general first, returning their names
///
/// Strategy preferences are left to [`learned_strategy`].
pub fn apply_rules(
    query: &mut Query,
    rules: &[OptimizationRule],
    pattern: QueryPattern,
    graph_type: GraphType,
    min_confidence: f64,
) -> Vec<String> {
    let mut matching: Vec<&OptimizationRule> =
        matching_rules(rules, pattern, graph_type, min_confidence).collect();
    matching.sort_by_key(|r| r.condition.specificity());

    let mut applied = Vec::new();
    for rule in matching {
        let changed = match &rule.action {
            RuleAction::PreferStrategy(_) => false,
            RuleAction::PrioritizeRelations(relations) => {
                let before = query.traversal.edge_types.clone();
                let rank = |r: &String| relations.iter().position(|p| p == r).unwrap_or(relations.len());
                query.traversal.edge_types.sort_by_key(rank);
                before != query.traversal.edge_types
            }
            RuleAction::ImportanceThresholdFactor(factor) => {
                let before = query.traversal.importance_threshold;
                apply_importance_pruning(query, *factor);
                before != query.traversal.importance_threshold
            }
        };
        if changed {
            applied.push(rule.name.clone());
        }
    }
    applied
}

fn elapsed_ms(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::state::{PathOrigin, RetentionLimits};
    use crate::processor::{PathStep, ScoredResult};
    use serde_json::json;

    const LIMITS: RetentionLimits = RetentionLimits {
        max_explored_paths: 100,
        max_tracked_keys: 1000,
    };

    fn learner(cycle_length: u64) -> StatisticalLearner {
        StatisticalLearner::new(LearningConfig {
            cycle_length,
            ..LearningConfig::default()
        })
    }

    fn path_result(id: &str, score: f64, hops: &[(&str, &str)]) -> ScoredResult {
        let mut result = ScoredResult::new(id, score);
        let mut from = "seed".to_string();
        for (relation, to) in hops {
            result.path.push(PathStep {
                from: from.clone(),
                relation: relation.to_string(),
                to: to.to_string(),
            });
            from = to.to_string();
        }
        result
    }

    fn populated_state() -> OptimizerState {
        let state = OptimizerState::new();
        for _ in 0..5 {
            state.record_strategy(TraversalStrategy::Hierarchical, 0.8, 40.0);
        }
        let results = vec![
            path_result("b", 0.9, &[("instance_of", "a"), ("part_of", "b")]),
            path_result("c", 0.8, &[("instance_of", "a"), ("part_of", "c")]),
            path_result("d", 0.2, &[("related_to", "d")]),
        ];
        state
            .traversal
            .write()
            .record_results(&results, PathOrigin::new(TraversalStrategy::Hierarchical), LIMITS);
        state
    }

    #[test]
    fn test_cycle_is_due_every_n_queries() {
        let learner = learner(3);
        assert!(!learner.on_query_optimized());
        assert!(!learner.on_query_optimized());
        assert!(learner.on_query_optimized());
        assert!(!learner.on_query_optimized());

        learner.enable(false, 3);
        for _ in 0..5 {
            assert!(!learner.on_query_optimized());
        }
    }

    #[test]
    fn test_cycle_emits_rules() {
        let state = populated_state();
        let outcome = learner(1).run_cycle(&state, &[]).unwrap();
        assert!(outcome.success);

        let stats = state.traversal.read();
        let names: Vec<&str> = stats.optimization_rules.iter().map(|r| r.name.as_str()).collect();
        assert!(names.contains(&PREFERRED_STRATEGY_RULE));
        assert!(names.contains(&PRIORITY_RELATIONS_RULE));
        assert!(names.contains(&IMPORTANCE_THRESHOLD_RULE));
        assert_eq!(stats.learning_results.len(), 1);

        let factor = stats
            .optimization_rules
            .iter()
            .find_map(|r| match r.action {
                RuleAction::ImportanceThresholdFactor(f) => Some(f),
                _ => None,
            })
            .unwrap();
        assert!((MIN_IMPORTANCE_FACTOR..=MAX_IMPORTANCE_FACTOR).contains(&factor));
    }

    #[test]
    fn test_cycle_emits_conditioned_rules() {
        let state = OptimizerState::new();
        let origin = |strategy| PathOrigin {
            strategy,
            pattern: QueryPattern::FactVerification,
            graph_type: GraphType::Wikipedia,
        };
        {
            let mut stats = state.traversal.write();
            for i in 0..5 {
                let strong = path_result(&format!("s{}", i), 0.9, &[("instance_of", "x")]);
                stats.record_results(&[strong], origin(TraversalStrategy::Bidirectional), LIMITS);
                let weak = path_result(&format!("w{}", i), 0.3, &[("related_to", "y")]);
                stats.record_results(&[weak], origin(TraversalStrategy::Default), LIMITS);
            }
        }
        let patterns = vec![PatternFrequency {
            graph_type: GraphType::Wikipedia,
            signature: json!({"edge_types": ["related_to", "instance_of", "never_seen"]}),
            count: 4,
        }];

        let outcome = learner(1).run_cycle(&state, &patterns).unwrap();
        assert!(outcome.success);

        let stats = state.traversal.read();
        let by_pattern = stats
            .optimization_rules
            .iter()
            .find(|r| r.condition == RuleCondition::Pattern(QueryPattern::FactVerification))
            .unwrap();
        assert_eq!(
            by_pattern.action,
            RuleAction::PreferStrategy(TraversalStrategy::Bidirectional)
        );
        assert_eq!(by_pattern.name, "preferred_strategy:fact_verification");

        let by_graph = stats
            .optimization_rules
            .iter()
            .find(|r| r.condition == RuleCondition::GraphType(GraphType::Wikipedia))
            .unwrap();
        assert_eq!(
            by_graph.action,
            RuleAction::PrioritizeRelations(vec![
                "instance_of".to_string(),
                "related_to".to_string()
            ])
        );
        assert!((by_graph.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_single_strategy_per_pattern_learns_nothing() {
        let state = OptimizerState::new();
        {
            let mut stats = state.traversal.write();
            for i in 0..10 {
                let result = path_result(&format!("n{}", i), 0.9, &[("part_of", "x")]);
                stats.record_results(&[result], PathOrigin::new(TraversalStrategy::Default), LIMITS);
            }
        }
        learner(1).run_cycle(&state, &[]).unwrap();
        assert!(state
            .traversal
            .read()
            .optimization_rules
            .iter()
            .all(|r| !matches!(r.condition, RuleCondition::Pattern(_))));
    }

    #[test]
    fn test_corrupted_statistics_trip_breaker() {
        let state = OptimizerState::new();
        state
            .traversal
            .write()
            .relation_usefulness
            .insert("broken".to_string(), f64::NAN);

        let learner = learner(1);
        for _ in 0..3 {
            let outcome = learner.run_cycle(&state, &[]).unwrap();
            assert!(!outcome.success);
        }
        assert_eq!(learner.status().breaker_state, BreakerState::Open);
        assert!(learner.run_cycle(&state, &[]).is_none());
        assert_eq!(learner.status().cycles_run, 3);
    }

    #[test]
    fn test_apply_rules() {
        let rules = vec![
            OptimizationRule::new(
                PREFERRED_STRATEGY_RULE,
                RuleAction::PreferStrategy(TraversalStrategy::DagTraversal),
                RuleCondition::Always,
                0.9,
            ),
            OptimizationRule::new(
                PRIORITY_RELATIONS_RULE,
                RuleAction::PrioritizeRelations(vec!["part_of".to_string()]),
                RuleCondition::GraphType(GraphType::Ipld),
                0.9,
            ),
            OptimizationRule::new(
                IMPORTANCE_THRESHOLD_RULE,
                RuleAction::ImportanceThresholdFactor(0.5),
                RuleCondition::Always,
                0.1,
            ),
        ];
        let mut query = Query::default();
        query.traversal.edge_types = vec!["instance_of".into(), "part_of".into()];

        let applied = apply_rules(
            &mut query,
            &rules,
            QueryPattern::General,
            GraphType::General,
            0.5,
        );
        assert!(applied.is_empty());
        assert_eq!(query.traversal.strategy, None);
        assert_eq!(query.traversal.edge_types[0], "instance_of");
        assert_eq!(
            learned_strategy(&rules, QueryPattern::General, GraphType::General, 0.5),
            Some((TraversalStrategy::DagTraversal, PREFERRED_STRATEGY_RULE))
        );

        let applied = apply_rules(&mut query, &rules, QueryPattern::General, GraphType::Ipld, 0.5);
        assert_eq!(applied, vec![PRIORITY_RELATIONS_RULE.to_string()]);
        assert_eq!(query.traversal.edge_types[0], "part_of");
    }

    #[test]
    fn test_specific_strategy_rule_wins() {
        let rules = vec![
            OptimizationRule::new(
                PREFERRED_STRATEGY_RULE,
                RuleAction::PreferStrategy(TraversalStrategy::DagTraversal),
                RuleCondition::Always,
                0.95,
            ),
            OptimizationRule::new(
                "preferred_strategy:entity_lookup",
                RuleAction::PreferStrategy(TraversalStrategy::EntityImportance),
                RuleCondition::Pattern(QueryPattern::EntityLookup),
                0.6,
            ),
        ];
        assert_eq!(
            learned_strategy(&rules, QueryPattern::EntityLookup, GraphType::General, 0.5),
            Some((TraversalStrategy::EntityImportance, "preferred_strategy:entity_lookup"))
        );
        assert_eq!(
            learned_strategy(&rules, QueryPattern::General, GraphType::General, 0.5)
                .map(|(s, _)| s),
            Some(TraversalStrategy::DagTraversal)
        );
    }

    #[test]
    fn test_panic_message() {
        let caught = catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "boom");
    }
}
