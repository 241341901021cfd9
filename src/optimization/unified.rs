//! Top-level optimizer
//!
//! [`UnifiedOptimizer`] turns a [`Query`] into a budgeted [`QueryPlan`]
//! (graph type detection, rewriting, learned rules, entity importance,
//! per-graph-type tuning, budget allocation and strategy selection) and
//! executes plans against a [`GraphProcessor`]: vector search, strategy
//! expansion and ranking, each bounded by the plan's budget. Executions feed
//! the traversal statistics that the statistical learning loop turns into
//! rules for later plans.
//!
//! `optimize` never fails. Any internal error or panic produces a fallback
//! plan instead.

use crate::config::OptimizerConfig;
use crate::errors::{OptimizerError, OptimizerResult, ProcessorError, ProcessorResult};
use crate::logging::{
    execution_span, log_early_stop, log_fallback_plan, log_strategy_selection, optimize_span,
    PerformanceLogger,
};
use crate::metrics::{MetricsCollector, PerformanceReport};
use crate::optimization::base::BaseOptimizer;
use crate::optimization::budget::{estimate_complexity, BudgetManager, BudgetTracker, Resource};
use crate::optimization::caching::CacheStats;
use crate::optimization::importance::entity_importance;
use crate::optimization::learning::{
    apply_rules, learned_strategy, panic_message, LearningStatus, PatternFrequency,
    StatisticalLearner,
};
use crate::optimization::plan::{
    CachingDirective, EarlyStop, ExecutionInfo, ExecutionPlan, QueryPlan,
};
use crate::optimization::rewriter::{QueryRewriter, RewriteContext};
use crate::optimization::state::{
    LearningOutcome, LearningSnapshot, OptimizerState, PathOrigin, RetentionLimits,
};
use crate::optimization::statistics::PerformanceSummary;
use crate::optimization::strategy::{detect_graph_type, ranking_weights, select_strategy};
use crate::processor::{
    rank_locally, ExpansionParams, Expander, GraphInfo, GraphProcessor, ScoredResult,
    VectorSearchRequest,
};
use crate::query::{GraphType, Priority, Query, TraversalStrategy};
use crate::sanitize::to_safe_value;
use crate::utils::generate_query_id;
use chrono::Utc;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, Instrument, Span};

/// Patterns per graph type handed to the learning cycle
const LEARNING_PATTERN_COUNT: usize = 10;
/// Cache hit rate below which a longer TTL is suggested
const LOW_CACHE_HIT_RATE: f64 = 0.2;
/// Queries needed before cache and latency recommendations are made
const MIN_QUERIES_FOR_ADVICE: u64 = 10;
/// Mean query time (seconds) above which narrower plans are suggested
const SLOW_QUERY_SECS: f64 = 1.0;

/// Aggregated performance view with recommendations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAnalysis {
    pub generated_at: chrono::DateTime<Utc>,
    pub window_secs: f64,
    pub graph_types: BTreeMap<GraphType, GraphTypePerformance>,
    pub metrics: PerformanceReport,
    pub learning: LearningStatus,
    pub recommendations: Vec<String>,
}

/// Per-graph-type slice of a [`PerformanceAnalysis`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphTypePerformance {
    pub summary: PerformanceSummary,
    pub recent_queries: usize,
    pub recent_avg_secs: f64,
    pub cache: CacheStats,
}

pub struct UnifiedOptimizer {
    config: OptimizerConfig,
    optimizers: HashMap<GraphType, BaseOptimizer>,
    rewriter: QueryRewriter,
    budget: BudgetManager,
    metrics: MetricsCollector,
    state: Arc<OptimizerState>,
    learner: StatisticalLearner,
    graph_info: RwLock<HashMap<GraphType, GraphInfo>>,
    processor: Option<Arc<dyn GraphProcessor>>,
}

impl UnifiedOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        let optimizers = GraphType::ALL
            .into_iter()
            .map(|g| (g, BaseOptimizer::new(g, &config.cache)))
            .collect();
        Self {
            optimizers,
            rewriter: QueryRewriter::new(config.rewriter.clone()),
            budget: BudgetManager::new(&config.budget),
            metrics: MetricsCollector::new(config.metrics.clone()),
            state: Arc::new(OptimizerState::new()),
            learner: StatisticalLearner::new(config.learning.clone()),
            graph_info: RwLock::new(HashMap::new()),
            processor: None,
            config,
        }
    }

    /// Attach a processor consulted for entity importance while planning
    pub fn with_processor(mut self, processor: Arc<dyn GraphProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<OptimizerState> {
        &self.state
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn budget_manager(&self) -> &BudgetManager {
        &self.budget
    }

    pub fn base_optimizer(&self, graph_type: GraphType) -> Option<&BaseOptimizer> {
        self.optimizers.get(&graph_type)
    }

    pub fn learning_status(&self) -> LearningStatus {
        self.learner.status()
    }

    /// Structural statistics used when rewriting queries of `graph_type`
    pub fn update_graph_info(&self, graph_type: GraphType, info: GraphInfo) {
        self.graph_info.write().insert(graph_type, info);
    }

    pub fn graph_info(&self, graph_type: GraphType) -> Option<GraphInfo> {
        self.graph_info.read().get(&graph_type).cloned()
    }

    /// Build an optimized plan; failures produce a fallback plan
    pub async fn optimize(&self, query: &Query, priority: Priority) -> QueryPlan {
        let query_id = generate_query_id();
        let span = optimize_span(&query_id);

        let attempt = AssertUnwindSafe(self.try_optimize(query, priority, &query_id))
            .catch_unwind()
            .instrument(span.clone())
            .await;
        let plan = match attempt {
            Ok(Ok(plan)) => plan,
            Ok(Err(error)) => self.fallback_plan(query, priority, &query_id, error.to_string()),
            Err(panic) => self.fallback_plan(
                query,
                priority,
                &query_id,
                format!("optimizer panicked: {}", panic_message(panic.as_ref())),
            ),
        };
        span.record("fallback", plan.fallback);

        if self.learner.on_query_optimized() {
            self.run_learning_cycle();
        }
        plan
    }

    async fn try_optimize(
        &self,
        query: &Query,
        priority: Priority,
        query_id: &str,
    ) -> OptimizerResult<QueryPlan> {
        let perf = PerformanceLogger::start("optimize");
        query.validate()?;

        let graph_type = detect_graph_type(query);
        let base = self
            .optimizers
            .get(&graph_type)
            .ok_or_else(|| OptimizerError::OptimizerFailure {
                reason: format!("no optimizer registered for graph type {}", graph_type),
            })?;
        Span::current().record("graph_type", graph_type.as_str());

        let entity_scores = self.entity_scores(query).await;
        perf.log_milestone("entity_importance");

        let graph_info = self.graph_info(graph_type);
        let (rewritten, pattern, mut applied_rules, learned) = {
            let stats = self.state.traversal.read();
            let ctx = RewriteContext {
                graph_type: Some(graph_type),
                graph_info: graph_info.as_ref(),
                entity_scores: Some(&entity_scores),
                traversal_stats: Some(&*stats),
            };
            let outcome = self.rewriter.rewrite_traced(query, &ctx);
            let mut rewritten = outcome.query;
            let mut applied: Vec<String> =
                outcome.applied.iter().map(|s| s.to_string()).collect();
            applied.extend(apply_rules(
                &mut rewritten,
                &stats.optimization_rules,
                outcome.pattern,
                graph_type,
                self.config.learning.min_rule_confidence,
            ));
            let learned = learned_strategy(
                &stats.optimization_rules,
                outcome.pattern,
                graph_type,
                self.config.learning.min_rule_confidence,
            )
            .map(|(strategy, rule)| (strategy, rule.to_string()));
            (rewritten, outcome.pattern, applied, learned)
        };
        perf.log_milestone("rewrite");

        let base_optimization = base.optimize(&rewritten);
        applied_rules.extend(
            base_optimization
                .adjustments
                .iter()
                .map(|(name, _, _)| format!("tune_{}", name)),
        );
        let mut tuned = base_optimization.query;

        let selection = select_strategy(
            &tuned,
            &self.state,
            self.config.learning.min_strategy_samples,
            learned.as_ref().map(|(strategy, _)| *strategy),
        );
        if let Some((_, rule)) = learned.filter(|_| selection.reason == "learned_rule") {
            applied_rules.push(rule);
        }
        tuned.traversal.strategy = Some(selection.strategy);
        Span::current().record("strategy", selection.strategy.as_str());
        log_strategy_selection(query_id, selection.strategy.as_str(), selection.reason);

        let budget = self.budget.allocate(&tuned, priority);
        let cache = base.cache();
        let plan = QueryPlan {
            query_id: query_id.to_string(),
            created_at: Utc::now(),
            graph_type,
            pattern,
            traversal_strategy: selection.strategy,
            strategy_reason: selection.reason.to_string(),
            weights: ranking_weights(graph_type, pattern),
            budget,
            complexity: estimate_complexity(&tuned),
            caching: CachingDirective {
                enabled: cache.is_enabled(),
                key: Some(base_optimization.cache_key),
                ttl_secs: cache.ttl().as_secs_f64(),
                priority,
            },
            statistics: base.statistics().performance_summary(),
            applied_rules,
            fallback: false,
            error: None,
            query: tuned,
        };
        perf.finish();
        Ok(plan)
    }

    /// Importance for the query's entities: attached processor, else cached scores
    async fn entity_scores(&self, query: &Query) -> BTreeMap<String, f64> {
        let mut scores = BTreeMap::new();
        for id in &query.entity_ids {
            let score = match &self.processor {
                Some(processor) => Some(entity_importance(&self.state, processor.as_ref(), id).await),
                None => self.state.entity_importance.get(id).map(|s| *s),
            };
            if let Some(score) = score {
                scores.insert(id.clone(), score);
            }
        }
        scores
    }

    fn fallback_plan(
        &self,
        query: &Query,
        priority: Priority,
        query_id: &str,
        error: String,
    ) -> QueryPlan {
        log_fallback_plan(query_id, &error);
        QueryPlan::fallback(query_id, query, *self.budget.defaults(), priority, error)
    }

    /// Optimize and execute a query against `processor`
    ///
    /// Graph processor failures propagate; budget pressure stops execution
    /// early and is reported in [`ExecutionInfo::early_stopping`].
    pub async fn execute(
        &self,
        processor: &dyn GraphProcessor,
        query: &Query,
        priority: Priority,
        skip_cache: bool,
    ) -> OptimizerResult<(Vec<ScoredResult>, ExecutionInfo)> {
        let graph_type = detect_graph_type(query);
        if let Some(info) = processor.graph_info().await {
            self.update_graph_info(graph_type, info);
        }
        for id in &query.entity_ids {
            entity_importance(&self.state, processor, id).await;
        }

        let plan = self.optimize(query, priority).await;
        let span = execution_span(&plan.query_id, skip_cache);
        self.execute_plan(processor, &plan, skip_cache)
            .instrument(span)
            .await
    }

    async fn execute_plan(
        &self,
        processor: &dyn GraphProcessor,
        plan: &QueryPlan,
        skip_cache: bool,
    ) -> OptimizerResult<(Vec<ScoredResult>, ExecutionInfo)> {
        let perf = PerformanceLogger::start("execute");
        let metrics_id = self
            .metrics
            .start(Some(plan.query_id.as_str()), to_safe_value(&plan.query));
        let base = self
            .optimizers
            .get(&plan.graph_type)
            .ok_or_else(|| OptimizerError::OptimizerFailure {
                reason: format!("no optimizer registered for graph type {}", plan.graph_type),
            })?;
        let mut run = ExecutionRun::new(plan, self.budget.tracker(plan.budget));

        if plan.caching.enabled && !skip_cache {
            if let Some(key) = &plan.caching.key {
                let cached = {
                    let _phase = self.metrics.time_phase(&metrics_id, "cache_lookup", None);
                    base.cache().get(key)
                };
                match cached {
                    Ok(results) => {
                        Span::current().record("cache_hit", true);
                        debug!(query_id = %plan.query_id, "Serving results from cache");
                        self.metrics.end(&metrics_id, results.len(), None);
                        let info = run.finish(true, results.len(), perf.finish());
                        return Ok((results, info));
                    }
                    Err(e) => debug!(query_id = %plan.query_id, reason = %e, "Cache lookup missed"),
                }
            }
        }

        let results = self
            .run_phases(processor, plan, &metrics_id, &mut run)
            .await;
        let results = match results {
            Ok(results) => results,
            Err(error) => {
                self.metrics.end(&metrics_id, 0, None);
                return Err(error.into());
            }
        };
        perf.log_milestone("phases");

        let elapsed = run.started.elapsed();
        run.tracker
            .track(Resource::TimeoutMs, elapsed.as_secs_f64() * 1000.0);

        if plan.caching.enabled {
            if let Some(key) = &plan.caching.key {
                base.cache().put(key, results.clone());
            }
        }
        base.statistics().record_query_time(elapsed.as_secs_f64());

        let relevance = top_relevance(&results);
        self.state.traversal.write().record_results(
            &results,
            PathOrigin {
                strategy: plan.traversal_strategy,
                pattern: plan.pattern,
                graph_type: plan.graph_type,
            },
            RetentionLimits::from(&self.config.learning),
        );
        if let Some(relevance) = relevance {
            self.state.record_strategy(
                plan.traversal_strategy,
                relevance,
                elapsed.as_secs_f64() * 1000.0,
            );
        }
        self.budget.record_completion(&run.tracker);

        self.metrics
            .record_metric(&metrics_id, "consumption", &run.tracker.report(), "budget");
        self.metrics
            .record_metric(&metrics_id, "strategy", plan.traversal_strategy.as_str(), "plan");
        self.metrics.end(&metrics_id, results.len(), relevance);

        let span = Span::current();
        span.record("cache_hit", false);
        span.record("result_count", results.len() as u64);
        span.record("early_stopping", run.early_stop.is_some());

        let info = run.finish(false, results.len(), perf.finish());
        Ok((results, info))
    }

    async fn run_phases(
        &self,
        processor: &dyn GraphProcessor,
        plan: &QueryPlan,
        metrics_id: &str,
        run: &mut ExecutionRun,
    ) -> ProcessorResult<Vec<ScoredResult>> {
        let query = &plan.query;
        let budget = plan.budget;
        let params = ExpansionParams::from_query(
            query,
            budget.max_nodes.max(0.0) as usize,
            budget.max_edges.max(0.0) as usize,
        );

        let candidates = match &query.query_vector {
            Some(vector) => {
                let request = VectorSearchRequest::from_query(query, vector.clone());
                let seeds = {
                    let _phase = self.metrics.time_phase(metrics_id, "vector_search", None);
                    let started = Instant::now();
                    let seeds = bounded(
                        "vector_search",
                        budget.vector_search_ms,
                        processor.search_by_vector(&request),
                    )
                    .await;
                    run.record_phase("vector_search", Resource::VectorSearchMs, started);
                    seeds?
                };
                if seeds.is_empty() {
                    run.stop("vector_search", "no_vector_results", 0);
                    return Ok(seeds);
                }

                let _phase = self.metrics.time_phase(
                    metrics_id,
                    "graph_expansion",
                    Some(Value::String(plan.traversal_strategy.as_str().to_string())),
                );
                let started = Instant::now();
                let expanded = bounded(
                    "graph_expansion",
                    budget.graph_traversal_ms,
                    plan.traversal_strategy.expand(processor, &seeds, &params),
                )
                .await;
                run.record_phase("graph_expansion", Resource::GraphTraversalMs, started);
                match expanded {
                    Ok(expanded) => expanded,
                    Err(ProcessorError::Timeout { timeout_ms, .. }) => {
                        crate::optimizer_warn!(
                            query_id = %plan.query_id,
                            timeout_ms,
                            "Graph expansion timed out, keeping vector results"
                        );
                        run.stop("graph_expansion", "graph_traversal_timeout", seeds.len());
                        seeds
                    }
                    Err(e) => return Err(e),
                }
            }
            None => {
                let _phase = self.metrics.time_phase(metrics_id, "direct_graph_query", None);
                let started = Instant::now();
                let results = bounded(
                    "direct_graph_query",
                    budget.graph_traversal_ms,
                    processor.direct_graph_query(query, &params),
                )
                .await;
                run.record_phase("direct_graph_query", Resource::GraphTraversalMs, started);
                results?
            }
        };

        run.tracker.track(Resource::MaxNodes, candidates.len() as f64);
        run.tracker.track(
            Resource::MaxEdges,
            candidates.iter().map(|r| r.path.len()).sum::<usize>() as f64,
        );

        if run.early_stop.is_none() {
            let scores: Vec<f64> = candidates.iter().map(|r| r.score).collect();
            if let Some(resource) = run.tracker.exceeded() {
                let reason = format!("budget_exceeded:{}", resource);
                run.stop("graph_expansion", &reason, candidates.len());
            } else if self
                .budget
                .suggest_early_stop(&scores, run.tracker.consumed_ratio())
            {
                run.stop(
                    "graph_expansion",
                    "diminishing_returns",
                    candidates.len(),
                );
            }
        }

        let _phase = self.metrics.time_phase(metrics_id, "ranking", None);
        let started = Instant::now();
        let ranked = if run.early_stop.is_some() {
            rank_locally(candidates, plan.weights)
        } else {
            let local = candidates.clone();
            match bounded(
                "ranking",
                budget.ranking_ms,
                processor.rank_results(candidates, plan.weights),
            )
            .await
            {
                Ok(ranked) => ranked,
                Err(ProcessorError::Timeout { .. }) => {
                    crate::optimizer_warn!(
                        query_id = %plan.query_id,
                        "Ranking timed out, ranking locally"
                    );
                    rank_locally(local, plan.weights)
                }
                Err(e) => return Err(e),
            }
        };
        run.record_phase("ranking", Resource::RankingMs, started);
        Ok(ranked)
    }

    /// Plan plus its ordered steps, each with a share of the budget
    #[instrument(skip_all)]
    pub async fn get_execution_plan(&self, query: &Query, priority: Priority) -> ExecutionPlan {
        ExecutionPlan::from_plan(self.optimize(query, priority).await)
    }

    /// Summarize recent performance and suggest configuration changes
    #[instrument(skip(self))]
    pub fn analyze_performance(&self, window_secs: f64) -> PerformanceAnalysis {
        let mut graph_types = BTreeMap::new();
        let mut recommendations = Vec::new();

        for (graph_type, base) in &self.optimizers {
            let summary = base.statistics().performance_summary();
            let recent = base.statistics().recent_query_times(window_secs);
            let recent_avg_secs = if recent.is_empty() {
                0.0
            } else {
                recent.iter().sum::<f64>() / recent.len() as f64
            };

            if summary.query_count >= MIN_QUERIES_FOR_ADVICE {
                if base.cache().is_enabled() && summary.cache_hit_rate < LOW_CACHE_HIT_RATE {
                    recommendations.push(format!(
                        "{} cache hit rate is {:.0}%: consider a longer cache TTL",
                        graph_type,
                        summary.cache_hit_rate * 100.0
                    ));
                }
                if recent_avg_secs > SLOW_QUERY_SECS {
                    recommendations.push(format!(
                        "{} queries average {:.2}s: reduce top_k or max_depth",
                        graph_type, recent_avg_secs
                    ));
                }
            }

            graph_types.insert(
                *graph_type,
                GraphTypePerformance {
                    summary,
                    recent_queries: recent.len(),
                    recent_avg_secs,
                    cache: base.cache().stats(),
                },
            );
        }

        let metrics = self.metrics.performance_report(None);
        recommendations.extend(metrics.recommendations.iter().cloned());

        let learning = self.learner.status();
        if learning.remaining_backoff_ms.is_some() {
            recommendations.push(format!(
                "Statistical learning is suspended after repeated failures (last: {})",
                learning.last_failure.as_deref().unwrap_or("unknown")
            ));
        }

        PerformanceAnalysis {
            generated_at: Utc::now(),
            window_secs,
            graph_types,
            metrics,
            learning,
            recommendations,
        }
    }

    pub fn enable_statistical_learning(&self, enabled: bool, cycle_length: u64) {
        self.learner.enable(enabled, cycle_length);
        info!(enabled, cycle_length, "Statistical learning configured");
    }

    /// Run a learning cycle now, unless the circuit breaker is open
    pub fn run_learning_cycle(&self) -> Option<LearningOutcome> {
        let mut patterns: Vec<PatternFrequency> = self
            .optimizers
            .iter()
            .flat_map(|(graph_type, base)| {
                base.statistics()
                    .common_patterns(LEARNING_PATTERN_COUNT)
                    .into_iter()
                    .map(move |(signature, count)| PatternFrequency {
                        graph_type: *graph_type,
                        signature,
                        count,
                    })
            })
            .collect();
        patterns.sort_by(|a, b| b.count.cmp(&a.count));
        self.learner.run_cycle(&self.state, &patterns)
    }

    /// Run learning cycles on a fixed interval until the handle is aborted
    pub fn spawn_learning_loop(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if self.learner.is_enabled() {
                    self.run_learning_cycle();
                }
            }
        })
    }

    pub fn save_learning_state(&self, path: &Path) -> OptimizerResult<()> {
        let snapshot = self
            .state
            .snapshot(self.learner.is_enabled(), self.learner.cycle_length());
        snapshot.save(path)?;
        info!(path = %path.display(), "Learning state saved");
        Ok(())
    }

    pub fn load_learning_state(&self, path: &Path) -> OptimizerResult<()> {
        let snapshot = LearningSnapshot::load(path)?;
        self.learner
            .enable(snapshot.learning_enabled, snapshot.cycle_length);
        self.state.restore(snapshot);
        info!(path = %path.display(), "Learning state loaded");
        Ok(())
    }
}

/// Mutable bookkeeping for one plan execution
struct ExecutionRun {
    query_id: String,
    graph_type: GraphType,
    strategy: TraversalStrategy,
    fallback: bool,
    started: Instant,
    tracker: BudgetTracker,
    phase_timings_ms: BTreeMap<String, f64>,
    early_stop: Option<EarlyStop>,
}

impl ExecutionRun {
    fn new(plan: &QueryPlan, tracker: BudgetTracker) -> Self {
        Self {
            query_id: plan.query_id.clone(),
            graph_type: plan.graph_type,
            strategy: plan.traversal_strategy,
            fallback: plan.fallback,
            started: Instant::now(),
            tracker,
            phase_timings_ms: BTreeMap::new(),
            early_stop: None,
        }
    }

    fn record_phase(&mut self, phase: &str, resource: Resource, started: Instant) {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        *self.phase_timings_ms.entry(phase.to_string()).or_insert(0.0) += elapsed_ms;
        self.tracker.track(resource, elapsed_ms);
    }

    fn stop(&mut self, phase: &str, reason: &str, results: usize) {
        log_early_stop(&self.query_id, phase, reason, results);
        self.early_stop = Some(EarlyStop {
            phase: phase.to_string(),
            reason: reason.to_string(),
        });
    }

    fn finish(self, cache_hit: bool, result_count: usize, total: Duration) -> ExecutionInfo {
        ExecutionInfo {
            query_id: self.query_id,
            graph_type: self.graph_type,
            strategy: self.strategy,
            cache_hit,
            fallback_plan: self.fallback,
            early_stopping: self.early_stop,
            phase_timings_ms: self.phase_timings_ms,
            consumption: self.tracker.report(),
            result_count,
            total_ms: total.as_secs_f64() * 1000.0,
        }
    }
}

/// Run a processor call under a millisecond time limit
async fn bounded<T, F>(operation: &str, limit_ms: f64, call: F) -> ProcessorResult<T>
where
    F: Future<Output = ProcessorResult<T>>,
{
    let limit = Duration::from_secs_f64(limit_ms.max(1.0) / 1000.0);
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ProcessorError::Timeout {
            operation: operation.to_string(),
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}

/// Mean score of the three best results
fn top_relevance(results: &[ScoredResult]) -> Option<f64> {
    let mut scores: Vec<f64> = results
        .iter()
        .map(|r| r.score)
        .filter(|s| s.is_finite())
        .collect();
    if scores.is_empty() {
        return None;
    }
    scores.sort_by(|a, b| b.total_cmp(a));
    let top = &scores[..scores.len().min(3)];
    Some(top.iter().sum::<f64>() / top.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::InMemoryGraphProcessor;
    use tracing_test::traced_test;

    fn processor() -> InMemoryGraphProcessor {
        let mut g = InMemoryGraphProcessor::new();
        g.add_entity("rust", Some("concept"), Some(vec![1.0, 0.0, 0.0]));
        g.add_entity("language", Some("concept"), Some(vec![0.9, 0.1, 0.0]));
        g.add_entity("mozilla", Some("organization"), Some(vec![0.0, 1.0, 0.0]));
        g.add_entity("cargo", Some("concept"), Some(vec![0.8, 0.0, 0.2]));
        g.add_relation("rust", "instance_of", "language");
        g.add_relation("rust", "developer", "mozilla");
        g.add_relation("cargo", "part_of", "rust");
        g
    }

    fn optimizer() -> UnifiedOptimizer {
        UnifiedOptimizer::new(OptimizerConfig::default())
    }

    #[tokio::test]
    async fn test_optimize_builds_plan() {
        let optimizer = optimizer();
        let mut query = Query::with_vector(vec![1.0, 0.0, 0.0]);
        query.traversal.max_depth = Some(1);

        let plan = optimizer.optimize(&query, Priority::Normal).await;
        assert!(!plan.fallback);
        assert_eq!(plan.graph_type, GraphType::General);
        assert!(plan.caching.enabled);
        assert!(plan.caching.key.is_some());
        assert_eq!(plan.query.traversal.strategy, Some(plan.traversal_strategy));
    }

    #[tokio::test]
    async fn test_invalid_query_gets_fallback_plan() {
        let optimizer = optimizer();
        let plan = optimizer
            .optimize(&Query::with_vector(vec![]), Priority::Normal)
            .await;
        assert!(plan.fallback);
        assert!(plan.error.unwrap().contains("query_vector"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_fallback_is_logged() {
        let optimizer = optimizer();
        let mut query = Query::with_vector(vec![0.5, 0.5]);
        query.vector_params.top_k = Some(0);

        let plan = optimizer.optimize(&query, Priority::Low).await;
        assert!(plan.fallback);
        assert!(logs_contain("Optimization failed, returning fallback plan"));
        assert!(logs_contain("vector_params.top_k"));
    }

    #[tokio::test]
    async fn test_execute_and_cache() {
        let optimizer = optimizer();
        let g = processor();
        let mut query = Query::with_vector(vec![1.0, 0.0, 0.0]);
        query.traversal.max_depth = Some(1);

        let (results, info) = optimizer
            .execute(&g, &query, Priority::Normal, false)
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert!(!info.cache_hit);
        assert!(info.phase_timings_ms.contains_key("vector_search"));

        let (cached, info) = optimizer
            .execute(&g, &query, Priority::Normal, false)
            .await
            .unwrap();
        assert!(info.cache_hit);
        assert_eq!(cached.len(), results.len());

        let (_, info) = optimizer
            .execute(&g, &query, Priority::Normal, true)
            .await
            .unwrap();
        assert!(!info.cache_hit);
    }

    #[tokio::test]
    async fn test_empty_vector_results_stop_early() {
        let optimizer = optimizer();
        let g = processor();
        let mut query = Query::with_vector(vec![0.0, 0.0, 1.0]);
        query.vector_params.min_score = Some(0.99);

        let (results, info) = optimizer
            .execute(&g, &query, Priority::Normal, true)
            .await
            .unwrap();
        assert!(results.is_empty());
        assert_eq!(info.early_stopping.unwrap().reason, "no_vector_results");
    }

    #[tokio::test]
    async fn test_learned_strategy_only_fills_in_without_signal() {
        let optimizer = optimizer();
        for _ in 0..5 {
            optimizer
                .state()
                .record_strategy(TraversalStrategy::DagTraversal, 0.9, 10.0);
        }
        assert!(optimizer.run_learning_cycle().unwrap().success);

        let mut multi = Query::with_vector(vec![0.5, 0.5, 0.0]);
        multi.entity_ids.extend(["a".to_string(), "b".to_string()]);
        let plan = optimizer.optimize(&multi, Priority::Normal).await;
        assert_eq!(plan.traversal_strategy, TraversalStrategy::EntityConnection);
        assert!(!plan.applied_rules.iter().any(|r| r == "preferred_strategy"));

        let question = Query {
            query_text: Some("Is Paris the capital of France?".into()),
            ..Query::with_vector(vec![0.5, 0.5, 0.0])
        };
        let plan = optimizer.optimize(&question, Priority::Normal).await;
        assert_eq!(plan.traversal_strategy, TraversalStrategy::Bidirectional);

        let plain = optimizer
            .optimize(&Query::with_vector(vec![0.5, 0.5, 0.0]), Priority::Normal)
            .await;
        assert_eq!(plain.traversal_strategy, TraversalStrategy::DagTraversal);
        assert_eq!(plain.strategy_reason, "learned_rule");
        assert!(plain.applied_rules.iter().any(|r| r == "preferred_strategy"));
    }

    #[tokio::test]
    async fn test_execution_consumption_reaches_budget_manager() {
        let optimizer = optimizer();
        assert!(optimizer.budget_manager().consumption_report().is_none());

        let mut query = Query::with_vector(vec![1.0, 0.0, 0.0]);
        query.vector_params.min_score = Some(0.0);
        let (_, info) = optimizer
            .execute(&processor(), &query, Priority::Normal, true)
            .await
            .unwrap();

        let report = optimizer.budget_manager().consumption_report().unwrap();
        assert_eq!(report, info.consumption);
        assert!(report.consumption.max_nodes > 0.0);
        assert!(report.consumption.timeout_ms > 0.0);
        assert_eq!(optimizer.budget_manager().history_len(Resource::MaxNodes), 1);
    }

    #[test]
    fn test_top_relevance() {
        let results: Vec<ScoredResult> = [0.2, 0.9, 0.6, 0.3]
            .iter()
            .enumerate()
            .map(|(i, s)| ScoredResult::new(format!("n{}", i), *s))
            .collect();
        let relevance = top_relevance(&results).unwrap();
        assert!((relevance - (0.9 + 0.6 + 0.3) / 3.0).abs() < 1e-9);
        assert_eq!(top_relevance(&[]), None);
    }
}
