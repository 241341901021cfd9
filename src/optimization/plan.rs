//! Query plans, execution plans and execution reports

use crate::optimization::budget::{Budget, Complexity, ConsumptionReport};
use crate::optimization::statistics::PerformanceSummary;
use crate::processor::RankingWeights;
use crate::query::{GraphType, Priority, Query, QueryPattern, TraversalStrategy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Depth used by fallback plans
pub const FALLBACK_MAX_DEPTH: u32 = 2;
/// Top-k used by fallback plans
pub const FALLBACK_TOP_K: usize = 5;
/// Similarity threshold used by fallback plans
pub const FALLBACK_MIN_SIMILARITY: f32 = 0.6;

/// How a plan's results are cached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachingDirective {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub ttl_secs: f64,
    pub priority: Priority,
}

/// Optimized, budgeted plan for one query
///
/// Plans are never mutated after [`crate::UnifiedOptimizer::optimize`]
/// returns them; execution reports through [`ExecutionInfo`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub query_id: String,
    pub created_at: DateTime<Utc>,
    /// Rewritten and tuned query
    pub query: Query,
    pub graph_type: GraphType,
    pub pattern: QueryPattern,
    pub traversal_strategy: TraversalStrategy,
    pub strategy_reason: String,
    pub weights: RankingWeights,
    pub budget: Budget,
    pub complexity: Complexity,
    pub caching: CachingDirective,
    /// Statistics of the graph type's optimizer when the plan was built
    pub statistics: PerformanceSummary,
    /// Rewrite stages, learned rules and tuning steps that changed the query
    pub applied_rules: Vec<String>,
    pub fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryPlan {
    /// Conservative plan used when optimization fails
    pub fn fallback(
        query_id: &str,
        query: &Query,
        budget: Budget,
        priority: Priority,
        error: String,
    ) -> Self {
        let mut safe = query.clone();
        safe.traversal.max_depth = Some(FALLBACK_MAX_DEPTH);
        safe.traversal.strategy = Some(TraversalStrategy::Default);
        safe.vector_params.top_k = Some(FALLBACK_TOP_K);
        safe.vector_params.min_score = Some(FALLBACK_MIN_SIMILARITY);
        if safe.query_vector.as_ref().map_or(false, |v| v.iter().any(|x| !x.is_finite())) {
            safe.query_vector = None;
        }

        Self {
            query_id: query_id.to_string(),
            created_at: Utc::now(),
            graph_type: query.graph_type.unwrap_or_default(),
            pattern: QueryPattern::General,
            traversal_strategy: TraversalStrategy::Default,
            strategy_reason: "fallback".to_string(),
            weights: RankingWeights::default(),
            budget,
            complexity: Complexity::Medium,
            caching: CachingDirective {
                enabled: false,
                key: None,
                ttl_secs: 0.0,
                priority,
            },
            statistics: PerformanceSummary::default(),
            applied_rules: Vec::new(),
            fallback: true,
            error: Some(error),
            query: safe,
        }
    }

    /// Whether the plan starts from a vector search
    pub fn uses_vector_search(&self) -> bool {
        self.query.query_vector.is_some()
    }
}

/// Step kinds of an execution plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    CacheLookup,
    VectorSearch,
    DirectGraphQuery,
    GraphExpansion,
    Ranking,
}

/// One step of an execution plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub id: usize,
    pub step_type: StepType,
    /// Steps whose output this one consumes
    pub inputs: Vec<usize>,
    pub parameters: BTreeMap<String, Value>,
    /// Time allowed for the step
    pub budget_ms: f64,
}

/// Ordered steps a plan executes, each with its share of the budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub plan: QueryPlan,
    pub steps: Vec<ExecutionStep>,
    pub estimated_cost_ms: f64,
}

impl ExecutionPlan {
    pub fn from_plan(plan: QueryPlan) -> Self {
        let mut steps = Vec::new();
        let budget = plan.budget;
        let query = &plan.query;

        if plan.caching.enabled {
            steps.push(ExecutionStep {
                id: steps.len(),
                step_type: StepType::CacheLookup,
                inputs: vec![],
                parameters: BTreeMap::from([("key".to_string(), json!(plan.caching.key))]),
                budget_ms: 0.0,
            });
        }

        if plan.uses_vector_search() {
            steps.push(ExecutionStep {
                id: steps.len(),
                step_type: StepType::VectorSearch,
                inputs: vec![],
                parameters: BTreeMap::from([
                    ("top_k".to_string(), json!(query.top_k())),
                    ("min_similarity".to_string(), json!(query.min_similarity())),
                ]),
                budget_ms: budget.vector_search_ms,
            });
            let search = steps.len() - 1;
            steps.push(ExecutionStep {
                id: steps.len(),
                step_type: StepType::GraphExpansion,
                inputs: vec![search],
                parameters: BTreeMap::from([
                    ("strategy".to_string(), json!(plan.traversal_strategy)),
                    ("max_depth".to_string(), json!(query.max_depth())),
                    ("edge_types".to_string(), json!(query.edge_types())),
                    ("max_nodes".to_string(), json!(budget.max_nodes)),
                    ("max_edges".to_string(), json!(budget.max_edges)),
                ]),
                budget_ms: budget.graph_traversal_ms,
            });
        } else {
            steps.push(ExecutionStep {
                id: steps.len(),
                step_type: StepType::DirectGraphQuery,
                inputs: vec![],
                parameters: BTreeMap::from([
                    ("strategy".to_string(), json!(plan.traversal_strategy)),
                    ("max_depth".to_string(), json!(query.max_depth())),
                    ("entity_ids".to_string(), json!(query.entity_ids)),
                ]),
                budget_ms: budget.graph_traversal_ms,
            });
        }

        let previous = steps.len() - 1;
        steps.push(ExecutionStep {
            id: steps.len(),
            step_type: StepType::Ranking,
            inputs: vec![previous],
            parameters: BTreeMap::from([
                ("vector_weight".to_string(), json!(plan.weights.vector)),
                ("graph_weight".to_string(), json!(plan.weights.graph)),
            ]),
            budget_ms: budget.ranking_ms,
        });

        let estimated_cost_ms = steps
            .iter()
            .map(|s| s.budget_ms)
            .sum::<f64>()
            .min(budget.timeout_ms);
        Self {
            plan,
            steps,
            estimated_cost_ms,
        }
    }
}

/// Why execution stopped before running every phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarlyStop {
    /// Phase after which execution stopped
    pub phase: String,
    pub reason: String,
}

/// Report of one plan execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionInfo {
    pub query_id: String,
    pub graph_type: GraphType,
    pub strategy: TraversalStrategy,
    pub cache_hit: bool,
    pub fallback_plan: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub early_stopping: Option<EarlyStop>,
    /// Wall time per phase in milliseconds
    pub phase_timings_ms: BTreeMap<String, f64>,
    pub consumption: ConsumptionReport,
    pub result_count: usize,
    pub total_ms: f64,
}

impl ExecutionInfo {
    pub fn stopped_early(&self) -> bool {
        self.early_stopping.is_some()
    }
}
