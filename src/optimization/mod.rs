//! Query optimization
//!
//! Planning and execution for GraphRAG queries: per-graph-type tuning and
//! result caching, rule-based rewriting, resource budgets, traversal strategy
//! selection, entity importance and the statistical learning loop, all
//! orchestrated by [`UnifiedOptimizer`].

pub mod base;
pub mod budget;
pub mod caching;
pub mod circuit_breaker;
pub mod importance;
pub mod learning;
pub mod plan;
pub mod rewriter;
pub mod state;
pub mod statistics;
pub mod strategy;
pub mod unified;

pub use base::{BaseOptimization, BaseOptimizer};

pub use budget::{
    estimate_complexity, suggest_early_stop, Budget, BudgetManager, BudgetTracker, Complexity,
    Consumption, ConsumptionReport, Resource,
};

pub use caching::{cache_key, CacheStats, ResultCache};

pub use circuit_breaker::{BreakerConfig, BreakerState, LearningCircuitBreaker};

pub use importance::{entity_importance, importance_score};

pub use learning::{learned_strategy, LearningStatus, PatternFrequency, StatisticalLearner};

pub use plan::{
    CachingDirective, EarlyStop, ExecutionInfo, ExecutionPlan, ExecutionStep, QueryPlan, StepType,
};

pub use rewriter::{QueryRewriter, RewriteContext, RewriteOutcome};

pub use state::{
    LearningOutcome, LearningSnapshot, OptimizationRule, OptimizerState, PathOrigin,
    RetentionLimits, RuleAction, RuleCondition, StrategyPerformance, TraversalStats,
};

pub use statistics::{PerformanceSummary, QueryStatistics};

pub use strategy::{detect_graph_type, ranking_weights, select_strategy, StrategySelection};

pub use unified::{GraphTypePerformance, PerformanceAnalysis, UnifiedOptimizer};
