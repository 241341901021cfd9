//! Planning and execution against the in-memory graph processor

use super::utils::{init_test_logging, knowledge_graph};
use async_trait::async_trait;
use graphrag_optimizer::config::OptimizerConfig;
use graphrag_optimizer::errors::{OptimizerError, ProcessorError, ProcessorResult};
use graphrag_optimizer::optimization::{Resource, StepType};
use graphrag_optimizer::processor::{
    EntityInfo, ExpansionParams, GraphProcessor, RankingWeights, ScoredResult, VectorSearchRequest,
};
use graphrag_optimizer::query::{GraphType, Priority, Query};
use graphrag_optimizer::UnifiedOptimizer;
use std::sync::Arc;
use std::time::Duration;

/// Processor whose entity lookups panic
struct PanickingProcessor;

#[async_trait]
impl GraphProcessor for PanickingProcessor {
    async fn search_by_vector(
        &self,
        _request: &VectorSearchRequest,
    ) -> ProcessorResult<Vec<ScoredResult>> {
        Ok(vec![])
    }

    async fn expand_by_graph(
        &self,
        seeds: &[ScoredResult],
        _params: &ExpansionParams,
    ) -> ProcessorResult<Vec<ScoredResult>> {
        Ok(seeds.to_vec())
    }

    async fn rank_results(
        &self,
        results: Vec<ScoredResult>,
        _weights: RankingWeights,
    ) -> ProcessorResult<Vec<ScoredResult>> {
        Ok(results)
    }

    async fn get_entity_info(&self, entity_id: &str) -> ProcessorResult<Option<EntityInfo>> {
        panic!("entity store unavailable for {}", entity_id)
    }

    async fn direct_graph_query(
        &self,
        _query: &Query,
        _params: &ExpansionParams,
    ) -> ProcessorResult<Vec<ScoredResult>> {
        Err(ProcessorError::GraphQueryFailed {
            reason: "not supported".to_string(),
        })
    }
}

#[tokio::test]
async fn test_optimize_survives_panicking_processor() {
    init_test_logging();
    let optimizer =
        UnifiedOptimizer::new(OptimizerConfig::default()).with_processor(Arc::new(PanickingProcessor));
    let mut query = Query::with_vector(vec![0.2, 0.4, 0.4]);
    query.entity_ids.insert("Q42".to_string());
    query.traversal.max_depth = Some(6);

    let plan = optimizer.optimize(&query, Priority::High).await;
    assert!(plan.fallback);
    assert!(plan.error.as_deref().unwrap().contains("panicked"));
    assert_eq!(plan.query.max_depth(), 2);
    assert!(!plan.caching.enabled);
}

#[tokio::test]
async fn test_vector_query_end_to_end() {
    init_test_logging();
    let optimizer = UnifiedOptimizer::new(OptimizerConfig::default());
    let graph = knowledge_graph();
    let mut query = Query::with_vector(vec![1.0, 0.0, 0.0, 0.0]);
    query.traversal.edge_types = vec!["part_of".to_string(), "instance_of".to_string()];
    query.traversal.max_depth = Some(2);

    let (results, info) = optimizer
        .execute(&graph, &query, Priority::Normal, false)
        .await
        .unwrap();

    assert!(!results.is_empty());
    assert!(!info.fallback_plan);
    assert!(!info.cache_hit);
    assert_eq!(info.result_count, results.len());
    assert!(info.phase_timings_ms.contains_key("vector_search"));
    assert!(info.phase_timings_ms.contains_key("ranking"));
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));

    let report = optimizer.metrics().performance_report(None);
    assert_eq!(report.query_count, 1);
    assert!(optimizer
        .graph_info(GraphType::General)
        .is_some_and(|info| info.node_count == 6));
}

#[tokio::test]
async fn test_repeat_query_hits_cache() {
    let optimizer = UnifiedOptimizer::new(OptimizerConfig::default());
    let graph = knowledge_graph();
    let query = Query::with_vector(vec![0.9, 0.1, 0.0, 0.0]);

    let (first, _) = optimizer
        .execute(&graph, &query, Priority::Normal, false)
        .await
        .unwrap();
    let (second, info) = optimizer
        .execute(&graph, &query, Priority::Normal, false)
        .await
        .unwrap();

    assert!(info.cache_hit);
    assert_eq!(first, second);
    let stats = optimizer
        .base_optimizer(GraphType::General)
        .unwrap()
        .cache()
        .stats();
    assert_eq!(stats.hits, 1);
}

#[tokio::test]
async fn test_direct_graph_query_without_vector() {
    let optimizer = UnifiedOptimizer::new(OptimizerConfig::default());
    let graph = knowledge_graph();
    let mut query = Query::default();
    query.entity_ids.insert("rust".to_string());

    let (results, info) = optimizer
        .execute(&graph, &query, Priority::Normal, true)
        .await
        .unwrap();

    assert!(results.iter().any(|r| r.id == "rust"));
    assert!(info.phase_timings_ms.contains_key("direct_graph_query"));
    assert!(!info.phase_timings_ms.contains_key("vector_search"));
    assert!(optimizer.state().entity_importance.contains_key("rust"));
}

#[tokio::test]
async fn test_vector_search_timeout_propagates() {
    let mut config = OptimizerConfig::default();
    config.budget.vector_search_ms = 5.0;
    let optimizer = UnifiedOptimizer::new(config);
    let graph = knowledge_graph().with_latency(Duration::from_millis(200));

    let result = optimizer
        .execute(
            &graph,
            &Query::with_vector(vec![1.0, 0.0, 0.0, 0.0]),
            Priority::Low,
            true,
        )
        .await;

    match result {
        Err(OptimizerError::Processor(ProcessorError::Timeout { operation, .. })) => {
            assert_eq!(operation, "vector_search");
        }
        other => panic!("expected a vector search timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_execution_plan_budgets_each_step() {
    let optimizer = UnifiedOptimizer::new(OptimizerConfig::default());
    let mut query = Query::with_vector(vec![0.5, 0.5, 0.0, 0.0]);
    query.traversal.max_depth = Some(3);

    let execution = optimizer.get_execution_plan(&query, Priority::Critical).await;
    let kinds: Vec<StepType> = execution.steps.iter().map(|s| s.step_type).collect();
    assert_eq!(
        kinds,
        vec![
            StepType::CacheLookup,
            StepType::VectorSearch,
            StepType::GraphExpansion,
            StepType::Ranking
        ]
    );
    let budget = execution.plan.budget;
    assert_eq!(execution.steps[1].budget_ms, budget.get(Resource::VectorSearchMs));
    assert!(execution.estimated_cost_ms <= budget.timeout_ms);
}

#[tokio::test]
async fn test_analyze_performance_reports_every_graph_type() {
    let optimizer = UnifiedOptimizer::new(OptimizerConfig::default());
    let graph = knowledge_graph();
    for vector in [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0]] {
        optimizer
            .execute(&graph, &Query::with_vector(vector.to_vec()), Priority::Normal, false)
            .await
            .unwrap();
    }

    let analysis = optimizer.analyze_performance(60.0);
    assert_eq!(analysis.graph_types.len(), 3);
    let general = &analysis.graph_types[&GraphType::General];
    assert_eq!(general.recent_queries, 2);
    assert_eq!(analysis.metrics.query_count, 2);
    assert!(analysis.learning.enabled);
}

#[tokio::test]
async fn test_metrics_export() {
    let dir = tempfile::tempdir().unwrap();
    let optimizer = UnifiedOptimizer::new(OptimizerConfig::default());
    let graph = knowledge_graph();
    optimizer
        .execute(
            &graph,
            &Query::with_vector(vec![1.0, 0.0, 0.0, 0.0]),
            Priority::Normal,
            false,
        )
        .await
        .unwrap();

    let csv_path = dir.path().join("metrics.csv");
    let json_path = dir.path().join("metrics.json");
    optimizer.metrics().export_csv(&csv_path).unwrap();
    optimizer.metrics().export_json(&json_path).unwrap();

    let csv = std::fs::read_to_string(&csv_path).unwrap();
    assert!(csv.lines().count() >= 2);
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert!(json.is_array() || json.is_object());
}
