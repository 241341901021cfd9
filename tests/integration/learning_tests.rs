//! Statistical learning, its circuit breaker and learning-state persistence

use super::utils::{config_with_cycle, init_test_logging, knowledge_graph};
use graphrag_optimizer::optimization::BreakerState;
use graphrag_optimizer::query::{Priority, Query};
use graphrag_optimizer::UnifiedOptimizer;
use std::sync::Arc;
use std::time::Duration;

fn taxonomy_query(vector: Vec<f32>) -> Query {
    let mut query = Query::with_vector(vector);
    query.traversal.edge_types = vec!["part_of".to_string(), "instance_of".to_string()];
    query.traversal.max_depth = Some(2);
    query
}

#[tokio::test]
async fn test_breaker_trips_after_three_critical_failures() {
    init_test_logging();
    let optimizer = UnifiedOptimizer::new(config_with_cycle(1));
    optimizer
        .state()
        .traversal
        .write()
        .relation_usefulness
        .insert("instance_of".to_string(), f64::NAN);

    for _ in 0..3 {
        let plan = optimizer
            .optimize(&Query::with_vector(vec![0.3, 0.3, 0.4]), Priority::Normal)
            .await;
        assert!(!plan.fallback);
    }

    let status = optimizer.learning_status();
    assert_eq!(status.breaker_state, BreakerState::Open);
    assert_eq!(status.cycles_run, 3);
    assert!(status.remaining_backoff_ms.is_some());
    assert!(status
        .last_failure
        .as_deref()
        .unwrap()
        .contains("non-finite"));

    let plan = optimizer
        .optimize(&Query::with_vector(vec![0.3, 0.3, 0.4]), Priority::Normal)
        .await;
    assert!(!plan.fallback);
    assert_eq!(optimizer.learning_status().cycles_run, 3);
    assert!(optimizer.run_learning_cycle().is_none());

    let failures = optimizer
        .state()
        .traversal
        .read()
        .learning_results
        .iter()
        .filter(|outcome| !outcome.success)
        .count();
    assert_eq!(failures, 3);

    let analysis = optimizer.analyze_performance(60.0);
    assert!(analysis
        .recommendations
        .iter()
        .any(|r| r.contains("Statistical learning is suspended")));
}

#[tokio::test]
async fn test_learning_cycle_derives_rules_from_executions() {
    init_test_logging();
    let optimizer = UnifiedOptimizer::new(config_with_cycle(1000));
    let graph = knowledge_graph();
    for vector in [
        vec![1.0, 0.0, 0.0, 0.1],
        vec![0.8, 0.0, 0.3, 0.0],
        vec![0.7, 0.0, 0.0, 0.5],
    ] {
        optimizer
            .execute(&graph, &taxonomy_query(vector), Priority::Normal, true)
            .await
            .unwrap();
    }

    let outcome = optimizer.run_learning_cycle().unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.cycle, 1);
    let status = optimizer.learning_status();
    assert_eq!(status.breaker_state, BreakerState::Closed);
    assert_eq!(status.failure_count, 0.0);

    let stats = optimizer.state().traversal.read();
    assert_eq!(stats.optimization_rules.len(), outcome.rules_generated);
    assert_eq!(stats.learning_results.len(), 1);
}

#[tokio::test]
async fn test_disabled_learning_never_runs() {
    let optimizer = UnifiedOptimizer::new(config_with_cycle(1));
    optimizer.enable_statistical_learning(false, 1);
    for _ in 0..3 {
        optimizer
            .optimize(&Query::with_vector(vec![0.1, 0.9]), Priority::Low)
            .await;
    }
    let status = optimizer.learning_status();
    assert!(!status.enabled);
    assert_eq!(status.cycles_run, 0);
}

#[tokio::test]
async fn test_learning_loop_runs_in_background() {
    let optimizer = Arc::new(UnifiedOptimizer::new(config_with_cycle(1000)));
    let handle = Arc::clone(&optimizer).spawn_learning_loop(Duration::from_millis(10));

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.abort();

    assert!(optimizer.learning_status().cycles_run >= 1);
}

#[tokio::test]
async fn test_learning_state_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("learning_state.json");
    let graph = knowledge_graph();

    let trained = UnifiedOptimizer::new(config_with_cycle(1000));
    trained.enable_statistical_learning(true, 25);
    let mut query = taxonomy_query(vec![1.0, 0.0, 0.0, 0.0]);
    query.entity_ids.insert("rust".to_string());
    trained
        .execute(&graph, &query, Priority::Normal, true)
        .await
        .unwrap();
    trained.save_learning_state(&path).unwrap();

    let restored = UnifiedOptimizer::new(config_with_cycle(1000));
    restored.load_learning_state(&path).unwrap();

    assert_eq!(restored.learning_status().cycle_length, 25);
    let original = *trained.state().entity_importance.get("rust").unwrap();
    let loaded = *restored.state().entity_importance.get("rust").unwrap();
    assert!((original - loaded).abs() < 1e-12);

    let trained_stats = trained.state().traversal.read();
    let restored_stats = restored.state().traversal.read();
    assert_eq!(
        restored_stats.paths_explored.len(),
        trained_stats.paths_explored.len()
    );
    assert_eq!(restored_stats.entity_frequency, trained_stats.entity_frequency);
    let mut relations: Vec<&String> = restored_stats.relation_usefulness.keys().collect();
    relations.sort();
    let mut expected: Vec<&String> = trained_stats.relation_usefulness.keys().collect();
    expected.sort();
    assert_eq!(relations, expected);
}

#[tokio::test]
async fn test_loading_missing_state_fails() {
    let dir = tempfile::tempdir().unwrap();
    let optimizer = UnifiedOptimizer::new(config_with_cycle(10));
    assert!(optimizer
        .load_learning_state(&dir.path().join("missing.json"))
        .is_err());
    assert_eq!(optimizer.learning_status().cycle_length, 10);
}
