//! Crate-level unit tests for the planning building blocks

use graphrag_optimizer::config::{BudgetConfig, CacheConfig, RewriterConfig};
use graphrag_optimizer::optimization::*;
use graphrag_optimizer::processor::{Connection, EntityInfo, GraphInfo};
use graphrag_optimizer::query::{GraphType, Priority, Query, QueryFilters};
use graphrag_optimizer::FailureSeverity;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn edges(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod budget_tests {
    use super::*;

    #[test]
    fn test_deep_wide_query_is_at_least_high() {
        let mut deep = Query::with_vector(vec![0.1, 0.2]);
        deep.traversal.max_depth = Some(5);
        deep.traversal.edge_types = (0..10).map(|i| format!("rel_{}", i)).collect();

        let mut shallow = Query::with_vector(vec![0.1, 0.2]);
        shallow.traversal.max_depth = Some(1);

        assert!(estimate_complexity(&deep) >= Complexity::High);

        let manager = BudgetManager::new(&BudgetConfig::default());
        let deep_budget = manager.allocate(&deep, Priority::Normal);
        let shallow_budget = manager.allocate(&shallow, Priority::Normal);
        for resource in Resource::ALL {
            assert!(
                deep_budget.get(resource) >= shallow_budget.get(resource),
                "{} shrank for the deeper query",
                resource
            );
        }
    }

    #[test]
    fn test_early_stop_on_steep_score_drop() {
        assert!(suggest_early_stop(&[0.95, 0.9, 0.88, 0.5, 0.4], 0.1));
        assert!(!suggest_early_stop(&[0.6, 0.58, 0.57, 0.55, 0.5], 0.1));
    }

    proptest! {
        #[test]
        fn prop_allocate_monotonic_in_priority(
            depth in 1u32..8,
            top_k in 1usize..50,
            edge_count in 0usize..12,
        ) {
            let mut query = Query::with_vector(vec![0.3, 0.4]);
            query.traversal.max_depth = Some(depth);
            query.vector_params.top_k = Some(top_k);
            query.traversal.edge_types = (0..edge_count).map(|i| format!("e{}", i)).collect();

            let manager = BudgetManager::new(&BudgetConfig::default());
            let priorities = [Priority::Low, Priority::Normal, Priority::High, Priority::Critical];
            let budgets: Vec<Budget> = priorities
                .iter()
                .map(|p| manager.allocate(&query, *p))
                .collect();
            for pair in budgets.windows(2) {
                for resource in Resource::ALL {
                    prop_assert!(pair[1].get(resource) >= pair[0].get(resource));
                }
            }
        }
    }
}

#[cfg(test)]
mod cache_tests {
    use super::*;

    fn cache(ttl_secs: f64, size_limit: usize) -> ResultCache<Value> {
        let config = CacheConfig {
            enabled: true,
            ttl_secs,
            size_limit,
        };
        ResultCache::new(&config, Arc::new(QueryStatistics::new()))
    }

    #[test]
    fn test_entry_disappears_after_ttl() {
        let cache = cache(0.05, 10);
        cache.put("plan", json!({"results": [1, 2, 3]}));
        assert_eq!(cache.get("plan").unwrap(), json!({"results": [1, 2, 3]}));

        std::thread::sleep(Duration::from_millis(80));
        assert!(!cache.is_valid("plan"));
        assert!(cache.get("plan").is_err());
        assert!(cache.get("plan").is_err());
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_limit_plus_one_evicts_oldest() {
        let limit = 4;
        let cache = cache(60.0, limit);
        for i in 0..=limit {
            cache.put(&format!("k{}", i), json!(i));
        }
        assert_eq!(cache.len(), limit);
        assert!(cache.get("k0").is_err());
        for i in 1..=limit {
            assert_eq!(cache.get(&format!("k{}", i)).unwrap(), json!(i));
        }
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_key_ignores_edge_order() {
        let mut a = Query::with_vector(vec![0.2, 0.4, 0.6]);
        a.traversal.edge_types = edges(&["part_of", "instance_of"]);
        let mut b = a.clone();
        b.traversal.edge_types = edges(&["instance_of", "part_of"]);

        assert_eq!(
            cache_key(&a, GraphType::General),
            cache_key(&b, GraphType::General)
        );
        assert_ne!(
            cache_key(&a, GraphType::General),
            cache_key(&a, GraphType::Wikipedia)
        );
    }
}

#[cfg(test)]
mod rewriter_tests {
    use super::*;

    fn selectivity(pairs: &[(&str, f64)]) -> GraphInfo {
        GraphInfo {
            edge_selectivity: pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            ..GraphInfo::default()
        }
    }

    #[test]
    fn test_selective_edges_first() {
        let rewriter = QueryRewriter::new(RewriterConfig::default());
        let info = selectivity(&[("a", 0.1), ("b", 0.9)]);
        let mut query = Query::with_vector(vec![0.5, 0.5]);
        query.traversal.edge_types = edges(&["b", "a"]);

        let ctx = RewriteContext {
            graph_info: Some(&info),
            ..RewriteContext::default()
        };
        let rewritten = rewriter.rewrite(&query, &ctx);
        assert_eq!(rewritten.traversal.edge_types, edges(&["a", "b"]));
    }

    #[test]
    fn test_filters_pushed_into_vector_search() {
        let rewriter = QueryRewriter::new(RewriterConfig::default());
        let mut query = Query::with_vector(vec![0.5, 0.5]);
        query.filters = Some(QueryFilters {
            min_similarity: Some(0.8),
            entity_types: vec!["person".to_string()],
        });

        let outcome = rewriter.rewrite_traced(&query, &RewriteContext::default());
        assert!(outcome.query.filters.is_none());
        assert_eq!(outcome.query.vector_params.min_score, Some(0.8));
        assert_eq!(outcome.query.vector_params.entity_types, vec!["person"]);
        assert!(outcome.applied.contains(&"predicate_pushdown"));
    }

    const RELATIONS: [&str; 6] = ["instance_of", "part_of", "author", "genre", "a", "b"];

    fn arb_query() -> impl Strategy<Value = Query> {
        (
            proptest::sample::subsequence(RELATIONS.to_vec(), 0..=RELATIONS.len()),
            prop::option::of(1u32..7),
            prop::option::of(1usize..30),
            prop::option::of(0.0f32..1.0),
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(|(relations, depth, top_k, min_sim, top_level, wikipedia)| {
                let mut query = Query::with_vector(vec![0.1, 0.9]);
                let relations = edges(&relations);
                if top_level {
                    query.edge_types = Some(relations);
                    query.max_depth = depth;
                } else {
                    query.traversal.edge_types = relations;
                    query.traversal.max_depth = depth;
                }
                query.vector_params.top_k = top_k;
                query.filters = min_sim.map(|s| QueryFilters {
                    min_similarity: Some(s),
                    entity_types: vec![],
                });
                if wikipedia {
                    query.graph_type = Some(GraphType::Wikipedia);
                }
                query
            })
    }

    proptest! {
        #[test]
        fn prop_rewrite_is_idempotent(query in arb_query(), dense in any::<bool>()) {
            let rewriter = QueryRewriter::new(RewriterConfig::default());
            let mut info = selectivity(&[("author", 0.05), ("part_of", 0.4), ("a", 0.2)]);
            info.density = Some(if dense { 0.9 } else { 0.1 });
            let ctx = RewriteContext {
                graph_info: Some(&info),
                ..RewriteContext::default()
            };

            let once = rewriter.rewrite(&query, &ctx);
            let twice = rewriter.rewrite(&once, &ctx);
            prop_assert_eq!(once, twice);
        }
    }
}

#[cfg(test)]
mod importance_tests {
    use super::*;

    proptest! {
        #[test]
        fn prop_importance_within_unit_interval(
            inbound in 0usize..60,
            outbound in 0usize..60,
            relation_kinds in 1usize..25,
            properties in 0usize..40,
            entity_type in prop::option::of("[a-z]{3,10}"),
        ) {
            let connection = |i: usize| Connection {
                relation: format!("rel_{}", i % relation_kinds),
                target: format!("n{}", i),
            };
            let info = EntityInfo {
                entity_type,
                inbound_connections: (0..inbound).map(connection).collect(),
                outbound_connections: (0..outbound).map(connection).collect(),
                properties: (0..properties).map(|i| (format!("p{}", i), json!(i))).collect(),
            };
            let score = importance_score(&info);
            prop_assert!((0.0..=1.0).contains(&score));
        }
    }
}

#[cfg(test)]
mod breaker_tests {
    use super::*;

    fn breaker(base_ms: u64) -> LearningCircuitBreaker {
        LearningCircuitBreaker::new(BreakerConfig {
            failure_threshold: 3.0,
            backoff_base: Duration::from_millis(base_ms),
            backoff_cap: Duration::from_secs(60),
        })
    }

    #[test]
    fn test_three_critical_failures_open() {
        let mut breaker = breaker(60_000);
        for i in 0..3 {
            assert!(breaker.allows_attempt());
            breaker.record_failure(FailureSeverity::Critical, &format!("failure {}", i));
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allows_attempt());
        assert_eq!(breaker.last_failure(), Some("failure 2"));
    }

    #[test]
    fn test_non_critical_failures_weigh_less() {
        let mut breaker = breaker(60_000);
        for _ in 0..11 {
            breaker.record_failure(FailureSeverity::NonCritical, "slow");
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure(FailureSeverity::NonCritical, "slow");
        assert_eq!(breaker.state(), BreakerState::Open);
    }
}
