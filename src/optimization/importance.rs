//! Entity importance scoring
//!
//! Combines connection count, relation diversity, property richness and an
//! entity-type prior into a score in [0, 1]. Scores are cached for the
//! optimizer's lifetime; unknown entities and lookup failures score 0.0 and
//! are not cached.

use crate::optimization::state::OptimizerState;
use crate::processor::{EntityInfo, GraphProcessor};
use tracing::{debug, warn};

const CONNECTION_WEIGHT: f64 = 0.4;
const DIVERSITY_WEIGHT: f64 = 0.25;
const PROPERTY_WEIGHT: f64 = 0.15;
const TYPE_WEIGHT: f64 = 0.2;

const CONNECTION_CAP: f64 = 20.0;
const DIVERSITY_CAP: f64 = 10.0;
const PROPERTY_CAP: f64 = 15.0;

/// Prior importance of an entity type
pub fn type_prior(entity_type: Option<&str>) -> f64 {
    match entity_type.map(str::to_ascii_lowercase).as_deref() {
        Some("concept" | "topic" | "category") => 0.9,
        Some("person" | "org" | "organization" | "location") => 0.8,
        Some("event" | "work") => 0.7,
        _ => 0.5,
    }
}

/// Importance of an entity from its graph neighbourhood
pub fn importance_score(info: &EntityInfo) -> f64 {
    let connections = (info.connection_count() as f64 / CONNECTION_CAP).min(1.0);
    let diversity = (info.relation_diversity() as f64 / DIVERSITY_CAP).min(1.0);
    let properties = (info.properties.len() as f64 / PROPERTY_CAP).min(1.0);
    let prior = type_prior(info.entity_type.as_deref());

    let score = connections * CONNECTION_WEIGHT
        + diversity * DIVERSITY_WEIGHT
        + properties * PROPERTY_WEIGHT
        + prior * TYPE_WEIGHT;
    score.clamp(0.0, 1.0)
}

/// Cached importance lookup, fetching entity details on a miss
pub async fn entity_importance(
    state: &OptimizerState,
    processor: &dyn GraphProcessor,
    entity_id: &str,
) -> f64 {
    if let Some(cached) = state.entity_importance.get(entity_id) {
        return *cached;
    }

    match processor.get_entity_info(entity_id).await {
        Ok(Some(info)) => {
            let score = importance_score(&info);
            state.entity_importance.insert(entity_id.to_string(), score);
            state
                .traversal
                .write()
                .record_connectivity(entity_id, info.connection_count());
            debug!(entity_id = %entity_id, score, "Computed entity importance");
            score
        }
        Ok(None) => 0.0,
        Err(e) => {
            warn!(entity_id = %entity_id, error = %e, "Entity lookup failed, importance set to 0");
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{Connection, InMemoryGraphProcessor};
    use proptest::prelude::*;
    use serde_json::json;

    fn info(connections: usize, relations: usize, properties: usize, entity_type: &str) -> EntityInfo {
        EntityInfo {
            entity_type: Some(entity_type.to_string()),
            outbound_connections: (0..connections)
                .map(|i| Connection {
                    relation: format!("rel_{}", i % relations.max(1)),
                    target: format!("t{}", i),
                })
                .collect(),
            inbound_connections: Vec::new(),
            properties: (0..properties).map(|i| (format!("p{}", i), json!(i))).collect(),
        }
    }

    #[test]
    fn test_type_priors() {
        assert_eq!(type_prior(Some("Concept")), 0.9);
        assert_eq!(type_prior(Some("person")), 0.8);
        assert_eq!(type_prior(Some("ORG")), 0.8);
        assert_eq!(type_prior(Some("organization")), 0.8);
        assert_eq!(type_prior(Some("location")), 0.8);
        assert_eq!(type_prior(Some("work")), 0.7);
        assert_eq!(type_prior(Some("gene")), 0.5);
        assert_eq!(type_prior(None), 0.5);
    }

    #[test]
    fn test_saturated_entity_scores_one() {
        let score = importance_score(&info(40, 12, 30, "concept"));
        assert!((score - (0.4 + 0.25 + 0.15 + 0.18)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cached_and_unknown() {
        let mut graph = InMemoryGraphProcessor::new();
        graph.add_entity("hub", Some("person"), None);
        graph.add_relation("hub", "knows", "a");
        let state = OptimizerState::new();

        let score = entity_importance(&state, &graph, "hub").await;
        assert!(score > 0.0);
        assert!(state.entity_importance.contains_key("hub"));
        assert_eq!(state.traversal.read().entity_connectivity["hub"], 1.0);

        assert_eq!(entity_importance(&state, &graph, "missing").await, 0.0);
        assert!(!state.entity_importance.contains_key("missing"));
    }

    proptest! {
        #[test]
        fn prop_importance_in_unit_interval(
            connections in 0usize..200,
            relations in 0usize..50,
            properties in 0usize..100,
            entity_type in "[a-z]{0,12}",
        ) {
            let score = importance_score(&info(connections, relations, properties, &entity_type));
            prop_assert!((0.0..=1.0).contains(&score));
        }
    }
}
