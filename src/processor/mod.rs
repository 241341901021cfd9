//! External graph/vector backend interface
//!
//! The optimizer never stores graphs itself. Vector search, graph expansion,
//! ranking and entity lookups go through a [`GraphProcessor`]; the strategy
//! chosen for a plan picks which expansion call is made via [`Expander`].

pub mod memory;

use crate::errors::ProcessorResult;
use crate::query::{Query, TraversalStrategy};
use crate::sanitize::{ArraySummary, Sanitize, MAX_SEQUENCE_LEN};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

pub use memory::InMemoryGraphProcessor;

/// A single retrieved node with its provenance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoredResult {
    pub id: String,
    /// Combined relevance score
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_score: Option<f64>,
    /// Hops from the nearest seed (0 for vector matches)
    pub depth: u32,
    /// Edges walked from the seed to this node
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<PathStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    pub metadata: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Embedding>,
}

/// One traversed edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathStep {
    pub from: String,
    pub relation: String,
    pub to: String,
}

/// Dense embedding attached to a result, or its summary once sanitized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Embedding {
    Dense(Vec<f32>),
    Summary(ArraySummary),
}

impl Sanitize for ScoredResult {
    fn sanitize(mut self) -> Self {
        self.metadata = self.metadata.sanitize();
        self.embedding = self.embedding.map(|embedding| match embedding {
            Embedding::Dense(values) if values.len() > MAX_SEQUENCE_LEN => {
                Embedding::Summary(ArraySummary::from_f32(&values))
            }
            other => other,
        });
        self
    }
}

impl ScoredResult {
    pub fn new(id: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            score,
            ..Self::default()
        }
    }

    /// Relations along this result's path, in walk order
    pub fn relations(&self) -> impl Iterator<Item = &str> {
        self.path.iter().map(|step| step.relation.as_str())
    }

    /// Entity ids touched by this result, itself included
    pub fn entities(&self) -> Vec<String> {
        let mut entities: Vec<String> = self
            .path
            .iter()
            .flat_map(|step| [step.from.clone(), step.to.clone()])
            .collect();
        entities.push(self.id.clone());
        entities.sort();
        entities.dedup();
        entities
    }

    /// Relation sequence key used for path statistics, e.g. `instance_of>part_of`
    pub fn path_key(&self) -> Option<String> {
        if self.path.is_empty() {
            None
        } else {
            Some(self.relations().collect::<Vec<_>>().join(">"))
        }
    }
}

/// Connection to or from an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub relation: String,
    pub target: String,
}

/// Entity details used for importance scoring
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityInfo {
    pub entity_type: Option<String>,
    pub inbound_connections: Vec<Connection>,
    pub outbound_connections: Vec<Connection>,
    pub properties: BTreeMap<String, Value>,
}

impl EntityInfo {
    pub fn connection_count(&self) -> usize {
        self.inbound_connections.len() + self.outbound_connections.len()
    }

    /// Number of distinct relation types over all connections
    pub fn relation_diversity(&self) -> usize {
        let mut relations: Vec<&str> = self
            .inbound_connections
            .iter()
            .chain(self.outbound_connections.iter())
            .map(|c| c.relation.as_str())
            .collect();
        relations.sort_unstable();
        relations.dedup();
        relations.len()
    }
}

/// Structural statistics the backend may expose to the rewriter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphInfo {
    /// Edge density in [0, 1]
    pub density: Option<f64>,
    /// Fraction of edges carrying each relation; lower is more selective
    pub edge_selectivity: HashMap<String, f64>,
    pub node_count: usize,
    pub edge_count: usize,
}

/// Vector/graph score mix used for ranking
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankingWeights {
    pub vector: f64,
    pub graph: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            vector: 0.7,
            graph: 0.3,
        }
    }
}

/// Parameters for a vector similarity search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSearchRequest {
    pub vector: Vec<f32>,
    pub top_k: usize,
    pub min_score: f32,
    pub field_weights: BTreeMap<String, f32>,
    pub content_types: Vec<String>,
    pub entity_types: Vec<String>,
}

impl VectorSearchRequest {
    pub fn from_query(query: &Query, vector: Vec<f32>) -> Self {
        Self {
            vector,
            top_k: query.top_k(),
            min_score: query.min_similarity(),
            field_weights: query.vector_params.field_weights.clone(),
            content_types: query.vector_params.content_types.clone(),
            entity_types: query.vector_params.entity_types.clone(),
        }
    }
}

/// Parameters for a graph expansion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionParams {
    pub max_depth: u32,
    /// Relations to follow, in priority order; empty means all
    pub edge_types: Vec<String>,
    pub strategy: TraversalStrategy,
    /// Hard cap on nodes visited (from the plan's budget)
    pub max_nodes: usize,
    /// Hard cap on edges examined (from the plan's budget)
    pub max_edges: usize,
    pub sample_ratio: Option<f64>,
    pub max_nodes_per_level: Option<usize>,
    pub importance_threshold: Option<f64>,
    pub entity_scores: BTreeMap<String, f64>,
    pub hierarchical_weight: Option<f64>,
    pub path_hints: Vec<String>,
    pub source_entity: Option<String>,
    pub target_entity: Option<String>,
    pub entity_ids: Vec<String>,
    pub options: BTreeMap<String, Value>,
}

impl ExpansionParams {
    pub fn from_query(query: &Query, max_nodes: usize, max_edges: usize) -> Self {
        let traversal = &query.traversal;
        Self {
            max_depth: query.max_depth(),
            edge_types: query.edge_types().to_vec(),
            strategy: traversal.strategy.unwrap_or_default(),
            max_nodes,
            max_edges,
            sample_ratio: traversal.sample_ratio,
            max_nodes_per_level: traversal.max_nodes_per_level,
            importance_threshold: traversal.importance_threshold,
            entity_scores: traversal.entity_scores.clone(),
            hierarchical_weight: traversal.hierarchical_weight,
            path_hints: traversal.path_hints.clone(),
            source_entity: query.source_entity.clone(),
            target_entity: query.target_entity.clone(),
            entity_ids: query.entity_ids.iter().cloned().collect(),
            options: traversal.options.clone(),
        }
    }
}

/// Backend executing searches and traversals on behalf of the optimizer
#[async_trait]
pub trait GraphProcessor: Send + Sync {
    /// Nearest neighbours of a query vector
    async fn search_by_vector(
        &self,
        request: &VectorSearchRequest,
    ) -> ProcessorResult<Vec<ScoredResult>>;

    /// Expand seed results along graph edges
    async fn expand_by_graph(
        &self,
        seeds: &[ScoredResult],
        params: &ExpansionParams,
    ) -> ProcessorResult<Vec<ScoredResult>>;

    async fn expand_by_graph_with_importance(
        &self,
        seeds: &[ScoredResult],
        params: &ExpansionParams,
    ) -> ProcessorResult<Vec<ScoredResult>> {
        self.expand_by_graph(seeds, params).await
    }

    async fn expand_by_bidirectional_search(
        &self,
        seeds: &[ScoredResult],
        params: &ExpansionParams,
    ) -> ProcessorResult<Vec<ScoredResult>> {
        self.expand_by_graph(seeds, params).await
    }

    async fn expand_by_dag_traversal(
        &self,
        seeds: &[ScoredResult],
        params: &ExpansionParams,
    ) -> ProcessorResult<Vec<ScoredResult>> {
        self.expand_by_graph(seeds, params).await
    }

    /// Order results by the weighted vector/graph score
    async fn rank_results(
        &self,
        results: Vec<ScoredResult>,
        weights: RankingWeights,
    ) -> ProcessorResult<Vec<ScoredResult>>;

    async fn get_entity_info(&self, entity_id: &str) -> ProcessorResult<Option<EntityInfo>>;

    /// Answer a query that carries no vector
    async fn direct_graph_query(
        &self,
        query: &Query,
        params: &ExpansionParams,
    ) -> ProcessorResult<Vec<ScoredResult>>;

    /// Structural statistics, when the backend can provide them
    async fn graph_info(&self) -> Option<GraphInfo> {
        None
    }
}

/// Dispatch from a traversal strategy to the matching processor call
#[async_trait]
pub trait Expander {
    async fn expand(
        &self,
        processor: &dyn GraphProcessor,
        seeds: &[ScoredResult],
        params: &ExpansionParams,
    ) -> ProcessorResult<Vec<ScoredResult>>;
}

#[async_trait]
impl Expander for TraversalStrategy {
    async fn expand(
        &self,
        processor: &dyn GraphProcessor,
        seeds: &[ScoredResult],
        params: &ExpansionParams,
    ) -> ProcessorResult<Vec<ScoredResult>> {
        match self {
            TraversalStrategy::EntityImportance => {
                processor.expand_by_graph_with_importance(seeds, params).await
            }
            TraversalStrategy::Bidirectional | TraversalStrategy::EntityConnection => {
                processor.expand_by_bidirectional_search(seeds, params).await
            }
            TraversalStrategy::DagTraversal | TraversalStrategy::Hierarchical => {
                processor.expand_by_dag_traversal(seeds, params).await
            }
            TraversalStrategy::Default
            | TraversalStrategy::Sampling
            | TraversalStrategy::BreadthLimited => processor.expand_by_graph(seeds, params).await,
        }
    }
}

/// Weighted score for one result; missing component scores fall back to `score`
pub fn weighted_score(result: &ScoredResult, weights: RankingWeights) -> f64 {
    let vector = result.vector_score.unwrap_or(result.score);
    let graph = result.graph_score.unwrap_or(result.score);
    weights.vector * vector + weights.graph * graph
}

/// Rank without the backend, used when the ranking call times out
pub fn rank_locally(mut results: Vec<ScoredResult>, weights: RankingWeights) -> Vec<ScoredResult> {
    for result in results.iter_mut() {
        result.score = weighted_score(result, weights);
    }
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_large_embedding() {
        let mut result = ScoredResult::new("doc-1", 0.9);
        result.embedding = Some(Embedding::Dense(vec![1.0; MAX_SEQUENCE_LEN + 1]));

        let sanitized = result.sanitize();
        match sanitized.embedding {
            Some(Embedding::Summary(summary)) => {
                assert_eq!(summary.shape, vec![MAX_SEQUENCE_LEN + 1]);
                assert_eq!(summary.mean, Some(1.0));
            }
            other => panic!("expected summary, got {:?}", other),
        }
    }

    #[test]
    fn test_path_helpers() {
        let mut result = ScoredResult::new("c", 0.5);
        result.path = vec![
            PathStep {
                from: "a".into(),
                relation: "instance_of".into(),
                to: "b".into(),
            },
            PathStep {
                from: "b".into(),
                relation: "part_of".into(),
                to: "c".into(),
            },
        ];

        assert_eq!(result.path_key().as_deref(), Some("instance_of>part_of"));
        assert_eq!(result.entities(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_rank_locally() {
        let mut a = ScoredResult::new("a", 0.2);
        a.vector_score = Some(0.9);
        a.graph_score = Some(0.1);
        let mut b = ScoredResult::new("b", 0.2);
        b.vector_score = Some(0.2);
        b.graph_score = Some(0.9);

        let ranked = rank_locally(vec![b, a], RankingWeights::default());
        assert_eq!(ranked[0].id, "a");

        let ranked = rank_locally(ranked, RankingWeights { vector: 0.1, graph: 0.9 });
        assert_eq!(ranked[0].id, "b");
    }

    #[test]
    fn test_relation_diversity() {
        let info = EntityInfo {
            outbound_connections: vec![
                Connection { relation: "part_of".into(), target: "x".into() },
                Connection { relation: "part_of".into(), target: "y".into() },
            ],
            inbound_connections: vec![Connection { relation: "cites".into(), target: "z".into() }],
            ..EntityInfo::default()
        };
        assert_eq!(info.connection_count(), 3);
        assert_eq!(info.relation_diversity(), 2);
    }
}
