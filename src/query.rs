//! Retrieval request model
//!
//! A [`Query`] carries vector-similarity parameters and graph-traversal
//! parameters. Most fields are optional; the rewriter normalizes alternate
//! top-level locations (`edge_types`, `max_depth`, `min_similarity`, `filters`)
//! into their canonical place under `vector_params` / `traversal`.

use crate::errors::{OptimizerError, OptimizerResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Default number of vector matches when a query does not say
pub const DEFAULT_TOP_K: usize = 5;
/// Default traversal depth when a query does not say
pub const DEFAULT_MAX_DEPTH: u32 = 2;
/// Default minimum similarity when a query does not say
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.5;

/// Relations that form taxonomies
pub const TAXONOMIC_RELATIONS: [&str; 5] = [
    "instance_of",
    "subclass_of",
    "part_of",
    "broader",
    "parent_of",
];

/// Retrieval request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Query {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_vector: Option<Vec<f32>>,
    pub vector_params: VectorParams,
    pub traversal: TraversalParams,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub entity_ids: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_type: Option<GraphType>,
    /// Source entity for fact-verification queries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_entity: Option<String>,
    /// Target entity for fact-verification queries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_entity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_name: Option<String>,

    // Alternate locations, folded into the canonical ones by the rewriter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_similarity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<QueryFilters>,

    /// Forward-compatible options not modelled above
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, Value>,
}

/// Vector similarity parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f32>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub field_weights: BTreeMap<String, f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub content_types: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entity_types: Vec<String>,
}

/// Graph traversal parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub edge_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<TraversalStrategy>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub entity_scores: BTreeMap<String, f64>,
    /// Fraction of edges followed by the sampling strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_nodes_per_level: Option<usize>,
    /// Entities scoring below this are pruned during expansion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub importance_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hierarchical_weight: Option<f64>,
    /// High-scoring relation paths from earlier executions
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub path_hints: Vec<String>,
    /// Strategy-specific options
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, Value>,
}

/// Filter block accepted at the top level, pushed down by the rewriter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_similarity: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entity_types: Vec<String>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        self.min_similarity.is_none() && self.entity_types.is_empty()
    }
}

/// Kind of knowledge graph a query targets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphType {
    Wikipedia,
    Ipld,
    #[default]
    General,
}

impl GraphType {
    pub const ALL: [GraphType; 3] = [GraphType::Wikipedia, GraphType::Ipld, GraphType::General];

    pub fn as_str(self) -> &'static str {
        match self {
            GraphType::Wikipedia => "wikipedia",
            GraphType::Ipld => "ipld",
            GraphType::General => "general",
        }
    }
}

impl fmt::Display for GraphType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-assigned priority, scales every budget
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn multiplier(self) -> f64 {
        match self {
            Priority::Low => 0.5,
            Priority::Normal => 1.0,
            Priority::High => 2.0,
            Priority::Critical => 5.0,
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

/// Graph expansion algorithm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraversalStrategy {
    #[default]
    Default,
    /// Follow a deterministic sample of edges (dense graphs)
    Sampling,
    /// Cap the number of nodes kept per level (deep traversals)
    BreadthLimited,
    EntityImportance,
    Bidirectional,
    DagTraversal,
    Hierarchical,
    EntityConnection,
}

impl TraversalStrategy {
    pub const ALL: [TraversalStrategy; 8] = [
        TraversalStrategy::Default,
        TraversalStrategy::Sampling,
        TraversalStrategy::BreadthLimited,
        TraversalStrategy::EntityImportance,
        TraversalStrategy::Bidirectional,
        TraversalStrategy::DagTraversal,
        TraversalStrategy::Hierarchical,
        TraversalStrategy::EntityConnection,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TraversalStrategy::Default => "default",
            TraversalStrategy::Sampling => "sampling",
            TraversalStrategy::BreadthLimited => "breadth_limited",
            TraversalStrategy::EntityImportance => "entity_importance",
            TraversalStrategy::Bidirectional => "bidirectional",
            TraversalStrategy::DagTraversal => "dag_traversal",
            TraversalStrategy::Hierarchical => "hierarchical",
            TraversalStrategy::EntityConnection => "entity_connection",
        }
    }

    /// Strategies the rewriter assigns from graph density alone
    pub fn is_density_driven(self) -> bool {
        matches!(self, TraversalStrategy::Sampling | TraversalStrategy::BreadthLimited)
    }
}

impl fmt::Display for TraversalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural query pattern used to pick rewrite rules
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryPattern {
    EntityLookup,
    RelationCentric,
    FactVerification,
    ComplexQuestion,
    #[default]
    General,
}

impl QueryPattern {
    pub const ALL: [QueryPattern; 5] = [
        QueryPattern::EntityLookup,
        QueryPattern::RelationCentric,
        QueryPattern::FactVerification,
        QueryPattern::ComplexQuestion,
        QueryPattern::General,
    ];
}

impl QueryPattern {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryPattern::EntityLookup => "entity_lookup",
            QueryPattern::RelationCentric => "relation_centric",
            QueryPattern::FactVerification => "fact_verification",
            QueryPattern::ComplexQuestion => "complex_question",
            QueryPattern::General => "general",
        }
    }
}

impl fmt::Display for QueryPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Query {
    pub fn with_vector(vector: Vec<f32>) -> Self {
        Self {
            query_vector: Some(vector),
            ..Self::default()
        }
    }

    pub fn top_k(&self) -> usize {
        self.vector_params.top_k.unwrap_or(DEFAULT_TOP_K)
    }

    pub fn max_depth(&self) -> u32 {
        self.traversal
            .max_depth
            .or(self.max_depth)
            .unwrap_or(DEFAULT_MAX_DEPTH)
    }

    pub fn min_similarity(&self) -> f32 {
        self.vector_params
            .min_score
            .or(self.min_similarity)
            .unwrap_or(DEFAULT_MIN_SIMILARITY)
    }

    /// Edge types from whichever location the caller used
    pub fn edge_types(&self) -> &[String] {
        if self.traversal.edge_types.is_empty() {
            self.edge_types.as_deref().unwrap_or(&[])
        } else {
            &self.traversal.edge_types
        }
    }

    pub fn has_taxonomic_edges(&self) -> bool {
        self.edge_types()
            .iter()
            .any(|e| TAXONOMIC_RELATIONS.contains(&e.as_str()))
    }

    pub fn has_source_target_pair(&self) -> bool {
        self.source_entity.is_some() && self.target_entity.is_some()
    }

    /// Number of whitespace-separated words in the free text
    pub fn text_word_count(&self) -> usize {
        self.query_text
            .as_deref()
            .map(|t| t.split_whitespace().count())
            .unwrap_or(0)
    }

    /// Classify the query's structural pattern
    pub fn classify(&self, complex_question_words: usize) -> QueryPattern {
        if self.has_source_target_pair() {
            QueryPattern::FactVerification
        } else if !self.entity_ids.is_empty() || self.entity_name.is_some() {
            QueryPattern::EntityLookup
        } else if self.edge_types().len() == 1 {
            QueryPattern::RelationCentric
        } else if self.text_word_count() >= complex_question_words {
            QueryPattern::ComplexQuestion
        } else {
            QueryPattern::General
        }
    }

    /// Shape of the query with concrete values stripped, for pattern statistics
    pub fn pattern_signature(&self) -> Value {
        serde_json::json!({
            "has_vector": self.query_vector.is_some(),
            "top_k": self.top_k(),
            "max_depth": self.max_depth(),
            "edge_types": self.edge_types(),
            "entity_count": self.entity_ids.len(),
            "has_text": self.query_text.is_some(),
            "graph_type": self.graph_type.map(|g| g.as_str()),
        })
    }

    /// Reject values that make a plan meaningless
    pub fn validate(&self) -> OptimizerResult<()> {
        if let Some(vector) = &self.query_vector {
            if vector.is_empty() {
                return Err(invalid("query_vector", "must not be empty"));
            }
        }
        if let Some(top_k) = self.vector_params.top_k {
            if top_k == 0 {
                return Err(invalid("vector_params.top_k", "must be at least 1"));
            }
        }
        for (field, value) in [
            ("vector_params.min_score", self.vector_params.min_score),
            ("min_similarity", self.min_similarity),
        ] {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(invalid(field, "must be a finite number"));
                }
            }
        }
        if let Some(ratio) = self.traversal.sample_ratio {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(invalid("traversal.sample_ratio", "must be in (0, 1]"));
            }
        }
        if self.traversal.entity_scores.values().any(|s| !s.is_finite()) {
            return Err(invalid("traversal.entity_scores", "scores must be finite"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> OptimizerError {
    OptimizerError::InvalidQuery {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
