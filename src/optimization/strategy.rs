//! Graph type detection, traversal strategy selection and ranking weights

use crate::optimization::state::OptimizerState;
use crate::processor::RankingWeights;
use crate::query::{GraphType, Query, QueryPattern, TraversalStrategy};
use regex::Regex;
use std::sync::OnceLock;

/// Depth above which a traversal counts as deep
const DEEP_TRAVERSAL_DEPTH: u32 = 3;
/// Edge-type count above which a traversal counts as complex
const COMPLEX_EDGE_COUNT: usize = 5;

fn wikipedia_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\b(wikipedia|wikidata|dbpedia|infobox|instance_of|subclass_of)\b").ok()).as_ref()
}

fn ipld_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\b(ipld|ipfs|cid|dag-pb|dag-cbor|multihash)\b|\bbafy[a-z2-7]{8,}").ok()).as_ref()
}

fn question_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^\s*(is|are|was|were|does|do|did|can|has|have|had)\b").ok()).as_ref()
}

fn comparison_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\b(compare|comparison|versus|vs|difference|differ|similar|than)\b").ok()).as_ref()
}

fn matches(pattern: Option<&Regex>, text: &str) -> bool {
    pattern.map_or(false, |p| p.is_match(text))
}

/// Explicit override, else keyword sniffing of the serialized query, else general
pub fn detect_graph_type(query: &Query) -> GraphType {
    if let Some(graph_type) = query.graph_type {
        return graph_type;
    }
    let mut probe = query.clone();
    probe.query_vector = None;
    let Ok(serialized) = serde_json::to_string(&probe) else {
        return GraphType::General;
    };

    if matches(wikipedia_pattern(), &serialized) {
        GraphType::Wikipedia
    } else if matches(ipld_pattern(), &serialized) {
        GraphType::Ipld
    } else {
        GraphType::General
    }
}

/// Whether the query asks to verify a fact
pub fn is_fact_verification(query: &Query) -> bool {
    if query.has_source_target_pair() {
        return true;
    }
    query.query_text.as_deref().map_or(false, |text| {
        matches(question_pattern(), text) || matches(comparison_pattern(), text)
    })
}

/// Chosen strategy and why
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategySelection {
    pub strategy: TraversalStrategy,
    pub reason: &'static str,
}

impl StrategySelection {
    fn new(strategy: TraversalStrategy, reason: &'static str) -> Self {
        Self { strategy, reason }
    }
}

/// Pick the traversal strategy for a rewritten query
///
/// `learned` is a strategy preferred by a learned rule. Like the recorded
/// strategy history it only decides when no structural signal does.
pub fn select_strategy(
    query: &Query,
    state: &OptimizerState,
    min_samples: u64,
    learned: Option<TraversalStrategy>,
) -> StrategySelection {
    let requested = query.traversal.strategy;
    if let Some(strategy) = requested.filter(|s| !s.is_density_driven()) {
        return StrategySelection::new(strategy, "requested");
    }

    let entity_count = query.entity_ids.len();
    if is_fact_verification(query) {
        StrategySelection::new(TraversalStrategy::Bidirectional, "fact_verification")
    } else if entity_count >= 2 {
        StrategySelection::new(TraversalStrategy::EntityConnection, "multiple_entities")
    } else if query.has_taxonomic_edges() {
        StrategySelection::new(TraversalStrategy::Hierarchical, "taxonomic_relations")
    } else if query.max_depth() > DEEP_TRAVERSAL_DEPTH
        || query.edge_types().len() > COMPLEX_EDGE_COUNT
    {
        StrategySelection::new(TraversalStrategy::DagTraversal, "deep_or_complex")
    } else if entity_count == 1 && !query.traversal.entity_scores.is_empty() {
        StrategySelection::new(TraversalStrategy::EntityImportance, "scored_entity")
    } else if let Some(strategy) = requested {
        StrategySelection::new(strategy, "graph_density")
    } else if let Some(strategy) = learned {
        StrategySelection::new(strategy, "learned_rule")
    } else if let Some(strategy) = state.best_strategy(min_samples) {
        StrategySelection::new(strategy, "historical_performance")
    } else {
        StrategySelection::new(TraversalStrategy::Default, "default")
    }
}

/// Vector/graph weights for a graph type and query pattern, each in [0, 1]
pub fn ranking_weights(graph_type: GraphType, pattern: QueryPattern) -> RankingWeights {
    let (vector, graph) = match graph_type {
        GraphType::Wikipedia => (0.6, 0.4),
        GraphType::Ipld => (0.4, 0.6),
        GraphType::General => (0.7, 0.3),
    };
    let (dv, dg) = match pattern {
        QueryPattern::EntityLookup => (0.0, 0.2),
        QueryPattern::RelationCentric => (-0.1, 0.2),
        QueryPattern::FactVerification => (-0.2, 0.3),
        QueryPattern::ComplexQuestion => (0.1, 0.0),
        QueryPattern::General => (0.0, 0.0),
    };
    RankingWeights {
        vector: f64::clamp(vector + dv, 0.0, 1.0),
        graph: f64::clamp(graph + dg, 0.0, 1.0),
    }
}
