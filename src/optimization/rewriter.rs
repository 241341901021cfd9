//! Rule-based query rewriting
//!
//! A fixed pipeline of rewrite stages. Every stage works on its own copy of
//! the query and is idempotent, and edge reordering is a composition of stable
//! sorts, so rewriting an already rewritten query changes nothing.

use crate::config::RewriterConfig;
use crate::optimization::state::TraversalStats;
use crate::processor::GraphInfo;
use crate::query::{GraphType, Query, QueryPattern, TraversalStrategy, TAXONOMIC_RELATIONS};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::trace;

/// Wikipedia relations in traversal priority order
pub const WIKIPEDIA_RELATION_PRIORITY: [&str; 10] = [
    "instance_of",
    "subclass_of",
    "part_of",
    "has_part",
    "located_in",
    "country",
    "occupation",
    "author",
    "genre",
    "related_to",
];

/// Boost applied to taxonomic edges on Wikipedia graphs
const HIERARCHICAL_WEIGHT: f64 = 1.5;
/// Relations with no usefulness history rank in the middle
const UNKNOWN_USEFULNESS: f64 = 0.5;
/// Selectivity assumed for relations the graph does not report
const UNKNOWN_SELECTIVITY: f64 = 1.0;
/// Mean connectivity above which traversal becomes shallower and wider
const DENSE_CONNECTIVITY: f64 = 10.0;
/// Mean connectivity below which traversal goes deeper
const SPARSE_CONNECTIVITY: f64 = 2.0;
/// Breadth used for densely connected neighbourhoods
const DENSE_BREADTH: usize = 10;

/// Extra inputs available to the rewriter
#[derive(Debug, Clone, Copy, Default)]
pub struct RewriteContext<'a> {
    pub graph_type: Option<GraphType>,
    pub graph_info: Option<&'a GraphInfo>,
    pub entity_scores: Option<&'a BTreeMap<String, f64>>,
    pub traversal_stats: Option<&'a TraversalStats>,
}

/// Rewritten query plus the stages that changed it
#[derive(Debug, Clone, PartialEq)]
pub struct RewriteOutcome {
    pub query: Query,
    pub pattern: QueryPattern,
    pub applied: Vec<&'static str>,
}

pub struct QueryRewriter {
    config: RewriterConfig,
}

impl QueryRewriter {
    pub fn new(config: RewriterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RewriterConfig {
        &self.config
    }

    pub fn rewrite(&self, query: &Query, ctx: &RewriteContext<'_>) -> Query {
        self.rewrite_traced(query, ctx).query
    }

    /// Run every stage, recording which ones changed the query
    pub fn rewrite_traced(&self, query: &Query, ctx: &RewriteContext<'_>) -> RewriteOutcome {
        let pattern = query.classify(self.config.complex_question_words);
        let graph_type = ctx.graph_type.or(query.graph_type).unwrap_or_default();
        let mut applied = Vec::new();
        let mut current = query.clone();

        let next = normalize_locations(&current);
        record_stage(&mut current, &mut applied, "normalize_locations", next);
        let next = predicate_pushdown(&current);
        record_stage(&mut current, &mut applied, "predicate_pushdown", next);
        let next = order_by_selectivity(&current, ctx.graph_info);
        record_stage(&mut current, &mut applied, "edge_selectivity_order", next);
        let next = self.density_strategy(&current, ctx.graph_info);
        record_stage(&mut current, &mut applied, "density_strategy", next);
        let next = self.pattern_rules(&current, pattern);
        record_stage(&mut current, &mut applied, "pattern_rules", next);
        let next = wikipedia_rules(&current, graph_type);
        record_stage(&mut current, &mut applied, "wikipedia_rules", next);
        let next = self.adaptive_rules(&current, ctx);
        record_stage(&mut current, &mut applied, "adaptive_rules", next);

        RewriteOutcome {
            query: current,
            pattern,
            applied,
        }
    }

    fn density_strategy(&self, query: &Query, graph_info: Option<&GraphInfo>) -> Query {
        let mut q = query.clone();
        if q.traversal.strategy.is_some() {
            return q;
        }
        let density = graph_info.and_then(|g| g.density).unwrap_or(0.0);
        if density > self.config.dense_graph_threshold {
            q.traversal.strategy = Some(TraversalStrategy::Sampling);
            q.traversal.sample_ratio.get_or_insert(self.config.sample_ratio);
        } else if q.max_depth() > self.config.deep_traversal_depth {
            q.traversal.strategy = Some(TraversalStrategy::BreadthLimited);
            q.traversal
                .max_nodes_per_level
                .get_or_insert(self.config.breadth_limit);
        }
        q
    }

    fn pattern_rules(&self, query: &Query, pattern: QueryPattern) -> Query {
        let mut q = query.clone();
        match pattern {
            QueryPattern::EntityLookup => {
                q.traversal.max_depth = Some(q.max_depth().min(1));
                q.vector_params.top_k = Some(q.top_k().min(5));
            }
            QueryPattern::RelationCentric => {
                q.traversal.max_depth = Some(q.max_depth().max(2));
                q.traversal
                    .options
                    .insert("relation_focus".to_string(), Value::Bool(true));
            }
            QueryPattern::FactVerification => {
                if q.traversal.strategy.is_none() {
                    q.traversal.strategy = Some(TraversalStrategy::Bidirectional);
                }
            }
            QueryPattern::ComplexQuestion => {
                q.vector_params.top_k = Some(q.top_k().max(10));
                q.traversal.max_depth = Some(q.max_depth().max(2));
            }
            QueryPattern::General => {}
        }
        q
    }

    fn adaptive_rules(&self, query: &Query, ctx: &RewriteContext<'_>) -> Query {
        let mut q = query.clone();

        if let Some(scores) = ctx.entity_scores {
            for (id, score) in scores {
                if score.is_finite() {
                    q.traversal.entity_scores.insert(id.clone(), *score);
                }
            }
        }
        apply_importance_pruning(&mut q, self.config.importance_threshold_factor);

        let Some(stats) = ctx.traversal_stats else {
            return q;
        };

        if !q.traversal.edge_types.is_empty() && !stats.relation_usefulness.is_empty() {
            let usefulness =
                |r: &String| stats.relation_usefulness(r).unwrap_or(UNKNOWN_USEFULNESS);
            q.traversal
                .edge_types
                .sort_by(|a, b| usefulness(b).total_cmp(&usefulness(a)));
        }

        let hints = stats.top_paths(self.config.max_path_hints);
        if !hints.is_empty() {
            q.traversal.path_hints = hints;
        }

        match stats.mean_connectivity() {
            Some(mean) if mean > DENSE_CONNECTIVITY => {
                q.traversal.max_depth = Some(q.max_depth().min(2));
                let breadth = q.traversal.max_nodes_per_level.unwrap_or(0).max(DENSE_BREADTH);
                q.traversal.max_nodes_per_level = Some(breadth);
            }
            Some(mean) if mean < SPARSE_CONNECTIVITY => {
                q.traversal.max_depth = Some(q.max_depth().max(2));
            }
            _ => {}
        }
        q
    }
}

fn record_stage(current: &mut Query, applied: &mut Vec<&'static str>, name: &'static str, next: Query) {
    if next != *current {
        trace!(stage = name, "Rewrite stage applied");
        applied.push(name);
        *current = next;
    }
}

/// Fold alternate top-level parameters into their canonical location
fn normalize_locations(query: &Query) -> Query {
    let mut q = query.clone();
    if let Some(edge_types) = q.edge_types.take() {
        if q.traversal.edge_types.is_empty() {
            q.traversal.edge_types = edge_types;
        }
    }
    if let Some(depth) = q.max_depth.take() {
        q.traversal.max_depth.get_or_insert(depth);
    }
    if let Some(similarity) = q.min_similarity.take() {
        q.vector_params.min_score.get_or_insert(similarity);
    }
    q
}

/// Move filter predicates into the vector search and drop the filter block
fn predicate_pushdown(query: &Query) -> Query {
    let mut q = query.clone();
    let Some(filters) = q.filters.take() else {
        return q;
    };
    if let Some(threshold) = filters.min_similarity {
        let current = q.vector_params.min_score.unwrap_or(threshold);
        q.vector_params.min_score = Some(current.max(threshold));
    }
    if !filters.entity_types.is_empty() {
        q.vector_params.entity_types.extend(filters.entity_types);
        q.vector_params.entity_types.sort();
        q.vector_params.entity_types.dedup();
    }
    q
}

/// Most selective relations first
fn order_by_selectivity(query: &Query, graph_info: Option<&GraphInfo>) -> Query {
    let mut q = query.clone();
    let Some(info) = graph_info else {
        return q;
    };
    let selectivity = |r: &String| {
        info.edge_selectivity
            .get(r)
            .copied()
            .filter(|s| s.is_finite())
            .unwrap_or(UNKNOWN_SELECTIVITY)
    };
    q.traversal
        .edge_types
        .sort_by(|a, b| selectivity(a).total_cmp(&selectivity(b)));
    q
}

fn wikipedia_rules(query: &Query, graph_type: GraphType) -> Query {
    let mut q = query.clone();
    if graph_type != GraphType::Wikipedia {
        return q;
    }
    let priority = |r: &String| {
        WIKIPEDIA_RELATION_PRIORITY
            .iter()
            .position(|p| p == r)
            .unwrap_or(WIKIPEDIA_RELATION_PRIORITY.len())
    };
    q.traversal.edge_types.sort_by_key(priority);
    if q.has_taxonomic_edges() {
        q.traversal.hierarchical_weight = Some(HIERARCHICAL_WEIGHT);
    }
    q
}

/// Prune entities scoring below `factor` times the mean entity score
pub fn apply_importance_pruning(query: &mut Query, factor: f64) {
    let scores = &query.traversal.entity_scores;
    if scores.is_empty() {
        return;
    }
    let mean = scores.values().sum::<f64>() / scores.len() as f64;
    if mean.is_finite() {
        query.traversal.importance_threshold = Some(factor * mean);
    }
}
