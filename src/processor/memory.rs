//! Reference [`GraphProcessor`] over an in-memory `petgraph` graph
//!
//! Used by the CLI, the benchmarks and the tests. Graphs are built with
//! [`InMemoryGraphProcessor::add_entity`] / [`InMemoryGraphProcessor::add_relation`]
//! or loaded from a JSON [`GraphFixture`].

use super::{
    rank_locally, Connection, EntityInfo, ExpansionParams, Expander, GraphInfo, GraphProcessor,
    PathStep, RankingWeights, ScoredResult, VectorSearchRequest,
};
use crate::errors::{OptimizerError, OptimizerResult, ProcessorError, ProcessorResult};
use crate::query::{Query, TAXONOMIC_RELATIONS};
use async_trait::async_trait;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Score decay applied per hop away from a seed
const HOP_DECAY: f64 = 0.8;

/// Node payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityNode {
    pub id: String,
    pub entity_type: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub properties: BTreeMap<String, Value>,
}

/// Edge payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationEdge {
    pub relation: String,
    #[serde(default = "default_edge_weight")]
    pub weight: f64,
}

fn default_edge_weight() -> f64 {
    1.0
}

/// JSON edge record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeFixture {
    pub from: String,
    pub to: String,
    pub relation: String,
    #[serde(default = "default_edge_weight")]
    pub weight: f64,
}

/// JSON document describing a whole graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphFixture {
    pub nodes: Vec<EntityNode>,
    pub edges: Vec<EdgeFixture>,
}

/// How a breadth-first expansion orders and scores its frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExpansionMode {
    Plain,
    Importance,
}

/// In-memory graph processor
#[derive(Debug, Default)]
pub struct InMemoryGraphProcessor {
    graph: DiGraph<EntityNode, RelationEdge>,
    index: HashMap<String, NodeIndex>,
    /// Artificial delay added to every call
    latency: Option<Duration>,
}

impl InMemoryGraphProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: GraphFixture) -> Self {
        let mut processor = Self::new();
        for node in fixture.nodes {
            processor.insert_node(node);
        }
        for edge in fixture.edges {
            processor.add_weighted_relation(&edge.from, &edge.relation, &edge.to, edge.weight);
        }
        processor
    }

    pub fn load_fixture(path: &Path) -> OptimizerResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| OptimizerError::Io {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        let fixture: GraphFixture = serde_json::from_str(&content).map_err(|e| {
            crate::errors::SerializationError::DeserializationFailed {
                expected_type: "GraphFixture".to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self::from_fixture(fixture))
    }

    /// Delay every call by `latency`, for timeout testing
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn add_entity(
        &mut self,
        id: &str,
        entity_type: Option<&str>,
        embedding: Option<Vec<f32>>,
    ) -> NodeIndex {
        self.insert_node(EntityNode {
            id: id.to_string(),
            entity_type: entity_type.map(str::to_string),
            embedding,
            properties: BTreeMap::new(),
        })
    }

    pub fn set_property(&mut self, id: &str, key: &str, value: Value) {
        if let Some(node) = self.index.get(id).and_then(|idx| self.graph.node_weight_mut(*idx)) {
            node.properties.insert(key.to_string(), value);
        }
    }

    pub fn add_relation(&mut self, from: &str, relation: &str, to: &str) -> EdgeIndex {
        self.add_weighted_relation(from, relation, to, 1.0)
    }

    /// Add an edge, creating untyped endpoints that do not exist yet
    pub fn add_weighted_relation(
        &mut self,
        from: &str,
        relation: &str,
        to: &str,
        weight: f64,
    ) -> EdgeIndex {
        let a = self.node_or_insert(from);
        let b = self.node_or_insert(to);
        self.graph.add_edge(
            a,
            b,
            RelationEdge {
                relation: relation.to_string(),
                weight,
            },
        )
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn insert_node(&mut self, node: EntityNode) -> NodeIndex {
        if let Some(idx) = self.index.get(&node.id) {
            if let Some(existing) = self.graph.node_weight_mut(*idx) {
                *existing = node;
            }
            return *idx;
        }
        let id = node.id.clone();
        let idx = self.graph.add_node(node);
        self.index.insert(id, idx);
        idx
    }

    fn node_or_insert(&mut self, id: &str) -> NodeIndex {
        match self.index.get(id) {
            Some(idx) => *idx,
            None => self.add_entity(id, None, None),
        }
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn entity_type(&self, idx: NodeIndex) -> Option<String> {
        self.graph[idx].entity_type.clone()
    }

    /// Outgoing edges allowed by the params, in relation-priority order
    fn candidate_edges(
        &self,
        idx: NodeIndex,
        params: &ExpansionParams,
        direction: Direction,
    ) -> Vec<(NodeIndex, String, f64)> {
        let mut edges: Vec<(NodeIndex, String, f64)> = self
            .graph
            .edges_directed(idx, direction)
            .filter(|e| {
                params.edge_types.is_empty() || params.edge_types.contains(&e.weight().relation)
            })
            .map(|e| {
                let other = if direction == Direction::Outgoing {
                    e.target()
                } else {
                    e.source()
                };
                (other, e.weight().relation.clone(), e.weight().weight)
            })
            .collect();

        let rank = |relation: &str| {
            params
                .edge_types
                .iter()
                .position(|r| r == relation)
                .unwrap_or(usize::MAX)
        };
        edges.sort_by(|a, b| {
            rank(&a.1)
                .cmp(&rank(&b.1))
                .then_with(|| self.graph[a.0].id.cmp(&self.graph[b.0].id))
        });

        if let Some(ratio) = params.sample_ratio {
            let keep = ((edges.len() as f64) * ratio).ceil() as usize;
            edges.truncate(keep.max(1));
        }
        edges
    }

    fn hop_score(&self, parent: f64, relation: &str, weight: f64, params: &ExpansionParams) -> f64 {
        let boost = match params.hierarchical_weight {
            Some(w) if TAXONOMIC_RELATIONS.contains(&relation) => w,
            _ => 1.0,
        };
        (parent * HOP_DECAY * weight * boost).clamp(0.0, 1.0)
    }

    fn pruned(&self, id: &str, params: &ExpansionParams) -> bool {
        match (params.importance_threshold, params.entity_scores.get(id)) {
            (Some(threshold), Some(score)) => *score < threshold,
            _ => false,
        }
    }

    /// Breadth-first expansion honoring depth, edge types, caps and pruning
    fn breadth_first(
        &self,
        seeds: &[ScoredResult],
        params: &ExpansionParams,
        mode: ExpansionMode,
    ) -> Vec<ScoredResult> {
        let max_nodes = cap(params.max_nodes);
        let max_edges = cap(params.max_edges);
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut output: Vec<ScoredResult> = Vec::new();
        let mut frontier: Vec<(NodeIndex, ScoredResult)> = Vec::new();

        for seed in seeds {
            output.push(seed.clone());
            if let Some(idx) = self.index.get(&seed.id) {
                if visited.insert(*idx) {
                    frontier.push((*idx, seed.clone()));
                }
            }
        }

        let mut edges_examined = 0usize;
        'levels: for depth in 1..=params.max_depth {
            let mut next: Vec<(NodeIndex, ScoredResult)> = Vec::new();
            for (idx, parent) in &frontier {
                for (neighbor, relation, weight) in
                    self.candidate_edges(*idx, params, Direction::Outgoing)
                {
                    edges_examined += 1;
                    if edges_examined > max_edges {
                        break 'levels;
                    }
                    let id = self.graph[neighbor].id.clone();
                    if visited.contains(&neighbor) || self.pruned(&id, params) {
                        continue;
                    }
                    visited.insert(neighbor);

                    let mut score = self.hop_score(parent.score, &relation, weight, params);
                    if mode == ExpansionMode::Importance {
                        if let Some(importance) = params.entity_scores.get(&id) {
                            score = (score * (0.5 + importance / 2.0)).clamp(0.0, 1.0);
                        }
                    }
                    let mut path = parent.path.clone();
                    path.push(PathStep {
                        from: self.graph[*idx].id.clone(),
                        relation,
                        to: id.clone(),
                    });
                    next.push((
                        neighbor,
                        ScoredResult {
                            id,
                            score,
                            graph_score: Some(score),
                            depth,
                            path,
                            entity_type: self.entity_type(neighbor),
                            ..ScoredResult::default()
                        },
                    ));
                }
            }

            if mode == ExpansionMode::Importance
                || params.max_nodes_per_level.is_some()
            {
                next.sort_by(|a, b| b.1.score.total_cmp(&a.1.score));
            }
            if let Some(limit) = params.max_nodes_per_level {
                next.truncate(limit);
            }

            for (_, result) in &next {
                if output.len() >= max_nodes {
                    break 'levels;
                }
                output.push(result.clone());
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        output
    }

    /// Depth-first walk that never closes a cycle
    fn dag_walk(&self, seeds: &[ScoredResult], params: &ExpansionParams) -> Vec<ScoredResult> {
        let max_nodes = cap(params.max_nodes);
        let max_edges = cap(params.max_edges);
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut output: Vec<ScoredResult> = seeds.to_vec();
        let mut edges_examined = 0usize;

        for seed in seeds {
            let Some(start) = self.index.get(&seed.id).copied() else {
                continue;
            };
            if !visited.insert(start) {
                continue;
            }
            let mut stack: Vec<(NodeIndex, ScoredResult)> = vec![(start, seed.clone())];
            while let Some((idx, parent)) = stack.pop() {
                if parent.depth >= params.max_depth {
                    continue;
                }
                let ancestors: HashSet<&str> = parent
                    .path
                    .iter()
                    .map(|step| step.from.as_str())
                    .collect();
                let mut children = Vec::new();
                for (neighbor, relation, weight) in
                    self.candidate_edges(idx, params, Direction::Outgoing)
                {
                    edges_examined += 1;
                    if edges_examined > max_edges || output.len() >= max_nodes {
                        return output;
                    }
                    let id = self.graph[neighbor].id.clone();
                    if ancestors.contains(id.as_str())
                        || visited.contains(&neighbor)
                        || self.pruned(&id, params)
                    {
                        continue;
                    }
                    visited.insert(neighbor);
                    let score = self.hop_score(parent.score, &relation, weight, params);
                    let mut path = parent.path.clone();
                    path.push(PathStep {
                        from: self.graph[idx].id.clone(),
                        relation,
                        to: id.clone(),
                    });
                    let result = ScoredResult {
                        id,
                        score,
                        graph_score: Some(score),
                        depth: parent.depth + 1,
                        path,
                        entity_type: self.entity_type(neighbor),
                        ..ScoredResult::default()
                    };
                    output.push(result.clone());
                    children.push((neighbor, result));
                }
                // Highest priority relation is explored first
                stack.extend(children.into_iter().rev());
            }
        }
        output
    }

    /// Shortest undirected connection between two entities, meeting in the middle
    fn connect(
        &self,
        source: NodeIndex,
        target: NodeIndex,
        params: &ExpansionParams,
    ) -> Option<Vec<PathStep>> {
        if source == target {
            return Some(Vec::new());
        }
        let mut parents: [HashMap<NodeIndex, Option<(NodeIndex, String)>>; 2] =
            [HashMap::new(), HashMap::new()];
        parents[0].insert(source, None);
        parents[1].insert(target, None);
        let mut frontiers = [vec![source], vec![target]];
        let max_hops = params.max_depth.max(1) * 2;

        for hop in 0..max_hops {
            let side = (hop % 2) as usize;
            let mut next = Vec::new();
            for idx in std::mem::take(&mut frontiers[side]) {
                for direction in [Direction::Outgoing, Direction::Incoming] {
                    for (neighbor, relation, _) in self.candidate_edges(idx, params, direction) {
                        if parents[side].contains_key(&neighbor) {
                            continue;
                        }
                        parents[side].insert(neighbor, Some((idx, relation)));
                        if parents[1 - side].contains_key(&neighbor) {
                            return Some(self.join_paths(&parents, neighbor));
                        }
                        next.push(neighbor);
                    }
                }
            }
            frontiers[side] = next;
            if frontiers[0].is_empty() && frontiers[1].is_empty() {
                break;
            }
        }
        None
    }

    fn join_paths(
        &self,
        parents: &[HashMap<NodeIndex, Option<(NodeIndex, String)>>; 2],
        meeting: NodeIndex,
    ) -> Vec<PathStep> {
        let mut forward = Vec::new();
        let mut current = meeting;
        while let Some(Some((prev, relation))) = parents[0].get(&current) {
            forward.push(PathStep {
                from: self.graph[*prev].id.clone(),
                relation: relation.clone(),
                to: self.graph[current].id.clone(),
            });
            current = *prev;
        }
        forward.reverse();

        let mut current = meeting;
        while let Some(Some((next, relation))) = parents[1].get(&current) {
            forward.push(PathStep {
                from: self.graph[current].id.clone(),
                relation: relation.clone(),
                to: self.graph[*next].id.clone(),
            });
            current = *next;
        }
        forward
    }

    /// Pairs of entities a bidirectional search should connect
    fn endpoint_pairs(&self, seeds: &[ScoredResult], params: &ExpansionParams) -> Vec<(String, String)> {
        if let (Some(source), Some(target)) = (&params.source_entity, &params.target_entity) {
            return vec![(source.clone(), target.clone())];
        }
        let ids: Vec<String> = if params.entity_ids.len() >= 2 {
            params.entity_ids.clone()
        } else {
            seeds.iter().take(2).map(|s| s.id.clone()).collect()
        };
        ids.windows(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect()
    }

    fn seeds_for_query(&self, query: &Query) -> Vec<ScoredResult> {
        let mut ids: Vec<String> = query.entity_ids.iter().cloned().collect();
        ids.extend(query.source_entity.iter().cloned());
        ids.extend(query.target_entity.iter().cloned());

        let names: Vec<String> = query
            .entity_name
            .iter()
            .cloned()
            .chain(
                query
                    .query_text
                    .iter()
                    .flat_map(|t| t.split_whitespace().map(str::to_string).collect::<Vec<_>>()),
            )
            .map(|n| n.to_lowercase())
            .collect();
        if !names.is_empty() {
            for node in self.graph.node_weights() {
                let name = node
                    .properties
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or(&node.id)
                    .to_lowercase();
                if names.contains(&name) {
                    ids.push(node.id.clone());
                }
            }
        }

        let mut seen = HashSet::new();
        ids.into_iter()
            .filter(|id| self.index.contains_key(id) && seen.insert(id.clone()))
            .map(|id| {
                let mut seed = ScoredResult::new(id.clone(), 1.0);
                seed.graph_score = Some(1.0);
                seed.entity_type = self.index.get(&id).and_then(|idx| self.entity_type(*idx));
                seed
            })
            .collect()
    }
}

fn cap(limit: usize) -> usize {
    if limit == 0 {
        usize::MAX
    } else {
        limit
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64).powi(2);
        norm_b += (*y as f64).powi(2);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    similarity.is_finite().then_some(similarity)
}

#[async_trait]
impl GraphProcessor for InMemoryGraphProcessor {
    async fn search_by_vector(
        &self,
        request: &VectorSearchRequest,
    ) -> ProcessorResult<Vec<ScoredResult>> {
        self.simulate_latency().await;
        if request.vector.iter().any(|v| !v.is_finite()) {
            return Err(ProcessorError::SearchFailed {
                reason: "query vector contains non-finite values".to_string(),
            });
        }

        let mut matches: Vec<ScoredResult> = self
            .graph
            .node_weights()
            .filter(|node| {
                request.entity_types.is_empty()
                    || node
                        .entity_type
                        .as_ref()
                        .map_or(false, |t| request.entity_types.contains(t))
            })
            .filter_map(|node| {
                let embedding = node.embedding.as_ref()?;
                let similarity = cosine_similarity(&request.vector, embedding)?;
                (similarity >= request.min_score as f64).then(|| ScoredResult {
                    id: node.id.clone(),
                    score: similarity,
                    vector_score: Some(similarity),
                    entity_type: node.entity_type.clone(),
                    ..ScoredResult::default()
                })
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(request.top_k);
        debug!(matches = matches.len(), "In-memory vector search completed");
        Ok(matches)
    }

    async fn expand_by_graph(
        &self,
        seeds: &[ScoredResult],
        params: &ExpansionParams,
    ) -> ProcessorResult<Vec<ScoredResult>> {
        self.simulate_latency().await;
        Ok(self.breadth_first(seeds, params, ExpansionMode::Plain))
    }

    async fn expand_by_graph_with_importance(
        &self,
        seeds: &[ScoredResult],
        params: &ExpansionParams,
    ) -> ProcessorResult<Vec<ScoredResult>> {
        self.simulate_latency().await;
        Ok(self.breadth_first(seeds, params, ExpansionMode::Importance))
    }

    async fn expand_by_bidirectional_search(
        &self,
        seeds: &[ScoredResult],
        params: &ExpansionParams,
    ) -> ProcessorResult<Vec<ScoredResult>> {
        self.simulate_latency().await;
        let pairs = self.endpoint_pairs(seeds, params);
        let mut output: Vec<ScoredResult> = seeds.to_vec();
        let mut seen: HashSet<String> = seeds.iter().map(|s| s.id.clone()).collect();
        let mut connected = false;

        for (source, target) in pairs {
            let (Some(a), Some(b)) = (self.index.get(&source), self.index.get(&target)) else {
                continue;
            };
            let Some(path) = self.connect(*a, *b, params) else {
                continue;
            };
            connected = true;
            let length = path.len().max(1) as f64;
            for (i, step) in path.iter().enumerate() {
                if !seen.insert(step.to.clone()) {
                    continue;
                }
                let score = (1.0 - 0.5 * (i as f64) / length).clamp(0.0, 1.0);
                output.push(ScoredResult {
                    id: step.to.clone(),
                    score,
                    graph_score: Some(score),
                    depth: (i + 1) as u32,
                    path: path[..=i].to_vec(),
                    entity_type: self.index.get(&step.to).and_then(|idx| self.entity_type(*idx)),
                    ..ScoredResult::default()
                });
            }
        }

        if connected {
            Ok(output)
        } else {
            Ok(self.breadth_first(seeds, params, ExpansionMode::Plain))
        }
    }

    async fn expand_by_dag_traversal(
        &self,
        seeds: &[ScoredResult],
        params: &ExpansionParams,
    ) -> ProcessorResult<Vec<ScoredResult>> {
        self.simulate_latency().await;
        Ok(self.dag_walk(seeds, params))
    }

    async fn rank_results(
        &self,
        results: Vec<ScoredResult>,
        weights: RankingWeights,
    ) -> ProcessorResult<Vec<ScoredResult>> {
        self.simulate_latency().await;
        Ok(rank_locally(results, weights))
    }

    async fn get_entity_info(&self, entity_id: &str) -> ProcessorResult<Option<EntityInfo>> {
        let Some(idx) = self.index.get(entity_id).copied() else {
            return Ok(None);
        };
        let connections = |direction: Direction| -> Vec<Connection> {
            self.graph
                .edges_directed(idx, direction)
                .map(|e| {
                    let other = if direction == Direction::Outgoing {
                        e.target()
                    } else {
                        e.source()
                    };
                    Connection {
                        relation: e.weight().relation.clone(),
                        target: self.graph[other].id.clone(),
                    }
                })
                .collect()
        };
        let node = &self.graph[idx];
        Ok(Some(EntityInfo {
            entity_type: node.entity_type.clone(),
            inbound_connections: connections(Direction::Incoming),
            outbound_connections: connections(Direction::Outgoing),
            properties: node.properties.clone(),
        }))
    }

    async fn direct_graph_query(
        &self,
        query: &Query,
        params: &ExpansionParams,
    ) -> ProcessorResult<Vec<ScoredResult>> {
        let seeds = self.seeds_for_query(query);
        if seeds.is_empty() {
            return Ok(Vec::new());
        }
        params.strategy.expand(self, &seeds, params).await
    }

    async fn graph_info(&self) -> Option<GraphInfo> {
        let nodes = self.graph.node_count();
        let edges = self.graph.edge_count();
        if nodes == 0 {
            return None;
        }
        let possible = (nodes * nodes.saturating_sub(1)).max(1) as f64;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for edge in self.graph.edge_weights() {
            *counts.entry(edge.relation.clone()).or_insert(0) += 1;
        }
        let edge_selectivity = counts
            .into_iter()
            .map(|(relation, count)| (relation, count as f64 / edges.max(1) as f64))
            .collect();
        Some(GraphInfo {
            density: Some((edges as f64 / possible).min(1.0)),
            edge_selectivity,
            node_count: nodes,
            edge_count: edges,
        })
    }
}
