//! Per-graph-type optimizer
//!
//! Owns the query statistics and result cache for one [`GraphType`] and
//! tunes top-k / depth from historical averages.

use crate::config::CacheConfig;
use crate::optimization::caching::{cache_key, ResultCache};
use crate::optimization::statistics::QueryStatistics;
use crate::processor::ScoredResult;
use crate::query::{GraphType, Query, DEFAULT_MAX_DEPTH, DEFAULT_TOP_K};
use std::sync::Arc;
use tracing::debug;

/// Queries slower than this on average get narrower parameters
const SLOW_QUERY_SECS: f64 = 1.0;
/// Samples required before tuning kicks in
const MIN_TUNING_SAMPLES: u64 = 10;

/// Output of base optimization
#[derive(Debug, Clone, PartialEq)]
pub struct BaseOptimization {
    pub query: Query,
    pub cache_key: String,
    /// Parameters changed by tuning, as `(name, before, after)`
    pub adjustments: Vec<(String, u64, u64)>,
}

pub struct BaseOptimizer {
    graph_type: GraphType,
    statistics: Arc<QueryStatistics>,
    cache: ResultCache<Vec<ScoredResult>>,
}

impl BaseOptimizer {
    pub fn new(graph_type: GraphType, cache_config: &CacheConfig) -> Self {
        let statistics = Arc::new(QueryStatistics::new());
        Self {
            graph_type,
            cache: ResultCache::new(cache_config, statistics.clone()),
            statistics,
        }
    }

    pub fn graph_type(&self) -> GraphType {
        self.graph_type
    }

    pub fn statistics(&self) -> &Arc<QueryStatistics> {
        &self.statistics
    }

    pub fn cache(&self) -> &ResultCache<Vec<ScoredResult>> {
        &self.cache
    }

    /// Tune parameters, record the query's pattern and derive its cache key
    pub fn optimize(&self, query: &Query) -> BaseOptimization {
        let mut tuned = query.clone();
        let mut adjustments = Vec::new();

        let summary = self.statistics.performance_summary();
        if summary.query_count >= MIN_TUNING_SAMPLES && summary.avg_query_time > SLOW_QUERY_SECS {
            let top_k = tuned.top_k();
            if top_k > DEFAULT_TOP_K {
                let narrowed = ((top_k as f64) * 0.8).ceil() as usize;
                tuned.vector_params.top_k = Some(narrowed.max(DEFAULT_TOP_K));
                adjustments.push(("top_k".to_string(), top_k as u64, tuned.top_k() as u64));
            }
            let depth = tuned.max_depth();
            if depth > DEFAULT_MAX_DEPTH {
                tuned.traversal.max_depth = Some(depth - 1);
                adjustments.push(("max_depth".to_string(), depth as u64, (depth - 1) as u64));
            }
            if !adjustments.is_empty() {
                debug!(
                    graph_type = %self.graph_type,
                    avg_query_time = summary.avg_query_time,
                    ?adjustments,
                    "Narrowed query parameters for a slow workload"
                );
            }
        }

        self.statistics.record_pattern(&tuned.pattern_signature());
        BaseOptimization {
            cache_key: cache_key(&tuned, self.graph_type),
            query: tuned,
            adjustments,
        }
    }
}
