//! # GraphRAG Optimizer
//!
//! An adaptive, cost-bounded query optimizer for graph-augmented retrieval.
//! Given a retrieval request (vector similarity parameters plus graph
//! traversal parameters) it produces a budgeted execution plan, runs it
//! against an external graph/vector backend, caches the results and learns
//! from execution statistics to improve later plans.
//!
//! ## Features
//!
//! - Rule-based query rewriting (predicate pushdown, selectivity ordering,
//!   density-driven traversal strategies, domain and adaptive rules)
//! - Resource budgets scaled by complexity and priority, with early stopping
//! - Multi-strategy graph expansion selected per query
//! - Entity importance scoring
//! - Statistical learning isolated behind a circuit breaker
//! - TTL and size bounded result caching
//! - Per-query metrics with JSON persistence and CSV export
//!
//! ## Architecture
//!
//! - **Optimization**: [`UnifiedOptimizer`] orchestrates per-graph-type
//!   [`optimization::BaseOptimizer`]s, the [`optimization::QueryRewriter`],
//!   the [`optimization::BudgetManager`] and the learning loop
//! - **Processor**: the [`processor::GraphProcessor`] trait every backend
//!   implements, plus an in-memory reference backend
//! - **Metrics**: the [`metrics::MetricsCollector`]
//!
//! ## Usage
//!
//! ```rust,no_run
//! use graphrag_optimizer::{
//!     logging, InMemoryGraphProcessor, OptimizerConfig, Priority, Query, UnifiedOptimizer,
//! };
//!
//! #[tokio::main]
//! async fn main() -> eyre::Result<()> {
//!     let config = OptimizerConfig::default();
//!     logging::init_logging(&config.logging)?;
//!
//!     let optimizer = UnifiedOptimizer::new(config);
//!     let processor = InMemoryGraphProcessor::load_fixture("graph.json".as_ref())?;
//!     let query = Query::with_vector(vec![0.1, 0.8, 0.3]);
//!     let (results, info) = optimizer
//!         .execute(&processor, &query, Priority::Normal, false)
//!         .await?;
//!     println!("{} results, cache hit: {}", results.len(), info.cache_hit);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod errors;
pub mod logging;
pub mod metrics;
pub mod optimization;
pub mod processor;
pub mod query;
pub mod sanitize;

// Re-export commonly used types and functions
pub use config::OptimizerConfig;

pub use errors::{
    CacheError, ConfigurationError, ErrorContext, FailureSeverity, LearningError, OptimizerError,
    OptimizerResult, ProcessorError, SerializationError,
};

pub use logging::{init_logging, PerformanceLogger};

pub use optimization::{ExecutionInfo, ExecutionPlan, QueryPlan, UnifiedOptimizer};

pub use processor::{GraphProcessor, InMemoryGraphProcessor, ScoredResult};

pub use query::{GraphType, Priority, Query, TraversalStrategy};

// Version and build information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const BUILD_TIMESTAMP: &str = env!("BUILD_TIMESTAMP");
pub const BUILD_PROFILE: &str = env!("BUILD_PROFILE");

/// Utility functions and helpers
pub mod utils {
    use sha2::{Digest, Sha256};

    /// Hex-encoded SHA-256 of `data`
    pub fn calculate_hash(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Generate a unique query id
    pub fn generate_query_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Get current timestamp in milliseconds
    pub fn current_timestamp_ms() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

}

// Re-export key dependencies for convenience
pub use eyre;
pub use tokio;
pub use tracing;
