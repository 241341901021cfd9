//! Configuration management for the GraphRAG query optimizer
//!
//! This module provides configuration for every optimizer component:
//! - Result caching (TTL, size limit)
//! - Default resource budgets
//! - Rewrite rule thresholds
//! - Statistical learning and its circuit breaker
//! - Metrics collection and persistence
//! - Logging
//!
//! Every section is `#[serde(default)]` so a TOML file only needs the keys it changes.

use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level optimizer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub cache: CacheConfig,
    pub budget: BudgetConfig,
    pub rewriter: RewriterConfig,
    pub learning: LearningConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

/// Result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable result caching
    pub enabled: bool,
    /// Time to live for cached results, in seconds
    pub ttl_secs: f64,
    /// Maximum number of cached entries per graph type
    pub size_limit: usize,
}

/// Default resource budgets, before complexity and priority scaling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub vector_search_ms: f64,
    pub graph_traversal_ms: f64,
    pub ranking_ms: f64,
    pub max_nodes: f64,
    pub max_edges: f64,
    pub timeout_ms: f64,
    /// Rolling consumption samples kept per resource
    pub history_size: usize,
}

/// Query rewriter thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriterConfig {
    /// Graph density above which edge sampling is used
    pub dense_graph_threshold: f64,
    /// Fraction of edges kept by the sampling strategy
    pub sample_ratio: f64,
    /// Depth above which traversal becomes breadth-limited
    pub deep_traversal_depth: u32,
    /// Nodes kept per level by the breadth-limited strategy
    pub breadth_limit: usize,
    /// Pruning threshold as a fraction of the mean entity score
    pub importance_threshold_factor: f64,
    /// Historical paths injected as traversal hints
    pub max_path_hints: usize,
    /// Free-text length (in words) at which a query counts as a complex question
    pub complex_question_words: usize,
}

/// Statistical learning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub enabled: bool,
    /// Run a learning cycle every N optimized queries
    pub cycle_length: u64,
    /// Weighted failure count that opens the circuit breaker
    pub failure_threshold: f64,
    /// First backoff window once the breaker opens
    pub backoff_base_ms: u64,
    /// Longest backoff window
    pub backoff_cap_ms: u64,
    /// Bounded size of the learned rule list
    pub max_rules: usize,
    /// Bounded size of the learning results log
    pub max_learning_results: usize,
    /// Jaccard threshold for entity correlation
    pub correlation_threshold: f64,
    /// Samples required before a strategy's history is trusted
    pub min_strategy_samples: u64,
    /// Learned rules below this confidence are not applied
    pub min_rule_confidence: f64,
    /// Explored paths retained for correlation analysis
    pub max_explored_paths: usize,
    /// Entities and path keys tracked by the traversal statistics
    pub max_tracked_keys: usize,
}

/// Metrics collector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Records kept in memory (oldest evicted first)
    pub max_history_size: usize,
    /// Directory receiving one JSON document per query
    pub metrics_dir: Option<PathBuf>,
    /// Sample process memory and CPU at phase boundaries
    pub track_resources: bool,
    /// Peak memory that triggers a recommendation
    pub memory_warning_mb: f64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "json" or "text"
    pub format: String,
    pub enable_spans: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 300.0,
            size_limit: 1000,
        }
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            vector_search_ms: 500.0,
            graph_traversal_ms: 1000.0,
            ranking_ms: 200.0,
            max_nodes: 1000.0,
            max_edges: 5000.0,
            timeout_ms: 2000.0,
            history_size: 100,
        }
    }
}

impl Default for RewriterConfig {
    fn default() -> Self {
        Self {
            dense_graph_threshold: 0.7,
            sample_ratio: 0.3,
            deep_traversal_depth: 2,
            breadth_limit: 5,
            importance_threshold_factor: 0.7,
            max_path_hints: 3,
            complex_question_words: 12,
        }
    }
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cycle_length: 50,
            failure_threshold: 3.0,
            backoff_base_ms: 5 * 60 * 1000,
            backoff_cap_ms: 60 * 60 * 1000,
            max_rules: 50,
            max_learning_results: 20,
            correlation_threshold: 0.3,
            min_strategy_samples: 5,
            min_rule_confidence: 0.5,
            max_explored_paths: 5000,
            max_tracked_keys: 10_000,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_history_size: 1000,
            metrics_dir: None,
            track_resources: false,
            memory_warning_mb: 1024.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            enable_spans: false,
        }
    }
}

impl OptimizerConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let content = std::fs::read_to_string(&path).map_err(|_| {
            ConfigurationError::FileNotFound {
                path: path.as_ref().to_string_lossy().to_string(),
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            ConfigurationError::ParsingFailed {
                reason: e.to_string(),
            }
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `GRAPHRAG_*` environment variables
    pub fn load_from_env() -> Result<Self, ConfigurationError> {
        let mut config = Self::default();

        if let Some(enabled) = env_parse::<bool>("GRAPHRAG_CACHE_ENABLED")? {
            config.cache.enabled = enabled;
        }
        if let Some(ttl) = env_parse::<f64>("GRAPHRAG_CACHE_TTL_SECS")? {
            config.cache.ttl_secs = ttl;
        }
        if let Some(limit) = env_parse::<usize>("GRAPHRAG_CACHE_SIZE_LIMIT")? {
            config.cache.size_limit = limit;
        }
        if let Some(enabled) = env_parse::<bool>("GRAPHRAG_LEARNING_ENABLED")? {
            config.learning.enabled = enabled;
        }
        if let Some(cycle) = env_parse::<u64>("GRAPHRAG_LEARNING_CYCLE")? {
            config.learning.cycle_length = cycle;
        }
        if let Ok(dir) = std::env::var("GRAPHRAG_METRICS_DIR") {
            config.metrics.metrics_dir = Some(PathBuf::from(dir));
        }
        if let Ok(level) = std::env::var("GRAPHRAG_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("GRAPHRAG_LOG_FORMAT") {
            config.logging.format = format;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.cache.ttl_secs.is_finite() && self.cache.ttl_secs >= 0.0) {
            return Err(invalid("cache.ttl_secs", self.cache.ttl_secs, "Must be a non-negative number"));
        }
        if self.cache.size_limit == 0 {
            return Err(invalid("cache.size_limit", 0, "Must be at least 1"));
        }

        let budgets = [
            ("budget.vector_search_ms", self.budget.vector_search_ms),
            ("budget.graph_traversal_ms", self.budget.graph_traversal_ms),
            ("budget.ranking_ms", self.budget.ranking_ms),
            ("budget.max_nodes", self.budget.max_nodes),
            ("budget.max_edges", self.budget.max_edges),
            ("budget.timeout_ms", self.budget.timeout_ms),
        ];
        for (key, value) in budgets {
            if !(value.is_finite() && value > 0.0) {
                return Err(invalid(key, value, "Must be a positive number"));
            }
        }

        if !(0.0..=1.0).contains(&self.rewriter.dense_graph_threshold) {
            return Err(invalid(
                "rewriter.dense_graph_threshold",
                self.rewriter.dense_graph_threshold,
                "Must be between 0.0 and 1.0",
            ));
        }
        if !(self.rewriter.sample_ratio > 0.0 && self.rewriter.sample_ratio <= 1.0) {
            return Err(invalid(
                "rewriter.sample_ratio",
                self.rewriter.sample_ratio,
                "Must be in (0.0, 1.0]",
            ));
        }

        if self.learning.cycle_length == 0 {
            return Err(invalid("learning.cycle_length", 0, "Must be at least 1"));
        }
        if self.learning.failure_threshold <= 0.0 {
            return Err(invalid(
                "learning.failure_threshold",
                self.learning.failure_threshold,
                "Must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.learning.correlation_threshold) {
            return Err(invalid(
                "learning.correlation_threshold",
                self.learning.correlation_threshold,
                "Must be between 0.0 and 1.0",
            ));
        }

        if self.learning.max_tracked_keys == 0 {
            return Err(invalid("learning.max_tracked_keys", 0, "Must be at least 1"));
        }
        if self.metrics.max_history_size == 0 {
            return Err(invalid("metrics.max_history_size", 0, "Must be at least 1"));
        }

        match self.logging.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(invalid("logging.format", other, "Must be \"json\" or \"text\"")),
        }
    }
}

fn invalid(key: &str, value: impl ToString, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Result<Option<T>, ConfigurationError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigurationError::EnvironmentVariable {
                var: var.to_string(),
                error: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(OptimizerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config: OptimizerConfig = toml::from_str(
            r#"
            [cache]
            ttl_secs = 10.0

            [learning]
            cycle_length = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.cache.ttl_secs, 10.0);
        assert_eq!(config.cache.size_limit, 1000);
        assert_eq!(config.learning.cycle_length, 5);
        assert_eq!(config.learning.failure_threshold, 3.0);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = OptimizerConfig::default();
        config.rewriter.sample_ratio = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { .. })
        ));

        let mut config = OptimizerConfig::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("optimizer.toml");
        std::fs::write(&path, "[budget]\nmax_nodes = 250.0\n").unwrap();

        let config = OptimizerConfig::load_from_file(&path).unwrap();
        assert_eq!(config.budget.max_nodes, 250.0);

        let missing = OptimizerConfig::load_from_file(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigurationError::FileNotFound { .. })));
    }
}
