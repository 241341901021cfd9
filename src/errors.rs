//! Error types and handling for the GraphRAG query optimizer
//!
//! Error handling is split by concern:
//! - Result cache lookups (misses are recoverable)
//! - External graph processor calls (propagated to the caller)
//! - Statistical learning (isolated by the circuit breaker)
//! - Serialization of cached values, metrics and learning snapshots
//! - Configuration loading and validation

use std::fmt;
use thiserror::Error;

/// Main error type for the optimizer
#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Graph processor error: {0}")]
    Processor(#[from] ProcessorError),

    #[error("Learning error: {0}")]
    Learning(#[from] LearningError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Optimizer failure: {reason}")]
    OptimizerFailure { reason: String },

    #[error("Invalid query: field={field}, reason={reason}")]
    InvalidQuery { field: String, reason: String },

    #[error("I/O error: path={path}, error={error}")]
    Io { path: String, error: String },
}

/// Result cache errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache miss: key={key}")]
    Miss { key: String },

    #[error("Cache entry expired: key={key}, age_ms={age_ms}")]
    Expired { key: String, age_ms: u64 },
}

/// Errors raised by an external graph processor
#[derive(Error, Debug, Clone)]
pub enum ProcessorError {
    #[error("Vector search failed: {reason}")]
    SearchFailed { reason: String },

    #[error("Graph expansion failed: strategy={strategy}, reason={reason}")]
    ExpansionFailed { strategy: String, reason: String },

    #[error("Ranking failed: {reason}")]
    RankingFailed { reason: String },

    #[error("Entity lookup failed: entity={entity_id}, reason={reason}")]
    EntityLookupFailed { entity_id: String, reason: String },

    #[error("Graph query failed: {reason}")]
    GraphQueryFailed { reason: String },

    #[error("Operation timed out: operation={operation}, timeout_ms={timeout_ms}")]
    Timeout { operation: String, timeout_ms: u64 },
}

/// Statistical learning errors
#[derive(Error, Debug, Clone)]
pub enum LearningError {
    #[error("Learning statistics are corrupted: {reason}")]
    InvalidStatistics { reason: String },

    #[error("Learning analysis panicked: {reason}")]
    AnalysisPanicked { reason: String },

    #[error("Rule derivation failed: rule={rule}, reason={reason}")]
    RuleDerivationFailed { rule: String, reason: String },

    #[error("Learning state could not be restored: {reason}")]
    StateRestoreFailed { reason: String },
}

impl LearningError {
    /// How much this failure weighs on the learning circuit breaker
    pub fn severity(&self) -> FailureSeverity {
        match self {
            LearningError::InvalidStatistics { .. } => FailureSeverity::Critical,
            LearningError::AnalysisPanicked { .. } => FailureSeverity::Critical,
            LearningError::RuleDerivationFailed { .. } => FailureSeverity::NonCritical,
            LearningError::StateRestoreFailed { .. } => FailureSeverity::NonCritical,
        }
    }
}

/// Serialization errors
#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("JSON serialization failed: {reason}")]
    JsonFailed { reason: String },

    #[error("CSV export failed: {reason}")]
    CsvFailed { reason: String },

    #[error("Deserialization failed: expected_type={expected_type}, reason={reason}")]
    DeserializationFailed { expected_type: String, reason: String },

    #[error("Version mismatch: expected={expected}, found={found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Invalid configuration value: key={key}, value={value}, reason={reason}")]
    InvalidValue { key: String, value: String, reason: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Configuration parsing failed: {reason}")]
    ParsingFailed { reason: String },

    #[error("Environment variable error: {var}, error={error}")]
    EnvironmentVariable { var: String, error: String },
}

impl From<serde_json::Error> for SerializationError {
    fn from(err: serde_json::Error) -> Self {
        SerializationError::JsonFailed {
            reason: err.to_string(),
        }
    }
}

impl From<csv::Error> for SerializationError {
    fn from(err: csv::Error) -> Self {
        SerializationError::CsvFailed {
            reason: err.to_string(),
        }
    }
}

/// Result type aliases for convenience
pub type OptimizerResult<T> = Result<T, OptimizerError>;
pub type CacheResult<T> = Result<T, CacheError>;
pub type ProcessorResult<T> = Result<T, ProcessorError>;
pub type LearningResult<T> = Result<T, LearningError>;

/// Error context trait for adding context to errors
pub trait ErrorContext<T> {
    fn with_context<F>(self, f: F) -> OptimizerResult<T>
    where
        F: FnOnce() -> String;

    fn with_io_context(self, path: &std::path::Path) -> OptimizerResult<T>;
}

impl<T> ErrorContext<T> for Result<T, std::io::Error> {
    fn with_context<F>(self, f: F) -> OptimizerResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| OptimizerError::OptimizerFailure {
            reason: format!("{}: {}", f(), e),
        })
    }

    fn with_io_context(self, path: &std::path::Path) -> OptimizerResult<T> {
        self.map_err(|e| OptimizerError::Io {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }
}

/// Utility functions for error handling
pub mod utils {
    use super::*;

    /// Whether the caller can continue with a degraded result
    pub fn is_recoverable_error(error: &OptimizerError) -> bool {
        match error {
            OptimizerError::Cache(_) => true,
            OptimizerError::Serialization(_) => true,
            OptimizerError::Learning(_) => true,
            OptimizerError::OptimizerFailure { .. } => true,
            OptimizerError::Processor(ProcessorError::Timeout { .. }) => true,
            OptimizerError::Processor(_) => false,
            OptimizerError::InvalidQuery { .. } => false,
            OptimizerError::Configuration(_) => false,
            OptimizerError::Io { .. } => false,
        }
    }

    /// Get error severity level
    pub fn get_error_severity(error: &OptimizerError) -> FailureSeverity {
        match error {
            OptimizerError::Learning(err) => err.severity(),
            OptimizerError::Configuration(_) => FailureSeverity::Critical,
            OptimizerError::Processor(_) => FailureSeverity::Critical,
            _ => FailureSeverity::NonCritical,
        }
    }
}

/// Failure severity, mapped to fixed circuit-breaker weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSeverity {
    NonCritical,
    Critical,
}

impl FailureSeverity {
    pub fn weight(self) -> f64 {
        match self {
            FailureSeverity::Critical => 1.0,
            FailureSeverity::NonCritical => 0.25,
        }
    }
}

impl fmt::Display for FailureSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureSeverity::NonCritical => write!(f, "NON_CRITICAL"),
            FailureSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}
