//! Logging configuration and utilities for the GraphRAG query optimizer
//!
//! Provides structured logging for:
//! - Plan construction and fallback plans
//! - Query execution phases and early stopping
//! - Statistical learning cycles and the circuit breaker
//! - Performance milestones

use crate::config::LoggingConfig;
use std::io;
use tracing::Span;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initialize the logging system from configuration
///
/// `RUST_LOG` takes precedence over `config.level`.
pub fn init_logging(config: &LoggingConfig) -> eyre::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},graphrag_optimizer={}", config.level, config.level))
    });

    let span_events = if config.enable_spans {
        FmtSpan::ENTER | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.format == "json" {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(span_events)
            .json()
            .with_writer(io::stderr);
        registry.with(fmt_layer).try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_span_events(span_events)
            .with_writer(io::stderr);
        registry.with(fmt_layer).try_init()?;
    }

    tracing::info!(format = %config.format, "GraphRAG optimizer logging initialized");
    Ok(())
}

/// Create a tracing span for plan construction
pub fn optimize_span(query_id: &str) -> Span {
    tracing::info_span!(
        "optimize",
        query_id = %query_id,
        graph_type = tracing::field::Empty,
        strategy = tracing::field::Empty,
        fallback = tracing::field::Empty,
    )
}

/// Create a tracing span for plan execution
pub fn execution_span(query_id: &str, skip_cache: bool) -> Span {
    tracing::info_span!(
        "execute",
        query_id = %query_id,
        skip_cache = skip_cache,
        cache_hit = tracing::field::Empty,
        result_count = tracing::field::Empty,
        early_stopping = tracing::field::Empty,
    )
}

/// Create a tracing span for a statistical learning cycle
pub fn learning_span(cycle: u64) -> Span {
    tracing::info_span!(
        "learning_cycle",
        cycle = cycle,
        rules_generated = tracing::field::Empty,
        outcome = tracing::field::Empty,
    )
}

/// Structured logging for performance milestones
pub struct PerformanceLogger {
    start_time: std::time::Instant,
    operation: String,
}

impl PerformanceLogger {
    pub fn start(operation: &str) -> Self {
        tracing::debug!("Starting performance measurement for: {}", operation);
        Self {
            start_time: std::time::Instant::now(),
            operation: operation.to_string(),
        }
    }

    pub fn log_milestone(&self, milestone: &str) {
        let elapsed = self.start_time.elapsed();
        tracing::debug!(
            operation = %self.operation,
            milestone = milestone,
            elapsed_ms = elapsed.as_millis() as u64,
            "Performance milestone reached"
        );
    }

    /// Finish the measurement and return the elapsed time
    pub fn finish(self) -> std::time::Duration {
        let total_time = self.start_time.elapsed();
        tracing::debug!(
            operation = %self.operation,
            total_time_ms = total_time.as_millis() as u64,
            "Performance measurement completed"
        );
        total_time
    }
}

/// Log the traversal strategy chosen for a plan
pub fn log_strategy_selection(query_id: &str, strategy: &str, reason: &str) {
    tracing::debug!(
        query_id = query_id,
        strategy = strategy,
        reason = reason,
        "Traversal strategy selected"
    );
}

/// Log a fallback plan produced after an internal failure
pub fn log_fallback_plan(query_id: &str, error: &str) {
    tracing::warn!(
        query_id = query_id,
        error = error,
        "Optimization failed, returning fallback plan"
    );
}

/// Log a cooperative early stop during execution
pub fn log_early_stop(query_id: &str, phase: &str, reason: &str, results: usize) {
    tracing::info!(
        query_id = query_id,
        phase = phase,
        reason = reason,
        results = results,
        "Execution stopped early"
    );
}

/// Log the outcome of a statistical learning cycle
pub fn log_learning_outcome(cycle: u64, success: bool, rules: usize, error: Option<&str>) {
    if success {
        tracing::info!(
            cycle = cycle,
            rules = rules,
            "Statistical learning cycle completed"
        );
    } else {
        tracing::warn!(
            cycle = cycle,
            error = error,
            "Statistical learning cycle failed"
        );
    }
}

/// Crate-targeted warning for optimizer internals
#[macro_export]
macro_rules! optimizer_warn {
    ($($arg:tt)*) => {
        $crate::tracing::warn!(
            target: "graphrag_optimizer",
            component = "optimizer",
            $($arg)*
        )
    };
}

/// Crate-targeted info logging for the learning loop
#[macro_export]
macro_rules! learning_info {
    ($($arg:tt)*) => {
        $crate::tracing::info!(
            target: "graphrag_optimizer",
            component = "learning",
            $($arg)*
        )
    };
}
