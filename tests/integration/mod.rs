//! Integration test modules and shared fixtures

pub mod execution_tests;
pub mod learning_tests;

/// Test utilities and helpers
pub mod utils {
    use graphrag_optimizer::config::OptimizerConfig;
    use graphrag_optimizer::InMemoryGraphProcessor;

    /// Initialize test logging with appropriate filters
    pub fn init_test_logging() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("graphrag_optimizer=debug")
            .with_test_writer()
            .try_init();
    }

    /// Small encyclopedia-style graph with embeddings on every node
    pub fn knowledge_graph() -> InMemoryGraphProcessor {
        let mut g = InMemoryGraphProcessor::new();
        g.add_entity("rust", Some("concept"), Some(vec![1.0, 0.0, 0.0, 0.1]));
        g.add_entity("programming_language", Some("concept"), Some(vec![0.9, 0.1, 0.0, 0.0]));
        g.add_entity("mozilla", Some("organization"), Some(vec![0.1, 0.9, 0.0, 0.0]));
        g.add_entity("cargo", Some("concept"), Some(vec![0.8, 0.0, 0.3, 0.0]));
        g.add_entity("graydon_hoare", Some("person"), Some(vec![0.3, 0.6, 0.1, 0.2]));
        g.add_entity("compiler", Some("concept"), Some(vec![0.7, 0.0, 0.0, 0.5]));
        g.add_relation("rust", "instance_of", "programming_language");
        g.add_relation("rust", "developer", "mozilla");
        g.add_relation("rust", "author", "graydon_hoare");
        g.add_relation("cargo", "part_of", "rust");
        g.add_relation("compiler", "part_of", "rust");
        g.add_relation("graydon_hoare", "employer", "mozilla");
        g
    }

    /// Defaults with a learning cycle after every `cycle_length` queries
    pub fn config_with_cycle(cycle_length: u64) -> OptimizerConfig {
        let mut config = OptimizerConfig::default();
        config.learning.cycle_length = cycle_length;
        config
    }
}
