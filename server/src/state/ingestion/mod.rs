pub mod fetch_pipeline;
pub mod merge_engine;
pub mod merge_rules;
pub mod orchestrator;
pub mod report;

pub use orchestrator::IngestionOrchestrator;
