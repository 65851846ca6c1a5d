pub mod ingestion;
pub mod task_pool;
