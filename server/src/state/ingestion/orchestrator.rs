use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    db_core::prelude::*,
    email::client::{GmailConnector, MailConnector},
    error::AppResult,
    prompt::{application_extraction::Extractor, chat_completions::ChatCompletionsEngine},
    rate_limiters::RateLimiters,
    server_config::ServerConfig,
    state::task_pool::TaskPool,
    HttpClient,
};

use super::{fetch_pipeline::FetchPipeline, merge_engine::MergeEngine, report::IngestReport};

/// Runs one ingestion for one user: fetch, persist, filter, extract, merge.
#[derive(Clone)]
pub struct IngestionOrchestrator {
    connector: Arc<dyn MailConnector>,
    fetch: FetchPipeline,
    merge: MergeEngine,
}

impl IngestionOrchestrator {
    pub fn new(
        connector: Arc<dyn MailConnector>,
        fetch: FetchPipeline,
        merge: MergeEngine,
    ) -> Self {
        Self {
            connector,
            fetch,
            merge,
        }
    }

    pub fn from_config(
        config: &ServerConfig,
        conn: DatabaseConnection,
        http_client: HttpClient,
    ) -> Self {
        let connector = GmailConnector::new(
            http_client.clone(),
            config.gmail.quota_per_second,
            &config.accounts,
        );
        let engine = ChatCompletionsEngine::new(
            http_client,
            RateLimiters::from_limits(&config.api.prompt_limits),
            &config.model,
            &config.api.key,
        );
        let extractor = Extractor::new(
            Arc::new(engine),
            config.model.max_body_chars,
            config.model.strict_schema,
        );

        let fetch = FetchPipeline::new(
            conn.clone(),
            TaskPool::new("fetch", &config.pools.fetch),
            config.gmail.page_size,
        );
        let merge = MergeEngine::new(
            conn,
            extractor,
            TaskPool::new("extract", &config.pools.extract),
            config.merge.identity_fields,
        );

        Self::new(Arc::new(connector), fetch, merge)
    }

    /// Only emails stored by this run are merged. A missing or revoked
    /// credential fails the whole run; everything else is counted.
    pub async fn run(&self, user_id: Uuid, after: NaiveDate) -> AppResult<IngestReport> {
        let started_at = Utc::now();
        tracing::info!("Ingestion for user {} since {} started", user_id, after);

        let source = self.connector.connect(user_id).await?;
        let ingested = self.fetch.ingest_and_save(user_id, source, after).await?;
        let merge = self.merge.process_emails(user_id, &ingested.emails).await;

        let report = IngestReport {
            user_id,
            after,
            started_at,
            finished_at: Utc::now(),
            fetch: ingested.stats,
            merge,
        };
        tracing::info!("Ingestion finished: {}", report);

        Ok(report)
    }
}
