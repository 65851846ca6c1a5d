//! Fetch Pipeline
//!
//! Walks the mailbox listing page by page, fetches every message of a page
//! through the fetch pool and joins the page before asking for the next one.
//! A failed fetch yields no message for that id; it never fails the page,
//! unless the source refused the credential, which ends the run.

use chrono::NaiveDate;
use futures::future::join_all;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use uuid::Uuid;

use crate::{
    db_core::prelude::*,
    email::{
        client::{MailSource, MessageQuery},
        fetched_message::FetchedMessage,
    },
    error::AppResult,
    model::email::EmailCtrl,
    state::task_pool::{Submitted, TaskPool},
};

use super::report::FetchStats;

#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub messages: Vec<FetchedMessage>,
    pub listed: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct IngestedEmails {
    /// Rows persisted by this call, in fetch order.
    pub emails: Vec<email::Model>,
    pub stats: FetchStats,
}

#[derive(Clone)]
pub struct FetchPipeline {
    conn: DatabaseConnection,
    pool: TaskPool,
    page_size: u32,
}

impl FetchPipeline {
    pub fn new(conn: DatabaseConnection, pool: TaskPool, page_size: u32) -> Self {
        Self {
            conn,
            pool,
            page_size: page_size.max(1),
        }
    }

    async fn label_names(
        &self,
        source: &Arc<dyn MailSource>,
    ) -> AppResult<HashMap<String, String>> {
        match source.list_labels().await {
            Ok(labels) => Ok(labels),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::warn!("Could not list labels, keeping label ids: {}", e);
                Ok(HashMap::new())
            }
        }
    }

    pub async fn fetch_since(
        &self,
        source: Arc<dyn MailSource>,
        after: NaiveDate,
    ) -> AppResult<FetchOutcome> {
        let query = MessageQuery::inbox_since(after, self.page_size);
        let labels = Arc::new(self.label_names(&source).await?);
        let mut outcome = FetchOutcome::default();
        let mut page_token: Option<String> = None;
        let mut seen_tokens = HashSet::new();

        loop {
            let page = source
                .list_message_ids(&query, page_token.as_deref())
                .await?;
            outcome.listed += page.ids.len();

            let mut submitted = Vec::with_capacity(page.ids.len());
            for id in page.ids {
                let source = source.clone();
                let labels = labels.clone();
                let task = async move { fetch_one(source.as_ref(), &id, &labels).await };
                submitted.push(self.pool.submit(task).await);
            }

            let results = join_all(submitted.into_iter().map(Submitted::join)).await;
            for result in results {
                match result.transpose()? {
                    Some(Some(message)) => outcome.messages.push(message),
                    _ => outcome.failed += 1,
                }
            }

            tracing::info!(
                "Fetched page: {} messages so far, {} failed",
                outcome.messages.len(),
                outcome.failed
            );

            match page.next_page_token {
                Some(next) if !seen_tokens.insert(next.clone()) => {
                    tracing::warn!("Mail source revisited page token {}, stopping", next);
                    break;
                }
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        Ok(outcome)
    }

    /// Fetches and persists every message not yet stored for the user.
    pub async fn ingest_and_save(
        &self,
        user_id: Uuid,
        source: Arc<dyn MailSource>,
        after: NaiveDate,
    ) -> AppResult<IngestedEmails> {
        let outcome = self.fetch_since(source, after).await?;
        let mut ingested = IngestedEmails {
            emails: Vec::new(),
            stats: FetchStats {
                listed: outcome.listed,
                fetched: outcome.messages.len(),
                fetch_failed: outcome.failed,
                ..Default::default()
            },
        };

        let mut seen = HashSet::new();
        for message in outcome.messages {
            if !seen.insert(message.identity_hash()) {
                ingested.stats.duplicates += 1;
                continue;
            }

            let row = EmailCtrl::new_row(user_id, &message);
            match EmailCtrl::insert_if_absent(&self.conn, row).await {
                Ok(Some(email)) => ingested.emails.push(email),
                Ok(None) => ingested.stats.duplicates += 1,
                Err(e) => {
                    tracing::warn!("Could not save message {}: {}", message.gmail_id, e);
                    ingested.stats.save_failed += 1;
                }
            }
        }
        ingested.stats.saved = ingested.emails.len();

        Ok(ingested)
    }
}

/// `Ok(None)` for a message that could not be fetched or decoded.
async fn fetch_one(
    source: &dyn MailSource,
    id: &str,
    labels: &HashMap<String, String>,
) -> AppResult<Option<FetchedMessage>> {
    let message = match source.get_full_message(id).await {
        Ok(message) => message,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            tracing::warn!("Failed to fetch message {}: {}", id, e);
            return Ok(None);
        }
    };

    match FetchedMessage::from_gmail_message(&message, labels) {
        Ok(fetched) => Ok(Some(fetched)),
        Err(e) => {
            tracing::warn!("Failed to decode message {}: {}", id, e);
            Ok(None)
        }
    }
}
