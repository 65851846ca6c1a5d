//! Merge Engine
//!
//! Extracts candidates concurrently through the extract pool, then folds the
//! joined results into applications one at a time, each in its own
//! transaction.

use futures::future::join_all;
use uuid::Uuid;

use crate::{
    db_core::prelude::*,
    email::candidate_filter::is_candidate,
    error::{AppError, AppResult},
    model::application::ApplicationCtrl,
    prompt::application_extraction::{ExtractionResult, Extractor},
    state::task_pool::{Submitted, TaskPool},
    util::now_fixed,
};

use super::{
    merge_rules::{merge_into, new_application, ApplicationKey, IdentityPolicy},
    report::MergeStats,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

#[derive(Clone)]
pub struct MergeEngine {
    conn: DatabaseConnection,
    extractor: Extractor,
    pool: TaskPool,
    identity_policy: IdentityPolicy,
}

impl MergeEngine {
    pub fn new(
        conn: DatabaseConnection,
        extractor: Extractor,
        pool: TaskPool,
        identity_policy: IdentityPolicy,
    ) -> Self {
        Self {
            conn,
            extractor,
            pool,
            identity_policy,
        }
    }

    async fn extract_all(&self, candidates: &[&email::Model]) -> Vec<Option<ExtractionResult>> {
        let mut submitted = Vec::with_capacity(candidates.len());
        for email in candidates {
            let extractor = self.extractor.clone();
            let email = (*email).clone();
            submitted.push(
                self.pool
                    .submit(async move { extractor.extract(&email).await })
                    .await,
            );
        }

        join_all(submitted.into_iter().map(Submitted::join))
            .await
            .into_iter()
            .map(Option::flatten)
            .collect()
    }

    pub async fn process_emails(&self, user_id: Uuid, emails: &[email::Model]) -> MergeStats {
        let candidates: Vec<&email::Model> = emails.iter().filter(|e| is_candidate(e)).collect();
        let mut stats = MergeStats {
            candidates: candidates.len(),
            ..Default::default()
        };
        if candidates.is_empty() {
            return stats;
        }

        let results = self.extract_all(&candidates).await;

        for (email, result) in candidates.into_iter().zip(results) {
            let result = match result {
                Some(result) => result,
                None => {
                    stats.extraction_failed += 1;
                    continue;
                }
            };
            if !result.is_application {
                stats.skipped_non_job += 1;
                continue;
            }

            match self.upsert(user_id, email, &result).await {
                Ok(UpsertOutcome::Created) => stats.created += 1,
                Ok(UpsertOutcome::Updated) => stats.updated += 1,
                Ok(UpsertOutcome::Unchanged) => stats.unchanged += 1,
                Err(AppError::Conflict(e)) => {
                    tracing::warn!(
                        "Concurrent write for application from email {}: {}",
                        email.id,
                        e
                    );
                    stats.persist_failed += 1;
                }
                Err(e) => {
                    tracing::error!("Could not save application from email {}: {}", email.id, e);
                    stats.persist_failed += 1;
                }
            }
        }

        stats
    }

    /// One atomic create-or-update for the application identified by the
    /// extraction's canonical key.
    pub async fn upsert(
        &self,
        user_id: Uuid,
        email: &email::Model,
        result: &ExtractionResult,
    ) -> AppResult<UpsertOutcome> {
        let key = ApplicationKey::for_extraction(user_id, result);
        let now = now_fixed();
        let txn = self.conn.begin().await?;

        let outcome = match ApplicationCtrl::find_by_key(&txn, &key).await? {
            None => {
                ApplicationCtrl::insert(&txn, new_application(&key, email.id, result, now)).await?;
                UpsertOutcome::Created
            }
            Some(existing) => {
                match merge_into(&existing, email.id, result, self.identity_policy, now) {
                    Some(changes) => {
                        ApplicationCtrl::update(&txn, changes).await?;
                        UpsertOutcome::Updated
                    }
                    None => UpsertOutcome::Unchanged,
                }
            }
        };

        txn.commit().await?;
        tracing::debug!(
            "Application {}/{} for user {}: {:?}",
            key.normalized_company,
            key.normalized_role_title,
            user_id,
            outcome
        );
        Ok(outcome)
    }
}
