use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Outcome of fetching and persisting one page-walk of the mailbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchStats {
    pub listed: usize,
    pub fetched: usize,
    pub fetch_failed: usize,
    pub duplicates: usize,
    pub saved: usize,
    pub save_failed: usize,
}

/// Outcome of folding a batch of stored emails into applications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub candidates: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped_non_job: usize,
    pub extraction_failed: usize,
    pub persist_failed: usize,
}

impl MergeStats {
    /// Applications created, updated or confirmed unchanged.
    pub fn saved(&self) -> usize {
        self.created + self.updated + self.unchanged
    }

    pub fn failed(&self) -> usize {
        self.extraction_failed + self.persist_failed
    }
}

/// Per-run result returned by the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub user_id: Uuid,
    pub after: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetch: FetchStats,
    pub merge: MergeStats,
}

impl IngestReport {
    pub fn emails_fetched(&self) -> usize {
        self.fetch.fetched
    }

    pub fn applications_saved(&self) -> usize {
        self.merge.saved()
    }

    pub fn skipped_non_job(&self) -> usize {
        self.merge.skipped_non_job
    }

    pub fn failed(&self) -> usize {
        self.merge.failed()
    }
}

impl std::fmt::Display for IngestReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "user={} after={} fetched={} new_emails={} duplicates={} fetch_failed={} save_failed={} candidates={} saved={} (created={} updated={} unchanged={}) skipped_non_job={} failed={} (extraction={} persist={}) in {}ms",
            self.user_id,
            self.after.format("%Y/%m/%d"),
            self.fetch.fetched,
            self.fetch.saved,
            self.fetch.duplicates,
            self.fetch.fetch_failed,
            self.fetch.save_failed,
            self.merge.candidates,
            self.merge.saved(),
            self.merge.created,
            self.merge.updated,
            self.merge.unchanged,
            self.merge.skipped_non_job,
            self.merge.failed(),
            self.merge.extraction_failed,
            self.merge.persist_failed,
            (self.finished_at - self.started_at).num_milliseconds(),
        )
    }
}
