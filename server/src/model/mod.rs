pub mod application;
pub mod email;

use uuid::Uuid;

use crate::{db_core::prelude::*, error::AppResult};

use self::{application::ApplicationCtrl, email::EmailCtrl};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PurgeSummary {
    pub applications_deleted: u64,
    pub emails_deleted: u64,
}

/// Bulk deletion of everything stored for a user. Applications go first since
/// they reference their source emails.
pub async fn purge_user_data(conn: &DatabaseConnection, user_id: Uuid) -> AppResult<PurgeSummary> {
    let txn = conn.begin().await?;
    let applications_deleted = ApplicationCtrl::delete_by_user(&txn, user_id).await?;
    let emails_deleted = EmailCtrl::delete_by_user(&txn, user_id).await?;
    txn.commit().await?;

    tracing::info!(
        "Purged user {}: {} applications, {} emails",
        user_id,
        applications_deleted,
        emails_deleted
    );

    Ok(PurgeSummary {
        applications_deleted,
        emails_deleted,
    })
}
