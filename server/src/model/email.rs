use sea_orm::{
    sea_query::{NullOrdering, Order},
    QuerySelect,
};
use uuid::Uuid;

use crate::{
    db_core::prelude::*,
    email::fetched_message::FetchedMessage,
    error::{is_unique_violation, AppResult},
    util::now_fixed,
};

pub struct EmailCtrl;

impl EmailCtrl {
    pub fn new_row(user_id: Uuid, message: &FetchedMessage) -> email::ActiveModel {
        email::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            thread_id: Set(message.thread_id.clone()),
            message_id_hash: Set(message.identity_hash()),
            gmail_id: Set(message.gmail_id.clone()),
            from_addr: Set(message.from.clone()),
            to_addr: Set(message.to.clone()),
            subject: Set(message.subject.clone()),
            sent_at: Set(message.sent_at.map(|t| t.fixed_offset())),
            body_text: Set(message.body_text.clone()),
            internal_date_ms: Set(message.internal_date_ms),
            raw_label: Set(message.raw_label()),
            created_at: Set(now_fixed()),
        }
    }

    pub async fn exists<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
        message_id_hash: &str,
    ) -> AppResult<bool> {
        let found = Email::find()
            .filter(email::Column::UserId.eq(user_id))
            .filter(email::Column::MessageIdHash.eq(message_id_hash))
            .one(conn)
            .await?;

        Ok(found.is_some())
    }

    /// Inserts the row unless `(user_id, message_id_hash)` is already stored.
    /// Returns `None` for duplicates, including ones that lose an insert race.
    pub async fn insert_if_absent<C: ConnectionTrait>(
        conn: &C,
        row: email::ActiveModel,
    ) -> AppResult<Option<email::Model>> {
        let (user_id, hash) = match (&row.user_id, &row.message_id_hash) {
            (ActiveValue::Set(user_id), ActiveValue::Set(hash)) => (*user_id, hash.clone()),
            _ => return Err(anyhow::anyhow!("Email row is missing its identity").into()),
        };

        if Self::exists(conn, user_id, &hash).await? {
            return Ok(None);
        }

        match row.insert(conn).await {
            Ok(model) => Ok(Some(model)),
            Err(e) if is_unique_violation(&e) => {
                tracing::debug!("Email {} for user {} inserted concurrently", hash, user_id);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Most recently sent first; emails without a send time go last.
    pub async fn recent_for_user<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
        limit: u64,
    ) -> AppResult<Vec<email::Model>> {
        let emails = Email::find()
            .filter(email::Column::UserId.eq(user_id))
            .order_by_with_nulls(email::Column::SentAt, Order::Desc, NullOrdering::Last)
            .order_by_desc(email::Column::CreatedAt)
            .limit(limit)
            .all(conn)
            .await?;

        Ok(emails)
    }

    pub async fn delete_by_user<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> AppResult<u64> {
        let result = Email::delete_many()
            .filter(email::Column::UserId.eq(user_id))
            .exec(conn)
            .await?;

        Ok(result.rows_affected)
    }
}
