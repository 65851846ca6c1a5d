use uuid::Uuid;

use crate::{db_core::prelude::*, error::AppResult, state::ingestion::merge_rules::ApplicationKey};

pub struct ApplicationCtrl;

impl ApplicationCtrl {
    pub async fn find_by_key<C: ConnectionTrait>(
        conn: &C,
        key: &ApplicationKey,
    ) -> AppResult<Option<application::Model>> {
        let found = Application::find()
            .filter(application::Column::UserId.eq(key.user_id))
            .filter(application::Column::NormalizedCompany.eq(key.normalized_company.as_str()))
            .filter(
                application::Column::NormalizedRoleTitle.eq(key.normalized_role_title.as_str()),
            )
            .one(conn)
            .await?;

        Ok(found)
    }

    /// Errors from these writes are returned as raw [`DbErr`]s so callers can
    /// tell constraint violations apart.
    pub async fn insert<C: ConnectionTrait>(
        conn: &C,
        row: application::ActiveModel,
    ) -> Result<application::Model, DbErr> {
        row.insert(conn).await
    }

    pub async fn update<C: ConnectionTrait>(
        conn: &C,
        row: application::ActiveModel,
    ) -> Result<application::Model, DbErr> {
        row.update(conn).await
    }

    pub async fn list_for_user<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
    ) -> AppResult<Vec<application::Model>> {
        let applications = Application::find()
            .filter(application::Column::UserId.eq(user_id))
            .order_by_desc(application::Column::LastUpdatedAt)
            .order_by_asc(application::Column::NormalizedCompany)
            .all(conn)
            .await?;

        Ok(applications)
    }

    pub async fn delete_by_user<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> AppResult<u64> {
        let result = Application::delete_many()
            .filter(application::Column::UserId.eq(user_id))
            .exec(conn)
            .await?;

        Ok(result.rows_affected)
    }
}
