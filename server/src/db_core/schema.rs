use sea_orm::{sea_query::Index, Schema};

use super::prelude::*;

/// Creates the tables and indexes the ingestion pipeline relies on. Safe to run
/// against an already initialised database.
pub async fn create_schema<C: ConnectionTrait>(conn: &C) -> Result<(), DbErr> {
    let backend = conn.get_database_backend();
    let schema = Schema::new(backend);

    let mut email_table = schema.create_table_from_entity(Email);
    email_table.if_not_exists();
    conn.execute(backend.build(&email_table)).await?;

    let mut application_table = schema.create_table_from_entity(Application);
    application_table.if_not_exists();
    conn.execute(backend.build(&application_table)).await?;

    let indexes = [
        Index::create()
            .name("idx_email_user_message_hash")
            .table(Email)
            .col(email::Column::UserId)
            .col(email::Column::MessageIdHash)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_application_user_key")
            .table(Application)
            .col(application::Column::UserId)
            .col(application::Column::NormalizedCompany)
            .col(application::Column::NormalizedRoleTitle)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_application_user_last_updated")
            .table(Application)
            .col(application::Column::UserId)
            .col(application::Column::LastUpdatedAt)
            .if_not_exists()
            .to_owned(),
    ];

    for index in indexes.iter() {
        conn.execute(backend.build(index)).await?;
    }

    tracing::info!("Schema ready ({:?})", backend);
    Ok(())
}
