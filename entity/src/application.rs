use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::sea_orm_active_enums::ApplicationStatus;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "application")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub company: String,
    pub role_title: String,
    pub location: String,
    pub normalized_company: String,
    pub normalized_role_title: String,
    pub status: ApplicationStatus,
    pub next_step: String,
    #[sea_orm(column_type = "Text")]
    pub notes: String,
    pub source_email_id: Option<Uuid>,
    pub is_application: bool,
    pub first_seen_at: DateTimeWithTimeZone,
    pub last_updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::email::Entity",
        from = "Column::SourceEmailId",
        to = "super::email::Column::Id",
        on_update = "NoAction",
        on_delete = "SetNull"
    )]
    Email,
}

impl Related<super::email::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Email.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
