use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "email")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub thread_id: String,
    pub message_id_hash: String,
    pub gmail_id: String,
    pub from_addr: String,
    pub to_addr: String,
    pub subject: String,
    pub sent_at: Option<DateTimeWithTimeZone>,
    #[sea_orm(column_type = "Text")]
    pub body_text: String,
    pub internal_date_ms: i64,
    pub raw_label: String,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::application::Entity")]
    Application,
}

impl Related<super::application::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Application.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
