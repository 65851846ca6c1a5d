use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    #[sea_orm(string_value = "applied")]
    Applied,
    #[sea_orm(string_value = "assessment")]
    Assessment,
    #[sea_orm(string_value = "interview")]
    Interview,
    #[sea_orm(string_value = "offer")]
    Offer,
    #[sea_orm(string_value = "rejected")]
    Rejected,
    #[sea_orm(string_value = "other")]
    Other,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Applied => "applied",
            ApplicationStatus::Assessment => "assessment",
            ApplicationStatus::Interview => "interview",
            ApplicationStatus::Offer => "offer",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Other => "other",
        }
    }
}

impl std::fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
