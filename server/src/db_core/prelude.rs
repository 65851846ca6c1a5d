pub use entity::application;
pub use entity::email;
pub use entity::prelude::*;
pub use entity::sea_orm_active_enums::*;

pub use sea_orm::entity::prelude::*;
pub use sea_orm::{
    ActiveValue, ConnectionTrait, DatabaseConnection, DatabaseTransaction, NotSet, QueryOrder, Set,
    TransactionTrait,
};
