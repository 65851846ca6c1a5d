//! `SeaORM` Entity definitions for the application tracker store.

pub mod prelude;

pub mod application;
pub mod email;
pub mod sea_orm_active_enums;
