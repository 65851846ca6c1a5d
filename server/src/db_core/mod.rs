pub mod prelude;
pub mod schema;
