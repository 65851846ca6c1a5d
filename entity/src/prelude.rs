pub use super::application::Entity as Application;
pub use super::email::Entity as Email;
