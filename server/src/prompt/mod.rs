pub mod application_extraction;
pub mod chat_completions;
