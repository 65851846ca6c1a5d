pub mod candidate_filter;
pub mod client;
pub mod fetched_message;
