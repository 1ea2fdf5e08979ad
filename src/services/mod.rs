pub mod coordinator;
pub mod group_table;
pub mod member;
pub mod metrics;
pub mod session_token;
