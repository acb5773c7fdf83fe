pub mod acquire;
pub mod config;
pub mod fetch;
pub mod table;
