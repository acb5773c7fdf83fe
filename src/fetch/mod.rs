pub mod files;
pub mod sql;
