pub mod config;
pub mod limits;
pub mod phase;
pub mod types;
