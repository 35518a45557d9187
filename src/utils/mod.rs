pub mod config;
pub mod workspace;
