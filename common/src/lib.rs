pub mod config;
pub mod naming;
