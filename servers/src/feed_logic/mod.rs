pub mod config;
pub mod consumer;
