//! Configuration management for the dirhost application host

pub mod config;
pub mod logging;

pub use config::{CacheConfig, HostConfig, LogFormat, LoggingConfig};
