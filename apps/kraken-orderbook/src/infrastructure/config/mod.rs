//! Configuration Module
//!
//! Configuration loading for the order book service.

mod settings;

pub use settings::{BookConfig, ConfigError};
