//! seiswave-server - configuration and data loading for the wave server binary

pub mod config;
pub mod loader;

pub use config::{Config, ConfigError, DEFAULT_CONFIG_PATH};
pub use loader::TextImporter;
