//! TOML configuration for the server binary

use std::fs;
use std::path::{Path, PathBuf};

use seiswave::{
    FilterChain, FilterConfigError, FilterSpec, IngestConfig, MAX_RSAM_WINDOWS, QueryConfig,
    RsamParams,
};
use seiswave_serve::ServerConfig;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "seiswave.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid filter: {0}")]
    Filter(#[from] FilterConfigError),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub query: QuerySection,
    pub ingest: IngestConfig,
    pub filter: Vec<FilterSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// Size of the backend handle pool.
    pub store_handles: usize,
    pub max_line_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 16022,
            store_handles: 4,
            max_line_bytes: ServerConfig::default().max_line_bytes,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuerySection {
    /// 0 means unlimited lookback.
    pub max_days: f64,
    pub rsam_delta: f64,
    pub rsam_duration: f64,
    /// Longest RSAM series one request may produce, in windows.
    pub max_rsam_windows: usize,
}

impl Default for QuerySection {
    fn default() -> Self {
        let rsam = RsamParams::default();
        Self {
            max_days: 0.0,
            rsam_delta: rsam.delta,
            rsam_duration: rsam.duration,
            max_rsam_windows: MAX_RSAM_WINDOWS,
        }
    }
}

impl Config {
    pub fn query_config(&self) -> QueryConfig {
        QueryConfig {
            max_days: self.query.max_days,
            rsam: RsamParams {
                delta: self.query.rsam_delta,
                duration: self.query.rsam_duration,
            },
            max_rsam_windows: self.query.max_rsam_windows,
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            max_line_bytes: self.server.max_line_bytes,
        }
    }

    pub fn filter_chain(&self) -> Result<FilterChain, ConfigError> {
        Ok(FilterChain::from_specs(self.filter.iter().cloned())?)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

pub fn parse(path: &Path, contents: &str) -> Result<Config, ConfigError> {
    toml::from_str(contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load `path`. A missing file yields defaults unless `required` is set.
pub fn load(path: &Path, required: bool) -> Result<Config, ConfigError> {
    if !required && !path.exists() {
        log::debug!("{} not found, using defaults", path.display());
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse(path, &contents)?;
    log::info!(
        "Loaded {} ({} filters)",
        path.display(),
        config.filter.len()
    );
    Ok(config)
}
