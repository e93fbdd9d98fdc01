use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::{SourceId, SourceRegistry};
use crate::error::DataError;
use crate::fetch::DEFAULT_TIMEOUT;

pub const DEFAULT_CONFIG_FILE: &str = "covid19-data.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub state_codes: Option<String>,
    #[serde(default)]
    pub population: Option<String>,
    /// Per-source URL overrides keyed by source name.
    #[serde(default)]
    pub sources: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub data_dir: Utf8PathBuf,
    pub database: Utf8PathBuf,
    pub timeout: Duration,
    pub state_codes: Utf8PathBuf,
    pub population: Utf8PathBuf,
    pub registry: SourceRegistry,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the named config file, or `covid19-data.json` in the current
    /// directory. Without an explicit path a missing file means defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, DataError> {
        let config_path = match path {
            Some(path) => Utf8PathBuf::from(path),
            None => Utf8PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.as_std_path().exists() {
            tracing::debug!("no {DEFAULT_CONFIG_FILE}, using defaults");
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| DataError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| DataError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, DataError> {
        let data_dir = match config.data_dir {
            Some(dir) => Utf8PathBuf::from(dir),
            None => default_data_dir()?,
        };
        let in_data_dir = |value: Option<String>, file: &str| match value {
            Some(path) => Utf8PathBuf::from(path),
            None => data_dir.join(file),
        };
        let database = in_data_dir(config.database, "data.db");
        let state_codes = in_data_dir(config.state_codes, "state_codes.json");
        let population = in_data_dir(config.population, "state_pop.csv");

        let timeout = match config.timeout_secs {
            Some(0) => return Err(DataError::ConfigParse("timeout_secs must be positive".to_string())),
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_TIMEOUT,
        };

        let mut registry = SourceRegistry::default();
        for (name, url) in config.sources {
            let id: SourceId = name.parse()?;
            registry.set_url(id, url);
        }

        Ok(ResolvedConfig {
            data_dir,
            database,
            timeout,
            state_codes,
            population,
            registry,
        })
    }
}

pub fn default_data_dir() -> Result<Utf8PathBuf, DataError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.data_local_dir().join("covid19-data")).ok()
        })
        .ok_or_else(|| DataError::Filesystem("unable to resolve data directory".to_string()))
}
