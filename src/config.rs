use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CadastreError;

pub const DEFAULT_CONFIG_FILE: &str = "cadastre-merge.json";
pub const DEFAULT_CATALOG_URL: &str = "https://data.gov.lv/dati/lv/api/3/action/package_show";
pub const DEFAULT_DATASET_ID: &str = "kadastra-informacijas-sistemas-atverti-telpiskie-dati";
pub const DEFAULT_OUTPUT: &str = "merged_cadastre_data.zip";

const DEFAULT_CATALOG_TIMEOUT_SECS: u64 = 10;
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CATALOG_CACHE_TTL_SECS: u64 = 3600;
const SUPPORTED_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub catalog_url: Option<String>,
    #[serde(default)]
    pub dataset_id: Option<String>,
    #[serde(default)]
    pub catalog_timeout_secs: Option<u64>,
    #[serde(default)]
    pub download_timeout_secs: Option<u64>,
    #[serde(default)]
    pub catalog_cache_ttl_secs: Option<u64>,
    #[serde(default)]
    pub accept_invalid_certs: Option<bool>,
    #[serde(default)]
    pub work_dir: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CachePolicy {
    #[default]
    Disabled,
    Ttl(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub accept_invalid_certs: bool,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub catalog_url: String,
    pub dataset_id: String,
    pub catalog_http: HttpSettings,
    pub download_http: HttpSettings,
    pub catalog_cache: CachePolicy,
    pub work_dir: Option<PathBuf>,
    pub output: PathBuf,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `cadastre-merge.json` in the current directory when present.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, CadastreError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| CadastreError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| CadastreError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, CadastreError> {
        let schema_version = config.schema_version.unwrap_or(SUPPORTED_SCHEMA_VERSION);
        if schema_version != SUPPORTED_SCHEMA_VERSION {
            return Err(CadastreError::InvalidConfig(format!(
                "unsupported schema_version {schema_version}, expected {SUPPORTED_SCHEMA_VERSION}"
            )));
        }
        let catalog_url = non_empty(config.catalog_url, "catalog_url")?
            .unwrap_or_else(|| DEFAULT_CATALOG_URL.to_string());
        let dataset_id = non_empty(config.dataset_id, "dataset_id")?
            .unwrap_or_else(|| DEFAULT_DATASET_ID.to_string());

        let catalog_timeout = positive_secs(
            config.catalog_timeout_secs,
            DEFAULT_CATALOG_TIMEOUT_SECS,
            "catalog_timeout_secs",
        )?;
        let download_timeout = positive_secs(
            config.download_timeout_secs,
            DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            "download_timeout_secs",
        )?;
        let accept_invalid_certs = config.accept_invalid_certs.unwrap_or(false);

        let catalog_cache = match config
            .catalog_cache_ttl_secs
            .unwrap_or(DEFAULT_CATALOG_CACHE_TTL_SECS)
        {
            0 => CachePolicy::Disabled,
            secs => CachePolicy::Ttl(Duration::from_secs(secs)),
        };

        Ok(ResolvedConfig {
            catalog_url,
            dataset_id,
            catalog_http: HttpSettings {
                timeout: catalog_timeout,
                accept_invalid_certs,
            },
            download_http: HttpSettings {
                timeout: download_timeout,
                accept_invalid_certs,
            },
            catalog_cache,
            work_dir: config.work_dir.map(PathBuf::from),
            output: PathBuf::from(config.output.unwrap_or_else(|| DEFAULT_OUTPUT.to_string())),
        })
    }
}

fn non_empty(value: Option<String>, key: &str) -> Result<Option<String>, CadastreError> {
    match value {
        Some(value) if value.trim().is_empty() => Err(CadastreError::InvalidConfig(format!(
            "{key} must not be empty"
        ))),
        Some(value) => Ok(Some(value.trim().to_string())),
        None => Ok(None),
    }
}

fn positive_secs(value: Option<u64>, default: u64, key: &str) -> Result<Duration, CadastreError> {
    match value.unwrap_or(default) {
        0 => Err(CadastreError::InvalidConfig(format!(
            "{key} must be greater than zero"
        ))),
        secs => Ok(Duration::from_secs(secs)),
    }
}
