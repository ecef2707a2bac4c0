use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tripsplit_bucket::S3Config;

use crate::error::ConfigError;
use crate::filter::SourceFilter;

pub const CONFIG_PATH_VAR: &str = "TRIPSPLIT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

const DEFAULT_ENDPOINT: &str = "localhost:9090";
const DEFAULT_REGION: &str = "us-east-1";

/// Where and how to reach the object store.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub endpoint: String,
    pub secure: bool,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Debug, Deserialize)]
struct RawConnectionConfig {
    #[serde(default = "default_endpoint")]
    endpoint: String,
    #[serde(default)]
    secure: bool,
    #[serde(default = "default_region")]
    region: String,
    access_key: Option<String>,
    secret_key: Option<String>,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ConfigError> {
    value
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::MissingField(field))
}

impl ConnectionConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConnectionConfig = toml::from_str(contents)?;
        Ok(Self {
            endpoint: raw.endpoint,
            secure: raw.secure,
            region: raw.region,
            access_key: required(raw.access_key, "access_key")?,
            secret_key: required(raw.secret_key, "secret_key")?,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Loads from `$TRIPSPLIT_CONFIG`, or `config/config.toml` when unset.
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(&Self::default_path())
    }

    pub fn default_path() -> PathBuf {
        env::var_os(CONFIG_PATH_VAR)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn endpoint_url(&self) -> String {
        if self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://") {
            return self.endpoint.clone();
        }
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}", self.endpoint)
    }

    /// MinIO-style deployments need path-style addressing, so it is always on.
    pub fn to_s3_config(&self) -> S3Config {
        S3Config {
            region: self.region.clone(),
            endpoint: Some(self.endpoint_url()),
            access_key_id: Some(self.access_key.clone()),
            secret_access_key: Some(self.secret_key.clone()),
            force_path_style: true,
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("endpoint", &self.endpoint)
            .field("secure", &self.secure)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Fixed names and limits shared by every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    pub source_bucket: String,
    pub target_bucket: String,
    pub target_prefix: String,
    pub marker: String,
    pub extension: String,
    pub url_expiry: Duration,
    pub content_type: String,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            source_bucket: "bronze".to_string(),
            target_bucket: "nyc-taxis-records".to_string(),
            target_prefix: "nyc_taxi_record/".to_string(),
            marker: "nyc_taxi_files".to_string(),
            extension: ".parquet".to_string(),
            url_expiry: Duration::from_secs(60 * 60),
            content_type: "application/json".to_string(),
        }
    }
}

impl RelaySettings {
    pub fn filter(&self) -> SourceFilter {
        SourceFilter::new(&self.marker, &self.extension)
    }
}
