// crates/tripsplit-core/src/error.rs

use std::path::PathBuf;

use thiserror::Error;
use tripsplit_bucket::BucketError;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config is missing required field `{0}`")]
    MissingField(&'static str),
}

/// Failures while turning a presigned URL into a decoded table.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("failed to fetch object: {0}")]
    Fetch(String),

    #[error("table contains no rows")]
    Empty,

    #[error("parquet decoding failed: {0}")]
    Parquet(#[from] polars::error::PolarsError),
}

/// Failures confined to a single row; the rest of the table is still processed.
#[derive(Error, Debug)]
pub enum RowError {
    #[error("missing expected column `{0}`")]
    MissingField(&'static str),

    #[error("column `{column}` holds an unsupported value: {message}")]
    Value { column: String, message: String },

    #[error("JSON serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("upload failed: {0}")]
    Write(#[from] BucketError),
}

/// Failures that abandon one source object.
#[derive(Error, Debug)]
pub enum ObjectError {
    #[error("storage error while signing URL: {0}")]
    Presign(#[from] BucketError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Failures that end the whole run.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("source bucket '{0}' does not exist")]
    SourceBucketMissing(String),

    #[error("object storage error: {0}")]
    Storage(#[from] BucketError),
}
