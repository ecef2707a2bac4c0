//! Abstractions over S3-compatible storage backends used to move trip records between buckets.

mod memory;
mod s3;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

pub use memory::{MemoryStorage, StoredObject};
pub use s3::{S3Config, S3ObjectStorage};

/// One entry of a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

#[derive(Debug, Error)]
pub enum BucketError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("sdk error: {0}")]
    Sdk(String),
    #[error("object not found: {0}")]
    NotFound(String),
}

impl BucketError {
    pub(crate) fn from_sdk(err: impl fmt::Display) -> Self {
        Self::Sdk(err.to_string())
    }
}

/// The subset of object-storage operations the relay consumes.
///
/// Every call names its bucket explicitly so one client can serve both the
/// source and the destination side of a run.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, BucketError>;

    async fn make_bucket(&self, bucket: &str) -> Result<(), BucketError>;

    /// Recursive listing, yielded lazily in backend order.
    fn list_objects<'a>(
        &'a self,
        bucket: &'a str,
    ) -> BoxStream<'a, Result<ObjectSummary, BucketError>>;

    /// Returns a URL granting GET access to one object until `expires` elapses.
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires: Duration,
    ) -> Result<String, BucketError>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), BucketError>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, BucketError>;
}
