use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};

use crate::{BucketError, ObjectStorage, ObjectSummary};

const URL_SCHEME: &str = "memory://";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: String,
}

#[derive(Default)]
struct State {
    buckets: BTreeMap<String, BTreeMap<String, StoredObject>>,
    created: Vec<String>,
    failing_puts: HashSet<String>,
    failing_presigns: HashSet<String>,
    listing_limit: Option<usize>,
}

/// In-process storage backend. Listings come back in key order and presigned
/// URLs take the form `memory://<bucket>/<key>`.
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<State>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bucket(self, bucket: &str) -> Self {
        self.lock().buckets.entry(bucket.to_string()).or_default();
        self
    }

    pub fn insert(&self, bucket: &str, key: &str, bytes: impl Into<Bytes>, content_type: &str) {
        self.lock().buckets.entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                bytes: bytes.into(),
                content_type: content_type.to_string(),
            },
        );
    }

    /// Makes every later `put_object` for `key` fail with an SDK error.
    pub fn fail_puts_for(&self, key: &str) {
        self.lock().failing_puts.insert(key.to_string());
    }

    /// Makes every later `presign_get` for `key` fail with an SDK error.
    pub fn fail_presigns_for(&self, key: &str) {
        self.lock().failing_presigns.insert(key.to_string());
    }

    /// Listings longer than `entries` objects stop there with an SDK error.
    pub fn fail_listing_after(&self, entries: usize) {
        self.lock().listing_limit = Some(entries);
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.lock()
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .cloned()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.lock()
            .buckets
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Buckets created through `make_bucket`, in call order.
    pub fn created_buckets(&self) -> Vec<String> {
        self.lock().created.clone()
    }

    /// Splits a URL produced by `presign_get` back into bucket and key.
    pub fn resolve_url(url: &str) -> Option<(&str, &str)> {
        url.strip_prefix(URL_SCHEME)?.split_once('/')
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, BucketError> {
        Ok(self.lock().buckets.contains_key(bucket))
    }

    async fn make_bucket(&self, bucket: &str) -> Result<(), BucketError> {
        let mut state = self.lock();
        if state.buckets.contains_key(bucket) {
            return Err(BucketError::Sdk(format!(
                "BucketAlreadyOwnedByYou: {bucket}"
            )));
        }
        state.buckets.insert(bucket.to_string(), BTreeMap::new());
        state.created.push(bucket.to_string());
        Ok(())
    }

    fn list_objects<'a>(
        &'a self,
        bucket: &'a str,
    ) -> BoxStream<'a, Result<ObjectSummary, BucketError>> {
        let state = self.lock();
        let Some(objects) = state.buckets.get(bucket) else {
            let missing: Result<ObjectSummary, BucketError> =
                Err(BucketError::NotFound(bucket.to_string()));
            return stream::iter(vec![missing]).boxed();
        };

        let mut listing: Vec<Result<ObjectSummary, BucketError>> = objects
            .iter()
            .map(|(key, object)| {
                Ok(ObjectSummary {
                    key: key.clone(),
                    size: object.bytes.len() as u64,
                })
            })
            .collect();
        if let Some(limit) = state.listing_limit {
            if limit < listing.len() {
                listing.truncate(limit);
                listing.push(Err(BucketError::Sdk(format!(
                    "injected listing failure for {bucket}"
                ))));
            }
        }
        stream::iter(listing).boxed()
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        _expires: Duration,
    ) -> Result<String, BucketError> {
        let state = self.lock();
        if !state.buckets.contains_key(bucket) {
            return Err(BucketError::NotFound(bucket.to_string()));
        }
        if state.failing_presigns.contains(key) {
            return Err(BucketError::Sdk(format!("injected presign failure for {key}")));
        }
        Ok(format!("{URL_SCHEME}{bucket}/{key}"))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), BucketError> {
        let mut state = self.lock();
        if state.failing_puts.contains(key) {
            return Err(BucketError::Sdk(format!("injected put failure for {key}")));
        }
        let objects = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| BucketError::NotFound(bucket.to_string()))?;
        objects.insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, BucketError> {
        self.object(bucket, key)
            .map(|object| object.bytes)
            .ok_or_else(|| BucketError::NotFound(format!("{bucket}/{key}")))
    }
}
