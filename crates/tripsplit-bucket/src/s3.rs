use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::Stream;

use crate::{BucketError, ObjectStorage, ObjectSummary};

#[derive(Debug, Clone)]
pub struct S3Config {
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub force_path_style: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
        }
    }
}

#[derive(Clone)]
pub struct S3ObjectStorage {
    client: Client,
}

impl S3ObjectStorage {
    pub async fn new(config: S3Config) -> Result<Self, BucketError> {
        if config.region.is_empty() {
            return Err(BucketError::Configuration(
                "region cannot be empty".into(),
            ));
        }
        if config.endpoint.as_deref().is_some_and(str::is_empty) {
            return Err(BucketError::Configuration(
                "endpoint cannot be empty when set".into(),
            ));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = Credentials::new(access_key, secret_key, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(credentials));
        }

        let shared_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
        })
    }
}

#[async_trait]
impl ObjectStorage for S3ObjectStorage {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, BucketError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(service_err)) if service_err.err().is_not_found() => {
                Ok(false)
            }
            Err(err) => Err(BucketError::from_sdk(err)),
        }
    }

    async fn make_bucket(&self, bucket: &str) -> Result<(), BucketError> {
        self.client
            .create_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(BucketError::from_sdk)?;
        Ok(())
    }

    fn list_objects<'a>(
        &'a self,
        bucket: &'a str,
    ) -> BoxStream<'a, Result<ObjectSummary, BucketError>> {
        Box::pin(list_pages(&self.client, bucket))
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires: Duration,
    ) -> Result<String, BucketError> {
        let presigning = PresigningConfig::expires_in(expires)
            .map_err(|err| BucketError::Configuration(err.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(BucketError::from_sdk)?;
        Ok(request.uri().to_string())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), BucketError> {
        let length = bytes.len() as i64;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(length)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(BucketError::from_sdk)?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, BucketError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| match err {
                SdkError::ServiceError(service_err) => {
                    if service_err.err().is_no_such_key() {
                        BucketError::NotFound(key.to_string())
                    } else {
                        BucketError::from_sdk(service_err.err())
                    }
                }
                other => BucketError::from_sdk(other),
            })?;

        let data = output.body.collect().await.map_err(BucketError::from_sdk)?;
        Ok(data.into_bytes())
    }
}

/// Pages through `ListObjectsV2`, skipping directory markers.
fn list_pages<'a>(
    client: &'a Client,
    bucket: &'a str,
) -> impl Stream<Item = Result<ObjectSummary, BucketError>> + Send + 'a {
    try_stream! {
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = client.list_objects_v2().bucket(bucket);
            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let page = request.send().await.map_err(BucketError::from_sdk)?;

            for object in page.contents() {
                let Some(key) = object.key() else {
                    continue;
                };
                if key.is_empty() || key.ends_with('/') {
                    continue;
                }

                yield ObjectSummary {
                    key: key.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                };
            }

            match (page.is_truncated(), page.next_continuation_token()) {
                (Some(true), Some(token)) => continuation_token = Some(token.to_string()),
                _ => break,
            }
        }
    }
}
