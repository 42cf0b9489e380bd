use crate::retry::{is_retryable_code, retry, RetryPolicy};
use crate::storage::{Storage, StorageError};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;

pub struct S3Storage {
    client: Client,
    bucket: String,
    retry: RetryPolicy,
}

impl S3Storage {
    pub fn new(sdk_config: &SdkConfig, bucket: &str, retry: RetryPolicy) -> Self {
        Self {
            client: Client::new(sdk_config),
            bucket: bucket.to_string(),
            retry,
        }
    }

    async fn put_once(&self, key: &str, value: Bytes) -> Result<(), backoff::Error<StorageError>> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(value))
            .content_type("application/json")
            .send()
            .await
            .map(|_| ())
            .map_err(|err| {
                let retryable = match &err {
                    SdkError::ServiceError(service) => is_retryable_code(service.err().code()),
                    _ => true,
                };
                let err = StorageError::Put {
                    key: key.to_string(),
                    reason: DisplayErrorContext(&err).to_string(),
                };
                if retryable {
                    backoff::Error::transient(err)
                } else {
                    backoff::Error::permanent(err)
                }
            })
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn store_raw(&self, key: &str, value: Bytes) -> Result<(), StorageError> {
        // Bytes clones share the buffer, so each attempt resends the same body.
        retry(&self.retry, "s3:PutObject", || self.put_once(key, value.clone())).await
    }

    async fn list_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|err| StorageError::List {
                prefix: prefix.to_string(),
                reason: DisplayErrorContext(&err).to_string(),
            })?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(String::from)),
            );
        }

        Ok(keys)
    }

    fn location(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}
