//! `ObjectStoreClient` backed by the AWS SDK.
//!
//! Credentials, request signing and retries stay inside the SDK; this file
//! only maps the four gateway verbs onto SDK calls and SDK errors onto
//! [`ClientError`].

use super::{ByteStream, ObjectStoreClient, PageStream};
use crate::{
    errors::{ClientError, ClientResult},
    models::{
        listing::{ListedObject, ObjectPage},
        object::{DEFAULT_CONTENT_TYPE, ObjectHead, ObjectLocation, PutReceipt},
    },
};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::{Client, error::DisplayErrorContext, primitives::ByteStream as SdkByteStream};
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use std::{io, path::Path};
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Default number of keys requested per listing page.
pub const DEFAULT_PAGE_SIZE: i32 = 1000;

/// Connection settings for [`S3ObjectStore`].
#[derive(Debug, Clone)]
pub struct S3Settings {
    /// Region override; the SDK provider chain decides when unset.
    pub region: Option<String>,

    /// Custom endpoint (MinIO, LocalStack). Enables path-style addressing.
    pub endpoint: Option<String>,

    /// Named profile from the shared AWS config files.
    pub profile: Option<String>,

    /// Keys requested per listing page.
    pub page_size: i32,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            region: None,
            endpoint: None,
            profile: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl S3Settings {
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = page_size;
        self
    }
}

/// S3 (or S3-compatible) object store reached through `aws-sdk-s3`.
#[derive(Clone, Debug)]
pub struct S3ObjectStore {
    client: Client,
    page_size: i32,
}

impl S3ObjectStore {
    /// Wrap an already configured SDK client.
    pub fn new(client: Client, page_size: i32) -> Self {
        Self {
            client,
            page_size: page_size.clamp(1, DEFAULT_PAGE_SIZE),
        }
    }

    /// Load the shared AWS configuration and build a client from it.
    pub async fn from_settings(settings: &S3Settings) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = &settings.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &settings.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let Some(profile) = &settings.profile {
            loader = loader.profile_name(profile);
        }

        let sdk_config = loader.load().await;
        let builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        // Custom endpoints rarely support virtual-hosted buckets.
        let s3_config = if settings.endpoint.is_some() {
            builder.force_path_style(true).build()
        } else {
            builder.build()
        };

        Self::new(Client::from_conf(s3_config), settings.page_size)
    }
}

#[async_trait]
impl ObjectStoreClient for S3ObjectStore {
    async fn put_object(
        &self,
        local_path: &Path,
        bucket: &str,
        key: &str,
    ) -> ClientResult<PutReceipt> {
        let body = SdkByteStream::from_path(local_path)
            .await
            .map_err(|err| ClientError::Io(io::Error::other(err)))?;

        let output = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|err| {
                if err
                    .as_service_error()
                    .and_then(|e| e.meta().code())
                    .is_some_and(|code| code == "NoSuchBucket")
                {
                    ClientError::BucketNotFound(bucket.to_string())
                } else {
                    service_error(err)
                }
            })?;

        Ok(PutReceipt {
            location: ObjectLocation::new(bucket, key),
            e_tag: output.e_tag().map(str::to_string),
            version_id: output.version_id().map(str::to_string),
        })
    }

    async fn get_object_stream(&self, bucket: &str, key: &str) -> ClientResult<ByteStream> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                    ClientError::ObjectNotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    service_error(err)
                }
            })?;

        Ok(ReaderStream::new(output.body.into_async_read()).boxed())
    }

    fn list_objects_paginated<'a>(
        &'a self,
        bucket: &'a str,
        prefix: Option<&'a str>,
    ) -> PageStream<'a> {
        // `None` state: the previous page was the last one.
        let start: Option<Option<String>> = Some(None);

        stream::try_unfold(start, move |state| async move {
            let Some(token) = state else {
                return Ok::<_, ClientError>(None);
            };

            debug!(bucket, ?prefix, ?token, "requesting listing page");
            let resp = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .set_prefix(prefix.map(str::to_string))
                .max_keys(self.page_size)
                .set_continuation_token(token)
                .send()
                .await
                .map_err(|err| {
                    if err.as_service_error().is_some_and(|e| e.is_no_such_bucket()) {
                        ClientError::BucketNotFound(bucket.to_string())
                    } else {
                        service_error(err)
                    }
                })?;

            let objects = resp
                .contents
                .unwrap_or_default()
                .into_iter()
                .filter_map(|obj| {
                    let size = obj.size.unwrap_or(0).max(0) as u64;
                    obj.key.map(|key| ListedObject::new(key, size))
                })
                .collect();

            let next = match (resp.is_truncated, resp.next_continuation_token) {
                (Some(true), Some(token)) => Some(token),
                _ => None,
            };
            let page = ObjectPage::new(objects, next.clone());
            Ok(Some((page, next.map(Some))))
        })
        .boxed()
    }

    async fn head_object(&self, bucket: &str, key: &str) -> ClientResult<ObjectHead> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().is_some_and(|e| e.is_not_found()) {
                    ClientError::ObjectNotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    service_error(err)
                }
            })?;

        let last_modified = output
            .last_modified()
            .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
            .ok_or_else(|| {
                ClientError::Service(format!("no last-modified time for `{bucket}/{key}`"))
            })?;

        Ok(ObjectHead {
            content_type: output
                .content_type()
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_string(),
            content_length: output.content_length().unwrap_or(0).max(0) as u64,
            last_modified,
        })
    }
}

fn service_error<E>(err: E) -> ClientError
where
    E: std::error::Error,
{
    ClientError::Service(DisplayErrorContext(err).to_string())
}
