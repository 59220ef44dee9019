//! Object storage clients the gateway delegates to.
//!
//! A client owns everything protocol related: credentials, signing, retries,
//! pagination cursors. The gateway only sees the four verbs below.

pub mod local_client;
pub mod s3_client;

use crate::{
    errors::ClientResult,
    models::{
        listing::ObjectPage,
        object::{ObjectHead, PutReceipt},
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::{io, path::Path};

/// Streamed object body.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Lazily fetched listing, one item per page.
pub type PageStream<'a> = BoxStream<'a, ClientResult<ObjectPage>>;

#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Single-shot upload of the file at `local_path` to `bucket/key`.
    async fn put_object(
        &self,
        local_path: &Path,
        bucket: &str,
        key: &str,
    ) -> ClientResult<PutReceipt>;

    /// Open the body of `bucket/key` as a byte stream.
    async fn get_object_stream(&self, bucket: &str, key: &str) -> ClientResult<ByteStream>;

    /// List `bucket`, optionally constrained to keys starting with `prefix`.
    ///
    /// Pages are requested only as the stream is polled.
    fn list_objects_paginated<'a>(
        &'a self,
        bucket: &'a str,
        prefix: Option<&'a str>,
    ) -> PageStream<'a>;

    /// Fetch descriptive metadata of `bucket/key` without its body.
    async fn head_object(&self, bucket: &str, key: &str) -> ClientResult<ObjectHead>;
}
