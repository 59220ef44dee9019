//! LocalObjectStore — an `ObjectStoreClient` backed by SQLite for object
//! metadata and local disk for payloads sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`.
//!
//! It behaves like a small single-node object service: buckets must be
//! created before use, listings are key ordered and paginated with opaque
//! continuation tokens.

use super::{ByteStream, ObjectStoreClient, PageStream};
use crate::{
    errors::{ClientError, ClientResult},
    models::{
        listing::{ListedObject, ObjectPage},
        object::{DEFAULT_CONTENT_TYPE, ObjectHead, ObjectLocation, PutReceipt},
    },
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use md5::Context;
use sqlx::{
    ConnectOptions as _, FromRow, QueryBuilder, SqlitePool,
    sqlite::{Sqlite, SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

/// Default number of keys returned per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, FromRow)]
struct BucketRow {
    id: Uuid,
    name: String,
}

#[derive(Debug, FromRow)]
struct ObjectRow {
    key: String,
    content_type: String,
    size_bytes: i64,
    etag: String,
    last_modified: DateTime<Utc>,
}

#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool holding the bucket and object catalogue.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    page_size: usize,
}

impl LocalObjectStore {
    /// Wrap an existing pool. The schema must already be applied.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>, page_size: usize) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            page_size: page_size.clamp(1, DEFAULT_PAGE_SIZE),
        }
    }

    /// Create the storage directory, connect to `database_url` (creating the
    /// database file if missing) and apply the catalogue schema.
    pub async fn open(
        base_path: impl Into<PathBuf>,
        database_url: &str,
        page_size: usize,
    ) -> ClientResult<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .disable_statement_logging();
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self::new(Arc::new(pool), base_path, page_size);
        store.apply_schema().await?;
        Ok(store)
    }

    async fn apply_schema(&self) -> ClientResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty());

        for stmt in statements {
            debug!("applying catalogue schema: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Register a bucket and create its directory.
    ///
    /// Returns `BucketAlreadyExists` when the name is taken.
    pub async fn create_bucket(&self, name: &str) -> ClientResult<()> {
        ensure_bucket_name_safe(name)?;
        fs::create_dir_all(self.bucket_root(name)).await?;

        match sqlx::query("INSERT INTO buckets (id, name, created_at) VALUES (?, ?, ?)")
            .bind(Uuid::new_v4())
            .bind(name)
            .bind(Utc::now())
            .execute(&*self.db)
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(ClientError::BucketAlreadyExists(name.to_string()))
            }
            Err(err) => Err(ClientError::Sqlx(err)),
        }
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// First two bytes of MD5(bucket/key) as lowercase hex.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_bucket(&self, bucket: &str) -> ClientResult<BucketRow> {
        sqlx::query_as::<_, BucketRow>("SELECT id, name FROM buckets WHERE name = ?")
            .bind(bucket)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => ClientError::BucketNotFound(bucket.to_string()),
                other => ClientError::Sqlx(other),
            })
    }

    async fn fetch_object(&self, bucket: &BucketRow, key: &str) -> ClientResult<ObjectRow> {
        sqlx::query_as::<_, ObjectRow>(
            "SELECT key, content_type, size_bytes, etag, last_modified
             FROM objects WHERE bucket_id = ? AND key = ?",
        )
        .bind(bucket.id)
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => ClientError::ObjectNotFound {
                bucket: bucket.name.clone(),
                key: key.to_string(),
            },
            other => ClientError::Sqlx(other),
        })
    }

    /// Fetch one key-ordered page, starting after the decoded `token`.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        token: Option<&str>,
    ) -> ClientResult<ObjectPage> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let fetch_limit = self.page_size + 1;

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT key, content_type, size_bytes, etag, last_modified \
             FROM objects WHERE bucket_id = ",
        );
        builder.push_bind(bucket_rec.id);

        // substr() instead of LIKE: LIKE is case-insensitive and treats `%`/`_` as wildcards.
        if let Some(prefix) = prefix.filter(|p| !p.is_empty()) {
            builder.push(" AND substr(key, 1, length(");
            builder.push_bind(prefix.to_string());
            builder.push(")) = ");
            builder.push_bind(prefix.to_string());
        }

        if let Some(token) = token {
            builder.push(" AND key > ");
            builder.push_bind(decode_continuation_token(token));
        }

        builder.push(" ORDER BY key ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut rows: Vec<ObjectRow> = builder.build_query_as().fetch_all(&*self.db).await?;

        let mut next_continuation_token = None;
        if rows.len() == fetch_limit {
            rows.pop();
            next_continuation_token = rows.last().map(|last| encode_continuation_token(&last.key));
        }

        let objects = rows
            .into_iter()
            .map(|row| ListedObject::new(row.key, row.size_bytes.max(0) as u64))
            .collect();

        Ok(ObjectPage::new(objects, next_continuation_token))
    }

    /// Stream `source` into a temp file beside `file_path`. Returns the temp
    /// path, the payload size and its MD5 etag. The caller moves the temp file
    /// into place.
    async fn stage_payload(
        &self,
        source: &Path,
        file_path: &Path,
    ) -> ClientResult<(PathBuf, i64, String)> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            ClientError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        let mut reader = ReaderStream::new(File::open(source).await?);

        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        while let Some(chunk_res) = reader.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(ClientError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ClientError::Io(err));
            }
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ClientError::Io(err));
        }

        Ok((tmp_path, size_bytes, format!("{:x}", digest.compute())))
    }
}

#[async_trait]
impl ObjectStoreClient for LocalObjectStore {
    async fn put_object(
        &self,
        local_path: &Path,
        bucket: &str,
        key: &str,
    ) -> ClientResult<PutReceipt> {
        ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let (tmp_path, size_bytes, etag) = self.stage_payload(local_path, &file_path).await?;

        // Row and payload are replaced together; the row commits only after the rename.
        let mut tx = match self.db.begin().await {
            Ok(tx) => tx,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ClientError::Sqlx(err));
            }
        };

        let upsert_result = sqlx::query(
            r#"
            INSERT INTO objects (
                id, bucket_id, key, content_type, size_bytes, etag, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bucket_rec.id)
        .bind(key)
        .bind(DEFAULT_CONTENT_TYPE)
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await;

        if let Err(err) = upsert_result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ClientError::Sqlx(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ClientError::Io(err));
        }
        tx.commit().await?;

        debug!("stored {} bytes at {}", size_bytes, file_path.display());
        Ok(PutReceipt {
            location: ObjectLocation::new(bucket, key),
            e_tag: Some(format!("\"{}\"", etag)),
            version_id: None,
        })
    }

    async fn get_object_stream(&self, bucket: &str, key: &str) -> ClientResult<ByteStream> {
        ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.fetch_object(&bucket_rec, key).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                ClientError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                ClientError::Io(err)
            }
        })?;

        Ok(ReaderStream::new(file).boxed())
    }

    fn list_objects_paginated<'a>(
        &'a self,
        bucket: &'a str,
        prefix: Option<&'a str>,
    ) -> PageStream<'a> {
        let start: Option<Option<String>> = Some(None);

        stream::try_unfold(start, move |state| async move {
            let Some(token) = state else {
                return Ok::<_, ClientError>(None);
            };
            let page = self.list_page(bucket, prefix, token.as_deref()).await?;
            let next = page.next_continuation_token.clone().map(Some);
            Ok(Some((page, next)))
        })
        .boxed()
    }

    async fn head_object(&self, bucket: &str, key: &str) -> ClientResult<ObjectHead> {
        ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let row = self.fetch_object(&bucket_rec, key).await?;

        debug!("head {}/{} etag={}", bucket, row.key, row.etag);
        Ok(ObjectHead {
            content_type: row.content_type,
            content_length: row.size_bytes.max(0) as u64,
            last_modified: row.last_modified,
        })
    }
}

/// Reject keys that are empty, too long, absolute, contain `..`, end in `/`
/// or carry control characters and backslashes.
fn ensure_key_safe(key: &str) -> ClientResult<()> {
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(ClientError::InvalidObjectKey);
    }
    if key.starts_with('/') || key.ends_with('/') || key.contains("..") {
        return Err(ClientError::InvalidObjectKey);
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(ClientError::InvalidObjectKey);
    }
    Ok(())
}

/// S3-like bucket naming rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - cannot start/end with dot or hyphen
/// - no consecutive dots or dot-hyphen pairs
/// - not formatted like an IPv4 address
fn ensure_bucket_name_safe(name: &str) -> ClientResult<()> {
    let invalid = |reason: &str| {
        Err(ClientError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    if name.len() < BUCKET_NAME_MIN_LEN || name.len() > BUCKET_NAME_MAX_LEN {
        return invalid("must be between 3 and 63 characters");
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return invalid("allowed characters are lowercase letters, digits, dots, and hyphens");
    }
    if name.starts_with('.')
        || name.ends_with('.')
        || name.starts_with('-')
        || name.ends_with('-')
    {
        return invalid("must start and end with a lowercase letter or digit");
    }
    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return invalid("cannot contain consecutive dots or dot-hyphen combinations");
    }
    if is_ipv4_like(name) {
        return invalid("must not be formatted like an IP address");
    }
    Ok(())
}

fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

fn encode_continuation_token(key: &str) -> String {
    general_purpose::STANDARD.encode(key)
}

/// Tokens that are not valid base64 are used as a raw start-after key.
fn decode_continuation_token(token: &str) -> String {
    general_purpose::STANDARD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| token.to_string())
}
