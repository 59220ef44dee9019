//! src/services/gateway_service.rs
//!
//! ObjectStoreGateway — upload, download and metadata listing on top of an
//! injected [`ObjectStoreClient`].
//!
//! Every operation exists twice. The `try_*` form returns a [`GatewayError`]
//! describing what went wrong. The plain form never fails: it logs the error
//! and collapses it to `false` (transfers) or to a shorter list (listings).

use crate::{
    clients::ObjectStoreClient,
    errors::{ClientError, GatewayError, GatewayResult},
    models::object::{ObjectLocation, ObjectMetadataRecord, PutReceipt},
};
use futures::StreamExt;
use std::{fmt, path::Path, str::FromStr, sync::Arc};
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{debug, error, info};

/// How the listing prefix is removed from keys to build record names.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PrefixStripping {
    /// Remove every occurrence of the prefix anywhere in the key.
    #[default]
    Substring,
    /// Remove the prefix only when the key starts with it.
    Leading,
}

impl PrefixStripping {
    /// Derive a record name from `key`. Without a prefix the key is returned unchanged.
    pub fn strip(self, key: &str, prefix: Option<&str>) -> String {
        let Some(prefix) = prefix.filter(|p| !p.is_empty()) else {
            return key.to_string();
        };
        match self {
            PrefixStripping::Substring => key.replace(prefix, ""),
            PrefixStripping::Leading => key.strip_prefix(prefix).unwrap_or(key).to_string(),
        }
    }
}

impl FromStr for PrefixStripping {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "substring" => Ok(PrefixStripping::Substring),
            "leading" => Ok(PrefixStripping::Leading),
            other => Err(format!(
                "unknown prefix stripping mode `{other}` (expected `substring` or `leading`)"
            )),
        }
    }
}

impl fmt::Display for PrefixStripping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrefixStripping::Substring => f.write_str("substring"),
            PrefixStripping::Leading => f.write_str("leading"),
        }
    }
}

/// Outcome of a metadata listing.
#[derive(Debug, Default)]
pub struct MetadataListing {
    /// Records in pagination order.
    pub records: Vec<ObjectMetadataRecord>,

    /// Objects left out because their inspection failed
    /// (always [`GatewayError::Inspection`]).
    pub skipped: Vec<GatewayError>,
}

#[derive(Clone)]
pub struct ObjectStoreGateway {
    client: Arc<dyn ObjectStoreClient>,
    prefix_stripping: PrefixStripping,
}

impl ObjectStoreGateway {
    pub fn new(client: Arc<dyn ObjectStoreClient>) -> Self {
        Self {
            client,
            prefix_stripping: PrefixStripping::default(),
        }
    }

    pub fn with_prefix_stripping(mut self, prefix_stripping: PrefixStripping) -> Self {
        self.prefix_stripping = prefix_stripping;
        self
    }

    /// Upload the file at `local_path` to `bucket`.
    ///
    /// `object_key` defaults to the local path exactly as given.
    pub async fn try_upload(
        &self,
        local_path: impl AsRef<Path>,
        bucket: &str,
        object_key: Option<&str>,
    ) -> GatewayResult<PutReceipt> {
        let local_path = local_path.as_ref();
        let key = match object_key {
            Some(key) => key.to_string(),
            None => local_path.to_string_lossy().into_owned(),
        };

        debug!("uploading {} to {}/{}", local_path.display(), bucket, key);
        let result = self.client.put_object(local_path, bucket, &key).await;
        result.map_err(|source| GatewayError::Transfer {
            location: ObjectLocation::new(bucket, key),
            source,
        })
    }

    /// [`try_upload`](Self::try_upload), logging the receipt or the error.
    pub async fn upload(
        &self,
        local_path: impl AsRef<Path>,
        bucket: &str,
        object_key: Option<&str>,
    ) -> bool {
        match self.try_upload(local_path, bucket, object_key).await {
            Ok(receipt) => {
                info!("{}", receipt);
                true
            }
            Err(err) => {
                error!("{}", err);
                false
            }
        }
    }

    /// Download `bucket/object_key` into `local_path`, returning the bytes written.
    ///
    /// The destination is created (or truncated) before the transfer starts and
    /// is left in place, possibly partial, when the transfer fails.
    pub async fn try_download(
        &self,
        local_path: impl AsRef<Path>,
        bucket: &str,
        object_key: &str,
    ) -> GatewayResult<u64> {
        let local_path = local_path.as_ref();
        let location = ObjectLocation::new(bucket, object_key);
        let transfer = |source: ClientError| GatewayError::Transfer {
            location: location.clone(),
            source,
        };

        let mut file = File::create(local_path)
            .await
            .map_err(|err| transfer(err.into()))?;
        let mut body = self
            .client
            .get_object_stream(bucket, object_key)
            .await
            .map_err(transfer)?;

        let mut written: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|err| transfer(err.into()))?;
            file.write_all(&chunk)
                .await
                .map_err(|err| transfer(err.into()))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|err| transfer(err.into()))?;

        debug!("downloaded {} bytes to {}", written, local_path.display());
        Ok(written)
    }

    /// [`try_download`](Self::try_download), logging the error.
    pub async fn download(
        &self,
        local_path: impl AsRef<Path>,
        bucket: &str,
        object_key: &str,
    ) -> bool {
        match self.try_download(local_path, bucket, object_key).await {
            Ok(_) => true,
            Err(err) => {
                error!("{}", err);
                false
            }
        }
    }

    /// List `bucket` (under `prefix` when given) and inspect every object.
    ///
    /// Objects whose inspection fails are reported in
    /// [`MetadataListing::skipped`]. A page that cannot be fetched fails the
    /// whole call.
    pub async fn try_list_with_metadata(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> GatewayResult<MetadataListing> {
        match self.collect_listing(bucket, prefix).await {
            (listing, None) => Ok(listing),
            (_, Some(err)) => Err(err),
        }
    }

    /// [`try_list_with_metadata`](Self::try_list_with_metadata) returning only
    /// the records. A page failure ends the listing early; records gathered
    /// up to that point are still returned.
    pub async fn list_with_metadata(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Vec<ObjectMetadataRecord> {
        let (listing, page_error) = self.collect_listing(bucket, prefix).await;
        if let Some(err) = page_error {
            error!("{}", err);
        }
        listing.records
    }

    async fn collect_listing(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> (MetadataListing, Option<GatewayError>) {
        let mut listing = MetadataListing::default();
        let mut pages = self.client.list_objects_paginated(bucket, prefix);

        while let Some(page) = pages.next().await {
            let page = match page {
                Ok(page) => page,
                Err(source) => {
                    let err = GatewayError::Listing {
                        bucket: bucket.to_string(),
                        source,
                    };
                    return (listing, Some(err));
                }
            };

            for object in page.objects {
                // Inspect against the requested bucket for every page.
                match self.client.head_object(bucket, &object.key).await {
                    Ok(head) => listing.records.push(ObjectMetadataRecord {
                        name: self.prefix_stripping.strip(&object.key, prefix),
                        content_type: head.content_type,
                        content_length: head.content_length,
                        last_modified: head.last_modified,
                    }),
                    Err(source) => {
                        error!("Failed {}: {}", object.key, source);
                        listing.skipped.push(GatewayError::Inspection {
                            key: object.key,
                            source,
                        });
                    }
                }
            }
        }

        (listing, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clients::{ByteStream, PageStream, local_client::LocalObjectStore},
        errors::ClientResult,
        models::{
            listing::{ListedObject, ObjectPage},
            object::{DEFAULT_CONTENT_TYPE, ObjectHead},
        },
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use futures::stream;
    use std::{collections::HashSet, io, sync::Mutex};

    /// Scripted client recording every call it receives.
    #[derive(Default)]
    struct FakeClient {
        pages: Vec<Result<ObjectPage, String>>,
        failing_heads: HashSet<String>,
        body: Vec<Result<Bytes, String>>,
        fail_put: bool,
        fail_get: bool,
        puts: Mutex<Vec<(String, String, String)>>,
        heads: Mutex<Vec<(String, String)>>,
    }

    impl FakeClient {
        fn with_pages(pages: Vec<Vec<&str>>) -> Self {
            let count = pages.len();
            let pages = pages
                .into_iter()
                .enumerate()
                .map(|(i, keys)| {
                    let objects = keys.into_iter().map(|k| ListedObject::new(k, 4)).collect();
                    let token = (i + 1 < count).then(|| format!("page-{}", i + 1));
                    Ok(ObjectPage::new(objects, token))
                })
                .collect();
            Self {
                pages,
                ..Default::default()
            }
        }

        fn failing_head(mut self, key: &str) -> Self {
            self.failing_heads.insert(key.to_string());
            self
        }
    }

    #[async_trait]
    impl ObjectStoreClient for FakeClient {
        async fn put_object(
            &self,
            local_path: &Path,
            bucket: &str,
            key: &str,
        ) -> ClientResult<PutReceipt> {
            self.puts.lock().unwrap().push((
                local_path.to_string_lossy().into_owned(),
                bucket.to_string(),
                key.to_string(),
            ));
            if self.fail_put {
                return Err(ClientError::Service("AccessDenied".into()));
            }
            Ok(PutReceipt {
                location: ObjectLocation::new(bucket, key),
                e_tag: Some("\"etag\"".into()),
                version_id: None,
            })
        }

        async fn get_object_stream(&self, bucket: &str, key: &str) -> ClientResult<ByteStream> {
            if self.fail_get {
                return Err(ClientError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                });
            }
            let chunks: Vec<io::Result<Bytes>> = self
                .body
                .iter()
                .map(|chunk| match chunk {
                    Ok(bytes) => Ok(bytes.clone()),
                    Err(msg) => Err(io::Error::new(io::ErrorKind::ConnectionReset, msg.clone())),
                })
                .collect();
            Ok(stream::iter(chunks).boxed())
        }

        fn list_objects_paginated<'a>(
            &'a self,
            _bucket: &'a str,
            _prefix: Option<&'a str>,
        ) -> PageStream<'a> {
            stream::iter(
                self.pages
                    .iter()
                    .cloned()
                    .map(|page| page.map_err(ClientError::Service)),
            )
            .boxed()
        }

        async fn head_object(&self, bucket: &str, key: &str) -> ClientResult<ObjectHead> {
            self.heads
                .lock()
                .unwrap()
                .push((bucket.to_string(), key.to_string()));
            if self.failing_heads.contains(key) {
                return Err(ClientError::Service(format!("head of {key} timed out")));
            }
            Ok(ObjectHead {
                content_type: "text/csv".into(),
                content_length: key.len() as u64,
                last_modified: Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap(),
            })
        }
    }

    fn gateway(client: &Arc<FakeClient>) -> ObjectStoreGateway {
        ObjectStoreGateway::new(client.clone())
    }

    fn names(records: &[ObjectMetadataRecord]) -> Vec<&str> {
        records.iter().map(|r| r.name.as_str()).collect()
    }

    #[tokio::test]
    async fn upload_puts_once_with_given_key() {
        let client = Arc::new(FakeClient::default());

        assert!(gateway(&client).upload("data/q1.csv", "reports", Some("2024/q1.csv")).await);

        let puts = client.puts.lock().unwrap();
        assert_eq!(
            *puts,
            vec![(
                "data/q1.csv".to_string(),
                "reports".to_string(),
                "2024/q1.csv".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn upload_defaults_key_to_local_path() {
        let client = Arc::new(FakeClient::default());

        assert!(gateway(&client).upload("./exports/q1.csv", "reports", None).await);

        let puts = client.puts.lock().unwrap();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].2, "./exports/q1.csv");
    }

    #[tokio::test]
    async fn upload_failure_is_contained() {
        let client = Arc::new(FakeClient {
            fail_put: true,
            ..Default::default()
        });
        let gw = gateway(&client);

        assert!(!gw.upload("q1.csv", "reports", None).await);

        let err = gw.try_upload("q1.csv", "reports", None).await.unwrap_err();
        match err {
            GatewayError::Transfer { location, source } => {
                assert_eq!(location, ObjectLocation::new("reports", "q1.csv"));
                assert!(matches!(source, ClientError::Service(msg) if msg == "AccessDenied"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn download_writes_every_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let client = Arc::new(FakeClient {
            body: vec![
                Ok(Bytes::from_static(b"hello ")),
                Ok(Bytes::from_static(b"world")),
            ],
            ..Default::default()
        });

        let written = gateway(&client)
            .try_download(&dest, "reports", "greeting.txt")
            .await
            .unwrap();

        assert_eq!(written, 11);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn download_failure_mid_stream_leaves_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let client = Arc::new(FakeClient {
            body: vec![
                Ok(Bytes::from_static(b"partial")),
                Err("connection reset".to_string()),
            ],
            ..Default::default()
        });

        assert!(!gateway(&client).download(&dest, "reports", "big.bin").await);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"partial");
    }

    #[tokio::test]
    async fn download_of_missing_object_truncates_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        tokio::fs::write(&dest, b"stale contents").await.unwrap();
        let client = Arc::new(FakeClient {
            fail_get: true,
            ..Default::default()
        });

        let err = gateway(&client)
            .try_download(&dest, "reports", "ghost.bin")
            .await
            .unwrap_err();

        assert!(matches!(
            err.client_error(),
            ClientError::ObjectNotFound { .. }
        ));
        assert!(tokio::fs::read(&dest).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn download_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("no/such/dir/out.bin");
        let client = Arc::new(FakeClient::default());

        assert!(!gateway(&client).download(&dest, "reports", "a.bin").await);
    }

    #[test]
    fn substring_stripping_removes_every_occurrence() {
        let mode = PrefixStripping::Substring;
        assert_eq!(mode.strip("reports/2024/q1.csv", Some("reports/")), "2024/q1.csv");
        assert_eq!(mode.strip("xreports/file", Some("reports/")), "xfile");
        assert_eq!(mode.strip("reports/reports/a", Some("reports/")), "a");
        assert_eq!(mode.strip("reports/a", None), "reports/a");
        assert_eq!(mode.strip("reports/a", Some("")), "reports/a");
    }

    #[test]
    fn leading_stripping_only_removes_a_prefix_match() {
        let mode = PrefixStripping::Leading;
        assert_eq!(mode.strip("reports/2024/q1.csv", Some("reports/")), "2024/q1.csv");
        assert_eq!(mode.strip("xreports/file", Some("reports/")), "xreports/file");
        assert_eq!(mode.strip("reports/reports/a", Some("reports/")), "reports/a");
    }

    #[test]
    fn prefix_stripping_parses_case_insensitively() {
        assert_eq!(
            "Leading".parse::<PrefixStripping>(),
            Ok(PrefixStripping::Leading)
        );
        assert_eq!(
            "substring".parse::<PrefixStripping>(),
            Ok(PrefixStripping::Substring)
        );
        assert!("anchored".parse::<PrefixStripping>().is_err());
        assert_eq!(PrefixStripping::Leading.to_string(), "leading");
    }

    #[tokio::test]
    async fn listing_strips_prefix_from_names() {
        let client = Arc::new(FakeClient::with_pages(vec![vec![
            "reports/2024/q1.csv",
            "xreports/file",
        ]]));

        let records = gateway(&client)
            .list_with_metadata("bucket", Some("reports/"))
            .await;

        assert_eq!(names(&records), vec!["2024/q1.csv", "xfile"]);
        assert_eq!(records[0].content_type, "text/csv");
        assert_eq!(records[0].content_length, "reports/2024/q1.csv".len() as u64);
        assert_eq!(
            records[0].last_modified,
            Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn listing_with_leading_stripping_keeps_unanchored_matches() {
        let client = Arc::new(FakeClient::with_pages(vec![vec![
            "reports/2024/q1.csv",
            "xreports/file",
        ]]));

        let records = gateway(&client)
            .with_prefix_stripping(PrefixStripping::Leading)
            .list_with_metadata("bucket", Some("reports/"))
            .await;

        assert_eq!(names(&records), vec!["2024/q1.csv", "xreports/file"]);
    }

    #[tokio::test]
    async fn listing_skips_objects_whose_inspection_fails() {
        let client = Arc::new(
            FakeClient::with_pages(vec![vec!["a.csv", "b.csv", "c.csv"]]).failing_head("b.csv"),
        );
        let gw = gateway(&client);

        let records = gw.list_with_metadata("bucket", None).await;
        assert_eq!(names(&records), vec!["a.csv", "c.csv"]);

        let listing = gw.try_list_with_metadata("bucket", None).await.unwrap();
        assert_eq!(names(&listing.records), vec!["a.csv", "c.csv"]);
        assert_eq!(listing.skipped.len(), 1);
        assert!(matches!(
            &listing.skipped[0],
            GatewayError::Inspection { key, .. } if key == "b.csv"
        ));
    }

    #[tokio::test]
    async fn listing_flattens_pages_in_order() {
        let client = Arc::new(FakeClient::with_pages(vec![vec!["p1.csv"], vec!["p2.csv"]]));

        let records = gateway(&client).list_with_metadata("bucket", None).await;

        assert_eq!(names(&records), vec!["p1.csv", "p2.csv"]);
    }

    #[tokio::test]
    async fn listing_without_prefix_keeps_raw_keys() {
        let client = Arc::new(FakeClient::with_pages(vec![vec![
            "reports/a.csv",
            "top.txt",
        ]]));

        let records = gateway(&client).list_with_metadata("bucket", None).await;

        assert_eq!(names(&records), vec!["reports/a.csv", "top.txt"]);
    }

    #[tokio::test]
    async fn inspection_targets_requested_bucket_on_every_page() {
        let client = Arc::new(FakeClient::with_pages(vec![
            vec!["a.csv"],
            vec!["b.csv"],
            vec!["c.csv"],
        ]));

        gateway(&client).list_with_metadata("reports", None).await;

        let heads = client.heads.lock().unwrap();
        assert_eq!(heads.len(), 3);
        assert!(heads.iter().all(|(bucket, _)| bucket == "reports"));
    }

    #[tokio::test]
    async fn page_failure_keeps_earlier_records_or_errors() {
        let mut client = FakeClient::with_pages(vec![vec!["a.csv", "b.csv"]]);
        client.pages.push(Err("SlowDown".to_string()));
        let client = Arc::new(client);
        let gw = gateway(&client);

        let records = gw.list_with_metadata("reports", None).await;
        assert_eq!(names(&records), vec!["a.csv", "b.csv"]);

        let err = gw.try_list_with_metadata("reports", None).await.unwrap_err();
        assert!(matches!(err, GatewayError::Listing { bucket, .. } if bucket == "reports"));
    }

    #[tokio::test]
    async fn empty_listing_yields_no_records() {
        let client = Arc::new(FakeClient::with_pages(vec![vec![]]));

        let listing = gateway(&client)
            .try_list_with_metadata("reports", Some("none/"))
            .await
            .unwrap();

        assert!(listing.records.is_empty());
        assert!(listing.skipped.is_empty());
    }

    #[tokio::test]
    async fn round_trip_through_local_store() {
        let dir = tempfile::tempdir().unwrap();
        let db_url = format!("sqlite://{}", dir.path().join("catalog.db").display());
        let store = LocalObjectStore::open(dir.path().join("objects"), &db_url, 2)
            .await
            .unwrap();
        store.create_bucket("reports").await.unwrap();
        let gw = ObjectStoreGateway::new(Arc::new(store));

        let src = dir.path().join("q1.csv");
        tokio::fs::write(&src, b"region,total\neu,42\n").await.unwrap();
        for key in ["reports/2024/q1.csv", "reports/2024/q2.csv", "reports/2025/q1.csv"] {
            assert!(gw.upload(&src, "reports", Some(key)).await);
        }
        assert!(!gw.upload(&src, "missing-bucket", Some("q1.csv")).await);

        let records = gw.list_with_metadata("reports", Some("reports/")).await;
        assert_eq!(
            names(&records),
            vec!["2024/q1.csv", "2024/q2.csv", "2025/q1.csv"]
        );
        assert!(records.iter().all(|r| r.content_length == 19));
        assert!(records.iter().all(|r| r.content_type == DEFAULT_CONTENT_TYPE));

        let dest = dir.path().join("copy.csv");
        assert!(gw.download(&dest, "reports", "reports/2025/q1.csv").await);
        assert_eq!(
            tokio::fs::read(&dest).await.unwrap(),
            b"region,total\neu,42\n"
        );
        assert!(!gw.download(&dest, "reports", "reports/2026/q1.csv").await);
    }
}
