//! Object identity and descriptive metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Content type reported by the service for objects uploaded without one.
pub const DEFAULT_CONTENT_TYPE: &str = "binary/octet-stream";

/// Identifies a single stored object.
///
/// Keys are opaque, path-like strings. The gateway never interprets them
/// beyond prefix stripping in listings.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectLocation {
    /// Bucket holding the object.
    pub bucket: String,

    /// Object key inside the bucket.
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// One entry of a metadata listing.
///
/// `name` is the object key with the listing prefix removed; the remaining
/// fields are copied verbatim from the inspection call.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectMetadataRecord {
    pub name: String,
    pub content_type: String,
    pub content_length: u64,
    pub last_modified: DateTime<Utc>,
}

/// Result of a metadata inspection (HEAD) call.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectHead {
    /// MIME type; [`DEFAULT_CONTENT_TYPE`] when the service reports none.
    pub content_type: String,

    /// Size in bytes.
    pub content_length: u64,

    /// Timestamp of the last write.
    pub last_modified: DateTime<Utc>,
}

/// Raw response of a successful put, kept for logging.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PutReceipt {
    /// Where the object was written.
    pub location: ObjectLocation,

    /// Entity tag returned by the service, if any.
    pub e_tag: Option<String>,

    /// Version identifier when the bucket is versioned.
    pub version_id: Option<String>,
}

impl fmt::Display for PutReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} etag={} version={}",
            self.location,
            self.e_tag.as_deref().unwrap_or("-"),
            self.version_id.as_deref().unwrap_or("-")
        )
    }
}
