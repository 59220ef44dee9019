use crate::models::object::ObjectLocation;
use std::io;
use thiserror::Error;

/// Failures reported by an [`ObjectStoreClient`](crate::clients::ObjectStoreClient).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    /// Error raised by the storage service or its SDK, rendered with its source chain.
    #[error("storage service error: {0}")]
    Service(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Failures reported by the gateway's rich (`try_*`) operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Upload or download did not complete.
    #[error("transfer of `{location}` failed: {source}")]
    Transfer {
        location: ObjectLocation,
        #[source]
        source: ClientError,
    },

    /// A single metadata lookup failed during a listing.
    #[error("inspection of `{key}` failed: {source}")]
    Inspection {
        key: String,
        #[source]
        source: ClientError,
    },

    /// A listing page could not be fetched.
    #[error("listing bucket `{bucket}` failed: {source}")]
    Listing {
        bucket: String,
        #[source]
        source: ClientError,
    },
}

impl GatewayError {
    /// The client-level cause behind this failure.
    pub fn client_error(&self) -> &ClientError {
        match self {
            GatewayError::Transfer { source, .. }
            | GatewayError::Inspection { source, .. }
            | GatewayError::Listing { source, .. } => source,
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
