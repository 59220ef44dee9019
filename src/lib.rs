//! Upload, download and metadata listing against an object store.
//!
//! [`ObjectStoreGateway`] wraps an injected [`ObjectStoreClient`]; the crate
//! ships an AWS SDK backed client ([`S3ObjectStore`]) and a local disk +
//! SQLite one ([`LocalObjectStore`]).

pub mod clients;
pub mod config;
pub mod errors;
pub mod models;
pub mod services;

pub use clients::{
    ObjectStoreClient, local_client::LocalObjectStore, s3_client::S3ObjectStore,
};
pub use errors::{ClientError, GatewayError};
pub use models::object::{ObjectLocation, ObjectMetadataRecord};
pub use services::gateway_service::{MetadataListing, ObjectStoreGateway, PrefixStripping};
