//! Pages produced by a client's paginated listing.

use serde::{Deserialize, Serialize};

/// A key as it appears in a listing page, before inspection.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ListedObject {
    pub key: String,
    pub size: u64,
}

impl ListedObject {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
        }
    }
}

/// One page of a listing. A page may be empty.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectPage {
    /// Objects in the order the service delivered them.
    pub objects: Vec<ListedObject>,

    /// Cursor for the next page, `None` on the last page.
    pub next_continuation_token: Option<String>,
}

impl ObjectPage {
    pub fn new(objects: Vec<ListedObject>, next_continuation_token: Option<String>) -> Self {
        Self {
            objects,
            next_continuation_token,
        }
    }
}
