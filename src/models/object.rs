//! Catalog objects and their revisions.

use super::metadata::Metadata;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A named, kind-typed entity inside a bucket.
///
/// `(bucket, name)` is immutable once created. Kind and content type may be
/// changed by a metadata update, which also commits a new revision.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct CatalogObject {
    #[serde(skip)]
    pub id: i64,
    #[serde(skip)]
    pub bucket_id: i64,
    pub bucket_name: String,
    pub name: String,

    /// Hierarchical, slash separated (e.g. `Workflow/standard`).
    pub kind: String,
    pub content_type: String,
    pub extension: Option<String>,

    /// Highest commit time ever assigned to this object.
    pub last_commit_time: i64,
}

/// Immutable snapshot of an object's content and metadata.
///
/// The current revision of an object is the one with the greatest
/// `commit_time`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Revision {
    #[serde(skip)]
    pub id: i64,
    pub bucket_name: String,
    pub object_name: String,
    pub kind: String,
    pub content_type: String,
    pub extension: Option<String>,

    /// Milliseconds since the epoch, strictly increasing per object.
    pub commit_time: i64,
    pub commit_message: String,
    pub username: String,
    pub project_name: String,

    /// Comma joined view of the `object_tag` metadata entries.
    pub tags: String,

    /// MD5 of the raw content, lowercase hex.
    pub checksum: String,

    #[sqlx(skip)]
    pub metadata: Vec<Metadata>,
}

/// Raw bytes of one revision.
#[derive(Clone, Debug)]
pub struct RawObject {
    pub bucket_name: String,
    pub object_name: String,
    pub commit_time: i64,
    pub content_type: String,
    pub extension: Option<String>,
    pub content: Bytes,
}

impl RawObject {
    /// File name suggested when the content is exported.
    pub fn file_name(&self) -> String {
        match &self.extension {
            Some(ext) if !ext.is_empty() => format!("{}.{}", self.object_name, ext),
            _ => self.object_name.clone(),
        }
    }
}

/// Listing row describing an object through its current revision.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct ObjectSummary {
    pub bucket_name: String,
    pub name: String,
    pub kind: String,
    pub content_type: String,
    pub commit_time: i64,
    pub commit_message: String,
    pub username: String,
    pub project_name: String,
    pub tags: String,
}
