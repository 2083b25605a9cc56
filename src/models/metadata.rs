//! Key/value/label metadata attached to every revision.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// System-synthesized entries such as the owning group and bucket name.
pub const GENERIC_INFORMATION_LABEL: &str = "generic_information";
/// Dependency references: key `bucket/object`, value pinned commit time or `latest`.
pub const DEPENDS_ON_LABEL: &str = "depends_on";
/// One entry per tag, key and value both hold the tag.
pub const OBJECT_TAG_LABEL: &str = "object_tag";
pub const JOB_INFORMATION_LABEL: &str = "job_information";

pub const PROJECT_NAME_KEY: &str = "project_name";
pub const GROUP_KEY: &str = "group";
pub const BUCKET_NAME_KEY: &str = "bucketName";

/// Depends-on value meaning "whatever revision is current".
pub const LATEST_VERSION: &str = "latest";

#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct Metadata {
    pub key: String,
    pub value: String,
    pub label: Option<String>,
}

impl Metadata {
    pub fn new(key: impl Into<String>, value: impl Into<String>, label: Option<&str>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            label: label.map(str::to_string),
        }
    }

    pub fn labeled(key: impl Into<String>, value: impl Into<String>, label: &str) -> Self {
        Self::new(key, value, Some(label))
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.label.as_deref() == Some(label)
    }
}
