//! Bucket and catalog-object grants.

use super::access::AccessType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use std::{fmt, str::FromStr};

use crate::errors::CatalogError;

/// Lowest and highest group grant priority.
pub const MIN_PRIORITY: i32 = 1;
pub const MAX_PRIORITY: i32 = 10;
/// Priority given to group grants created without one.
pub const DEFAULT_PRIORITY: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum GranteeType {
    User,
    Group,
}

impl fmt::Display for GranteeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Group => f.write_str("group"),
        }
    }
}

impl FromStr for GranteeType {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "group" => Ok(Self::Group),
            other => Err(CatalogError::InvalidArgument(format!(
                "unknown grantee type `{}`, expected user or group",
                other
            ))),
        }
    }
}

/// What a grant applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GrantTarget {
    Bucket { bucket: String },
    Object { bucket: String, object: String },
}

impl GrantTarget {
    pub fn bucket(bucket: impl Into<String>) -> Self {
        Self::Bucket {
            bucket: bucket.into(),
        }
    }

    pub fn object(bucket: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Object {
            bucket: bucket.into(),
            object: object.into(),
        }
    }

    pub fn bucket_name(&self) -> &str {
        match self {
            Self::Bucket { bucket } | Self::Object { bucket, .. } => bucket,
        }
    }

    pub fn object_name(&self) -> Option<&str> {
        match self {
            Self::Bucket { .. } => None,
            Self::Object { object, .. } => Some(object),
        }
    }
}

impl fmt::Display for GrantTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bucket { bucket } => write!(f, "bucket `{}`", bucket),
            Self::Object { bucket, object } => write!(f, "object `{}/{}`", bucket, object),
        }
    }
}

/// One entry of a grant's append-only modification log.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ModificationRecord {
    pub modification_date: DateTime<Utc>,
    pub username: String,
    pub old_values: String,
    pub new_values: String,
    /// Human readable diff such as `Right: read => write, Priority: 3 => 7`.
    pub changes: String,
}

/// A bucket grant (`object_name` is `None`) or an object grant.
///
/// User grants carry no priority: they outrank every group grant.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Grant {
    pub id: i64,
    pub bucket_name: String,
    pub object_name: Option<String>,
    pub grantee_type: GranteeType,
    pub grantee: String,
    pub access_type: AccessType,
    pub priority: Option<i32>,
    pub creator: String,
    pub creation_date: DateTime<Utc>,
    pub modification_history: Json<Vec<ModificationRecord>>,
}

impl Grant {
    pub fn target(&self) -> GrantTarget {
        match &self.object_name {
            Some(object) => GrantTarget::object(self.bucket_name.clone(), object.clone()),
            None => GrantTarget::bucket(self.bucket_name.clone()),
        }
    }

    pub fn is_user_grant(&self) -> bool {
        self.grantee_type == GranteeType::User
    }

    /// Priority used when group grants compete.
    pub fn effective_priority(&self) -> i32 {
        self.priority.unwrap_or(DEFAULT_PRIORITY)
    }
}

/// Serialized grant state stored in modification records.
pub fn describe_grant_state(access_type: AccessType, priority: Option<i32>) -> String {
    match priority {
        Some(priority) => format!("accessType={}, priority={}", access_type, priority),
        None => format!("accessType={}", access_type),
    }
}

/// Diff between two grant states, e.g. `Right: read => write, Priority: 3 => 7`.
pub fn describe_grant_changes(
    old_access: AccessType,
    old_priority: Option<i32>,
    new_access: AccessType,
    new_priority: Option<i32>,
) -> String {
    let mut changes = Vec::new();
    if old_access != new_access {
        changes.push(format!("Right: {} => {}", old_access, new_access));
    }
    if old_priority != new_priority {
        let show = |p: Option<i32>| p.map_or_else(|| "none".to_string(), |p| p.to_string());
        changes.push(format!(
            "Priority: {} => {}",
            show(old_priority),
            show(new_priority)
        ));
    }
    if changes.is_empty() {
        "No changes".to_string()
    } else {
        changes.join(", ")
    }
}
