//! Represents a bucket, the top-level container of catalog objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Prefix marking a bucket owner as a group rather than a username.
pub const GROUP_PREFIX: &str = "GROUP:";

/// Reserved owner of public buckets: readable and administrable by everyone.
pub const PUBLIC_OWNER: &str = "GROUP:public-objects";

/// A named grouping of catalog objects with a single owner.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Row id; ascending ids give the creation order.
    pub id: i64,

    /// Unique bucket name.
    pub name: String,

    /// Either a username or a `GROUP:` prefixed group name.
    pub owner: String,

    pub created_at: DateTime<Utc>,
}

impl Bucket {
    pub fn is_public(&self) -> bool {
        self.owner == PUBLIC_OWNER
    }
}

/// Bucket listing row with the number of objects that matched the filters.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct BucketSummary {
    #[serde(skip)]
    pub id: i64,
    pub name: String,
    pub owner: String,
    pub object_count: i64,
}

/// Group name carried by a `GROUP:` owner, matched case-insensitively.
pub fn owner_group(owner: &str) -> Option<&str> {
    let prefix = owner.get(..GROUP_PREFIX.len())?;
    if prefix.eq_ignore_ascii_case(GROUP_PREFIX) {
        owner.get(GROUP_PREFIX.len()..)
    } else {
        None
    }
}

/// Value stored in the `group` generic-information entry of each object.
pub fn owner_display_group(owner: &str) -> &str {
    owner_group(owner).unwrap_or(owner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_group_strips_the_prefix() {
        assert_eq!(owner_group("GROUP:ops"), Some("ops"));
        assert_eq!(owner_group("group:ops"), Some("ops"));
        assert_eq!(owner_group(PUBLIC_OWNER), Some("public-objects"));
        assert_eq!(owner_group("alice"), None);
        assert_eq!(owner_display_group("alice"), "alice");
    }
}
