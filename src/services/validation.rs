//! Input validation run at the boundary of every mutating operation, before
//! any state change.

use crate::{
    errors::{CatalogError, CatalogResult},
    models::grant::{DEFAULT_PRIORITY, GranteeType, MAX_PRIORITY, MIN_PRIORITY},
};
use regex::Regex;
use std::sync::LazyLock;

const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

static BUCKET_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]{1,61}[a-z0-9]$").expect("valid regex"));

// Slash separated segments, each starting and ending with an alphanumeric.
static KIND_OR_CONTENT_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z0-9][a-zA-Z0-9_. ;=+\-]{0,61}[a-zA-Z0-9]/?)+$").expect("valid regex")
});

static TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-zA-Z][\s0-9a-zA-Z\-_./]+,*)*$").expect("valid regex"));

/// Validate bucket name format: lowercase letters, digits and hyphens,
/// starting with a letter and ending with a letter or digit, 3 to 63 chars.
pub fn ensure_bucket_name_valid(name: &str) -> CatalogResult<()> {
    let invalid = |reason: &str| CatalogError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err(invalid("must be between 3 and 63 characters"));
    }
    if !BUCKET_NAME.is_match(name) {
        return Err(invalid(
            "must start with a lowercase letter, end with a letter or digit, \
             and contain only lowercase letters, digits and hyphens",
        ));
    }
    Ok(())
}

pub fn ensure_object_name_valid(name: &str) -> CatalogResult<()> {
    if name.is_empty() || name.trim() != name {
        return Err(CatalogError::InvalidObjectName(name.to_string()));
    }
    Ok(())
}

pub fn ensure_kind_valid(kind: &str) -> CatalogResult<()> {
    ensure_kind_or_content_type(kind, "kind")
}

pub fn ensure_content_type_valid(content_type: &str) -> CatalogResult<()> {
    ensure_kind_or_content_type(content_type, "content type")
}

fn ensure_kind_or_content_type(value: &str, field: &'static str) -> CatalogResult<()> {
    if KIND_OR_CONTENT_TYPE.is_match(value) {
        Ok(())
    } else {
        Err(CatalogError::InvalidKindOrContentType {
            field,
            value: value.to_string(),
        })
    }
}

/// Comma separated tags. An empty string is valid and clears the tags.
pub fn ensure_tags_valid(tags: &str) -> CatalogResult<()> {
    if tags.ends_with(',') || !TAGS.is_match(tags) {
        return Err(CatalogError::InvalidTags(tags.to_string()));
    }
    Ok(())
}

/// Check a grant's priority and return the one to store.
///
/// User grants never store a priority. Group grants default to
/// [`DEFAULT_PRIORITY`] and must stay within `MIN_PRIORITY..=MAX_PRIORITY`.
pub fn normalize_priority(
    grantee_type: GranteeType,
    priority: Option<i32>,
) -> CatalogResult<Option<i32>> {
    match grantee_type {
        GranteeType::User => Ok(None),
        GranteeType::Group => {
            let priority = priority.unwrap_or(DEFAULT_PRIORITY);
            if (MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
                Ok(Some(priority))
            } else {
                Err(CatalogError::InvalidArgument(format!(
                    "priority {} out of range {}..={}",
                    priority, MIN_PRIORITY, MAX_PRIORITY
                )))
            }
        }
    }
}

pub fn ensure_grantee_valid(grantee: &str) -> CatalogResult<()> {
    if grantee.trim().is_empty() {
        return Err(CatalogError::InvalidArgument(
            "grantee must not be empty".into(),
        ));
    }
    Ok(())
}

pub fn ensure_page_valid(page_offset: i64, page_size: i64) -> CatalogResult<()> {
    if page_offset < 0 {
        return Err(CatalogError::InvalidArgument(format!(
            "page offset must not be negative, got {}",
            page_offset
        )));
    }
    if page_size < 1 {
        return Err(CatalogError::InvalidArgument(format!(
            "page size must be at least 1, got {}",
            page_size
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_names() {
        for ok in ["basic-examples", "b12", "my-bucket-1"] {
            assert!(ensure_bucket_name_valid(ok).is_ok(), "{ok}");
        }
        for bad in ["ab", "1bucket", "Bucket", "bucket-", "buck_et", "bu cket", ""] {
            assert!(ensure_bucket_name_valid(bad).is_err(), "{bad}");
        }
        assert!(ensure_bucket_name_valid(&"a".repeat(64)).is_err());
    }

    #[test]
    fn object_names_reject_surrounding_whitespace() {
        assert!(ensure_object_name_valid("My Workflow").is_ok());
        assert!(ensure_object_name_valid(" wf").is_err());
        assert!(ensure_object_name_valid("wf\t").is_err());
        assert!(ensure_object_name_valid("").is_err());
    }

    #[test]
    fn kinds_and_content_types() {
        for ok in [
            "Workflow",
            "workflow/standard",
            "Script/python",
            "application/xml",
            "text/x-python",
            "application/json; charset=utf-8",
        ] {
            assert!(ensure_kind_valid(ok).is_ok(), "{ok}");
        }
        for bad in ["workflow/ standard", "/workflow", "a", "wf//x", "wf/x?", ""] {
            assert!(ensure_kind_valid(bad).is_err(), "{bad}");
        }
        let err = ensure_content_type_valid("text/ plain").unwrap_err();
        assert!(matches!(
            err,
            CatalogError::InvalidKindOrContentType {
                field: "content type",
                ..
            }
        ));
    }

    #[test]
    fn tags() {
        for ok in ["", "t1", "t1,t2", "machine learning,ai/ml"] {
            assert!(ensure_tags_valid(ok).is_ok(), "{ok}");
        }
        for bad in ["t1,", "1t", "t", "t1,,2x"] {
            assert!(ensure_tags_valid(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn priorities() {
        assert_eq!(normalize_priority(GranteeType::User, Some(9)).unwrap(), None);
        assert_eq!(normalize_priority(GranteeType::Group, None).unwrap(), Some(5));
        assert_eq!(normalize_priority(GranteeType::Group, Some(10)).unwrap(), Some(10));
        assert!(normalize_priority(GranteeType::Group, Some(0)).is_err());
        assert!(normalize_priority(GranteeType::Group, Some(11)).is_err());
    }

    #[test]
    fn pages() {
        assert!(ensure_page_valid(0, 1).is_ok());
        assert!(ensure_page_valid(-1, 10).is_err());
        assert!(ensure_page_valid(0, 0).is_err());
    }
}
