//! Dependency graph between catalog objects.
//!
//! Edges are not stored on their own: they are the `depends_on` metadata
//! entries of revisions (key `bucket/object`, value a pinned commit time or
//! `latest`). Whether a target exists is checked against the live catalog on
//! every read, and `called_by` only looks at the current revision of the
//! other objects.

use crate::{
    errors::CatalogResult,
    models::metadata::{DEPENDS_ON_LABEL, LATEST_VERSION, Metadata},
    services::catalog_object_service::{fetch_object, fetch_revision},
};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use std::{collections::HashSet, sync::Arc};
use tracing::debug;

/// A `depends_on` entry parsed out of a revision's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRef {
    pub bucket_name: String,
    pub object_name: String,
    /// `None` follows whatever revision is current.
    pub pinned_commit_time: Option<i64>,
}

impl DependencyRef {
    pub fn reference(&self) -> String {
        format!("{}/{}", self.bucket_name, self.object_name)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DependsOnObject {
    pub bucket_name: String,
    pub object_name: String,
    pub pinned_commit_time: Option<i64>,
    pub is_in_catalog: bool,
    /// Current kind of the target, `None` when it is not in the catalog.
    pub kind: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectDependencies {
    pub depends_on: Vec<DependsOnObject>,
    /// `bucket/object` references of current revisions depending on the object.
    pub called_by: Vec<String>,
}

fn parse_pin(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case(LATEST_VERSION) {
        return None;
    }
    value.parse().ok()
}

/// Depends-on references of a metadata list, deduplicated by reference with
/// the first occurrence kept. Keys without a `bucket/object` shape are
/// skipped.
pub fn depends_on_refs(metadata: &[Metadata]) -> Vec<DependencyRef> {
    let mut seen = HashSet::new();
    let mut refs = Vec::new();
    for entry in metadata.iter().filter(|m| m.has_label(DEPENDS_ON_LABEL)) {
        let Some((bucket, object)) = entry.key.split_once('/') else {
            debug!("ignoring malformed depends_on key `{}`", entry.key);
            continue;
        };
        let (bucket, object) = (bucket.trim(), object.trim());
        if bucket.is_empty() || object.is_empty() {
            debug!("ignoring malformed depends_on key `{}`", entry.key);
            continue;
        }
        if !seen.insert((bucket.to_string(), object.to_string())) {
            continue;
        }
        refs.push(DependencyRef {
            bucket_name: bucket.to_string(),
            object_name: object.to_string(),
            pinned_commit_time: parse_pin(&entry.value),
        });
    }
    refs
}

async fn live_target(
    conn: &mut SqliteConnection,
    dependency: &DependencyRef,
) -> CatalogResult<Option<String>> {
    let found = sqlx::query_as::<_, (i64, String)>(
        "SELECT o.id, o.kind FROM catalog_objects o JOIN buckets b ON b.id = o.bucket_id
         WHERE b.name = ? AND o.name = ?",
    )
    .bind(&dependency.bucket_name)
    .bind(&dependency.object_name)
    .fetch_optional(&mut *conn)
    .await?;

    let Some((object_id, kind)) = found else {
        return Ok(None);
    };
    let Some(commit_time) = dependency.pinned_commit_time else {
        return Ok(Some(kind));
    };
    let pinned = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM revisions WHERE object_id = ? AND commit_time = ?",
    )
    .bind(object_id)
    .bind(commit_time)
    .fetch_one(&mut *conn)
    .await?;
    Ok((pinned > 0).then_some(kind))
}

#[derive(Clone)]
pub struct DependencyService {
    db: Arc<SqlitePool>,
}

impl DependencyService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Dependencies of a revision (the current one when `commit_time` is
    /// `None`) and the objects currently depending on it.
    pub async fn get_object_dependencies(
        &self,
        bucket: &str,
        name: &str,
        commit_time: Option<i64>,
    ) -> CatalogResult<ObjectDependencies> {
        let mut conn = self.db.acquire().await?;
        let object = fetch_object(&mut conn, bucket, name).await?;
        let revision = fetch_revision(&mut conn, &object, commit_time).await?;

        let mut depends_on = Vec::new();
        for dependency in depends_on_refs(&revision.metadata) {
            let kind = live_target(&mut conn, &dependency).await?;
            depends_on.push(DependsOnObject {
                is_in_catalog: kind.is_some(),
                kind,
                bucket_name: dependency.bucket_name,
                object_name: dependency.object_name,
                pinned_commit_time: dependency.pinned_commit_time,
            });
        }

        let called_by = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT b.name || '/' || o.name
             FROM revision_metadata m
             JOIN revisions r ON r.id = m.revision_id
             JOIN catalog_objects o ON o.id = r.object_id
             JOIN buckets b ON b.id = o.bucket_id
             WHERE m.label = ? AND m.key = ? AND o.id <> ?
               AND r.commit_time = (SELECT MAX(r2.commit_time) FROM revisions r2
                                    WHERE r2.object_id = o.id)
             ORDER BY 1 ASC",
        )
        .bind(DEPENDS_ON_LABEL)
        .bind(format!("{}/{}", object.bucket_name, object.name))
        .bind(object.id)
        .fetch_all(&mut *conn)
        .await?;

        debug!(
            "`{}/{}` depends on {} object(s), called by {}",
            object.bucket_name,
            object.name,
            depends_on.len(),
            called_by.len()
        );
        Ok(ObjectDependencies {
            depends_on,
            called_by,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::CatalogError,
        test_support::{catalog, new_object, new_revision},
    };

    fn depends(key: &str, value: &str) -> Metadata {
        Metadata::labeled(key, value, DEPENDS_ON_LABEL)
    }

    #[test]
    fn refs_are_deduplicated_and_pins_parsed() {
        let refs = depends_on_refs(&[
            depends("b/sub", "latest"),
            depends("b/pinned", "1700000000000"),
            depends("b/sub", "12"),
            depends("no-slash", "latest"),
            depends("/missing-bucket", ""),
            Metadata::labeled("b/other", "latest", "object_tag"),
        ]);
        assert_eq!(
            refs,
            vec![
                DependencyRef {
                    bucket_name: "b".into(),
                    object_name: "sub".into(),
                    pinned_commit_time: None,
                },
                DependencyRef {
                    bucket_name: "b".into(),
                    object_name: "pinned".into(),
                    pinned_commit_time: Some(1_700_000_000_000),
                },
            ]
        );
        assert_eq!(refs[1].reference(), "b/pinned");
    }

    #[tokio::test]
    async fn dependencies_reflect_the_live_catalog() {
        let catalog = catalog().await;
        catalog.buckets.create_bucket("lib", None).await.unwrap();
        let sub = catalog
            .objects
            .create_object(new_object("lib", "sub", "Workflow/sub", b"x"))
            .await
            .unwrap();

        let mut main = new_object("lib", "main", "Workflow", b"x");
        main.metadata = Some(vec![
            depends("lib/sub", "latest"),
            depends("lib/sub", "latest"),
            depends("lib/gone", "latest"),
            depends("lib/sub-pinned", "1"),
        ]);
        catalog.objects.create_object(main).await.unwrap();
        catalog
            .objects
            .create_object(new_object("lib", "sub-pinned", "Script", b"x"))
            .await
            .unwrap();

        let deps = catalog
            .dependencies
            .get_object_dependencies("lib", "main", None)
            .await
            .unwrap();
        assert_eq!(deps.depends_on.len(), 3);
        assert!(deps.depends_on[0].is_in_catalog);
        assert_eq!(deps.depends_on[0].kind.as_deref(), Some("Workflow/sub"));
        assert!(!deps.depends_on[1].is_in_catalog);
        assert_eq!(deps.depends_on[1].kind, None);
        // The object exists but not at the pinned commit time.
        assert!(!deps.depends_on[2].is_in_catalog);
        assert!(deps.called_by.is_empty());

        let callers = catalog
            .dependencies
            .get_object_dependencies("lib", "sub", Some(sub.commit_time))
            .await
            .unwrap();
        assert_eq!(callers.called_by, vec!["lib/main".to_string()]);

        // A caller that moved on no longer counts.
        catalog
            .objects
            .create_revision("lib", "main", new_revision("drop deps"))
            .await
            .unwrap();
        let callers = catalog
            .dependencies
            .get_object_dependencies("lib", "sub", None)
            .await
            .unwrap();
        assert!(callers.called_by.is_empty());

        let err = catalog
            .dependencies
            .get_object_dependencies("lib", "sub", Some(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::RevisionNotFound { .. }));
    }
}
