//! BucketService: bucket lifecycle, ownership and filtered listings.

use crate::{
    db::{count_objects, is_unique_violation},
    errors::{CatalogError, CatalogResult},
    models::{
        bucket::{Bucket, BucketSummary, PUBLIC_OWNER},
        object::ObjectSummary,
    },
    services::{
        association::{AssociationFilter, BucketAssociations, statuses_of},
        catalog_object_service::{
            ObjectFilter, objects_in_bucket, push_object_filters, recommit_current, summary_query,
        },
        grant_store::delete_bucket_grants,
        validation::ensure_bucket_name_valid,
    },
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, SqliteConnection, SqlitePool, sqlite::Sqlite};
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info};

/// Commit message of the revisions created by an owner change.
pub const OWNER_UPDATE_COMMIT_MESSAGE: &str = "The bucket owner has been updated";

/// Filters of [`BucketService::list_buckets`]. Buckets are counted by the
/// objects matching `objects`; any object filter hides buckets with no match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketFilter {
    /// Only buckets owned by one of these; `None` or empty means any owner.
    pub owners: Option<Vec<String>>,
    pub objects: ObjectFilter,
    /// `ALL`, `UNPLANNED` or a concrete status, see [`AssociationFilter`].
    pub association_status: Option<String>,
}

/// Fetch a bucket by name.
pub(crate) async fn fetch_bucket(conn: &mut SqliteConnection, name: &str) -> CatalogResult<Bucket> {
    sqlx::query_as::<_, Bucket>("SELECT id, name, owner, created_at FROM buckets WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| CatalogError::BucketNotFound(name.to_string()))
}

async fn remove_bucket(conn: &mut SqliteConnection, bucket: &Bucket) -> CatalogResult<()> {
    let grants = delete_bucket_grants(&mut *conn, bucket.id).await?;
    sqlx::query("DELETE FROM buckets WHERE id = ?")
        .bind(bucket.id)
        .execute(&mut *conn)
        .await?;
    info!("deleted bucket `{}` and {} grant(s)", bucket.name, grants);
    Ok(())
}

#[derive(Clone)]
pub struct BucketService {
    db: Arc<SqlitePool>,
}

impl BucketService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Create a bucket owned by `owner`, or publicly when no owner is given.
    pub async fn create_bucket(&self, name: &str, owner: Option<&str>) -> CatalogResult<Bucket> {
        ensure_bucket_name_valid(name)?;
        let owner = owner
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .unwrap_or(PUBLIC_OWNER);
        let created_at = Utc::now();

        let inserted = sqlx::query("INSERT INTO buckets (name, owner, created_at) VALUES (?, ?, ?)")
            .bind(name)
            .bind(owner)
            .bind(created_at)
            .execute(&*self.db)
            .await;

        let id = match inserted {
            Ok(result) => result.last_insert_rowid(),
            Err(err) if is_unique_violation(&err) => {
                return Err(CatalogError::BucketAlreadyExists(name.to_string()));
            }
            Err(err) => return Err(CatalogError::Sqlx(err)),
        };

        info!("created bucket `{}` owned by {}", name, owner);
        Ok(Bucket {
            id,
            name: name.to_string(),
            owner: owner.to_string(),
            created_at,
        })
    }

    pub async fn get_bucket(&self, name: &str) -> CatalogResult<Bucket> {
        let mut conn = self.db.acquire().await?;
        fetch_bucket(&mut conn, name).await
    }

    /// Buckets with the number of their objects matching the filters, in
    /// creation order.
    ///
    /// Association statuses are not stored with the objects, so that filter
    /// runs as a second pass over the matching objects of the candidate
    /// buckets and recounts them.
    pub async fn list_buckets(
        &self,
        filter: &BucketFilter,
        associations: &[BucketAssociations],
    ) -> CatalogResult<Vec<BucketSummary>> {
        let mut conn = self.db.acquire().await?;

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT b.id, b.name, b.owner, COUNT(o.id) AS object_count
             FROM buckets b
             LEFT JOIN catalog_objects o ON o.bucket_id = b.id
             LEFT JOIN revisions r ON r.object_id = o.id
                  AND r.commit_time = (SELECT MAX(r2.commit_time) FROM revisions r2
                                       WHERE r2.object_id = o.id)
             WHERE 1 = 1",
        );
        if let Some(owners) = filter.owners.as_ref().filter(|o| !o.is_empty()) {
            builder.push(" AND b.owner IN (");
            let mut separated = builder.separated(", ");
            for owner in owners {
                separated.push_bind(owner.clone());
            }
            separated.push_unseparated(")");
        }
        push_object_filters(&mut builder, &filter.objects);
        builder.push(" GROUP BY b.id, b.name, b.owner");
        if filter.objects.narrows_objects() {
            builder.push(" HAVING COUNT(o.id) > 0");
        }
        builder.push(" ORDER BY b.id ASC");

        let mut buckets = builder
            .build_query_as::<BucketSummary>()
            .fetch_all(&mut *conn)
            .await?;

        let Some(status) = filter
            .association_status
            .as_deref()
            .and_then(AssociationFilter::parse)
        else {
            return Ok(buckets);
        };
        if buckets.is_empty() {
            return Ok(buckets);
        }

        let names: Vec<String> = buckets.iter().map(|b| b.name.clone()).collect();
        let objects = summary_query(&names, &filter.objects)
            .build_query_as::<ObjectSummary>()
            .fetch_all(&mut *conn)
            .await?;

        let mut counts: HashMap<&str, i64> = HashMap::new();
        for object in &objects {
            if status.matches(statuses_of(associations, &object.bucket_name, &object.name)) {
                *counts.entry(object.bucket_name.as_str()).or_default() += 1;
            }
        }
        debug!(
            "association filter {:?} kept {} of {} object(s)",
            status,
            counts.values().sum::<i64>(),
            objects.len()
        );

        buckets.retain_mut(|bucket| match counts.get(bucket.name.as_str()) {
            Some(&count) => {
                bucket.object_count = count;
                true
            }
            None => false,
        });
        Ok(buckets)
    }

    /// Delete a bucket holding no objects, removing its grants first.
    pub async fn delete_empty_bucket(&self, name: &str) -> CatalogResult<Bucket> {
        let mut tx = self.db.begin().await?;
        let bucket = fetch_bucket(&mut tx, name).await?;
        let objects = count_objects(&mut tx, bucket.id).await?;
        if objects > 0 {
            return Err(CatalogError::BucketNotEmpty {
                name: name.to_string(),
                objects,
            });
        }
        remove_bucket(&mut tx, &bucket).await?;
        tx.commit().await?;
        Ok(bucket)
    }

    /// Delete every empty bucket; returns their names.
    pub async fn clean_all_empty_buckets(&self) -> CatalogResult<Vec<String>> {
        let mut tx = self.db.begin().await?;
        let empty = sqlx::query_as::<_, Bucket>(
            "SELECT b.id, b.name, b.owner, b.created_at FROM buckets b
             WHERE NOT EXISTS (SELECT 1 FROM catalog_objects o WHERE o.bucket_id = b.id)
             ORDER BY b.id ASC",
        )
        .fetch_all(&mut *tx)
        .await?;
        for bucket in &empty {
            remove_bucket(&mut tx, bucket).await?;
        }
        tx.commit().await?;

        info!("cleaned {} empty bucket(s)", empty.len());
        Ok(empty.into_iter().map(|b| b.name).collect())
    }

    /// Reassign a bucket and commit a new revision of each of its objects
    /// so their `group` metadata follows the new owner.
    pub async fn update_owner(&self, name: &str, owner: &str, username: &str) -> CatalogResult<Bucket> {
        let owner = owner.trim();
        if owner.is_empty() {
            return Err(CatalogError::InvalidArgument("bucket owner must not be empty".into()));
        }

        let mut tx = self.db.begin().await?;
        let mut bucket = fetch_bucket(&mut tx, name).await?;
        sqlx::query("UPDATE buckets SET owner = ? WHERE id = ?")
            .bind(owner)
            .bind(bucket.id)
            .execute(&mut *tx)
            .await?;
        bucket.owner = owner.to_string();

        let objects = objects_in_bucket(&mut tx, bucket.id).await?;
        for object in &objects {
            recommit_current(&mut tx, object, owner, OWNER_UPDATE_COMMIT_MESSAGE, username).await?;
        }
        tx.commit().await?;

        info!(
            "bucket `{}` now owned by {} ({} object(s) recommitted)",
            bucket.name,
            bucket.owner,
            objects.len()
        );
        Ok(bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{
            access::AccessType,
            grant::{GrantTarget, GranteeType},
            metadata::{GENERIC_INFORMATION_LABEL, GROUP_KEY},
        },
        services::association::ObjectAssociation,
        test_support::{catalog, new_object, put_object},
    };

    #[tokio::test]
    async fn create_validates_and_defaults_owner() {
        let catalog = catalog().await;
        let bucket = catalog.buckets.create_bucket("public-stuff", None).await.unwrap();
        assert_eq!(bucket.owner, PUBLIC_OWNER);
        assert!(bucket.is_public());

        let err = catalog
            .buckets
            .create_bucket("public-stuff", Some("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::BucketAlreadyExists(_)));

        for bad in ["Upper", "ab", "trailing-", "9starts-with-digit"] {
            let err = catalog.buckets.create_bucket(bad, None).await.unwrap_err();
            assert!(matches!(err, CatalogError::InvalidBucketName { .. }), "{bad}");
        }

        let fetched = catalog.buckets.get_bucket("public-stuff").await.unwrap();
        assert_eq!(fetched.id, bucket.id);
        assert!(matches!(
            catalog.buckets.get_bucket("missing").await.unwrap_err(),
            CatalogError::BucketNotFound(_)
        ));
    }

    #[tokio::test]
    async fn only_empty_buckets_are_deleted() {
        let catalog = catalog().await;
        catalog.buckets.create_bucket("full", None).await.unwrap();
        catalog.buckets.create_bucket("empty", Some("GROUP:dev")).await.unwrap();
        put_object(&catalog, "full", "wf").await;
        catalog
            .grants
            .create_grant(
                &GrantTarget::bucket("empty"),
                GranteeType::User,
                "alice",
                AccessType::Read,
                None,
                "admin",
            )
            .await
            .unwrap();

        let err = catalog.buckets.delete_empty_bucket("full").await.unwrap_err();
        assert!(matches!(err, CatalogError::BucketNotEmpty { objects: 1, .. }));

        catalog.buckets.delete_empty_bucket("empty").await.unwrap();
        assert!(matches!(
            catalog.buckets.delete_empty_bucket("empty").await.unwrap_err(),
            CatalogError::BucketNotFound(_)
        ));
        let leftover = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM grants")
            .fetch_one(catalog.pool())
            .await
            .unwrap();
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn clean_removes_every_empty_bucket() {
        let catalog = catalog().await;
        for name in ["aaa", "bbb", "ccc"] {
            catalog.buckets.create_bucket(name, None).await.unwrap();
        }
        put_object(&catalog, "bbb", "wf").await;

        let removed = catalog.buckets.clean_all_empty_buckets().await.unwrap();
        assert_eq!(removed, vec!["aaa".to_string(), "ccc".to_string()]);
        let left = catalog
            .buckets
            .list_buckets(&BucketFilter::default(), &[])
            .await
            .unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].name, "bbb");
    }

    #[tokio::test]
    async fn owner_change_recommits_every_object() {
        let catalog = catalog().await;
        catalog.buckets.create_bucket("team", Some("GROUP:dev")).await.unwrap();
        let first = put_object(&catalog, "team", "one").await;
        put_object(&catalog, "team", "two").await;

        let bucket = catalog
            .buckets
            .update_owner("team", "GROUP:ops", "admin")
            .await
            .unwrap();
        assert_eq!(bucket.owner, "GROUP:ops");

        for name in ["one", "two"] {
            let history = catalog.objects.list_revisions("team", name).await.unwrap();
            assert_eq!(history.len(), 2);
            let current = &history[0];
            assert_eq!(current.commit_message, OWNER_UPDATE_COMMIT_MESSAGE);
            assert_eq!(current.username, "admin");
            let group = current
                .metadata
                .iter()
                .find(|m| m.key == GROUP_KEY && m.has_label(GENERIC_INFORMATION_LABEL))
                .unwrap();
            assert_eq!(group.value, "ops");
        }

        let raw = catalog.objects.get_raw_object("team", "one", None).await.unwrap();
        let old = catalog
            .objects
            .get_raw_object("team", "one", Some(first.commit_time))
            .await
            .unwrap();
        assert_eq!(raw.content, old.content);
    }

    #[tokio::test]
    async fn listing_counts_matching_objects() {
        let catalog = catalog().await;
        catalog.buckets.create_bucket("flows", Some("GROUP:dev")).await.unwrap();
        catalog.buckets.create_bucket("scripts", Some("alice")).await.unwrap();
        catalog.buckets.create_bucket("empty", Some("GROUP:dev")).await.unwrap();

        catalog
            .objects
            .create_object(new_object("flows", "etl", "Workflow/standard", b"x"))
            .await
            .unwrap();
        let mut tagged = new_object("flows", "pca", "Workflow/pca", b"x");
        tagged.tags = Some("nightly".into());
        catalog.objects.create_object(tagged).await.unwrap();
        catalog
            .objects
            .create_object(new_object("scripts", "clean", "Script", b"x"))
            .await
            .unwrap();

        let all = catalog
            .buckets
            .list_buckets(&BucketFilter::default(), &[])
            .await
            .unwrap();
        let counts: Vec<_> = all.iter().map(|b| (b.name.as_str(), b.object_count)).collect();
        assert_eq!(counts, vec![("flows", 2), ("scripts", 1), ("empty", 0)]);

        let by_owner = catalog
            .buckets
            .list_buckets(
                &BucketFilter {
                    owners: Some(vec!["GROUP:dev".into()]),
                    ..Default::default()
                },
                &[],
            )
            .await
            .unwrap();
        assert_eq!(by_owner.len(), 2);

        let by_kind = catalog
            .buckets
            .list_buckets(
                &BucketFilter {
                    objects: ObjectFilter {
                        kind: Some("workflow".into()),
                        ..Default::default()
                    },
                    ..Default::default()
                },
                &[],
            )
            .await
            .unwrap();
        assert_eq!(by_kind.len(), 1);
        assert_eq!((by_kind[0].name.as_str(), by_kind[0].object_count), ("flows", 2));

        let by_tag = catalog
            .buckets
            .list_buckets(
                &BucketFilter {
                    objects: ObjectFilter {
                        tag: Some("nightly".into()),
                        ..Default::default()
                    },
                    ..Default::default()
                },
                &[],
            )
            .await
            .unwrap();
        assert_eq!(by_tag.len(), 1);
        assert_eq!(by_tag[0].object_count, 1);

        let associations = vec![BucketAssociations {
            bucket_name: "flows".into(),
            objects: vec![ObjectAssociation {
                object_name: "etl".into(),
                statuses: vec!["PLANNED".into()],
            }],
        }];
        let planned = catalog
            .buckets
            .list_buckets(
                &BucketFilter {
                    association_status: Some("planned".into()),
                    ..Default::default()
                },
                &associations,
            )
            .await
            .unwrap();
        assert_eq!(planned.len(), 1);
        assert_eq!((planned[0].name.as_str(), planned[0].object_count), ("flows", 1));

        let unplanned = catalog
            .buckets
            .list_buckets(
                &BucketFilter {
                    association_status: Some("UNPLANNED".into()),
                    ..Default::default()
                },
                &associations,
            )
            .await
            .unwrap();
        let counts: Vec<_> = unplanned
            .iter()
            .map(|b| (b.name.as_str(), b.object_count))
            .collect();
        assert_eq!(counts, vec![("flows", 1), ("scripts", 1)]);
    }
}
