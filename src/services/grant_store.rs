//! GrantStore: bucket and object grant persistence.
//!
//! Bucket grants and object grants share one table; an object grant carries
//! the id of its object as well as the id of the object's bucket. Grants
//! never cascade: the bucket and object deletion paths call
//! [`delete_bucket_grants`] / [`delete_object_grants`] inside their own
//! transaction before removing the target row.

use crate::{
    db::is_unique_violation,
    errors::{CatalogError, CatalogResult},
    models::{
        access::AccessType,
        grant::{
            Grant, GrantTarget, GranteeType, ModificationRecord, describe_grant_changes,
            describe_grant_state,
        },
        identity::AuthenticatedUser,
    },
    services::validation::{ensure_grantee_valid, normalize_priority},
};
use chrono::Utc;
use sqlx::{QueryBuilder, SqliteConnection, SqlitePool, sqlite::Sqlite, types::Json};
use std::sync::Arc;
use tracing::info;

const GRANT_COLUMNS: &str = "SELECT g.id, b.name AS bucket_name, o.name AS object_name, \
     g.grantee_type, g.grantee, g.access_type, g.priority, g.creator, g.creation_date, \
     g.modification_history \
     FROM grants g \
     JOIN buckets b ON b.id = g.bucket_id \
     LEFT JOIN catalog_objects o ON o.id = g.object_id \
     WHERE ";

/// Which grants a lookup covers.
#[derive(Debug, Clone, Copy)]
pub(crate) enum GrantScope {
    /// Bucket-level grants of one bucket.
    Bucket(i64),
    /// Bucket-level grants of every bucket.
    AllBuckets,
    /// Grants of one object.
    Object(i64),
    /// Object-level grants of every object in one bucket.
    ObjectsInBucket(i64),
    /// Object-level grants of every object.
    AllObjects,
}

/// Row ids a grant target resolves to.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TargetIds {
    pub bucket_id: i64,
    pub object_id: Option<i64>,
}

/// Load grants in `scope`, optionally restricted to those applying to `user`
/// (its username or one of its groups) and to `noAccess` grants.
pub(crate) async fn query_grants(
    conn: &mut SqliteConnection,
    scope: GrantScope,
    user: Option<&AuthenticatedUser>,
    only_no_access: bool,
) -> CatalogResult<Vec<Grant>> {
    let mut builder = QueryBuilder::<Sqlite>::new(GRANT_COLUMNS);
    match scope {
        GrantScope::Bucket(bucket_id) => {
            builder.push("g.object_id IS NULL AND g.bucket_id = ");
            builder.push_bind(bucket_id);
        }
        GrantScope::AllBuckets => {
            builder.push("g.object_id IS NULL");
        }
        GrantScope::Object(object_id) => {
            builder.push("g.object_id = ");
            builder.push_bind(object_id);
        }
        GrantScope::ObjectsInBucket(bucket_id) => {
            builder.push("g.object_id IS NOT NULL AND g.bucket_id = ");
            builder.push_bind(bucket_id);
        }
        GrantScope::AllObjects => {
            builder.push("g.object_id IS NOT NULL");
        }
    }

    if let Some(user) = user {
        builder.push(" AND ((g.grantee_type = 'user' AND g.grantee = ");
        builder.push_bind(user.name.clone());
        builder.push(")");
        if !user.groups.is_empty() {
            builder.push(" OR (g.grantee_type = 'group' AND g.grantee IN (");
            let mut groups = builder.separated(", ");
            for group in &user.groups {
                groups.push_bind(group.clone());
            }
            groups.push_unseparated("))");
        }
        builder.push(")");
    }

    if only_no_access {
        builder.push(" AND g.access_type = ");
        builder.push_bind(AccessType::NoAccess);
    }

    builder.push(" ORDER BY g.id ASC");
    let grants = builder
        .build_query_as::<Grant>()
        .fetch_all(&mut *conn)
        .await?;
    Ok(grants)
}

/// Resolve a target to row ids, failing with NotFound for a missing bucket
/// or object.
pub(crate) async fn target_ids(
    conn: &mut SqliteConnection,
    target: &GrantTarget,
) -> CatalogResult<TargetIds> {
    let bucket_id = sqlx::query_scalar::<_, i64>("SELECT id FROM buckets WHERE name = ?")
        .bind(target.bucket_name())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| CatalogError::BucketNotFound(target.bucket_name().to_string()))?;

    let object_id = match target.object_name() {
        None => None,
        Some(object) => Some(
            sqlx::query_scalar::<_, i64>(
                "SELECT id FROM catalog_objects WHERE bucket_id = ? AND name = ?",
            )
            .bind(bucket_id)
            .bind(object)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| CatalogError::ObjectNotFound {
                bucket: target.bucket_name().to_string(),
                name: object.to_string(),
            })?,
        ),
    };

    Ok(TargetIds {
        bucket_id,
        object_id,
    })
}

async fn find_grant(
    conn: &mut SqliteConnection,
    ids: TargetIds,
    grantee_type: GranteeType,
    grantee: &str,
) -> CatalogResult<Option<Grant>> {
    let mut builder = QueryBuilder::<Sqlite>::new(GRANT_COLUMNS);
    match ids.object_id {
        Some(object_id) => {
            builder.push("g.object_id = ");
            builder.push_bind(object_id);
        }
        None => {
            builder.push("g.object_id IS NULL AND g.bucket_id = ");
            builder.push_bind(ids.bucket_id);
        }
    }
    builder.push(" AND g.grantee_type = ");
    builder.push_bind(grantee_type);
    builder.push(" AND g.grantee = ");
    builder.push_bind(grantee.to_string());

    let grant = builder
        .build_query_as::<Grant>()
        .fetch_optional(&mut *conn)
        .await?;
    Ok(grant)
}

/// Remove every grant of a bucket, object grants of its objects included.
pub(crate) async fn delete_bucket_grants(
    conn: &mut SqliteConnection,
    bucket_id: i64,
) -> CatalogResult<u64> {
    let result = sqlx::query("DELETE FROM grants WHERE bucket_id = ?")
        .bind(bucket_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Remove every grant of one object.
pub(crate) async fn delete_object_grants(
    conn: &mut SqliteConnection,
    object_id: i64,
) -> CatalogResult<u64> {
    let result = sqlx::query("DELETE FROM grants WHERE object_id = ?")
        .bind(object_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// GrantStore provides grant CRUD and the lookups used by access resolution.
#[derive(Clone)]
pub struct GrantStore {
    db: Arc<SqlitePool>,
}

impl GrantStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Create a grant on a bucket or object.
    ///
    /// Group grants without a priority get the default one; user grants never
    /// store a priority. Fails with NotFound when the target is missing and
    /// AlreadyExists when the grantee already has a grant on it.
    pub async fn create_grant(
        &self,
        target: &GrantTarget,
        grantee_type: GranteeType,
        grantee: &str,
        access_type: AccessType,
        priority: Option<i32>,
        creator: &str,
    ) -> CatalogResult<Grant> {
        ensure_grantee_valid(grantee)?;
        let priority = normalize_priority(grantee_type, priority)?;

        let mut tx = self.db.begin().await?;
        let ids = target_ids(&mut tx, target).await?;

        let inserted = sqlx::query(
            "INSERT INTO grants (bucket_id, object_id, grantee_type, grantee, access_type,
                                 priority, creator, creation_date, modification_history)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(ids.bucket_id)
        .bind(ids.object_id)
        .bind(grantee_type)
        .bind(grantee)
        .bind(access_type)
        .bind(priority)
        .bind(creator)
        .bind(Utc::now())
        .bind(Json(Vec::<ModificationRecord>::new()))
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            return Err(if is_unique_violation(&err) {
                CatalogError::GrantAlreadyExists {
                    target: target.to_string(),
                    grantee_type,
                    grantee: grantee.to_string(),
                }
            } else {
                CatalogError::Sqlx(err)
            });
        }

        let grant = find_grant(&mut tx, ids, grantee_type, grantee)
            .await?
            .ok_or_else(|| CatalogError::Sqlx(sqlx::Error::RowNotFound))?;
        tx.commit().await?;

        info!(
            "created {} grant `{}` ({}) on {}",
            grantee_type, grantee, access_type, target
        );
        Ok(grant)
    }

    /// Change the access type and priority of an existing grant.
    ///
    /// The previous and new states are appended to the grant's modification
    /// history before the change is applied.
    pub async fn update_grant(
        &self,
        target: &GrantTarget,
        grantee_type: GranteeType,
        grantee: &str,
        access_type: AccessType,
        priority: Option<i32>,
        actor: &str,
    ) -> CatalogResult<Grant> {
        let mut tx = self.db.begin().await?;
        let ids = target_ids(&mut tx, target).await?;
        let mut grant = find_grant(&mut tx, ids, grantee_type, grantee)
            .await?
            .ok_or_else(|| CatalogError::GrantNotFound {
                target: target.to_string(),
                grantee_type,
                grantee: grantee.to_string(),
            })?;

        // An update without a priority keeps the current one.
        let priority = match (grantee_type, priority) {
            (GranteeType::Group, None) => grant.priority,
            _ => normalize_priority(grantee_type, priority)?,
        };

        grant.modification_history.0.push(ModificationRecord {
            modification_date: Utc::now(),
            username: actor.to_string(),
            old_values: describe_grant_state(grant.access_type, grant.priority),
            new_values: describe_grant_state(access_type, priority),
            changes: describe_grant_changes(grant.access_type, grant.priority, access_type, priority),
        });

        sqlx::query(
            "UPDATE grants SET access_type = ?, priority = ?, modification_history = ? WHERE id = ?",
        )
        .bind(access_type)
        .bind(priority)
        .bind(&grant.modification_history)
        .bind(grant.id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(
            "updated {} grant `{}` on {}: {} => {}",
            grantee_type, grantee, target, grant.access_type, access_type
        );
        grant.access_type = access_type;
        grant.priority = priority;
        Ok(grant)
    }

    /// Delete one grant and return it.
    pub async fn delete_grant(
        &self,
        target: &GrantTarget,
        grantee_type: GranteeType,
        grantee: &str,
    ) -> CatalogResult<Grant> {
        let mut tx = self.db.begin().await?;
        let ids = target_ids(&mut tx, target).await?;
        let grant = find_grant(&mut tx, ids, grantee_type, grantee)
            .await?
            .ok_or_else(|| CatalogError::GrantNotFound {
                target: target.to_string(),
                grantee_type,
                grantee: grantee.to_string(),
            })?;

        sqlx::query("DELETE FROM grants WHERE id = ?")
            .bind(grant.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!("deleted {} grant `{}` on {}", grantee_type, grantee, target);
        Ok(grant)
    }

    /// Remove every grant on a bucket and on the objects it contains.
    pub async fn delete_all_grants_for_bucket(&self, bucket: &str) -> CatalogResult<u64> {
        let mut tx = self.db.begin().await?;
        let ids = target_ids(&mut tx, &GrantTarget::bucket(bucket)).await?;
        let removed = delete_bucket_grants(&mut tx, ids.bucket_id).await?;
        tx.commit().await?;
        info!("removed {} grant(s) of bucket `{}`", removed, bucket);
        Ok(removed)
    }

    pub async fn delete_all_grants_for_object(
        &self,
        bucket: &str,
        object: &str,
    ) -> CatalogResult<u64> {
        let mut tx = self.db.begin().await?;
        let ids = target_ids(&mut tx, &GrantTarget::object(bucket, object)).await?;
        let removed = match ids.object_id {
            Some(object_id) => delete_object_grants(&mut tx, object_id).await?,
            None => 0,
        };
        tx.commit().await?;
        info!("removed {} grant(s) of object `{}/{}`", removed, bucket, object);
        Ok(removed)
    }

    /// Bucket-level grants of one bucket.
    pub async fn list_bucket_grants(&self, bucket: &str) -> CatalogResult<Vec<Grant>> {
        let mut conn = self.db.acquire().await?;
        let ids = target_ids(&mut conn, &GrantTarget::bucket(bucket)).await?;
        query_grants(&mut conn, GrantScope::Bucket(ids.bucket_id), None, false).await
    }

    pub async fn list_object_grants(&self, bucket: &str, object: &str) -> CatalogResult<Vec<Grant>> {
        let mut conn = self.db.acquire().await?;
        let ids = target_ids(&mut conn, &GrantTarget::object(bucket, object)).await?;
        match ids.object_id {
            Some(object_id) => {
                query_grants(&mut conn, GrantScope::Object(object_id), None, false).await
            }
            None => Ok(Vec::new()),
        }
    }

    /// Object-level grants of every object in a bucket.
    pub async fn list_grants_in_bucket(&self, bucket: &str) -> CatalogResult<Vec<Grant>> {
        let mut conn = self.db.acquire().await?;
        let ids = target_ids(&mut conn, &GrantTarget::bucket(bucket)).await?;
        query_grants(
            &mut conn,
            GrantScope::ObjectsInBucket(ids.bucket_id),
            None,
            false,
        )
        .await
    }

    /// Bucket-level grants, across all buckets, applying to the user or one
    /// of its groups.
    pub async fn user_bucket_grants(&self, user: &AuthenticatedUser) -> CatalogResult<Vec<Grant>> {
        let mut conn = self.db.acquire().await?;
        query_grants(&mut conn, GrantScope::AllBuckets, Some(user), false).await
    }

    pub async fn user_object_grants(&self, user: &AuthenticatedUser) -> CatalogResult<Vec<Grant>> {
        let mut conn = self.db.acquire().await?;
        query_grants(&mut conn, GrantScope::AllObjects, Some(user), false).await
    }

    /// `noAccess` grants, bucket-level first, applying to the user or its groups.
    pub async fn user_no_access_grants(
        &self,
        user: &AuthenticatedUser,
    ) -> CatalogResult<Vec<Grant>> {
        let mut conn = self.db.acquire().await?;
        let mut grants = query_grants(&mut conn, GrantScope::AllBuckets, Some(user), true).await?;
        grants.extend(query_grants(&mut conn, GrantScope::AllObjects, Some(user), true).await?);
        Ok(grants)
    }
}
