//! Grant resolution: the effective access of a user on a bucket or object.
//!
//! The rules are pure functions over already loaded grants so they can be
//! exercised without a database; [`AccessResolver`] loads what they need.
//!
//! Precedence, most to least authoritative:
//!
//! 1. user grant on the object
//! 2. user grant on the bucket
//! 3. group grants on the object (priority, then access strength)
//! 4. group grants on the bucket, including the implicit owner grant
//! 5. `noAccess`
//!
//! Equal priority and equal access between two group grants resolves to the
//! lexicographically smallest grantee, which keeps the result stable.

use crate::{
    errors::{CatalogError, CatalogResult},
    models::{
        access::AccessType,
        bucket::{Bucket, PUBLIC_OWNER, owner_group},
        grant::Grant,
        identity::AuthenticatedUser,
        object::ObjectSummary,
    },
    services::{
        bucket_service::fetch_bucket,
        catalog_object_service::fetch_object,
        grant_store::{GrantScope, query_grants},
    },
};
use sqlx::SqlitePool;
use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tracing::debug;

/// Priority of the implicit admin grant held by a bucket's owner.
pub const IMPLICIT_OWNER_PRIORITY: i32 = 5;

/// A group-scoped grant competing in priority selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GroupCandidate<'a> {
    grantee: &'a str,
    access_type: AccessType,
    priority: i32,
}

impl GroupCandidate<'_> {
    fn outranks(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.access_type.cmp(&other.access_type))
            .then_with(|| other.grantee.cmp(self.grantee))
    }
}

fn applies_to(grant: &Grant, user: &AuthenticatedUser) -> bool {
    if grant.is_user_grant() {
        grant.grantee == user.name
    } else {
        user.is_member_of(&grant.grantee)
    }
}

fn user_grant<'a>(grants: &'a [Grant], user: &AuthenticatedUser) -> Option<&'a Grant> {
    grants
        .iter()
        .find(|g| g.is_user_grant() && applies_to(g, user))
}

fn group_candidates<'a>(
    grants: &'a [Grant],
    user: &'a AuthenticatedUser,
) -> impl Iterator<Item = GroupCandidate<'a>> + 'a {
    grants
        .iter()
        .filter(move |g| !g.is_user_grant() && applies_to(g, user))
        .map(|g| GroupCandidate {
            grantee: &g.grantee,
            access_type: g.access_type,
            priority: g.effective_priority(),
        })
}

fn select_group_grant<'a>(
    candidates: impl Iterator<Item = GroupCandidate<'a>>,
) -> Option<GroupCandidate<'a>> {
    candidates.max_by(|a, b| a.outranks(b))
}

/// Grantee of the implicit admin grant the user gets from the bucket owner.
///
/// Everyone holds it on public buckets. On a `GROUP:` owned bucket, members
/// of that group hold it. A bucket owned by a plain username gives it to
/// that user.
pub fn implicit_owner_grantee<'a>(owner: &'a str, user: &AuthenticatedUser) -> Option<&'a str> {
    if owner == PUBLIC_OWNER {
        return owner_group(owner);
    }
    match owner_group(owner) {
        Some(group) => user.is_member_of(group).then_some(group),
        None => (owner == user.name).then_some(owner),
    }
}

/// Effective access on a bucket given the grants on that bucket.
///
/// `grants` may include grants of other users; only those applying to
/// `user` are considered.
pub fn resolve_bucket_grants(user: &AuthenticatedUser, owner: &str, grants: &[Grant]) -> AccessType {
    if let Some(grant) = user_grant(grants, user) {
        return grant.access_type;
    }

    let implicit = implicit_owner_grantee(owner, user).map(|grantee| GroupCandidate {
        grantee,
        access_type: AccessType::Admin,
        priority: IMPLICIT_OWNER_PRIORITY,
    });

    select_group_grant(group_candidates(grants, user).chain(implicit))
        .map_or(AccessType::NoAccess, |c| c.access_type)
}

/// Effective access on an object given the grants on its bucket and on the
/// object itself.
///
/// A user grant on the bucket outranks group grants on the object whatever
/// its access type, so a user `noAccess` on the bucket hides objects that
/// groups of the user were granted.
pub fn resolve_object_grants(
    user: &AuthenticatedUser,
    owner: &str,
    bucket_grants: &[Grant],
    object_grants: &[Grant],
) -> AccessType {
    if let Some(grant) = user_grant(object_grants, user) {
        return grant.access_type;
    }
    if let Some(grant) = user_grant(bucket_grants, user) {
        return grant.access_type;
    }
    match select_group_grant(group_candidates(object_grants, user)) {
        Some(candidate) => candidate.access_type,
        None => resolve_bucket_grants(user, owner, bucket_grants),
    }
}

/// Whether the user can see anything in the bucket: read on the bucket
/// itself, or read on at least one object through its object grants.
pub fn bucket_is_accessible(
    user: &AuthenticatedUser,
    owner: &str,
    bucket_grants: &[Grant],
    object_grants: &[Grant],
) -> bool {
    if resolve_bucket_grants(user, owner, bucket_grants).satisfies(AccessType::Read) {
        return true;
    }
    let mut per_object: HashMap<&str, Vec<Grant>> = HashMap::new();
    for grant in object_grants {
        if let Some(object) = grant.object_name.as_deref() {
            per_object.entry(object).or_default().push(grant.clone());
        }
    }
    per_object.values().any(|grants| {
        resolve_object_grants(user, owner, bucket_grants, grants).satisfies(AccessType::Read)
    })
}

type ObjectKey = (String, String);

fn grants_in<'a>(per_bucket: &'a HashMap<&str, Vec<Grant>>, bucket: &str) -> &'a [Grant] {
    per_bucket.get(bucket).map(Vec::as_slice).unwrap_or_default()
}

fn object_key(bucket: &str, object: &str) -> ObjectKey {
    (bucket.to_string(), object.to_string())
}

/// Per-object and per-bucket view of the grants applying to one user, built
/// once so that filtering a listing is a handful of map lookups per object.
#[derive(Debug, Default)]
pub struct UserGrantIndex {
    user_object: HashMap<ObjectKey, AccessType>,
    user_bucket: HashMap<String, AccessType>,
    best_group_object: HashMap<ObjectKey, i32>,
    denied_group_object: HashMap<ObjectKey, i32>,
    denied_buckets: HashSet<String>,
    unreadable_buckets: HashSet<String>,
    readable_objects: HashSet<ObjectKey>,
}

impl UserGrantIndex {
    /// Index grants for `user`.
    ///
    /// `owners` maps the name of every bucket to its owner. Each of them is
    /// resolved for `user`, including those the user holds no grant on, so
    /// the implicit owner grant decides whether its objects are readable.
    pub fn build(
        user: &AuthenticatedUser,
        owners: &HashMap<String, String>,
        bucket_grants: &[Grant],
        object_grants: &[Grant],
    ) -> Self {
        let mut index = Self::default();

        let mut per_object: HashMap<ObjectKey, Vec<Grant>> = HashMap::new();
        for grant in object_grants.iter().filter(|g| applies_to(g, user)) {
            let Some(object) = grant.object_name.as_deref() else {
                continue;
            };
            let key = object_key(&grant.bucket_name, object);
            per_object.entry(key.clone()).or_default().push(grant.clone());
            let priority = grant.effective_priority();
            match (grant.is_user_grant(), grant.access_type.is_positive()) {
                (true, _) => {
                    index.user_object.insert(key, grant.access_type);
                }
                (false, true) => {
                    let best = index.best_group_object.entry(key).or_insert(priority);
                    *best = (*best).max(priority);
                }
                (false, false) => {
                    let denied = index.denied_group_object.entry(key).or_insert(priority);
                    *denied = (*denied).max(priority);
                }
            }
        }

        let mut per_bucket: HashMap<&str, Vec<Grant>> = HashMap::new();
        for grant in bucket_grants.iter().filter(|g| applies_to(g, user)) {
            if grant.is_user_grant() {
                index
                    .user_bucket
                    .insert(grant.bucket_name.clone(), grant.access_type);
            }
            per_bucket
                .entry(&grant.bucket_name)
                .or_default()
                .push(grant.clone());
        }

        for (bucket, owner) in owners {
            let grants = grants_in(&per_bucket, bucket);
            if resolve_bucket_grants(user, owner, grants).satisfies(AccessType::Read) {
                continue;
            }
            if grants.iter().any(|g| !g.access_type.is_positive()) {
                index.denied_buckets.insert(bucket.clone());
            } else {
                index.unreadable_buckets.insert(bucket.clone());
            }
        }

        for (key, grants) in per_object {
            let Some(owner) = owners.get(&key.0) else {
                continue;
            };
            if !index.unreadable_buckets.contains(&key.0) {
                continue;
            }
            if resolve_object_grants(user, owner, grants_in(&per_bucket, &key.0), &grants)
                .satisfies(AccessType::Read)
            {
                index.readable_objects.insert(key);
            }
        }

        index
    }

    fn has_positive_user_object_grant(&self, key: &ObjectKey) -> bool {
        self.user_object.get(key).is_some_and(|a| a.is_positive())
    }

    fn has_positive_user_bucket_grant(&self, bucket: &str) -> bool {
        self.user_bucket.get(bucket).is_some_and(|a| a.is_positive())
    }

    /// Whether an otherwise visible object stays visible once `noAccess`
    /// grants are taken into account.
    pub fn keeps(&self, bucket: &str, object: &str) -> bool {
        let key = object_key(bucket, object);

        if self.user_object.get(&key) == Some(&AccessType::NoAccess) {
            return false;
        }

        if let Some(&denied_priority) = self.denied_group_object.get(&key) {
            if self.has_positive_user_object_grant(&key)
                || self.has_positive_user_bucket_grant(bucket)
            {
                return true;
            }
            return self
                .best_group_object
                .get(&key)
                .is_some_and(|&best| best > denied_priority);
        }

        if self.denied_buckets.contains(bucket) {
            return self.has_positive_user_object_grant(&key);
        }

        if self.unreadable_buckets.contains(bucket) {
            return self.readable_objects.contains(&key);
        }

        true
    }
}

/// Drop the objects a user is denied through `noAccess` grants.
///
/// * A user `noAccess` grant on the object always removes it.
/// * A group `noAccess` grant on the object removes it unless the user holds
///   a positive user grant on the object or its bucket, or a positive group
///   grant on the object with a strictly higher priority.
/// * Without an object-level `noAccess` grant, a bucket whose bucket-level
///   grants resolve to `noAccess` removes all its objects except those the
///   user holds a positive user grant on.
/// * In a bucket the user cannot read without carrying any `noAccess` grant
///   (a private bucket the user only holds object grants in), only objects
///   whose own resolution reaches `read` are kept.
pub fn remove_inaccessible_objects(
    objects: Vec<ObjectSummary>,
    index: &UserGrantIndex,
) -> Vec<ObjectSummary> {
    objects
        .into_iter()
        .filter(|o| index.keeps(&o.bucket_name, &o.name))
        .collect()
}

/// Loads grants and buckets and applies the resolution rules.
#[derive(Clone)]
pub struct AccessResolver {
    db: Arc<SqlitePool>,
}

impl AccessResolver {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Effective access of `user` on a bucket. Never fails for a missing
    /// grant: the bottom of the lattice is returned instead.
    pub async fn resolve_bucket_access(
        &self,
        user: &AuthenticatedUser,
        bucket: &str,
    ) -> CatalogResult<AccessType> {
        let mut conn = self.db.acquire().await?;
        let bucket = fetch_bucket(&mut conn, bucket).await?;
        let grants = query_grants(&mut conn, GrantScope::Bucket(bucket.id), Some(user), false).await?;
        let access = resolve_bucket_grants(user, &bucket.owner, &grants);
        debug!(
            "resolved {} access for `{}` on bucket `{}` from {} grant(s)",
            access,
            user.name,
            bucket.name,
            grants.len()
        );
        Ok(access)
    }

    pub async fn resolve_object_access(
        &self,
        user: &AuthenticatedUser,
        bucket: &str,
        object: &str,
    ) -> CatalogResult<AccessType> {
        let mut conn = self.db.acquire().await?;
        let object = fetch_object(&mut conn, bucket, object).await?;
        let bucket = fetch_bucket(&mut conn, bucket).await?;
        let bucket_grants =
            query_grants(&mut conn, GrantScope::Bucket(bucket.id), Some(user), false).await?;
        let object_grants =
            query_grants(&mut conn, GrantScope::Object(object.id), Some(user), false).await?;
        let access = resolve_object_grants(user, &bucket.owner, &bucket_grants, &object_grants);
        debug!(
            "resolved {} access for `{}` on object `{}/{}`",
            access, user.name, object.bucket_name, object.name
        );
        Ok(access)
    }

    /// Resolve and fail with AccessDenied unless `required` is satisfied.
    pub async fn require_bucket_access(
        &self,
        user: &AuthenticatedUser,
        bucket: &str,
        required: AccessType,
    ) -> CatalogResult<AccessType> {
        let actual = self.resolve_bucket_access(user, bucket).await?;
        if actual.satisfies(required) {
            Ok(actual)
        } else {
            Err(CatalogError::AccessDenied {
                user: user.name.clone(),
                target: format!("bucket `{}`", bucket),
                actual,
                required,
            })
        }
    }

    pub async fn require_object_access(
        &self,
        user: &AuthenticatedUser,
        bucket: &str,
        object: &str,
        required: AccessType,
    ) -> CatalogResult<AccessType> {
        let actual = self.resolve_object_access(user, bucket, object).await?;
        if actual.satisfies(required) {
            Ok(actual)
        } else {
            Err(CatalogError::AccessDenied {
                user: user.name.clone(),
                target: format!("object `{}/{}`", bucket, object),
                actual,
                required,
            })
        }
    }

    pub async fn is_bucket_accessible(
        &self,
        user: &AuthenticatedUser,
        bucket: &str,
    ) -> CatalogResult<bool> {
        let mut conn = self.db.acquire().await?;
        let bucket = fetch_bucket(&mut conn, bucket).await?;
        let bucket_grants =
            query_grants(&mut conn, GrantScope::Bucket(bucket.id), Some(user), false).await?;
        let object_grants = query_grants(
            &mut conn,
            GrantScope::ObjectsInBucket(bucket.id),
            Some(user),
            false,
        )
        .await?;
        Ok(bucket_is_accessible(
            user,
            &bucket.owner,
            &bucket_grants,
            &object_grants,
        ))
    }

    /// Buckets the user can see anything in, in creation order.
    pub async fn accessible_buckets(&self, user: &AuthenticatedUser) -> CatalogResult<Vec<Bucket>> {
        let mut conn = self.db.acquire().await?;
        let buckets = sqlx::query_as::<_, Bucket>(
            "SELECT id, name, owner, created_at FROM buckets ORDER BY id ASC",
        )
        .fetch_all(&mut *conn)
        .await?;
        let bucket_grants = query_grants(&mut conn, GrantScope::AllBuckets, Some(user), false).await?;
        let object_grants = query_grants(&mut conn, GrantScope::AllObjects, Some(user), false).await?;

        let group_by_bucket = |grants: Vec<Grant>| {
            let mut map: HashMap<String, Vec<Grant>> = HashMap::new();
            for grant in grants {
                map.entry(grant.bucket_name.clone()).or_default().push(grant);
            }
            map
        };
        let bucket_grants = group_by_bucket(bucket_grants);
        let object_grants = group_by_bucket(object_grants);

        Ok(buckets
            .into_iter()
            .filter(|bucket| {
                bucket_is_accessible(
                    user,
                    &bucket.owner,
                    bucket_grants
                        .get(&bucket.name)
                        .map(Vec::as_slice)
                        .unwrap_or_default(),
                    object_grants
                        .get(&bucket.name)
                        .map(Vec::as_slice)
                        .unwrap_or_default(),
                )
            })
            .collect())
    }

    /// Apply [`remove_inaccessible_objects`] with the user's current grants.
    pub async fn remove_inaccessible_objects(
        &self,
        user: &AuthenticatedUser,
        objects: Vec<ObjectSummary>,
    ) -> CatalogResult<Vec<ObjectSummary>> {
        if objects.is_empty() {
            return Ok(objects);
        }
        let mut conn = self.db.acquire().await?;
        let owners: HashMap<String, String> =
            sqlx::query_as::<_, (String, String)>("SELECT name, owner FROM buckets")
                .fetch_all(&mut *conn)
                .await?
                .into_iter()
                .collect();
        let bucket_grants = query_grants(&mut conn, GrantScope::AllBuckets, Some(user), false).await?;
        let object_grants = query_grants(&mut conn, GrantScope::AllObjects, Some(user), false).await?;

        let index = UserGrantIndex::build(user, &owners, &bucket_grants, &object_grants);
        let before = objects.len();
        let visible = remove_inaccessible_objects(objects, &index);
        debug!(
            "removed {} inaccessible object(s) for `{}`",
            before - visible.len(),
            user.name
        );
        Ok(visible)
    }
}
