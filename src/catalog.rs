//! `Catalog` bundles the services sharing one pool and offers the
//! user-scoped listings that need more than one of them.

use crate::{
    errors::CatalogResult,
    models::{bucket::BucketSummary, identity::AuthenticatedUser, object::ObjectSummary},
    services::{
        association::{AssociationFilter, BucketAssociations, statuses_of},
        bucket_service::{BucketFilter, BucketService},
        catalog_object_service::{CatalogObjectService, ObjectFilter, Page},
        dependency_service::DependencyService,
        grant_resolution::AccessResolver,
        grant_store::GrantStore,
        parser::ParserRegistry,
    },
};
use sqlx::SqlitePool;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

#[derive(Clone)]
pub struct Catalog {
    db: Arc<SqlitePool>,
    pub buckets: BucketService,
    pub objects: CatalogObjectService,
    pub grants: GrantStore,
    pub access: AccessResolver,
    pub dependencies: DependencyService,
}

impl Catalog {
    pub fn new(db: Arc<SqlitePool>, parsers: Arc<ParserRegistry>) -> Self {
        Self {
            buckets: BucketService::new(db.clone()),
            objects: CatalogObjectService::new(db.clone(), parsers),
            grants: GrantStore::new(db.clone()),
            access: AccessResolver::new(db.clone()),
            dependencies: DependencyService::new(db.clone()),
            db,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Buckets the user can see, narrowed by `filter`.
    ///
    /// `object_count` only counts the objects the user can see in the bucket.
    /// When `filter` narrows objects, buckets left without a visible match are
    /// dropped.
    pub async fn list_buckets_for_user(
        &self,
        user: &AuthenticatedUser,
        filter: &BucketFilter,
        associations: &[BucketAssociations],
    ) -> CatalogResult<Vec<BucketSummary>> {
        let visible: HashSet<String> = self
            .access
            .accessible_buckets(user)
            .await?
            .into_iter()
            .map(|b| b.name)
            .collect();
        let mut buckets = self.buckets.list_buckets(filter, associations).await?;
        buckets.retain(|b| visible.contains(&b.name));
        if buckets.is_empty() {
            return Ok(buckets);
        }

        let names: Vec<String> = buckets.iter().map(|b| b.name.clone()).collect();
        let objects = self.objects.matching_objects(&names, &filter.objects).await?;
        let objects = self.access.remove_inaccessible_objects(user, objects).await?;

        let status = filter
            .association_status
            .as_deref()
            .and_then(AssociationFilter::parse);
        let mut counts: HashMap<&str, i64> = HashMap::new();
        for object in &objects {
            let statuses = statuses_of(associations, &object.bucket_name, &object.name);
            if status.as_ref().is_none_or(|s| s.matches(statuses)) {
                *counts.entry(object.bucket_name.as_str()).or_default() += 1;
            }
        }

        let narrowed = filter.objects.narrows_objects() || status.is_some();
        buckets.retain_mut(|bucket| {
            bucket.object_count = counts.get(bucket.name.as_str()).copied().unwrap_or_default();
            !narrowed || bucket.object_count > 0
        });
        Ok(buckets)
    }

    /// Objects of the accessible buckets among `buckets` (all accessible
    /// buckets when `None`), without those `noAccess` grants hide.
    ///
    /// The page is cut before hidden objects are removed, so a page may come
    /// back shorter than `page.size`.
    pub async fn list_objects_for_user(
        &self,
        user: &AuthenticatedUser,
        buckets: Option<&[String]>,
        filter: &ObjectFilter,
        page: Page,
    ) -> CatalogResult<Vec<ObjectSummary>> {
        let accessible: Vec<String> = self
            .access
            .accessible_buckets(user)
            .await?
            .into_iter()
            .map(|b| b.name)
            .filter(|name| buckets.is_none_or(|wanted| wanted.contains(name)))
            .collect();
        let objects = self.objects.list_objects(&accessible, filter, page).await?;
        self.access.remove_inaccessible_objects(user, objects).await
    }
}
