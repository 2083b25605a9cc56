use bytes::Bytes;
use object_catalog::{
    Catalog, CatalogError,
    db,
    models::{
        access::AccessType,
        grant::{GrantTarget, GranteeType},
        identity::AuthenticatedUser,
        metadata::{DEPENDS_ON_LABEL, Metadata, OBJECT_TAG_LABEL},
    },
    services::{
        bucket_service::BucketFilter,
        catalog_object_service::{MetadataUpdate, NewObject, NewRevision, ObjectFilter, Page},
        parser::{ContentParser, ParserRegistry},
    },
};
use std::sync::Arc;

/// Turns every line `ref <bucket>/<object>` of the content into a
/// `depends_on` entry.
struct RefParser;

impl ContentParser for RefParser {
    fn parse(&self, content: &[u8]) -> Vec<Metadata> {
        String::from_utf8_lossy(content)
            .lines()
            .filter_map(|line| line.trim().strip_prefix("ref "))
            .map(|reference| Metadata::labeled(reference.trim(), "latest", DEPENDS_ON_LABEL))
            .collect()
    }
}

async fn setup() -> Catalog {
    let pool = db::in_memory().await.unwrap();
    let parsers = ParserRegistry::new().register("workflow", Arc::new(RefParser));
    Catalog::new(Arc::new(pool), Arc::new(parsers))
}

fn object(bucket: &str, name: &str, content: &str) -> NewObject {
    NewObject {
        bucket: bucket.into(),
        name: name.into(),
        kind: "Workflow/standard".into(),
        content_type: "application/xml".into(),
        commit_message: "initial".into(),
        username: "alice".into(),
        project_name: None,
        tags: None,
        metadata: None,
        extension: Some("xml".into()),
        content: Bytes::from(content.to_string()),
    }
}

fn revision(message: &str, content: &str) -> NewRevision {
    NewRevision {
        commit_message: message.into(),
        username: "alice".into(),
        project_name: None,
        tags: None,
        metadata: None,
        content: Bytes::from(content.to_string()),
    }
}

#[tokio::test]
async fn owner_group_members_get_implicit_admin() {
    let catalog = setup().await;
    catalog.buckets.create_bucket("lib", Some("GROUP:g1")).await.unwrap();

    let member = AuthenticatedUser::new("u1", ["g1"]);
    let outsider = AuthenticatedUser::new("u2", ["g2"]);
    assert_eq!(
        catalog.access.resolve_bucket_access(&member, "lib").await.unwrap(),
        AccessType::Admin
    );
    assert_eq!(
        catalog.access.resolve_bucket_access(&outsider, "lib").await.unwrap(),
        AccessType::NoAccess
    );

    let err = catalog
        .access
        .require_bucket_access(&outsider, "lib", AccessType::Read)
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::AccessDenied { .. }));
    assert!(catalog.access.accessible_buckets(&outsider).await.unwrap().is_empty());
}

#[tokio::test]
async fn user_grant_beats_a_stronger_group_grant() {
    let catalog = setup().await;
    catalog.buckets.create_bucket("lib", Some("someone-else")).await.unwrap();
    catalog.objects.create_object(object("lib", "o", "")).await.unwrap();
    let target = GrantTarget::object("lib", "o");

    catalog
        .grants
        .create_grant(&target, GranteeType::User, "u1", AccessType::Write, None, "admin")
        .await
        .unwrap();
    catalog
        .grants
        .create_grant(&target, GranteeType::Group, "g1", AccessType::Admin, Some(10), "admin")
        .await
        .unwrap();

    let user = AuthenticatedUser::new("u1", ["g1"]);
    assert_eq!(
        catalog.access.resolve_object_access(&user, "lib", "o").await.unwrap(),
        AccessType::Write
    );
    // Object grants alone make the bucket visible.
    assert!(catalog.access.is_bucket_accessible(&user, "lib").await.unwrap());
}

#[tokio::test]
async fn equal_priority_group_grants_resolve_to_the_stronger_access() {
    let catalog = setup().await;
    catalog.buckets.create_bucket("lib", Some("someone-else")).await.unwrap();
    let target = GrantTarget::bucket("lib");
    for (group, access) in [("readers", AccessType::Read), ("writers", AccessType::Write)] {
        catalog
            .grants
            .create_grant(&target, GranteeType::Group, group, access, Some(4), "admin")
            .await
            .unwrap();
    }

    let user = AuthenticatedUser::new("u1", ["readers", "writers"]);
    assert_eq!(
        catalog.access.resolve_bucket_access(&user, "lib").await.unwrap(),
        AccessType::Write
    );
}

#[tokio::test]
async fn group_no_access_hides_objects_unless_outranked() {
    let catalog = setup().await;
    catalog.buckets.create_bucket("lib", Some("GROUP:team")).await.unwrap();
    for name in ["hidden", "visible", "plain"] {
        catalog.objects.create_object(object("lib", name, "")).await.unwrap();
    }

    let grant = |name: &'static str, group: &'static str, access, priority| {
        let catalog = catalog.clone();
        async move {
            catalog
                .grants
                .create_grant(
                    &GrantTarget::object("lib", name),
                    GranteeType::Group,
                    group,
                    access,
                    Some(priority),
                    "admin",
                )
                .await
                .unwrap();
        }
    };
    grant("hidden", "deny", AccessType::NoAccess, 3).await;
    grant("hidden", "allow", AccessType::Read, 2).await;
    grant("visible", "deny", AccessType::NoAccess, 3).await;
    grant("visible", "allow", AccessType::Read, 5).await;

    let user = AuthenticatedUser::new("u1", ["team", "deny", "allow"]);
    let listed = catalog
        .list_objects_for_user(&user, None, &ObjectFilter::default(), Page::default())
        .await
        .unwrap();
    let names: Vec<_> = listed.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, vec!["plain", "visible"]);

    let denied = catalog.grants.user_no_access_grants(&user).await.unwrap();
    assert_eq!(denied.len(), 2);
}

/// `secret` belongs to `GROUP:owners`; bob only holds a user grant on `shared`.
async fn private_bucket_with_one_shared_object() -> (Catalog, AuthenticatedUser) {
    let catalog = setup().await;
    catalog.buckets.create_bucket("secret", Some("GROUP:owners")).await.unwrap();
    catalog.buckets.create_bucket("open", None).await.unwrap();
    for name in ["shared", "private1", "private2"] {
        catalog.objects.create_object(object("secret", name, "")).await.unwrap();
    }
    catalog.objects.create_object(object("open", "wf", "")).await.unwrap();
    catalog
        .grants
        .create_grant(
            &GrantTarget::object("secret", "shared"),
            GranteeType::User,
            "bob",
            AccessType::Read,
            None,
            "admin",
        )
        .await
        .unwrap();
    (catalog, AuthenticatedUser::new("bob", ["guests"]))
}

#[tokio::test]
async fn object_grant_in_a_private_bucket_exposes_only_that_object() {
    let (catalog, bob) = private_bucket_with_one_shared_object().await;

    for (name, expected) in [
        ("shared", AccessType::Read),
        ("private1", AccessType::NoAccess),
        ("private2", AccessType::NoAccess),
    ] {
        assert_eq!(
            catalog.access.resolve_object_access(&bob, "secret", name).await.unwrap(),
            expected
        );
    }

    let wanted = ["secret".to_string()];
    let listed = catalog
        .list_objects_for_user(&bob, Some(wanted.as_slice()), &ObjectFilter::default(), Page::default())
        .await
        .unwrap();
    let names: Vec<_> = listed.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, vec!["shared"]);

    // Members of the owner group still see everything.
    let owner = AuthenticatedUser::new("carol", ["owners"]);
    let listed = catalog
        .list_objects_for_user(&owner, Some(wanted.as_slice()), &ObjectFilter::default(), Page::default())
        .await
        .unwrap();
    assert_eq!(listed.len(), 3);
}

#[tokio::test]
async fn bucket_listing_counts_only_visible_objects() {
    let (catalog, bob) = private_bucket_with_one_shared_object().await;

    let counts = |buckets: Vec<object_catalog::models::bucket::BucketSummary>| {
        buckets
            .into_iter()
            .map(|b| (b.name, b.object_count))
            .collect::<Vec<_>>()
    };

    let listed = catalog
        .list_buckets_for_user(&bob, &BucketFilter::default(), &[])
        .await
        .unwrap();
    assert_eq!(
        counts(listed),
        vec![("secret".to_string(), 1), ("open".to_string(), 1)]
    );

    let stranger = AuthenticatedUser::new("eve", ["guests"]);
    let listed = catalog
        .list_buckets_for_user(&stranger, &BucketFilter::default(), &[])
        .await
        .unwrap();
    assert_eq!(counts(listed), vec![("open".to_string(), 1)]);

    let owner = AuthenticatedUser::new("carol", ["owners"]);
    let listed = catalog
        .list_buckets_for_user(&owner, &BucketFilter::default(), &[])
        .await
        .unwrap();
    assert_eq!(
        counts(listed),
        vec![("secret".to_string(), 3), ("open".to_string(), 1)]
    );

    // A filter only bob's hidden objects match leaves him no bucket.
    let mut filter = BucketFilter::default();
    filter.objects.name = Some("private".into());
    let listed = catalog.list_buckets_for_user(&bob, &filter, &[]).await.unwrap();
    assert!(listed.is_empty());
    let listed = catalog.list_buckets_for_user(&owner, &filter, &[]).await.unwrap();
    assert_eq!(counts(listed), vec![("secret".to_string(), 2)]);
}

#[tokio::test]
async fn revisions_are_monotonic_and_restore_appends() {
    let catalog = setup().await;
    catalog.buckets.create_bucket("lib", None).await.unwrap();
    let mut first = object("lib", "wf", "v1");
    first.tags = Some("alpha".into());
    let first = catalog.objects.create_object(first).await.unwrap();
    let second = catalog
        .objects
        .create_revision("lib", "wf", revision("second", "v2"))
        .await
        .unwrap();
    assert!(second.commit_time > first.commit_time);

    let restored = catalog
        .objects
        .restore_revision("lib", "wf", first.commit_time)
        .await
        .unwrap();
    assert!(restored.commit_time > second.commit_time);
    assert_eq!(restored.metadata, first.metadata);
    assert_eq!(restored.checksum, first.checksum);

    let raw = catalog.objects.get_raw_object("lib", "wf", None).await.unwrap();
    assert_eq!(raw.content, Bytes::from_static(b"v1"));
    assert_eq!(raw.file_name(), "wf.xml");

    let history = catalog.objects.list_revisions("lib", "wf").await.unwrap();
    let times: Vec<_> = history.iter().map(|r| r.commit_time).collect();
    assert_eq!(
        times,
        vec![restored.commit_time, second.commit_time, first.commit_time]
    );
    assert_eq!(history[1].commit_message, "second");
}

#[tokio::test]
async fn repeated_references_collapse_to_one_dependency() {
    let catalog = setup().await;
    catalog.buckets.create_bucket("lib", None).await.unwrap();
    catalog.objects.create_object(object("lib", "sub", "")).await.unwrap();
    catalog
        .objects
        .create_object(object("lib", "main", "ref lib/sub\nref lib/sub\n  ref lib/sub"))
        .await
        .unwrap();

    let deps = catalog
        .dependencies
        .get_object_dependencies("lib", "main", None)
        .await
        .unwrap();
    assert_eq!(deps.depends_on.len(), 1);
    assert!(deps.depends_on[0].is_in_catalog);
    assert_eq!(deps.depends_on[0].pinned_commit_time, None);

    let callers = catalog
        .dependencies
        .get_object_dependencies("lib", "sub", None)
        .await
        .unwrap();
    assert_eq!(callers.called_by, vec!["lib/main".to_string()]);

    // Deleting the target flips the live check, the stored revision is unchanged.
    catalog.objects.delete_object("lib", "sub").await.unwrap();
    let deps = catalog
        .dependencies
        .get_object_dependencies("lib", "main", None)
        .await
        .unwrap();
    assert!(!deps.depends_on[0].is_in_catalog);
}

#[tokio::test]
async fn tags_round_trip_through_metadata_updates() {
    let catalog = setup().await;
    catalog.buckets.create_bucket("lib", None).await.unwrap();
    catalog.objects.create_object(object("lib", "wf", "")).await.unwrap();

    let update = |tags: &str| MetadataUpdate {
        tags: Some(tags.into()),
        username: "bob".into(),
        ..Default::default()
    };

    catalog
        .objects
        .update_object_metadata("lib", "wf", update("t1,t2"))
        .await
        .unwrap();
    let current = catalog.objects.get_object("lib", "wf").await.unwrap();
    assert_eq!(current.tags, "t1,t2");
    let keys: Vec<_> = current
        .metadata
        .iter()
        .filter(|m| m.has_label(OBJECT_TAG_LABEL))
        .map(|m| m.key.as_str())
        .collect();
    assert_eq!(keys, vec!["t1", "t2"]);

    catalog
        .objects
        .update_object_metadata("lib", "wf", update(""))
        .await
        .unwrap();
    let current = catalog.objects.get_object("lib", "wf").await.unwrap();
    assert_eq!(current.tags, "");
    assert!(!current.metadata.iter().any(|m| m.has_label(OBJECT_TAG_LABEL)));

    let err = catalog
        .objects
        .update_object_metadata("lib", "wf", update("1bad"))
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::InvalidTags(_)));
}

#[tokio::test]
async fn non_empty_bucket_cannot_be_deleted() {
    let catalog = setup().await;
    catalog.buckets.create_bucket("lib", None).await.unwrap();
    catalog.objects.create_object(object("lib", "wf", "")).await.unwrap();
    catalog
        .grants
        .create_grant(
            &GrantTarget::bucket("lib"),
            GranteeType::Group,
            "g1",
            AccessType::Read,
            None,
            "admin",
        )
        .await
        .unwrap();

    let err = catalog.buckets.delete_empty_bucket("lib").await.unwrap_err();
    assert!(matches!(err, CatalogError::BucketNotEmpty { .. }));
    assert_eq!(err.kind(), object_catalog::errors::ErrorKind::Conflict);

    catalog.objects.delete_object("lib", "wf").await.unwrap();
    catalog.buckets.delete_empty_bucket("lib").await.unwrap();

    catalog.buckets.create_bucket("lib", None).await.unwrap();
    assert!(catalog.grants.list_bucket_grants("lib").await.unwrap().is_empty());
}
