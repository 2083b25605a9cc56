use crate::{
    Catalog, db,
    models::object::Revision,
    services::{
        catalog_object_service::{NewObject, NewRevision},
        parser::ParserRegistry,
    },
};
use bytes::Bytes;
use std::sync::Arc;

pub(crate) async fn catalog() -> Catalog {
    catalog_with_parsers(ParserRegistry::new()).await
}

pub(crate) async fn catalog_with_parsers(parsers: ParserRegistry) -> Catalog {
    let pool = db::in_memory().await.expect("in-memory database");
    Catalog::new(Arc::new(pool), Arc::new(parsers))
}

pub(crate) fn new_object(bucket: &str, name: &str, kind: &str, content: &[u8]) -> NewObject {
    NewObject {
        bucket: bucket.into(),
        name: name.into(),
        kind: kind.into(),
        content_type: "application/xml".into(),
        commit_message: "first commit".into(),
        username: "alice".into(),
        project_name: None,
        tags: None,
        metadata: None,
        extension: Some("xml".into()),
        content: Bytes::copy_from_slice(content),
    }
}

pub(crate) fn new_revision(commit_message: &str) -> NewRevision {
    NewRevision {
        commit_message: commit_message.into(),
        username: "alice".into(),
        project_name: None,
        tags: None,
        metadata: None,
        content: Bytes::from(commit_message.to_string()),
    }
}

pub(crate) async fn put_object(catalog: &Catalog, bucket: &str, name: &str) -> Revision {
    catalog
        .objects
        .create_object(new_object(bucket, name, "workflow", b"<job/>"))
        .await
        .expect("object created")
}
