//! CatalogObjectService: catalog objects and their append-only revisions.
//!
//! Every write commits a new revision. The commit time of a revision is
//! `max(now_ms, last_commit_time + 1)`, computed by the same `UPDATE` that
//! bumps the object's `last_commit_time`; that statement is the row lock
//! serializing concurrent commits on one object. The current revision is
//! always the one with the greatest commit time, so deleting it promotes the
//! next most recent one without any pointer bookkeeping.

use crate::{
    db::is_unique_violation,
    errors::{CatalogError, CatalogResult},
    models::{
        metadata::{Metadata, OBJECT_TAG_LABEL},
        object::{CatalogObject, ObjectSummary, RawObject, Revision},
    },
    services::{
        bucket_service::fetch_bucket,
        grant_store::delete_object_grants,
        metadata_helper::derive_metadata,
        parser::ParserRegistry,
        validation::{
            ensure_content_type_valid, ensure_kind_valid, ensure_object_name_valid,
            ensure_page_valid, ensure_tags_valid,
        },
    },
};
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, SqliteConnection, SqlitePool, sqlite::Sqlite};
use std::{collections::BTreeSet, sync::Arc};
use tracing::{debug, info};

/// Commit message of revisions created by [`CatalogObjectService::update_object_metadata`].
pub const UPDATE_COMMIT_MESSAGE: &str = "The project name or/and tags metadata are updated";

const OBJECT_COLUMNS: &str = "SELECT o.id, o.bucket_id, b.name AS bucket_name, o.name, o.kind, \
     o.content_type, o.extension, o.last_commit_time \
     FROM catalog_objects o JOIN buckets b ON b.id = o.bucket_id ";

const REVISION_COLUMNS: &str = "SELECT r.id, b.name AS bucket_name, o.name AS object_name, \
     o.kind, r.content_type, o.extension, r.commit_time, r.commit_message, r.username, \
     r.project_name, r.tags, r.checksum \
     FROM revisions r \
     JOIN catalog_objects o ON o.id = r.object_id \
     JOIN buckets b ON b.id = o.bucket_id \
     WHERE r.object_id = ";

const SUMMARY_COLUMNS: &str = "SELECT b.name AS bucket_name, o.name, o.kind, o.content_type, \
     r.commit_time, r.commit_message, r.username, r.project_name, r.tags \
     FROM catalog_objects o \
     JOIN buckets b ON b.id = o.bucket_id \
     JOIN revisions r ON r.object_id = o.id \
     WHERE r.commit_time = (SELECT MAX(r2.commit_time) FROM revisions r2 WHERE r2.object_id = o.id)";

/// First revision of a new object.
#[derive(Debug, Clone)]
pub struct NewObject {
    pub bucket: String,
    pub name: String,
    pub kind: String,
    pub content_type: String,
    pub commit_message: String,
    pub username: String,
    pub project_name: Option<String>,
    pub tags: Option<String>,
    /// When present, stored instead of what the kind's parser extracts.
    pub metadata: Option<Vec<Metadata>>,
    pub extension: Option<String>,
    pub content: Bytes,
}

/// A later revision of an existing object.
#[derive(Debug, Clone)]
pub struct NewRevision {
    pub commit_message: String,
    pub username: String,
    pub project_name: Option<String>,
    pub tags: Option<String>,
    pub metadata: Option<Vec<Metadata>>,
    pub content: Bytes,
}

/// Partial update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct MetadataUpdate {
    pub kind: Option<String>,
    pub content_type: Option<String>,
    pub project_name: Option<String>,
    pub tags: Option<String>,
    pub username: String,
}

/// Object listing filters. Empty strings count as "no filter".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectFilter {
    /// Comma separated kinds; matches the kind or any `/` descendant.
    pub kind: Option<String>,
    pub content_type: Option<String>,
    pub name: Option<String>,
    pub tag: Option<String>,
    pub project_name: Option<String>,
    /// Username of the current revision's committer.
    pub committer: Option<String>,
}

impl ObjectFilter {
    pub(crate) fn narrows_objects(&self) -> bool {
        [
            &self.kind,
            &self.content_type,
            &self.name,
            &self.tag,
            &self.project_name,
            &self.committer,
        ]
        .into_iter()
        .any(|f| non_empty(f).is_some())
    }
}

/// Zero-based page index and page size; `offset * size` rows are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: i64,
    pub size: i64,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            size: 100,
        }
    }
}

/// Everything a revision stores besides its commit time.
pub(crate) struct RevisionDraft {
    pub commit_message: String,
    pub username: String,
    pub content_type: String,
    pub project_name: String,
    pub tags: String,
    pub metadata: Vec<Metadata>,
    pub content: Bytes,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Lower-cased kind terms of a comma separated kind filter.
pub(crate) fn kind_terms(filter: &str) -> Vec<String> {
    filter
        .split(',')
        .map(|t| t.trim().trim_end_matches('/').to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Append the filter conditions to a query over `o`, `b` and the current
/// revision `r`.
pub(crate) fn push_object_filters(builder: &mut QueryBuilder<'_, Sqlite>, filter: &ObjectFilter) {
    if let Some(kind) = non_empty(&filter.kind) {
        let terms = kind_terms(kind);
        if !terms.is_empty() {
            builder.push(" AND (");
            for (i, term) in terms.into_iter().enumerate() {
                if i > 0 {
                    builder.push(" OR ");
                }
                let descendant = format!("{}/", term);
                builder.push("o.kind_lower = ");
                builder.push_bind(term);
                builder.push(" OR substr(o.kind_lower, 1, ");
                builder.push_bind(descendant.chars().count() as i64);
                builder.push(") = ");
                builder.push_bind(descendant);
            }
            builder.push(")");
        }
    }
    if let Some(content_type) = non_empty(&filter.content_type) {
        builder.push(" AND o.content_type_lower = ");
        builder.push_bind(content_type.to_lowercase());
    }
    if let Some(name) = non_empty(&filter.name) {
        builder.push(" AND instr(o.name_lower, ");
        builder.push_bind(name.to_lowercase());
        builder.push(") > 0");
    }
    if let Some(tag) = non_empty(&filter.tag) {
        builder.push(
            " AND EXISTS (SELECT 1 FROM revision_metadata m WHERE m.revision_id = r.id \
             AND m.label = ",
        );
        builder.push_bind(OBJECT_TAG_LABEL);
        builder.push(" AND instr(lower(m.value), ");
        builder.push_bind(tag.to_lowercase());
        builder.push(") > 0)");
    }
    if let Some(project) = non_empty(&filter.project_name) {
        builder.push(" AND instr(lower(r.project_name), ");
        builder.push_bind(project.to_lowercase());
        builder.push(") > 0");
    }
    if let Some(committer) = non_empty(&filter.committer) {
        builder.push(" AND instr(lower(r.username), ");
        builder.push_bind(committer.to_lowercase());
        builder.push(") > 0");
    }
}

/// Summaries of the objects in `buckets` matching `filter`, ordered by
/// bucket then object name.
pub(crate) fn summary_query<'a>(buckets: &[String], filter: &ObjectFilter) -> QueryBuilder<'a, Sqlite> {
    let mut builder = QueryBuilder::<Sqlite>::new(SUMMARY_COLUMNS);
    builder.push(" AND b.name IN (");
    let mut names = builder.separated(", ");
    for bucket in buckets {
        names.push_bind(bucket.clone());
    }
    names.push_unseparated(")");
    push_object_filters(&mut builder, filter);
    builder.push(" ORDER BY b.name ASC, o.name_lower ASC");
    builder
}

/// Every kind plus each of its `/` separated ancestors, sorted.
pub fn kinds_with_ancestors<I, S>(kinds: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = BTreeSet::new();
    for kind in kinds {
        let kind = kind.as_ref();
        let mut prefix = String::new();
        for segment in kind.split('/').filter(|s| !s.is_empty()) {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            out.insert(prefix.clone());
        }
    }
    out.into_iter().collect()
}

/// Fetch an object by bucket and name.
///
/// Returns BucketNotFound when the bucket itself is missing.
pub(crate) async fn fetch_object(
    conn: &mut SqliteConnection,
    bucket: &str,
    name: &str,
) -> CatalogResult<CatalogObject> {
    let object = sqlx::query_as::<_, CatalogObject>(&format!(
        "{}WHERE b.name = ? AND o.name = ?",
        OBJECT_COLUMNS
    ))
    .bind(bucket)
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?;

    match object {
        Some(object) => Ok(object),
        None => {
            fetch_bucket(&mut *conn, bucket).await?;
            Err(CatalogError::ObjectNotFound {
                bucket: bucket.to_string(),
                name: name.to_string(),
            })
        }
    }
}

pub(crate) async fn objects_in_bucket(
    conn: &mut SqliteConnection,
    bucket_id: i64,
) -> CatalogResult<Vec<CatalogObject>> {
    let objects = sqlx::query_as::<_, CatalogObject>(&format!(
        "{}WHERE o.bucket_id = ? ORDER BY o.id ASC",
        OBJECT_COLUMNS
    ))
    .bind(bucket_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(objects)
}

async fn load_metadata(conn: &mut SqliteConnection, revision_id: i64) -> CatalogResult<Vec<Metadata>> {
    let metadata = sqlx::query_as::<_, Metadata>(
        "SELECT key, value, label FROM revision_metadata WHERE revision_id = ? ORDER BY position ASC",
    )
    .bind(revision_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(metadata)
}

/// Fetch one revision with its metadata; `None` selects the current one.
pub(crate) async fn fetch_revision(
    conn: &mut SqliteConnection,
    object: &CatalogObject,
    commit_time: Option<i64>,
) -> CatalogResult<Revision> {
    let mut builder = QueryBuilder::<Sqlite>::new(REVISION_COLUMNS);
    builder.push_bind(object.id);
    match commit_time {
        Some(commit_time) => {
            builder.push(" AND r.commit_time = ");
            builder.push_bind(commit_time);
        }
        None => {
            builder.push(" ORDER BY r.commit_time DESC LIMIT 1");
        }
    }

    let mut revision = builder
        .build_query_as::<Revision>()
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| CatalogError::RevisionNotFound {
            bucket: object.bucket_name.clone(),
            name: object.name.clone(),
            commit_time: commit_time.unwrap_or(object.last_commit_time),
        })?;
    revision.metadata = load_metadata(conn, revision.id).await?;
    Ok(revision)
}

async fn fetch_content(conn: &mut SqliteConnection, revision_id: i64) -> CatalogResult<Bytes> {
    let content = sqlx::query_scalar::<_, Vec<u8>>("SELECT raw_object FROM revisions WHERE id = ?")
        .bind(revision_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(Bytes::from(content))
}

/// Commit a new revision of `object`. Must run inside the caller's
/// transaction.
pub(crate) async fn append_revision(
    conn: &mut SqliteConnection,
    object: &CatalogObject,
    draft: RevisionDraft,
) -> CatalogResult<Revision> {
    let now = Utc::now().timestamp_millis();
    let commit_time = sqlx::query_scalar::<_, i64>(
        "UPDATE catalog_objects SET last_commit_time = MAX(last_commit_time + 1, ?)
         WHERE id = ? RETURNING last_commit_time",
    )
    .bind(now)
    .bind(object.id)
    .fetch_one(&mut *conn)
    .await?;

    let checksum = format!("{:x}", md5::compute(&draft.content));
    let revision_id = sqlx::query(
        "INSERT INTO revisions (object_id, commit_time, commit_message, username, project_name,
                                tags, content_type, checksum, raw_object)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(object.id)
    .bind(commit_time)
    .bind(&draft.commit_message)
    .bind(&draft.username)
    .bind(&draft.project_name)
    .bind(&draft.tags)
    .bind(&draft.content_type)
    .bind(&checksum)
    .bind(&draft.content[..])
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    for (position, entry) in draft.metadata.iter().enumerate() {
        sqlx::query(
            "INSERT INTO revision_metadata (revision_id, position, key, value, label)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(revision_id)
        .bind(position as i64)
        .bind(&entry.key)
        .bind(&entry.value)
        .bind(&entry.label)
        .execute(&mut *conn)
        .await?;
    }

    debug!(
        "committed revision {} of `{}/{}` ({} metadata entries)",
        commit_time,
        object.bucket_name,
        object.name,
        draft.metadata.len()
    );

    Ok(Revision {
        id: revision_id,
        bucket_name: object.bucket_name.clone(),
        object_name: object.name.clone(),
        kind: object.kind.clone(),
        content_type: draft.content_type,
        extension: object.extension.clone(),
        commit_time,
        commit_message: draft.commit_message,
        username: draft.username,
        project_name: draft.project_name,
        tags: draft.tags,
        checksum,
        metadata: draft.metadata,
    })
}

/// Remove an object, its grants first, then the row itself; revisions and
/// their metadata follow through the cascade.
pub(crate) async fn remove_object(
    conn: &mut SqliteConnection,
    object: &CatalogObject,
) -> CatalogResult<()> {
    let grants = delete_object_grants(&mut *conn, object.id).await?;
    sqlx::query("DELETE FROM catalog_objects WHERE id = ?")
        .bind(object.id)
        .execute(&mut *conn)
        .await?;
    info!(
        "deleted object `{}/{}` and {} grant(s)",
        object.bucket_name, object.name, grants
    );
    Ok(())
}

/// Copy of the current revision with refreshed owner-derived metadata.
pub(crate) async fn recommit_current(
    conn: &mut SqliteConnection,
    object: &CatalogObject,
    owner: &str,
    commit_message: &str,
    username: &str,
) -> CatalogResult<Revision> {
    let current = fetch_revision(&mut *conn, object, None).await?;
    let content = fetch_content(&mut *conn, current.id).await?;
    let derived = derive_metadata(current.metadata, None, None, owner, &object.bucket_name);
    append_revision(
        conn,
        object,
        RevisionDraft {
            commit_message: commit_message.to_string(),
            username: username.to_string(),
            content_type: current.content_type,
            project_name: derived.project_name,
            tags: derived.tags,
            metadata: derived.metadata,
            content,
        },
    )
    .await
}

#[derive(Clone)]
pub struct CatalogObjectService {
    db: Arc<SqlitePool>,
    parsers: Arc<ParserRegistry>,
}

impl CatalogObjectService {
    pub fn new(db: Arc<SqlitePool>, parsers: Arc<ParserRegistry>) -> Self {
        Self { db, parsers }
    }

    fn base_metadata(&self, kind: &str, overrides: Option<Vec<Metadata>>, content: &[u8]) -> Vec<Metadata> {
        match overrides {
            Some(metadata) => metadata,
            None => self.parsers.parse(kind, content),
        }
    }

    /// Create an object together with its first revision.
    ///
    /// Name, kind, content type and tags are validated before anything is
    /// written. Fails with AlreadyExists when the bucket already holds an
    /// object of that name.
    pub async fn create_object(&self, new: NewObject) -> CatalogResult<Revision> {
        ensure_object_name_valid(&new.name)?;
        ensure_kind_valid(&new.kind)?;
        ensure_content_type_valid(&new.content_type)?;
        if let Some(tags) = &new.tags {
            ensure_tags_valid(tags)?;
        }

        let mut tx = self.db.begin().await?;
        let bucket = fetch_bucket(&mut tx, &new.bucket).await?;

        let inserted = sqlx::query(
            "INSERT INTO catalog_objects (bucket_id, name, name_lower, kind, kind_lower,
                                          content_type, content_type_lower, extension)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(bucket.id)
        .bind(&new.name)
        .bind(new.name.to_lowercase())
        .bind(&new.kind)
        .bind(new.kind.to_lowercase())
        .bind(&new.content_type)
        .bind(new.content_type.to_lowercase())
        .bind(&new.extension)
        .execute(&mut *tx)
        .await;

        let object_id = match inserted {
            Ok(result) => result.last_insert_rowid(),
            Err(err) if is_unique_violation(&err) => {
                return Err(CatalogError::ObjectAlreadyExists {
                    bucket: new.bucket,
                    name: new.name,
                });
            }
            Err(err) => return Err(CatalogError::Sqlx(err)),
        };

        let object = CatalogObject {
            id: object_id,
            bucket_id: bucket.id,
            bucket_name: bucket.name.clone(),
            name: new.name,
            kind: new.kind,
            content_type: new.content_type,
            extension: new.extension,
            last_commit_time: 0,
        };

        let base = self.base_metadata(&object.kind, new.metadata, &new.content);
        let derived = derive_metadata(
            base,
            new.project_name.as_deref(),
            new.tags.as_deref(),
            &bucket.owner,
            &bucket.name,
        );
        let revision = append_revision(
            &mut tx,
            &object,
            RevisionDraft {
                commit_message: new.commit_message,
                username: new.username,
                content_type: object.content_type.clone(),
                project_name: derived.project_name,
                tags: derived.tags,
                metadata: derived.metadata,
                content: new.content,
            },
        )
        .await?;
        tx.commit().await?;

        info!(
            "created object `{}/{}` of kind {}",
            object.bucket_name, object.name, object.kind
        );
        Ok(revision)
    }

    /// Append a revision to an existing object, re-parsing its content unless
    /// a metadata list is supplied.
    pub async fn create_revision(
        &self,
        bucket: &str,
        name: &str,
        new: NewRevision,
    ) -> CatalogResult<Revision> {
        if let Some(tags) = &new.tags {
            ensure_tags_valid(tags)?;
        }

        let mut tx = self.db.begin().await?;
        let object = fetch_object(&mut tx, bucket, name).await?;
        let bucket = fetch_bucket(&mut tx, bucket).await?;

        let base = self.base_metadata(&object.kind, new.metadata, &new.content);
        let derived = derive_metadata(
            base,
            new.project_name.as_deref(),
            new.tags.as_deref(),
            &bucket.owner,
            &bucket.name,
        );
        let revision = append_revision(
            &mut tx,
            &object,
            RevisionDraft {
                commit_message: new.commit_message,
                username: new.username,
                content_type: object.content_type.clone(),
                project_name: derived.project_name,
                tags: derived.tags,
                metadata: derived.metadata,
                content: new.content,
            },
        )
        .await?;
        tx.commit().await?;
        Ok(revision)
    }

    /// Commit a copy of an earlier revision as the new current one.
    ///
    /// History is never rewound: the restored content gets a new, later
    /// commit time and the copied revision stays untouched.
    pub async fn restore_revision(
        &self,
        bucket: &str,
        name: &str,
        commit_time: i64,
    ) -> CatalogResult<Revision> {
        let mut tx = self.db.begin().await?;
        let object = fetch_object(&mut tx, bucket, name).await?;
        let old = fetch_revision(&mut tx, &object, Some(commit_time)).await?;
        let content = fetch_content(&mut tx, old.id).await?;

        let revision = append_revision(
            &mut tx,
            &object,
            RevisionDraft {
                commit_message: format!("{} (restored from {})", old.commit_message, commit_time),
                username: old.username,
                content_type: old.content_type,
                project_name: old.project_name,
                tags: old.tags,
                metadata: old.metadata,
                content,
            },
        )
        .await?;
        tx.commit().await?;

        info!(
            "restored `{}/{}` from revision {} as {}",
            object.bucket_name, object.name, commit_time, revision.commit_time
        );
        Ok(revision)
    }

    /// Change kind, content type, project name or tags and commit the result
    /// as a new revision with [`UPDATE_COMMIT_MESSAGE`].
    pub async fn update_object_metadata(
        &self,
        bucket: &str,
        name: &str,
        update: MetadataUpdate,
    ) -> CatalogResult<Revision> {
        if update.kind.is_none()
            && update.content_type.is_none()
            && update.project_name.is_none()
            && update.tags.is_none()
        {
            return Err(CatalogError::InvalidArgument(
                "at least one of kind, content type, project name or tags must be given".into(),
            ));
        }
        if let Some(kind) = &update.kind {
            ensure_kind_valid(kind)?;
        }
        if let Some(content_type) = &update.content_type {
            ensure_content_type_valid(content_type)?;
        }
        if let Some(tags) = &update.tags {
            ensure_tags_valid(tags)?;
        }

        let mut tx = self.db.begin().await?;
        let mut object = fetch_object(&mut tx, bucket, name).await?;
        let bucket = fetch_bucket(&mut tx, bucket).await?;
        let current = fetch_revision(&mut tx, &object, None).await?;
        let content = fetch_content(&mut tx, current.id).await?;

        if let Some(kind) = update.kind {
            sqlx::query("UPDATE catalog_objects SET kind = ?, kind_lower = ? WHERE id = ?")
                .bind(&kind)
                .bind(kind.to_lowercase())
                .bind(object.id)
                .execute(&mut *tx)
                .await?;
            object.kind = kind;
        }
        if let Some(content_type) = update.content_type {
            sqlx::query(
                "UPDATE catalog_objects SET content_type = ?, content_type_lower = ? WHERE id = ?",
            )
            .bind(&content_type)
            .bind(content_type.to_lowercase())
            .bind(object.id)
            .execute(&mut *tx)
            .await?;
            object.content_type = content_type;
        }

        let derived = derive_metadata(
            current.metadata,
            update.project_name.as_deref(),
            update.tags.as_deref(),
            &bucket.owner,
            &bucket.name,
        );
        let revision = append_revision(
            &mut tx,
            &object,
            RevisionDraft {
                commit_message: UPDATE_COMMIT_MESSAGE.to_string(),
                username: update.username,
                content_type: object.content_type.clone(),
                project_name: derived.project_name,
                tags: derived.tags,
                metadata: derived.metadata,
                content,
            },
        )
        .await?;
        tx.commit().await?;
        Ok(revision)
    }

    /// Delete one revision and return it.
    ///
    /// Without a commit time, or when the targeted revision is the only one,
    /// the whole object goes (its grants first). Deleting the current
    /// revision of a longer history makes the next most recent current;
    /// deleting an older one leaves the current revision alone.
    pub async fn delete_revision(
        &self,
        bucket: &str,
        name: &str,
        commit_time: Option<i64>,
    ) -> CatalogResult<Revision> {
        let mut tx = self.db.begin().await?;
        let object = fetch_object(&mut tx, bucket, name).await?;
        let target = fetch_revision(&mut tx, &object, commit_time).await?;

        let remaining = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM revisions WHERE object_id = ?")
            .bind(object.id)
            .fetch_one(&mut *tx)
            .await?;

        if commit_time.is_none() || remaining <= 1 {
            remove_object(&mut tx, &object).await?;
        } else {
            sqlx::query("DELETE FROM revisions WHERE id = ?")
                .bind(target.id)
                .execute(&mut *tx)
                .await?;
            info!(
                "deleted revision {} of `{}/{}`",
                target.commit_time, object.bucket_name, object.name
            );
        }
        tx.commit().await?;
        Ok(target)
    }

    /// Delete an object with all its revisions and grants, returning its
    /// last current revision.
    pub async fn delete_object(&self, bucket: &str, name: &str) -> CatalogResult<Revision> {
        self.delete_revision(bucket, name, None).await
    }

    pub async fn get_object(&self, bucket: &str, name: &str) -> CatalogResult<Revision> {
        let mut conn = self.db.acquire().await?;
        let object = fetch_object(&mut conn, bucket, name).await?;
        fetch_revision(&mut conn, &object, None).await
    }

    pub async fn get_revision(
        &self,
        bucket: &str,
        name: &str,
        commit_time: i64,
    ) -> CatalogResult<Revision> {
        let mut conn = self.db.acquire().await?;
        let object = fetch_object(&mut conn, bucket, name).await?;
        fetch_revision(&mut conn, &object, Some(commit_time)).await
    }

    /// Raw content of a revision, the current one when `commit_time` is `None`.
    pub async fn get_raw_object(
        &self,
        bucket: &str,
        name: &str,
        commit_time: Option<i64>,
    ) -> CatalogResult<RawObject> {
        let mut conn = self.db.acquire().await?;
        let object = fetch_object(&mut conn, bucket, name).await?;
        let revision = fetch_revision(&mut conn, &object, commit_time).await?;
        let content = fetch_content(&mut conn, revision.id).await?;
        Ok(RawObject {
            bucket_name: object.bucket_name,
            object_name: object.name,
            commit_time: revision.commit_time,
            content_type: revision.content_type,
            extension: object.extension,
            content,
        })
    }

    /// Every revision of an object, newest first.
    pub async fn list_revisions(&self, bucket: &str, name: &str) -> CatalogResult<Vec<Revision>> {
        let mut conn = self.db.acquire().await?;
        let object = fetch_object(&mut conn, bucket, name).await?;

        let mut builder = QueryBuilder::<Sqlite>::new(REVISION_COLUMNS);
        builder.push_bind(object.id);
        builder.push(" ORDER BY r.commit_time DESC");
        let mut revisions = builder
            .build_query_as::<Revision>()
            .fetch_all(&mut *conn)
            .await?;
        for revision in &mut revisions {
            revision.metadata = load_metadata(&mut conn, revision.id).await?;
        }
        Ok(revisions)
    }

    /// Current revisions of the objects in `buckets` matching `filter`.
    pub async fn list_objects(
        &self,
        buckets: &[String],
        filter: &ObjectFilter,
        page: Page,
    ) -> CatalogResult<Vec<ObjectSummary>> {
        ensure_page_valid(page.offset, page.size)?;
        if buckets.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = summary_query(buckets, filter);
        builder.push(" LIMIT ");
        builder.push_bind(page.size);
        builder.push(" OFFSET ");
        builder.push_bind(page.offset.saturating_mul(page.size));

        let objects = builder
            .build_query_as::<ObjectSummary>()
            .fetch_all(&*self.db)
            .await?;
        Ok(objects)
    }

    /// Every object of `buckets` matching `filter`, unpaged.
    pub async fn matching_objects(
        &self,
        buckets: &[String],
        filter: &ObjectFilter,
    ) -> CatalogResult<Vec<ObjectSummary>> {
        if buckets.is_empty() {
            return Ok(Vec::new());
        }
        let objects = summary_query(buckets, filter)
            .build_query_as::<ObjectSummary>()
            .fetch_all(&*self.db)
            .await?;
        Ok(objects)
    }

    /// All stored kinds and their ancestors.
    pub async fn list_kinds(&self) -> CatalogResult<Vec<String>> {
        let kinds = sqlx::query_scalar::<_, String>("SELECT DISTINCT kind FROM catalog_objects")
            .fetch_all(&*self.db)
            .await?;
        Ok(kinds_with_ancestors(kinds))
    }

    pub async fn list_content_types(&self) -> CatalogResult<Vec<String>> {
        let content_types = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT content_type FROM catalog_objects ORDER BY content_type ASC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(content_types)
    }

    /// Tags carried by current revisions.
    pub async fn list_object_tags(&self) -> CatalogResult<Vec<String>> {
        let tags = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT m.value FROM revision_metadata m
             JOIN revisions r ON r.id = m.revision_id
             WHERE m.label = ?
               AND r.commit_time = (SELECT MAX(r2.commit_time) FROM revisions r2
                                    WHERE r2.object_id = r.object_id)
             ORDER BY m.value ASC",
        )
        .bind(OBJECT_TAG_LABEL)
        .fetch_all(&*self.db)
        .await?;
        Ok(tags)
    }
}
