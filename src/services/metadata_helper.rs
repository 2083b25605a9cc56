//! Synchronisation between a revision's metadata list and the derived
//! `project_name` / `tags` fields.
//!
//! Project name and tags resolve with the precedence request parameter >
//! metadata list entry > value parsed from the raw content. The list handed
//! to [`derive_metadata`] is either the caller's override list or the
//! parser's output, never both, so the two lower levels collapse into one.

use crate::models::{
    bucket::owner_display_group,
    metadata::{
        BUCKET_NAME_KEY, GENERIC_INFORMATION_LABEL, GROUP_KEY, JOB_INFORMATION_LABEL,
        Metadata, OBJECT_TAG_LABEL, PROJECT_NAME_KEY,
    },
};

/// Metadata ready to be stored with a revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedMetadata {
    pub metadata: Vec<Metadata>,
    pub project_name: String,
    pub tags: String,
}

fn is_project_name(entry: &Metadata) -> bool {
    entry.key == PROJECT_NAME_KEY && entry.has_label(JOB_INFORMATION_LABEL)
}

pub fn project_name_of(metadata: &[Metadata]) -> Option<&str> {
    metadata
        .iter()
        .find(|m| is_project_name(m))
        .map(|m| m.value.as_str())
}

/// Split, trim and deduplicate a comma separated tag string.
pub fn split_tags(tags: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

/// Comma joined values of the `object_tag` entries.
pub fn tags_of(metadata: &[Metadata]) -> String {
    let joined = metadata
        .iter()
        .filter(|m| m.has_label(OBJECT_TAG_LABEL))
        .map(|m| m.value.as_str())
        .collect::<Vec<_>>()
        .join(",");
    split_tags(&joined).join(",")
}

/// Replace the project name entry; an empty name removes it.
pub fn sync_project_name(metadata: &mut Vec<Metadata>, project_name: &str) {
    let position = metadata.iter().position(is_project_name);
    metadata.retain(|m| !is_project_name(m));
    if project_name.is_empty() {
        return;
    }
    let entry = Metadata::labeled(PROJECT_NAME_KEY, project_name, JOB_INFORMATION_LABEL);
    match position {
        Some(index) if index <= metadata.len() => metadata.insert(index, entry),
        _ => metadata.push(entry),
    }
}

/// Replace every `object_tag` entry with one entry per tag.
pub fn sync_tags(metadata: &mut Vec<Metadata>, tags: &[String]) {
    metadata.retain(|m| !m.has_label(OBJECT_TAG_LABEL));
    metadata.extend(
        tags.iter()
            .map(|tag| Metadata::labeled(tag.as_str(), tag.as_str(), OBJECT_TAG_LABEL)),
    );
}

fn upsert_generic_information(metadata: &mut Vec<Metadata>, key: &str, value: &str) {
    match metadata
        .iter_mut()
        .find(|m| m.key == key && m.has_label(GENERIC_INFORMATION_LABEL))
    {
        Some(entry) => entry.value = value.to_string(),
        None => metadata.push(Metadata::labeled(key, value, GENERIC_INFORMATION_LABEL)),
    }
}

/// Inject or refresh the owner-derived `group` and `bucketName` entries.
pub fn set_generic_information(metadata: &mut Vec<Metadata>, owner: &str, bucket: &str) {
    upsert_generic_information(metadata, GROUP_KEY, owner_display_group(owner));
    upsert_generic_information(metadata, BUCKET_NAME_KEY, bucket);
}

/// Resolve project name and tags and bring the list in line with them.
///
/// `None` parameters fall back to the list; `Some("")` clears the field.
pub fn derive_metadata(
    mut metadata: Vec<Metadata>,
    project_name: Option<&str>,
    tags: Option<&str>,
    owner: &str,
    bucket: &str,
) -> DerivedMetadata {
    let project_name = project_name
        .map(|p| p.trim().to_string())
        .or_else(|| project_name_of(&metadata).map(str::to_string))
        .unwrap_or_default();
    let tags = match tags {
        Some(tags) => split_tags(tags),
        None => split_tags(&tags_of(&metadata)),
    };

    sync_project_name(&mut metadata, &project_name);
    sync_tags(&mut metadata, &tags);
    set_generic_information(&mut metadata, owner, bucket);

    DerivedMetadata {
        metadata,
        project_name,
        tags: tags.join(","),
    }
}
