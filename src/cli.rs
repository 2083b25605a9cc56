//! Operator command line.
//!
//! Every catalog command runs on behalf of the identity given with `--user`
//! and `--groups`, and is checked against that identity's resolved access
//! before it touches anything. Results are printed as pretty JSON.

use crate::{
    Catalog,
    config::{AppConfig, ConfigArgs},
    models::{
        access::AccessType,
        grant::{GrantTarget, GranteeType},
        identity::AuthenticatedUser,
    },
    services::{
        bucket_service::BucketFilter,
        catalog_object_service::{MetadataUpdate, NewObject, NewRevision, ObjectFilter, Page},
    },
};
use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

#[derive(Parser, Debug)]
#[command(author, version, about = "Versioned object catalog")]
pub struct Cli {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub identity: IdentityArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct IdentityArgs {
    /// User the command runs as
    #[arg(long, global = true, default_value = "admin")]
    pub user: String,

    /// Comma separated groups of that user
    #[arg(long, global = true, value_delimiter = ',')]
    pub groups: Vec<String>,
}

impl IdentityArgs {
    pub fn user(&self) -> AuthenticatedUser {
        AuthenticatedUser::new(
            self.user.trim(),
            self.groups
                .iter()
                .map(|g| g.trim())
                .filter(|g| !g.is_empty()),
        )
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run migrations and exit
    Migrate,
    /// Serve the health and readiness probes
    Serve,
    /// Bucket commands
    #[command(subcommand)]
    Bucket(BucketCommand),
    /// Object and revision commands
    #[command(subcommand)]
    Object(ObjectCommand),
    /// Grant commands
    #[command(subcommand)]
    Grant(GrantCommand),
    /// Show resolved access
    #[command(subcommand)]
    Access(AccessCommand),
}

#[derive(Subcommand, Debug)]
pub enum BucketCommand {
    Create {
        name: String,
        /// Username or `GROUP:<name>`; public when omitted
        #[arg(long)]
        owner: Option<String>,
    },
    Get {
        name: String,
    },
    List {
        #[arg(long = "owner")]
        owners: Vec<String>,
        #[command(flatten)]
        filter: FilterArgs,
    },
    Delete {
        name: String,
    },
    /// Delete every empty bucket
    Clean,
    SetOwner {
        name: String,
        owner: String,
    },
}

#[derive(Args, Debug, Default)]
pub struct FilterArgs {
    #[arg(long)]
    pub kind: Option<String>,
    #[arg(long)]
    pub content_type: Option<String>,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub tag: Option<String>,
    #[arg(long)]
    pub project: Option<String>,
    #[arg(long)]
    pub committer: Option<String>,
}

impl From<FilterArgs> for ObjectFilter {
    fn from(args: FilterArgs) -> Self {
        ObjectFilter {
            kind: args.kind,
            content_type: args.content_type,
            name: args.name,
            tag: args.tag,
            project_name: args.project,
            committer: args.committer,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum ObjectCommand {
    Create {
        bucket: String,
        name: String,
        #[arg(long)]
        kind: String,
        #[arg(long)]
        content_type: String,
        #[arg(long, short)]
        message: String,
        /// File holding the raw content
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        tags: Option<String>,
        #[arg(long)]
        extension: Option<String>,
    },
    /// Commit a new revision
    Commit {
        bucket: String,
        name: String,
        #[arg(long, short)]
        message: String,
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        tags: Option<String>,
    },
    Restore {
        bucket: String,
        name: String,
        commit_time: i64,
    },
    Update {
        bucket: String,
        name: String,
        #[arg(long)]
        kind: Option<String>,
        #[arg(long)]
        content_type: Option<String>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        tags: Option<String>,
    },
    /// Delete a revision, or the whole object without `--commit-time`
    Delete {
        bucket: String,
        name: String,
        #[arg(long)]
        commit_time: Option<i64>,
    },
    Get {
        bucket: String,
        name: String,
        #[arg(long)]
        commit_time: Option<i64>,
    },
    /// Write the raw content to a file, or stdout
    Raw {
        bucket: String,
        name: String,
        #[arg(long)]
        commit_time: Option<i64>,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    History {
        bucket: String,
        name: String,
    },
    List {
        /// Buckets to list; every accessible bucket when omitted
        #[arg(long = "bucket")]
        buckets: Vec<String>,
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, default_value_t = 0)]
        page: i64,
        #[arg(long)]
        size: Option<i64>,
    },
    Dependencies {
        bucket: String,
        name: String,
        #[arg(long)]
        commit_time: Option<i64>,
    },
    Kinds,
    ContentTypes,
    Tags,
}

#[derive(Args, Debug)]
pub struct TargetArgs {
    pub bucket: String,
    /// Object name; the grant targets the bucket when omitted
    #[arg(long)]
    pub object: Option<String>,
}

impl TargetArgs {
    fn target(&self) -> GrantTarget {
        match &self.object {
            Some(object) => GrantTarget::object(&self.bucket, object),
            None => GrantTarget::bucket(&self.bucket),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum GrantCommand {
    Create {
        #[command(flatten)]
        target: TargetArgs,
        grantee_type: GranteeType,
        grantee: String,
        access: AccessType,
        #[arg(long)]
        priority: Option<i32>,
    },
    Update {
        #[command(flatten)]
        target: TargetArgs,
        grantee_type: GranteeType,
        grantee: String,
        access: AccessType,
        #[arg(long)]
        priority: Option<i32>,
    },
    Delete {
        #[command(flatten)]
        target: TargetArgs,
        grantee_type: GranteeType,
        grantee: String,
    },
    /// Grants on a bucket or object; with `--all`, the grants on every object of the bucket
    List {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long)]
        all: bool,
    },
    /// Drop every grant on the target
    Purge {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// `noAccess` grants applying to the current user
    Denied,
}

#[derive(Subcommand, Debug)]
pub enum AccessCommand {
    Bucket { bucket: String },
    Object { bucket: String, object: String },
    /// Buckets the current user can see
    Buckets,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn read_content(path: &Path) -> Result<Bytes> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(Bytes::from(content))
}

async fn require_target(
    catalog: &Catalog,
    user: &AuthenticatedUser,
    target: &GrantTarget,
    required: AccessType,
) -> Result<()> {
    match target {
        GrantTarget::Bucket { bucket } => {
            catalog
                .access
                .require_bucket_access(user, bucket, required)
                .await?;
        }
        GrantTarget::Object { bucket, object } => {
            catalog
                .access
                .require_object_access(user, bucket, object, required)
                .await?;
        }
    }
    Ok(())
}

pub async fn run_bucket(
    catalog: &Catalog,
    user: &AuthenticatedUser,
    command: BucketCommand,
) -> Result<()> {
    match command {
        BucketCommand::Create { name, owner } => {
            print_json(&catalog.buckets.create_bucket(&name, owner.as_deref()).await?)
        }
        BucketCommand::Get { name } => {
            catalog
                .access
                .require_bucket_access(user, &name, AccessType::Read)
                .await?;
            print_json(&catalog.buckets.get_bucket(&name).await?)
        }
        BucketCommand::List { owners, filter } => {
            let filter = BucketFilter {
                owners: Some(owners),
                objects: filter.into(),
                association_status: None,
            };
            print_json(&catalog.list_buckets_for_user(user, &filter, &[]).await?)
        }
        BucketCommand::Delete { name } => {
            catalog
                .access
                .require_bucket_access(user, &name, AccessType::Admin)
                .await?;
            print_json(&catalog.buckets.delete_empty_bucket(&name).await?)
        }
        BucketCommand::Clean => print_json(&catalog.buckets.clean_all_empty_buckets().await?),
        BucketCommand::SetOwner { name, owner } => {
            catalog
                .access
                .require_bucket_access(user, &name, AccessType::Admin)
                .await?;
            print_json(&catalog.buckets.update_owner(&name, &owner, &user.name).await?)
        }
    }
}

pub async fn run_object(
    catalog: &Catalog,
    cfg: &AppConfig,
    user: &AuthenticatedUser,
    command: ObjectCommand,
) -> Result<()> {
    let access = &catalog.access;
    match command {
        ObjectCommand::Create {
            bucket,
            name,
            kind,
            content_type,
            message,
            file,
            project,
            tags,
            extension,
        } => {
            access
                .require_bucket_access(user, &bucket, AccessType::Write)
                .await?;
            let new = NewObject {
                bucket,
                name,
                kind,
                content_type,
                commit_message: message,
                username: user.name.clone(),
                project_name: project,
                tags,
                metadata: None,
                extension,
                content: read_content(&file).await?,
            };
            print_json(&catalog.objects.create_object(new).await?)
        }
        ObjectCommand::Commit {
            bucket,
            name,
            message,
            file,
            project,
            tags,
        } => {
            access
                .require_object_access(user, &bucket, &name, AccessType::Write)
                .await?;
            let new = NewRevision {
                commit_message: message,
                username: user.name.clone(),
                project_name: project,
                tags,
                metadata: None,
                content: read_content(&file).await?,
            };
            print_json(&catalog.objects.create_revision(&bucket, &name, new).await?)
        }
        ObjectCommand::Restore {
            bucket,
            name,
            commit_time,
        } => {
            access
                .require_object_access(user, &bucket, &name, AccessType::Write)
                .await?;
            print_json(
                &catalog
                    .objects
                    .restore_revision(&bucket, &name, commit_time)
                    .await?,
            )
        }
        ObjectCommand::Update {
            bucket,
            name,
            kind,
            content_type,
            project,
            tags,
        } => {
            access
                .require_object_access(user, &bucket, &name, AccessType::Write)
                .await?;
            let update = MetadataUpdate {
                kind,
                content_type,
                project_name: project,
                tags,
                username: user.name.clone(),
            };
            print_json(
                &catalog
                    .objects
                    .update_object_metadata(&bucket, &name, update)
                    .await?,
            )
        }
        ObjectCommand::Delete {
            bucket,
            name,
            commit_time,
        } => {
            access
                .require_object_access(user, &bucket, &name, AccessType::Write)
                .await?;
            print_json(
                &catalog
                    .objects
                    .delete_revision(&bucket, &name, commit_time)
                    .await?,
            )
        }
        ObjectCommand::Get {
            bucket,
            name,
            commit_time,
        } => {
            access
                .require_object_access(user, &bucket, &name, AccessType::Read)
                .await?;
            let revision = match commit_time {
                Some(t) => catalog.objects.get_revision(&bucket, &name, t).await?,
                None => catalog.objects.get_object(&bucket, &name).await?,
            };
            print_json(&revision)
        }
        ObjectCommand::Raw {
            bucket,
            name,
            commit_time,
            output,
        } => {
            access
                .require_object_access(user, &bucket, &name, AccessType::Read)
                .await?;
            let raw = catalog
                .objects
                .get_raw_object(&bucket, &name, commit_time)
                .await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &raw.content)
                        .await
                        .with_context(|| format!("writing {}", path.display()))?;
                    tracing::info!(
                        "wrote {} ({} bytes) to {}",
                        raw.file_name(),
                        raw.content.len(),
                        path.display()
                    );
                }
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&raw.content).await?;
                    stdout.flush().await?;
                }
            }
            Ok(())
        }
        ObjectCommand::History { bucket, name } => {
            access
                .require_object_access(user, &bucket, &name, AccessType::Read)
                .await?;
            print_json(&catalog.objects.list_revisions(&bucket, &name).await?)
        }
        ObjectCommand::List {
            buckets,
            filter,
            page,
            size,
        } => {
            let page = Page {
                offset: page,
                size: size.unwrap_or(cfg.default_page_size),
            };
            let wanted = (!buckets.is_empty()).then_some(buckets.as_slice());
            print_json(
                &catalog
                    .list_objects_for_user(user, wanted, &filter.into(), page)
                    .await?,
            )
        }
        ObjectCommand::Dependencies {
            bucket,
            name,
            commit_time,
        } => {
            access
                .require_object_access(user, &bucket, &name, AccessType::Read)
                .await?;
            print_json(
                &catalog
                    .dependencies
                    .get_object_dependencies(&bucket, &name, commit_time)
                    .await?,
            )
        }
        ObjectCommand::Kinds => print_json(&catalog.objects.list_kinds().await?),
        ObjectCommand::ContentTypes => print_json(&catalog.objects.list_content_types().await?),
        ObjectCommand::Tags => print_json(&catalog.objects.list_object_tags().await?),
    }
}

pub async fn run_grant(
    catalog: &Catalog,
    user: &AuthenticatedUser,
    command: GrantCommand,
) -> Result<()> {
    let grants = &catalog.grants;
    match command {
        GrantCommand::Create {
            target,
            grantee_type,
            grantee,
            access,
            priority,
        } => {
            let target = target.target();
            require_target(catalog, user, &target, AccessType::Admin).await?;
            print_json(
                &grants
                    .create_grant(&target, grantee_type, &grantee, access, priority, &user.name)
                    .await?,
            )
        }
        GrantCommand::Update {
            target,
            grantee_type,
            grantee,
            access,
            priority,
        } => {
            let target = target.target();
            require_target(catalog, user, &target, AccessType::Admin).await?;
            print_json(
                &grants
                    .update_grant(&target, grantee_type, &grantee, access, priority, &user.name)
                    .await?,
            )
        }
        GrantCommand::Delete {
            target,
            grantee_type,
            grantee,
        } => {
            let target = target.target();
            require_target(catalog, user, &target, AccessType::Admin).await?;
            print_json(&grants.delete_grant(&target, grantee_type, &grantee).await?)
        }
        GrantCommand::List { target, all } => {
            let target = target.target();
            require_target(catalog, user, &target, AccessType::Admin).await?;
            let listed = match (&target, all) {
                (GrantTarget::Bucket { bucket }, true) => grants.list_grants_in_bucket(bucket).await?,
                (GrantTarget::Bucket { bucket }, false) => grants.list_bucket_grants(bucket).await?,
                (GrantTarget::Object { bucket, object }, _) => {
                    grants.list_object_grants(bucket, object).await?
                }
            };
            print_json(&listed)
        }
        GrantCommand::Purge { target } => {
            let target = target.target();
            require_target(catalog, user, &target, AccessType::Admin).await?;
            let removed = match &target {
                GrantTarget::Bucket { bucket } => grants.delete_all_grants_for_bucket(bucket).await?,
                GrantTarget::Object { bucket, object } => {
                    grants.delete_all_grants_for_object(bucket, object).await?
                }
            };
            print_json(&serde_json::json!({ "removed": removed }))
        }
        GrantCommand::Denied => print_json(&grants.user_no_access_grants(user).await?),
    }
}

pub async fn run_access(
    catalog: &Catalog,
    user: &AuthenticatedUser,
    command: AccessCommand,
) -> Result<()> {
    match command {
        AccessCommand::Bucket { bucket } => {
            let access = catalog.access.resolve_bucket_access(user, &bucket).await?;
            print_json(&serde_json::json!({ "bucket": bucket, "access": access }))
        }
        AccessCommand::Object { bucket, object } => {
            let access = catalog
                .access
                .resolve_object_access(user, &bucket, &object)
                .await?;
            print_json(&serde_json::json!({
                "bucket": bucket,
                "object": object,
                "access": access
            }))
        }
        AccessCommand::Buckets => print_json(&catalog.access.accessible_buckets(user).await?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_grant_creation() {
        let cli = Cli::try_parse_from([
            "object-catalog",
            "--user",
            "bob",
            "--groups",
            "dev, ops",
            "grant",
            "create",
            "flows",
            "--object",
            "etl",
            "group",
            "dev",
            "write",
            "--priority",
            "7",
        ])
        .unwrap();

        let user = cli.identity.user();
        assert_eq!(user, AuthenticatedUser::new("bob", ["dev", "ops"]));
        match cli.command {
            Command::Grant(GrantCommand::Create {
                target,
                grantee_type,
                access,
                priority,
                ..
            }) => {
                assert_eq!(target.target(), GrantTarget::object("flows", "etl"));
                assert_eq!(grantee_type, GranteeType::Group);
                assert_eq!(access, AccessType::Write);
                assert_eq!(priority, Some(7));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn bad_access_type_is_rejected() {
        let parsed = Cli::try_parse_from([
            "object-catalog",
            "grant",
            "create",
            "flows",
            "user",
            "alice",
            "owner",
        ]);
        assert!(parsed.is_err());
    }
}
