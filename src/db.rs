//! SQLite pool construction and embedded migrations.

use crate::errors::CatalogResult;
use sqlx::{
    SqliteConnection, SqlitePool,
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{path::Path, str::FromStr};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Open a pool on `url`, creating the database file and its parent
/// directory when missing. Foreign keys are enforced on every connection.
pub async fn connect(url: &str, max_connections: u32) -> CatalogResult<SqlitePool> {
    let db_path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if !db_path.starts_with(":memory:") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
    }

    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Run any pending migrations embedded from `migrations/`.
pub async fn run_migrations(pool: &SqlitePool) -> CatalogResult<()> {
    MIGRATOR.run(pool).await?;
    Ok(())
}

/// A private in-memory database with the schema applied.
///
/// Each in-memory connection is its own database, so the pool is pinned to
/// one connection that is never recycled. Callers must not hold a connection
/// while asking the pool for another one.
pub async fn in_memory() -> CatalogResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// Return true if SQLx error indicates a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// Number of objects stored in a bucket.
pub(crate) async fn count_objects(conn: &mut SqliteConnection, bucket_id: i64) -> CatalogResult<i64> {
    let count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM catalog_objects WHERE bucket_id = ?")
            .bind(bucket_id)
            .fetch_one(&mut *conn)
            .await?;
    Ok(count)
}
