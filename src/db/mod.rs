//! Database module

pub mod queries;

use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

/// Create a database connection pool.
///
/// `acquire_timeout` bounds how long a booking insert may wait for a
/// connection, so a saturated pool surfaces as a store timeout.
pub async fn create_pool(database_url: &str, acquire_timeout: Duration) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Run database migrations, first re-syncing stored checksums so that
/// line-ending differences between checkouts do not block startup.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let migrator = sqlx::migrate!("./migrations");

    let versions: Vec<i64> = migrator
        .iter()
        .filter(|m| !m.migration_type.is_down_migration())
        .map(|m| m.version)
        .collect();
    info!("Compiled migration versions: {:?}", versions);

    if migrations_table_exists(pool).await? {
        sync_migration_checksums(pool, &migrator).await?;
    }
    migrator.run(pool).await?;

    info!("Database migrations complete");
    Ok(())
}

async fn migrations_table_exists(pool: &PgPool) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = '_sqlx_migrations')"
    )
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

async fn sync_migration_checksums(pool: &PgPool, migrator: &sqlx::migrate::Migrator) -> Result<()> {
    for migration in migrator.iter().filter(|m| !m.migration_type.is_down_migration()) {
        let stored: Option<(Vec<u8>,)> = sqlx::query_as(
            "SELECT checksum FROM _sqlx_migrations WHERE version = $1"
        )
        .bind(migration.version)
        .fetch_optional(pool)
        .await?;

        let current: &[u8] = &migration.checksum;
        if matches!(stored, Some((ref checksum,)) if checksum.as_slice() != current) {
            warn!(
                "Migration {} ({}) checksum differs from binary, updating",
                migration.version, migration.description
            );
            sqlx::query("UPDATE _sqlx_migrations SET checksum = $1 WHERE version = $2")
                .bind(current)
                .bind(migration.version)
                .execute(pool)
                .await?;
        }
    }
    Ok(())
}
