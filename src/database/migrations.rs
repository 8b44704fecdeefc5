//! # Database Migrations
//!
//! Schema migrations live in `migrations/` as `YYYYMMDDHHMMSS_description.sql`
//! and are embedded at compile time. sqlx records applied versions in
//! `_sqlx_migrations` and serializes concurrent runners with an advisory
//! lock, so every tracker instance may run them at startup.

use sqlx::migrate::Migrator;
use sqlx::PgPool;
use tracing::info;

use crate::error::PipelineResult;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply outstanding migrations
pub async fn run_migrations(pool: &PgPool) -> PipelineResult<()> {
    MIGRATOR.run(pool).await?;
    info!(
        migrations = MIGRATOR.iter().count(),
        "Database schema up to date"
    );
    Ok(())
}
