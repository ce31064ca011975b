//! # Hosted Schema Migrations
//!
//! Embedded SQL migrations for the hosted inventory table.
//!
//! ```text
//! migrations/postgres/
//! ├── 001_inventory.sql         inventory table + change-notify trigger
//! └── 002_inventory_order.sql   per-row insertion sequence
//! ```
//!
//! Never modify an applied migration; add the next numbered file instead.

use sqlx::PgPool;
use tracing::info;

use crate::error::DbResult;

/// Embedded migrations from the `migrations/postgres` directory.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/postgres");

/// Channel the change trigger notifies on. The payload is the store code.
pub const CHANGE_CHANNEL: &str = "inventory_changes";

/// Runs all pending migrations. Idempotent.
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    info!("Checking for pending hosted migrations");

    MIGRATOR.run(pool).await?;

    info!("All hosted migrations applied");
    Ok(())
}

/// Returns (total, applied) migration counts, for health checks.
pub async fn migration_status(pool: &PgPool) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .unwrap_or(0);

    Ok((total, applied as usize))
}
