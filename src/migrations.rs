//! Database migrations.
//!
//! Uses SQLx embedded migrations for both PostgreSQL and SQLite ledger stores.

use sqlx::{PgPool, SqlitePool};

static POSTGRES_MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("migrations/postgres");
static SQLITE_MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("migrations/sqlite");

pub async fn run_postgres(pool: &PgPool) -> anyhow::Result<()> {
    POSTGRES_MIGRATOR.run(pool).await?;
    tracing::info!("PostgreSQL ledger migrations applied");
    Ok(())
}

pub async fn run_sqlite(pool: &SqlitePool) -> anyhow::Result<()> {
    SQLITE_MIGRATOR.run(pool).await?;
    tracing::info!("SQLite ledger migrations applied");
    Ok(())
}
