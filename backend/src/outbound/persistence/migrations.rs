//! Embedded schema migrations.
//!
//! Diesel's migration harness needs a synchronous connection, so the run is
//! moved onto the blocking pool.

use diesel::{Connection, PgConnection};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use tracing::info;

use super::pool::PoolError;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

fn migrate_blocking(database_url: &str) -> Result<usize, PoolError> {
    let mut conn = PgConnection::establish(database_url)
        .map_err(|err| PoolError::build(format!("migration connection: {err}")))?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|err| PoolError::build(format!("migration: {err}")))?;
    Ok(applied.len())
}

/// Apply every pending migration against `database_url`.
pub async fn run_pending_migrations(database_url: &str) -> Result<(), PoolError> {
    let url = database_url.to_owned();
    let applied = tokio::task::spawn_blocking(move || migrate_blocking(&url))
        .await
        .map_err(|err| PoolError::build(format!("migration task: {err}")))??;
    info!(applied, "database migrations complete");
    Ok(())
}
