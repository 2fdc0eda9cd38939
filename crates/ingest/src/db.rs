use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use bulkload_core::config::PostgresConfig;

use crate::error::IngestError;

/// Create a PostgreSQL connection pool.
pub async fn connect(config: &PostgresConfig) -> Result<PgPool, IngestError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url())
        .await?;
    info!(host = %config.host, database = %config.database, "PostgreSQL connected");
    Ok(pool)
}

/// Apply pending schema migrations from the workspace `migrations/` directory.
pub async fn migrate(pool: &PgPool) -> Result<(), IngestError> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    info!("Database migrations applied successfully");
    Ok(())
}
