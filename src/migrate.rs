use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

use crate::db;

pub async fn run_migrations(db_path: &Path) -> Result<()> {
    let pool = db::connect(db_path).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the checkpoint schema on an open pool. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checkpoints (
            tap TEXT PRIMARY KEY,
            state_json TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_checkpoints_updated_at ON checkpoints(updated_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
