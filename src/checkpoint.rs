//! State snapshots stored in SQLite, keyed by tap name.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::state::State;

/// Name under which this tap's snapshots are stored.
pub const TAP_NAME: &str = "search-console";

pub async fn load_state(pool: &SqlitePool, tap: &str) -> Result<Option<State>> {
    let result: Option<String> =
        sqlx::query_scalar("SELECT state_json FROM checkpoints WHERE tap = ?")
            .bind(tap)
            .fetch_optional(pool)
            .await?;

    match result {
        Some(text) => Ok(Some(
            State::parse(&text).with_context(|| format!("corrupt checkpoint for '{}'", tap))?,
        )),
        None => Ok(None),
    }
}

pub async fn save_state(pool: &SqlitePool, tap: &str, state: &State) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO checkpoints (tap, state_json, updated_at) VALUES (?, ?, ?)
        ON CONFLICT(tap) DO UPDATE SET state_json = excluded.state_json, updated_at = excluded.updated_at
        "#,
    )
    .bind(tap)
    .bind(state.to_value().to_string())
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn clear_state(pool: &SqlitePool, tap: &str) -> Result<()> {
    sqlx::query("DELETE FROM checkpoints WHERE tap = ?")
        .bind(tap)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use tempfile::TempDir;

    #[tokio::test]
    async fn snapshot_replaces_previous() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data").join("tap.sqlite");
        let pool = db::connect(&path).await.unwrap();
        migrate::apply(&pool).await.unwrap();

        assert!(load_state(&pool, TAP_NAME).await.unwrap().is_none());

        let mut state = State::new();
        state.set_bookmark("performance_report_date", "s", "web", "2024-01-05T00:00:00.000000Z");
        save_state(&pool, TAP_NAME, &state).await.unwrap();

        state.set_bookmark("performance_report_date", "s", "web", "2024-01-09T00:00:00.000000Z");
        state.set_currently_syncing(Some("performance_report_date"));
        save_state(&pool, TAP_NAME, &state).await.unwrap();

        let loaded = load_state(&pool, TAP_NAME).await.unwrap().unwrap();
        assert_eq!(loaded, state);

        clear_state(&pool, TAP_NAME).await.unwrap();
        assert!(load_state(&pool, TAP_NAME).await.unwrap().is_none());
    }
}
