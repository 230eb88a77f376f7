use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use monresql_types::Result;
use sqlx::PgPool;

/// One sync's in-memory last-processed position. Overwritten wholesale on
/// every dispatched op so a reader never observes a torn `{epoch, ts}` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointCell {
    pub app_name: String,
    pub last_epoch: i64,
    pub processed_at: chrono::DateTime<chrono::Utc>,
}

/// Single-writer-per-sync-name, single-reader-per-sync-name shared map:
/// workers write their sync's cell, the checkpoint writer task reads it.
pub type CheckpointCells = Arc<Mutex<HashMap<String, CheckpointCell>>>;

/// Reads and writes the `monresql_metadata` table.
#[derive(Clone)]
pub struct CheckpointStore {
    pool: PgPool,
}

impl CheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        CheckpointStore { pool }
    }

    /// The stored `last_epoch` for `app_name`, or `None` if no row exists yet.
    pub async fn load(&self, app_name: &str) -> Result<Option<i64>> {
        let row: Option<i64> =
            sqlx::query_scalar("SELECT last_epoch FROM \"public\".\"monresql_metadata\" WHERE app_name = $1")
                .bind(app_name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    /// Upserts the checkpoint row for `cell.app_name`.
    pub async fn persist(&self, cell: &CheckpointCell) -> Result<()> {
        sqlx::query(
            "INSERT INTO \"public\".\"monresql_metadata\" (app_name, last_epoch, processed_at) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (app_name) DO UPDATE SET last_epoch = $2, processed_at = $3",
        )
        .bind(&cell.app_name)
        .bind(cell.last_epoch)
        .bind(cell.processed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
