use std::sync::atomic::Ordering;
use std::sync::Arc;

use monresql_types::{FieldMap, OpKind, Operation};
use sqlx::PgPool;

use crate::checkpoint::{CheckpointCell, CheckpointCells};
use crate::metrics::{counters_for, Counters};
use crate::oplog::OplogSource;

/// Everything a worker (shard or overflow) needs to turn one `Operation`
/// into an applied Postgres write and an advanced checkpoint. Cloned
/// cheaply (every field is an `Arc` or a `PgPool`, itself a connection
/// pool handle) into each worker task.
#[derive(Clone)]
pub struct ApplyContext {
    pub field_map: Arc<FieldMap>,
    pub pool: PgPool,
    pub source: Arc<dyn OplogSource>,
    pub cells: CheckpointCells,
    pub sync_name: String,
    pub checkpoint: bool,
    pub counters: Counters,
}

/// Applies one oplog-derived operation: re-fetches the full document for
/// `update`s, synthesizes and executes the corresponding SQL, then advances
/// the in-memory checkpoint cell to this op's timestamp.
///
/// The checkpoint advances on dispatch, not on confirmed apply: a SQL error
/// is logged and counted but never retried in-line, and never blocks the
/// checkpoint from moving past it. Retrying a persistently-failing op would
/// otherwise stall the whole shard at the same epoch forever. The
/// at-least-once delivery contract this relies on comes from the oplog
/// resuming from the last persisted checkpoint, not from in-place retries.
pub async fn apply_op(ctx: &ApplyContext, mut op: Operation) {
    let fan_key = op.fan_key();
    let Some(collection) = ctx.field_map.collection(&op.database, &op.collection) else {
        return;
    };

    if matches!(op.kind, OpKind::Update) {
        if let Some(id) = op.id.clone() {
            match ctx.source.fetch_by_id(&op.database, &op.collection, &id).await {
                Ok(Some(full)) => op.payload = full,
                Ok(None) => tracing::debug!(%fan_key, "update re-fetch found no document, applying delta"),
                Err(e) => tracing::warn!(%fan_key, error = %e, "update re-fetch failed, applying delta"),
            }
        }
    }

    let result = match op.kind {
        OpKind::Insert | OpKind::Update => {
            let stmt = monresql_sql::build_upsert(collection);
            let params = monresql_sql::sanitize(collection, &op);
            Some(monresql_sql::execute(&ctx.pool, &collection.pg_table, &stmt, &params).await)
        }
        OpKind::Delete => {
            let stmt = monresql_sql::build_delete(collection);
            let params = monresql_sql::sanitize(collection, &op);
            Some(monresql_sql::execute(&ctx.pool, &collection.pg_table, &stmt, &params).await)
        }
        OpKind::Other => None,
    };

    if let Some(c) = counters_for(&ctx.counters, &fan_key) {
        match &result {
            Some(Ok(())) => {
                c.applied.fetch_add(1, Ordering::Relaxed);
            }
            Some(Err(e)) => {
                tracing::error!(table = %collection.pg_table, error = %e, "apply failed");
                c.errors.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                c.skipped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    if ctx.checkpoint {
        let mut cells = ctx.cells.lock().unwrap();
        cells.insert(
            ctx.sync_name.clone(),
            CheckpointCell {
                app_name: ctx.sync_name.clone(),
                last_epoch: op.timestamp.epoch_secs as i64,
                processed_at: chrono::Utc::now(),
            },
        );
    }
}
