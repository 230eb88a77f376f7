use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use monresql_types::FieldMap;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::apply::ApplyContext;
use crate::checkpoint::{CheckpointCell, CheckpointStore};
use crate::fan::{ensure_all_fields, spawn_shard_set};
use crate::metrics::{new_counters, run_reporter};
use crate::oplog::{OplogError, OplogSource, OplogStream};
use crate::options::SyncOptions;
use crate::overflow::spawn_overflow_pool;

const FAN_QUEUE_CAPACITY: usize = 1000;
const OVERFLOW_QUEUE_CAPACITY: usize = 1000;

/// Returned by `sync`. Dropping it does not stop the tail: only calling
/// `stop()` does. Calling `stop()` twice is a no-op.
pub struct SyncHandle {
    token: CancellationToken,
    stopped: Arc<AtomicBool>,
    supervisor: Option<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.token.cancel();
        }
    }

    /// Waits for the tail's supervisor task to fully unwind after a
    /// `stop()`. Mainly useful in tests and the CLI demo's shutdown path.
    pub async fn join(mut self) {
        if let Some(handle) = self.supervisor.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Starts the tail and returns immediately with a handle. See SPEC_FULL.md
/// §4.6 for the full state machine. The caller is expected to have already
/// run `validate_or_create_postgres_table` (which also bootstraps the
/// `monresql_metadata` table) before calling this.
pub fn sync<S>(field_map: Arc<FieldMap>, pool: PgPool, source: S, name: impl Into<String>, options: SyncOptions) -> SyncHandle
where
    S: OplogSource,
{
    let name = name.into();
    let source: Arc<dyn OplogSource> = Arc::new(source);
    let token = CancellationToken::new();
    let stopped = Arc::new(AtomicBool::new(false));

    let supervisor = tokio::spawn(run_supervisor(field_map, pool, source, name, options, token.clone()));

    SyncHandle {
        token,
        stopped,
        supervisor: Some(supervisor),
    }
}

async fn run_supervisor(
    field_map: Arc<FieldMap>,
    pool: PgPool,
    source: Arc<dyn OplogSource>,
    name: String,
    options: SyncOptions,
    token: CancellationToken,
) {
    let checkpoint_store = CheckpointStore::new(pool.clone());
    let cells: crate::checkpoint::CheckpointCells = Arc::new(Mutex::new(HashMap::new()));

    let mut epoch = if options.last_epoch != 0 {
        options.last_epoch
    } else {
        match checkpoint_store.load(&name).await {
            Ok(Some(e)) => e,
            Ok(None) => 0,
            Err(e) => {
                tracing::error!(error = %e, "failed to load checkpoint, starting from epoch 0");
                0
            }
        }
    };

    let fan_keys: Vec<String> = field_map.iter_collections().map(|(key, _)| key).collect();
    let counters = new_counters(fan_keys.clone());

    let (overflow_tx, overflow_rx) = mpsc::channel(OVERFLOW_QUEUE_CAPACITY);
    let mut worker_handles = Vec::new();
    let mut fan_txs: HashMap<String, mpsc::Sender<monresql_types::Operation>> = HashMap::new();

    for (fan_key, _collection) in field_map.iter_collections() {
        let (tx, rx) = mpsc::channel(FAN_QUEUE_CAPACITY);
        fan_txs.insert(fan_key.clone(), tx);

        let apply_ctx = ApplyContext {
            field_map: field_map.clone(),
            pool: pool.clone(),
            source: source.clone(),
            cells: cells.clone(),
            sync_name: name.clone(),
            checkpoint: options.checkpoint,
            counters: counters.clone(),
        };
        worker_handles.extend(spawn_shard_set(fan_key, rx, apply_ctx, overflow_tx.clone(), token.clone()));
    }

    let overflow_apply_ctx = ApplyContext {
        field_map: field_map.clone(),
        pool: pool.clone(),
        source: source.clone(),
        cells: cells.clone(),
        sync_name: name.clone(),
        checkpoint: options.checkpoint,
        counters: counters.clone(),
    };
    worker_handles.extend(spawn_overflow_pool(overflow_rx, options.overflow_workers, overflow_apply_ctx, token.clone()));

    worker_handles.push(tokio::spawn(run_reporter(counters.clone(), options.report_period, token.clone())));

    if options.checkpoint {
        worker_handles.push(tokio::spawn(run_checkpoint_writer(
            cells.clone(),
            checkpoint_store.clone(),
            name.clone(),
            options.check_point_period,
            token.clone(),
        )));
    }

    'reconnect: loop {
        let OplogStream { mut ops, mut errors } = match source.tail_after(epoch).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(error = %e, "failed to open oplog stream, stopping tail");
                break 'reconnect;
            }
        };

        loop {
            tokio::select! {
                _ = token.cancelled() => break 'reconnect,
                maybe_op = ops.recv() => {
                    let Some(mut op) = maybe_op else { break 'reconnect };
                    let fan_key = op.fan_key();
                    match fan_txs.get(&fan_key) {
                        Some(tx) => {
                            if let Some(collection) = field_map.collection(&op.database, &op.collection) {
                                ensure_all_fields(collection, &mut op);
                            }
                            if tx.send(op).await.is_err() {
                                break 'reconnect;
                            }
                        }
                        None => {
                            if let Some(c) = crate::metrics::counters_for(&counters, &fan_key) {
                                c.skipped.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                }
                maybe_err = errors.recv() => {
                    let Some(err) = maybe_err else { continue };
                    match err {
                        OplogError::Timeout(msg) => {
                            tracing::warn!(error = %msg, "oplog i/o timeout, reconnecting");
                            epoch = latest_epoch(&cells, &name).unwrap_or(epoch);
                            continue 'reconnect;
                        }
                        OplogError::Fatal(msg) => {
                            tracing::error!(error = %msg, "fatal oplog error, stopping tail");
                            break 'reconnect;
                        }
                    }
                }
            }
        }
    }

    token.cancel();
    for handle in worker_handles {
        let _ = handle.await;
    }
}

fn latest_epoch(cells: &crate::checkpoint::CheckpointCells, name: &str) -> Option<i64> {
    cells.lock().unwrap().get(name).map(|c| c.last_epoch)
}

/// Whether `run_checkpoint_writer` should persist `epoch` this tick, given
/// the epoch it last wrote (or `None` if it has never written). Pulled out
/// as its own function so the dedup rule is testable without a pool.
fn should_persist(last_written: Option<i64>, epoch: i64) -> bool {
    last_written != Some(epoch)
}

async fn run_checkpoint_writer(
    cells: crate::checkpoint::CheckpointCells,
    store: CheckpointStore,
    name: String,
    period: std::time::Duration,
    token: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    let mut last_written: Option<i64> = None;

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = interval.tick() => {
                let current = cells.lock().unwrap().get(&name).cloned();
                let Some(cell) = current else { continue };
                if !should_persist(last_written, cell.last_epoch) {
                    continue;
                }
                if let Err(e) = store.persist(&cell).await {
                    tracing::error!(error = %e, "failed to persist checkpoint");
                    continue;
                }
                last_written = Some(cell.last_epoch);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubOplogSource;
    use monresql_types::FieldMap;
    use serde_json::json;

    #[test]
    fn latest_epoch_reads_the_shared_cell() {
        let cells: crate::checkpoint::CheckpointCells = Arc::new(Mutex::new(HashMap::new()));
        cells.lock().unwrap().insert(
            "s".to_string(),
            CheckpointCell {
                app_name: "s".into(),
                last_epoch: 7,
                processed_at: chrono::Utc::now(),
            },
        );
        assert_eq!(latest_epoch(&cells, "s"), Some(7));
        assert_eq!(latest_epoch(&cells, "missing"), None);
    }

    #[test]
    fn should_persist_skips_an_unchanged_epoch() {
        assert!(should_persist(None, 5));
        assert!(!should_persist(Some(5), 5));
        assert!(should_persist(Some(5), 6));
    }

    #[sqlx::test]
    async fn stop_is_idempotent(pool: sqlx::PgPool) {
        let field_map = Arc::new(
            FieldMap::from_value(json!({
                "d": {"collections": {"c": {"name": "c", "pg_table": "c", "fields": {"_id": "TEXT"}}}}
            }))
            .unwrap(),
        );
        let handle = sync(
            field_map,
            pool,
            StubOplogSource::default(),
            "test",
            SyncOptions::default().with_checkpoint(false).with_last_epoch(1),
        );

        handle.stop();
        handle.stop();
        handle.join().await;
    }

    #[sqlx::test]
    async fn checkpoint_writer_skips_unchanged_epoch_and_converges(pool: sqlx::PgPool) {
        monresql_sql::ensure_metadata_table(&pool).await.unwrap();
        tokio::time::pause();

        let store = CheckpointStore::new(pool.clone());
        let cells: crate::checkpoint::CheckpointCells = Arc::new(Mutex::new(HashMap::new()));
        let token = CancellationToken::new();

        cells.lock().unwrap().insert(
            "s".to_string(),
            CheckpointCell { app_name: "s".into(), last_epoch: 10, processed_at: chrono::Utc::now() },
        );

        let writer = tokio::spawn(run_checkpoint_writer(
            cells.clone(),
            store.clone(),
            "s".to_string(),
            std::time::Duration::from_millis(100),
            token.clone(),
        ));
        tokio::task::yield_now().await;

        tokio::time::advance(std::time::Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
        tokio::time::advance(std::time::Duration::from_millis(100)).await;
        tokio::task::yield_now().await;

        cells.lock().unwrap().insert(
            "s".to_string(),
            CheckpointCell { app_name: "s".into(), last_epoch: 20, processed_at: chrono::Utc::now() },
        );
        tokio::time::advance(std::time::Duration::from_millis(100)).await;
        tokio::task::yield_now().await;

        token.cancel();
        writer.await.unwrap();

        let epoch: i64 =
            sqlx::query_scalar("SELECT last_epoch FROM \"public\".\"monresql_metadata\" WHERE app_name = $1")
                .bind("s")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(epoch, 20, "the writer must converge on the latest epoch once it changes");
    }
}
