use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use monresql_types::{Collection, Error, FieldMap, OpKind, OpTimestamp, Operation};
use serde_json::Value;
use sqlx::PgPool;
use tokio::sync::mpsc;

use crate::metrics::{new_counters, Counters};
use crate::oplog::OplogSource;
use crate::options::FullReplicateOptions;

/// One already-fetched document waiting to be upserted, tagged with the
/// collection it belongs to so a worker doesn't need to look anything up
/// beyond what it was handed.
struct WorkItem {
    fan_key: String,
    collection: Arc<Collection>,
    payload: Value,
}

/// Per-collection counts from a full replication run.
#[derive(Debug, Clone)]
pub struct CollectionSummary {
    pub fan_key: String,
    pub applied: u64,
    pub errors: u64,
    pub skipped: u64,
}

/// Returned by `replicate` once every configured collection has drained.
#[derive(Debug, Clone, Default)]
pub struct ReplicationSummary {
    pub collections: Vec<CollectionSummary>,
}

impl ReplicationSummary {
    pub fn total_applied(&self) -> u64 {
        self.collections.iter().map(|c| c.applied).sum()
    }

    pub fn total_errors(&self) -> u64 {
        self.collections.iter().map(|c| c.errors).sum()
    }
}

/// Performs a one-time, full-collection snapshot replication: every document
/// currently in each configured Mongo collection is forced through as a
/// synthetic insert. Unlike `sync`, this runs to completion and returns a
/// summary rather than a handle: there is no oplog position to resume from.
///
/// `name` identifies this run in logs, the same way a sync name identifies
/// a tail; a full replication has no checkpoint row of its own to persist.
pub async fn replicate<S>(
    field_map: Arc<FieldMap>,
    pool: PgPool,
    source: S,
    name: &str,
    options: FullReplicateOptions,
) -> Result<ReplicationSummary, Error>
where
    S: OplogSource,
{
    let source: Arc<dyn OplogSource> = Arc::new(source);
    let fan_keys: Vec<String> = field_map.iter_collections().map(|(key, _)| key).collect();
    let counters = new_counters(fan_keys.clone());
    let missing_table: Arc<Mutex<HashMap<String, bool>>> = Arc::new(Mutex::new(HashMap::new()));

    let (tx, rx) = mpsc::channel::<WorkItem>(1000);
    let shared_rx = Arc::new(tokio::sync::Mutex::new(rx));

    let mut worker_handles = Vec::with_capacity(options.workers);
    for _ in 0..options.workers {
        let shared_rx = shared_rx.clone();
        let pool = pool.clone();
        let counters = counters.clone();
        let missing_table = missing_table.clone();
        worker_handles.push(tokio::spawn(async move {
            loop {
                let item = {
                    let mut guard = shared_rx.lock().await;
                    match guard.recv().await {
                        Some(item) => item,
                        None => return,
                    }
                };
                apply_snapshot_item(&pool, &counters, &missing_table, item).await;
            }
        }));
    }

    let mut reader_handles = Vec::with_capacity(fan_keys.len());
    for (fan_key, collection) in field_map.iter_collections() {
        let collection = Arc::new(collection.clone());
        let source = source.clone();
        let tx = tx.clone();
        let Some((database, _)) = fan_key.split_once('.') else { continue };
        let database = database.to_string();
        let fan_key_for_reader = fan_key.clone();
        reader_handles.push(tokio::spawn(async move {
            let mut docs = match source.snapshot(&database, &collection.name).await {
                Ok(rx) => rx,
                Err(e) => {
                    tracing::error!(fan_key = %fan_key_for_reader, error = %e, "snapshot failed to open");
                    return;
                }
            };
            while let Some(payload) = docs.recv().await {
                let item = WorkItem {
                    fan_key: fan_key_for_reader.clone(),
                    collection: collection.clone(),
                    payload,
                };
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        }));
    }
    drop(tx);

    for handle in reader_handles {
        let _ = handle.await;
    }
    for handle in worker_handles {
        let _ = handle.await;
    }

    let snapshot = counters.read().unwrap();
    let collections = fan_keys
        .into_iter()
        .map(|fan_key| {
            let c = snapshot.get(&fan_key).cloned().unwrap_or_default();
            CollectionSummary {
                fan_key,
                applied: c.applied.load(Ordering::Relaxed),
                errors: c.errors.load(Ordering::Relaxed),
                skipped: c.skipped.load(Ordering::Relaxed),
            }
        })
        .collect();

    let summary = ReplicationSummary { collections };
    tracing::info!(name, applied = summary.total_applied(), errors = summary.total_errors(), "full replication complete");
    Ok(summary)
}

async fn apply_snapshot_item(
    pool: &PgPool,
    counters: &Counters,
    missing_table: &Arc<Mutex<HashMap<String, bool>>>,
    item: WorkItem,
) {
    if missing_table.lock().unwrap().get(&item.collection.pg_table).copied().unwrap_or(false) {
        if let Some(c) = counters.read().unwrap().get(&item.fan_key).cloned() {
            c.skipped.fetch_add(1, Ordering::Relaxed);
        }
        return;
    }

    let id = item
        .collection
        .id_field()
        .and_then(|f| item.payload.get(&f.mongo_name))
        .map(|v| monresql_types::DocId::Scalar(v.clone()));
    let database = item.fan_key.split_once('.').map(|(db, _)| db.to_string()).unwrap_or_default();

    let op = Operation {
        kind: OpKind::Insert,
        database,
        collection: item.collection.name.clone(),
        id,
        payload: item.payload,
        timestamp: OpTimestamp::ZERO,
    };

    let stmt = monresql_sql::build_upsert(&item.collection);
    let params = monresql_sql::sanitize(&item.collection, &op);
    let result = monresql_sql::execute(pool, &item.collection.pg_table, &stmt, &params).await;

    let Some(c) = counters.read().unwrap().get(&item.fan_key).cloned() else {
        return;
    };
    match result {
        Ok(()) => {
            c.applied.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            tracing::error!(table = %item.collection.pg_table, error = %e, "snapshot apply failed");
            missing_table.lock().unwrap().insert(item.collection.pg_table.clone(), true);
            c.errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_totals_sum_across_collections() {
        let summary = ReplicationSummary {
            collections: vec![
                CollectionSummary { fan_key: "d.a".into(), applied: 3, errors: 1, skipped: 0 },
                CollectionSummary { fan_key: "d.b".into(), applied: 5, errors: 0, skipped: 2 },
            ],
        };
        assert_eq!(summary.total_applied(), 8);
        assert_eq!(summary.total_errors(), 1);
    }
}
