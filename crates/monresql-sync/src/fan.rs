use std::sync::Arc;

use monresql_types::{Collection, Operation};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::apply::{apply_op, ApplyContext};
use crate::ring::HashRing;

pub const SHARDS_PER_COLLECTION: usize = 5;
const SHARD_QUEUE_CAPACITY: usize = 64;
/// Once a shard's in-flight queue length exceeds this, the broker diverts
/// further ops for that shard to the overflow pool rather than blocking
/// on a `send` that could stall every other document in the collection
/// behind one hot id.
const OVERFLOW_THRESHOLD: usize = SHARDS_PER_COLLECTION;

/// Ensures every field the collection declares has *some* key present in
/// the payload (filling top-level absences with `null`), so the sanitizer
/// never has to distinguish "field genuinely missing" from "field not
/// yet observed" while binding SQL parameters downstream.
pub fn ensure_all_fields(collection: &Collection, op: &mut Operation) {
    let Some(obj) = op.payload.as_object_mut() else {
        return;
    };
    for field in collection.ordered_fields() {
        let top = field.mongo_name.split('.').next().unwrap_or(&field.mongo_name);
        obj.entry(top.to_string()).or_insert(Value::Null);
    }
}

/// Builds the five-shard consistent-hash worker set for one fanned
/// `db.collection`: a broker task that routes each op from `fan_rx` to
/// `ring.shard_for(id)`, and one worker task per shard applying ops in
/// the order the broker forwarded them.
pub fn spawn_shard_set(
    fan_key: String,
    mut fan_rx: mpsc::Receiver<Operation>,
    apply_ctx: ApplyContext,
    overflow_tx: mpsc::Sender<Operation>,
    token: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let ring = Arc::new(HashRing::new(SHARDS_PER_COLLECTION));
    let mut shard_txs = Vec::with_capacity(SHARDS_PER_COLLECTION);
    let mut handles = Vec::with_capacity(SHARDS_PER_COLLECTION + 1);

    for shard in 0..SHARDS_PER_COLLECTION {
        let (tx, mut rx) = mpsc::channel::<Operation>(SHARD_QUEUE_CAPACITY);
        shard_txs.push(tx);

        let ctx = apply_ctx.clone();
        let worker_token = token.clone();
        let worker_fan_key = fan_key.clone();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = worker_token.cancelled() => return,
                    maybe_op = rx.recv() => {
                        let Some(op) = maybe_op else { return };
                        tracing::trace!(fan_key = %worker_fan_key, shard, "applying op");
                        apply_op(&ctx, op).await;
                    }
                }
            }
        }));
    }

    let broker_token = token.clone();
    handles.push(tokio::spawn(async move {
        loop {
            let op = tokio::select! {
                _ = broker_token.cancelled() => return,
                maybe_op = fan_rx.recv() => match maybe_op {
                    Some(op) => op,
                    None => return,
                },
            };

            let key = op.id.as_ref().map(|id| id.stringify()).unwrap_or_default();
            let shard = ring.shard_for(&key);
            let tx = &shard_txs[shard];
            let in_flight = SHARD_QUEUE_CAPACITY - tx.capacity();

            let routed = if in_flight > OVERFLOW_THRESHOLD {
                overflow_tx.send(op).await
            } else {
                tx.send(op).await
            };
            if routed.is_err() {
                return;
            }
        }
    }));

    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use monresql_types::{DocId, FieldMap, OpKind, OpTimestamp};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::metrics::new_counters;
    use crate::test_support::StubOplogSource;

    #[sqlx::test]
    async fn same_id_ops_apply_in_shard_order(pool: sqlx::PgPool) {
        let field_map = Arc::new(
            FieldMap::from_value(json!({
                "d": {"collections": {"c": {
                    "name": "c", "pg_table": "c",
                    "fields": {"_id": "TEXT", "seq": "INT"}
                }}}
            }))
            .unwrap(),
        );
        sqlx::query(r#"CREATE TABLE "c" ("_id" TEXT PRIMARY KEY, "seq" INT)"#)
            .execute(&pool)
            .await
            .unwrap();

        let apply_ctx = ApplyContext {
            field_map: field_map.clone(),
            pool: pool.clone(),
            source: Arc::new(StubOplogSource::default()),
            cells: Arc::new(Mutex::new(HashMap::new())),
            sync_name: "test".into(),
            checkpoint: false,
            counters: new_counters(["d.c".to_string()]),
        };

        let (fan_tx, fan_rx) = mpsc::channel(32);
        let (overflow_tx, _overflow_rx) = mpsc::channel(32);
        let token = CancellationToken::new();
        let handles = spawn_shard_set("d.c".to_string(), fan_rx, apply_ctx, overflow_tx, token.clone());

        for seq in 0..20 {
            let op = Operation {
                kind: OpKind::Insert,
                database: "d".into(),
                collection: "c".into(),
                id: Some(DocId::Scalar(json!("x"))),
                payload: json!({"_id": "x", "seq": seq}),
                timestamp: OpTimestamp::ZERO,
            };
            fan_tx.send(op).await.unwrap();
        }
        drop(fan_tx);

        for handle in handles {
            handle.await.unwrap();
        }

        let seq: i32 = sqlx::query_scalar(r#"SELECT "seq" FROM "c" WHERE "_id" = $1"#)
            .bind("x")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(seq, 19, "ops for the same id must land in the order they were sent");
    }

    #[test]
    fn ensure_all_fields_fills_absent_top_level_keys() {
        let map = FieldMap::from_value(json!({
            "d": {"collections": {"c": {
                "name": "c", "pg_table": "c",
                "fields": {"_id": "TEXT", "name": "TEXT", "age": "INT"}
            }}}
        }))
        .unwrap();
        let coll = map.collection("d", "c").unwrap();
        let mut op = Operation {
            kind: OpKind::Insert,
            database: "d".into(),
            collection: "c".into(),
            id: None,
            payload: json!({"name": "a"}),
            timestamp: OpTimestamp::ZERO,
        };
        ensure_all_fields(coll, &mut op);
        assert_eq!(op.payload["age"], Value::Null);
        assert_eq!(op.payload["name"], json!("a"));
    }
}
