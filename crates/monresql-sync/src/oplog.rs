use async_trait::async_trait;
use bson::{doc, Bson, Timestamp};
use futures::TryStreamExt;
use monresql_types::{DocId, OpKind, OpTimestamp, Operation};
use tokio::sync::mpsc;

/// Errors the oplog source surfaces to the tail engine. `Timeout` triggers
/// a reconnect from the last in-memory checkpoint; `Fatal` terminates the
/// tail. `classify` is the fallback substring-match predicate the design
/// keeps around for drivers that don't expose a typed timeout kind of
/// their own.
#[derive(Debug, thiserror::Error, Clone)]
pub enum OplogError {
    #[error("i/o timeout: {0}")]
    Timeout(String),
    #[error("fatal oplog error: {0}")]
    Fatal(String),
}

impl OplogError {
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.to_lowercase().contains("i/o timeout") {
            OplogError::Timeout(message)
        } else {
            OplogError::Fatal(message)
        }
    }
}

/// The op and error channel pair a tail "after" open hands back. Kept as a
/// struct rather than a tuple so tail.rs can `let OplogStream { ops, errors } = ...`.
pub struct OplogStream {
    pub ops: mpsc::Receiver<Operation>,
    pub errors: mpsc::Receiver<OplogError>,
}

/// The external-collaborator contract this design consumes: a resumable,
/// tagged stream of operations. The tail engine and full replicator are
/// written only against this trait; `MongoOplogSource` is the shipped
/// implementation, but tests substitute an in-memory one.
#[async_trait]
pub trait OplogSource: Send + Sync + 'static {
    /// Opens the oplog "after" the given epoch (seconds). Ops delivered
    /// from here on carry timestamps `> epoch`.
    async fn tail_after(&self, epoch: i64) -> Result<OplogStream, OplogError>;

    /// Re-fetches the current document for `id` within `(database, collection)`,
    /// used to resolve `update` deltas into full-document upserts.
    async fn fetch_by_id(
        &self,
        database: &str,
        collection: &str,
        id: &DocId,
    ) -> Result<Option<serde_json::Value>, OplogError>;

    /// Streams every document currently in `(database, collection)`, for
    /// the full replicator's one-time drain.
    async fn snapshot(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<mpsc::Receiver<serde_json::Value>, OplogError>;
}

/// Tails a real MongoDB replica set's `local.oplog.rs` collection.
pub struct MongoOplogSource {
    client: mongodb::Client,
}

impl MongoOplogSource {
    pub fn new(client: mongodb::Client) -> Self {
        MongoOplogSource { client }
    }

    fn oplog_collection(&self) -> mongodb::Collection<bson::Document> {
        self.client.database("local").collection("oplog.rs")
    }

    fn doc_collection(&self, database: &str, collection: &str) -> mongodb::Collection<bson::Document> {
        self.client.database(database).collection(collection)
    }
}

fn doc_id_of(bson: &Bson) -> DocId {
    match bson {
        Bson::ObjectId(oid) => DocId::ObjectId(oid.bytes()),
        other => DocId::Scalar(bson_to_json(other)),
    }
}

fn bson_to_json(bson: &Bson) -> serde_json::Value {
    serde_json::to_value(bson).unwrap_or(serde_json::Value::Null)
}

fn doc_to_json(doc: &bson::Document) -> serde_json::Value {
    serde_json::to_value(doc).unwrap_or(serde_json::Value::Null)
}

/// Decodes one `local.oplog.rs` entry into an `Operation`, or `None` for
/// entries this design doesn't route (no-ops, commands, unrecognized `op`).
fn decode_entry(entry: bson::Document) -> Option<Operation> {
    let op = entry.get_str("op").ok()?;
    let ns = entry.get_str("ns").ok()?;
    let (database, collection) = ns.split_once('.')?;

    let ts = entry.get_timestamp("ts").ok()?;
    let timestamp = OpTimestamp::new(ts.time, ts.increment);

    let kind = match op {
        "i" => OpKind::Insert,
        "u" => OpKind::Update,
        "d" => OpKind::Delete,
        _ => OpKind::Other,
    };

    let o = entry.get_document("o").ok();
    let o2 = entry.get_document("o2").ok();

    let id = match kind {
        OpKind::Update => o2.and_then(|o2| o2.get("_id")).map(doc_id_of),
        _ => o.and_then(|o| o.get("_id")).map(doc_id_of),
    };

    let payload = o.map(doc_to_json).unwrap_or(serde_json::Value::Null);

    Some(Operation {
        kind,
        database: database.to_string(),
        collection: collection.to_string(),
        id,
        payload,
        timestamp,
    })
}

#[async_trait]
impl OplogSource for MongoOplogSource {
    async fn tail_after(&self, epoch: i64) -> Result<OplogStream, OplogError> {
        let filter = doc! {
            "ts": { "$gt": Timestamp { time: epoch as u32, increment: 0 } },
        };
        let options = mongodb::options::FindOptions::builder()
            .cursor_type(mongodb::options::CursorType::TailableAwait)
            .no_cursor_timeout(true)
            .build();

        let mut cursor = self
            .oplog_collection()
            .find(filter, options)
            .await
            .map_err(|e| OplogError::classify(e.to_string()))?;

        let (op_tx, op_rx) = mpsc::channel(1000);
        let (err_tx, err_rx) = mpsc::channel(16);

        tokio::spawn(async move {
            loop {
                match cursor.try_next().await {
                    Ok(Some(entry)) => {
                        if let Some(op) = decode_entry(entry) {
                            if op_tx.send(op).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        let _ = err_tx.send(OplogError::classify(e.to_string())).await;
                        return;
                    }
                }
            }
        });

        Ok(OplogStream { ops: op_rx, errors: err_rx })
    }

    async fn fetch_by_id(
        &self,
        database: &str,
        collection: &str,
        id: &DocId,
    ) -> Result<Option<serde_json::Value>, OplogError> {
        let filter = match id {
            DocId::ObjectId(bytes) => {
                doc! { "_id": bson::oid::ObjectId::from_bytes(*bytes) }
            }
            DocId::Scalar(v) => {
                let bson = bson::to_bson(v).map_err(|e| OplogError::Fatal(e.to_string()))?;
                doc! { "_id": bson }
            }
        };

        self.doc_collection(database, collection)
            .find_one(filter, None)
            .await
            .map(|found| found.map(|d| doc_to_json(&d)))
            .map_err(|e| OplogError::classify(e.to_string()))
    }

    async fn snapshot(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<mpsc::Receiver<serde_json::Value>, OplogError> {
        let mut cursor = self
            .doc_collection(database, collection)
            .find(doc! {}, None)
            .await
            .map_err(|e| OplogError::classify(e.to_string()))?;

        let (tx, rx) = mpsc::channel(1000);
        tokio::spawn(async move {
            while let Ok(Some(doc)) = cursor.try_next().await {
                if tx.send(doc_to_json(&doc)).await.is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }
}
