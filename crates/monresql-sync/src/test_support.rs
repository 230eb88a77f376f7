//! In-memory `OplogSource` double shared by the tests in this crate. Real
//! tests exercise `spawn_shard_set`, `SyncHandle`, and the checkpoint writer
//! against this rather than a live replica set.
use async_trait::async_trait;
use monresql_types::DocId;
use tokio::sync::mpsc;

use crate::oplog::{OplogError, OplogSource, OplogStream};

/// Hands back whatever `tail_after` was primed with exactly once; every
/// later call returns an already-closed stream, so a reconnect loop that
/// calls `tail_after` more than once just sees its source go idle rather
/// than replaying the same ops.
#[derive(Default)]
pub struct StubOplogSource {
    ops: std::sync::Mutex<Option<Vec<monresql_types::Operation>>>,
}

impl StubOplogSource {
    pub fn with_ops(ops: Vec<monresql_types::Operation>) -> Self {
        StubOplogSource { ops: std::sync::Mutex::new(Some(ops)) }
    }
}

#[async_trait]
impl OplogSource for StubOplogSource {
    async fn tail_after(&self, _epoch: i64) -> Result<OplogStream, OplogError> {
        let queued = self.ops.lock().unwrap().take().unwrap_or_default();
        let (op_tx, op_rx) = mpsc::channel(queued.len().max(1));
        let (_err_tx, err_rx) = mpsc::channel(1);
        for op in queued {
            let _ = op_tx.send(op).await;
        }
        Ok(OplogStream { ops: op_rx, errors: err_rx })
    }

    async fn fetch_by_id(
        &self,
        _database: &str,
        _collection: &str,
        _id: &DocId,
    ) -> Result<Option<serde_json::Value>, OplogError> {
        Ok(None)
    }

    async fn snapshot(
        &self,
        _database: &str,
        _collection: &str,
    ) -> Result<mpsc::Receiver<serde_json::Value>, OplogError> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }
}
