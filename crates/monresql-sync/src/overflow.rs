use std::sync::Arc;

use monresql_types::Operation;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::apply::{apply_op, ApplyContext};

/// Spawns the shared overflow pool: `worker_count` tasks all draining the
/// same `mpsc::Receiver`, guarded by a `tokio::sync::Mutex` since `mpsc`
/// only supports a single consumer natively. Ops diverted here lose
/// per-id ordering against whatever the shard pool is concurrently
/// applying for the same id, acceptable given idempotent upserts.
pub fn spawn_overflow_pool(
    rx: mpsc::Receiver<Operation>,
    worker_count: usize,
    apply_ctx: ApplyContext,
    token: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let shared_rx = Arc::new(Mutex::new(rx));

    (0..worker_count)
        .map(|_| {
            let shared_rx = shared_rx.clone();
            let ctx = apply_ctx.clone();
            let token = token.clone();
            tokio::spawn(async move {
                loop {
                    let op = {
                        let mut guard = shared_rx.lock().await;
                        tokio::select! {
                            _ = token.cancelled() => return,
                            maybe_op = guard.recv() => match maybe_op {
                                Some(op) => op,
                                None => return,
                            },
                        }
                    };
                    apply_op(&ctx, op).await;
                }
            })
        })
        .collect()
}
