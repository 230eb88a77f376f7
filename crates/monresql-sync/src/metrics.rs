use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Per-collection applied/error/skipped counts, reset to zero on each
/// report tick. Lock-free increments: the map itself is built once at
/// start with one entry per fanned collection, so steady-state access is
/// a read-lock plus an atomic add, never a write-lock.
#[derive(Default)]
pub struct CollectionCounters {
    pub applied: AtomicU64,
    pub errors: AtomicU64,
    pub skipped: AtomicU64,
}

pub type Counters = Arc<RwLock<HashMap<String, Arc<CollectionCounters>>>>;

pub fn new_counters(fan_keys: impl IntoIterator<Item = String>) -> Counters {
    let map = fan_keys
        .into_iter()
        .map(|key| (key, Arc::new(CollectionCounters::default())))
        .collect();
    Arc::new(RwLock::new(map))
}

pub fn counters_for(counters: &Counters, fan_key: &str) -> Option<Arc<CollectionCounters>> {
    counters.read().unwrap().get(fan_key).cloned()
}

/// Ticks every `report_period`, logging and resetting any collection whose
/// counters are nonzero since the last tick.
pub async fn run_reporter(counters: Counters, report_period: Duration, token: CancellationToken) {
    let mut interval = tokio::time::interval(report_period);
    interval.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = interval.tick() => {
                let snapshot: Vec<_> = counters.read().unwrap().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                for (fan_key, c) in snapshot {
                    let applied = c.applied.swap(0, Ordering::Relaxed);
                    let errors = c.errors.swap(0, Ordering::Relaxed);
                    let skipped = c.skipped.swap(0, Ordering::Relaxed);
                    if applied != 0 || errors != 0 || skipped != 0 {
                        tracing::info!(collection = %fan_key, applied, errors, skipped, "tail progress");
                    }
                }
            }
        }
    }
}
