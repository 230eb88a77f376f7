//! The running pieces: the MongoDB oplog source, the continuous tail
//! engine, and the one-shot full replicator, plus the checkpoint store,
//! consistent-hash fan-out, and metrics they share.

mod apply;
mod checkpoint;
mod fan;
mod metrics;
mod oplog;
mod options;
mod overflow;
mod replicate;
mod ring;
mod tail;
#[cfg(test)]
mod test_support;

pub use checkpoint::{CheckpointCell, CheckpointStore};
pub use metrics::CollectionCounters;
pub use oplog::{MongoOplogSource, OplogError, OplogSource, OplogStream};
pub use options::{FullReplicateOptions, SyncOptions};
pub use replicate::{replicate, CollectionSummary, ReplicationSummary};
pub use tail::{sync, SyncHandle};
