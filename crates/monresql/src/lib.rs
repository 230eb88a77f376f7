//! Public facade: everything a caller needs to point a field mapping at a
//! Mongo deployment and a Postgres pool and start replicating.

use monresql_types::{FieldMap, Result};
use sqlx::PgPool;

pub use monresql_sql::{build_delete, build_insert, build_update, build_upsert, Statement};
pub use monresql_sync::{
    replicate, sync, CheckpointCell, CheckpointStore, CollectionSummary, FullReplicateOptions,
    MongoOplogSource, OplogError, OplogSource, OplogStream, ReplicationSummary, SyncHandle, SyncOptions,
};
pub use monresql_types::{Collection, Db, DocId, Error, Field, FieldMap, OpKind, OpTimestamp, Operation, SqlValue};

/// Brings every table declared in `field_map` in line with its fields,
/// creating the `monresql_metadata` checkpoint table once up front if it
/// is missing. Run before calling `sync` or `replicate`. Returns the DDL
/// that was actually executed across all collections, for audit logging.
pub async fn validate_or_create_postgres_table(field_map: &FieldMap, pool: &PgPool) -> Result<Vec<String>> {
    let mut executed = monresql_sql::ensure_metadata_table(pool).await?;
    for (_, collection) in field_map.iter_collections() {
        executed.extend(monresql_sql::validate_or_create_table(pool, collection).await?);
    }
    Ok(executed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_map_parses_through_the_facade() {
        let json = r#"{"d": {"collections": {"c": {
            "name": "c", "pg_table": "c", "fields": {"_id": "id", "name": "TEXT"}
        }}}}"#;
        let map = FieldMap::from_str(json).unwrap();
        assert!(map.collection("d", "c").is_some());
    }
}
