//! Shared data model for the mongo-to-postgres replicator: the field
//! mapping configuration, and the operation/value types that flow from the
//! oplog source through the sanitizer into the statement synthesizer.

mod error;
mod mapping;
mod operation;

pub use error::{Error, Result};
pub use mapping::{coerce_type, flatten_column_name, Collection, Db, Field, FieldMap};
pub use operation::{DocId, OpKind, OpTimestamp, Operation, SqlValue};
