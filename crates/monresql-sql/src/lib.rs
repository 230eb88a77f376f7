//! The statement synthesizer, sanitizer, and schema validator/creator:
//! everything that turns a `Collection` mapping and an `Operation` into
//! SQL against Postgres.

mod exec;
mod sanitize;
mod schema;
mod statement;

pub use exec::execute;
pub use sanitize::sanitize;
pub use schema::{ensure_metadata_table, validate_or_create_table};
pub use statement::{build_delete, build_insert, build_update, build_upsert, Statement};
