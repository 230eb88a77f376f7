/// Errors surfaced by the mapping loader and shared across the other
/// monresql crates via re-export.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to parse field mapping: shorthand attempt: {shorthand}; longhand attempt: {longhand}")]
    ConfigParse { shorthand: String, longhand: String },

    #[error("collection {collection:?} has no \"_id\" field")]
    MissingIdField { collection: String },

    #[error("schema validation failed for table {table:?}: {detail}")]
    SchemaValidation { table: String, detail: String },

    #[error(
        "column {column:?} on table {table:?} already exists with different case; \
         declare it in longhand form with the exact existing name"
    )]
    LowercaseRequired { table: String, column: String },

    #[cfg(feature = "sqlx-support")]
    #[error("failed to apply operation to {table:?}: {source}")]
    Apply {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[cfg(feature = "sqlx-support")]
    #[error(transparent)]
    Sql(#[from] sqlx::Error),

    #[error("replication failed: {0}")]
    Replication(String),
}

pub type Result<T> = std::result::Result<T, Error>;
