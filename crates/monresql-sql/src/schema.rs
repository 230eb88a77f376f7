use std::collections::HashSet;

use monresql_types::{Collection, Error, Result};
use sqlx::PgPool;
use sqlx::Row;

const METADATA_TABLE: &str = "monresql_metadata";

/// Inspects a live Postgres `sqlx::Error` for the "duplicate column" case
/// and turns it into either `Error::LowercaseRequired` (fatal: the column
/// exists under the exact name we computed, just not where our
/// information_schema scan looked for it) or a generic
/// `Error::SchemaValidation`.
///
/// Split out as a pure function of `(code, message)` so the classification
/// logic is unit-testable without a live database connection; the
/// substring match on `message` is a fallback for drivers or Postgres
/// forks that don't surface a SQLSTATE.
fn classify_alter_failure(code: Option<&str>, message: &str, table: &str, column: &str) -> Error {
    const DUPLICATE_COLUMN: &str = "42701";
    if code == Some(DUPLICATE_COLUMN) || message.to_lowercase().contains("already exists") {
        Error::LowercaseRequired {
            table: table.to_string(),
            column: column.to_string(),
        }
    } else {
        Error::SchemaValidation {
            table: table.to_string(),
            detail: message.to_string(),
        }
    }
}

async fn existing_columns(pool: &PgPool, table: &str) -> Result<HashSet<String>> {
    let rows = sqlx::query(
        "SELECT column_name FROM information_schema.columns WHERE table_schema = 'public' AND table_name = $1",
    )
    .bind(table)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| row.get::<String, _>("column_name"))
        .collect())
}

async fn has_unique_index_on_id(pool: &PgPool, table: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM pg_indexes WHERE schemaname = 'public' AND tablename = $1 \
         AND indexdef ILIKE '%UNIQUE%' AND indexdef ILIKE '%(\"_id\")%'",
    )
    .bind(table)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// Compares `collection`'s declared fields against the live
/// `information_schema`, executing any `ALTER TABLE ... ADD` and
/// `CREATE UNIQUE INDEX` statements needed to bring the table in line.
/// Returns the SQL that was actually executed, for audit logging.
pub async fn validate_or_create_table(pool: &PgPool, collection: &Collection) -> Result<Vec<String>> {
    let mut executed = Vec::new();
    let existing = existing_columns(pool, &collection.pg_table).await?;

    for field in collection.ordered_fields() {
        if existing.contains(&field.pg_name) {
            continue;
        }
        let sql = format!(
            "ALTER TABLE \"public\".\"{table}\" ADD \"{column}\" {ty} NULL;",
            table = collection.pg_table,
            column = field.pg_name,
            ty = field.pg_type,
        );
        if let Err(err) = sqlx::query(&sql).execute(pool).await {
            let code = err
                .as_database_error()
                .and_then(|e| e.code())
                .map(|c| c.into_owned());
            let message = err.to_string();
            tracing::error!(table = %collection.pg_table, column = %field.pg_name, %message, "ALTER TABLE failed");
            return Err(classify_alter_failure(
                code.as_deref(),
                &message,
                &collection.pg_table,
                &field.pg_name,
            ));
        }
        executed.push(sql);
    }

    if !has_unique_index_on_id(pool, &collection.pg_table).await? {
        let sql = format!(
            "CREATE UNIQUE INDEX \"{table}_id_key\" ON \"public\".\"{table}\" (\"_id\");",
            table = collection.pg_table,
        );
        sqlx::query(&sql).execute(pool).await?;
        executed.push(sql);
    }

    Ok(executed)
}

/// Creates the `monresql_metadata` checkpoint table if it does not already
/// exist, along with its unique index on `app_name`.
pub async fn ensure_metadata_table(pool: &PgPool) -> Result<Vec<String>> {
    let mut executed = Vec::new();

    let create = format!(
        "CREATE TABLE IF NOT EXISTS \"public\".\"{METADATA_TABLE}\" (\
         app_name TEXT NOT NULL, \
         last_epoch INT NOT NULL, \
         processed_at TIMESTAMPTZ NOT NULL DEFAULT now());"
    );
    sqlx::query(&create).execute(pool).await?;
    executed.push(create);

    if !has_unique_app_name_index(pool).await? {
        let sql = format!(
            "CREATE UNIQUE INDEX \"{METADATA_TABLE}_app_name_key\" ON \"public\".\"{METADATA_TABLE}\" (app_name);"
        );
        sqlx::query(&sql).execute(pool).await?;
        executed.push(sql);
    }

    Ok(executed)
}

async fn has_unique_app_name_index(pool: &PgPool) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM pg_indexes WHERE schemaname = 'public' AND tablename = $1 \
         AND indexdef ILIKE '%UNIQUE%' AND indexdef ILIKE '%(app_name)%'",
    )
    .bind(METADATA_TABLE)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_column_code_is_lowercase_required() {
        let err = classify_alter_failure(Some("42701"), "column already exists", "t", "email");
        assert!(matches!(err, Error::LowercaseRequired { .. }));
    }

    #[test]
    fn substring_fallback_without_sqlstate() {
        let err = classify_alter_failure(None, "ERROR: column \"email\" of relation \"t\" already exists", "t", "email");
        assert!(matches!(err, Error::LowercaseRequired { .. }));
    }

    #[test]
    fn unrelated_failure_is_schema_validation() {
        let err = classify_alter_failure(Some("42P01"), "relation does not exist", "t", "email");
        assert!(matches!(err, Error::SchemaValidation { .. }));
    }
}
