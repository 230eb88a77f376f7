use std::collections::HashMap;

use monresql_types::{Error, Result, SqlValue};
use sqlx::PgPool;

use crate::Statement;

/// Rewrites `:name` placeholders into Postgres's positional `$1, $2, ...`
/// form, in the exact order `Statement::params` lists them (including
/// repeats). Kept separate from synthesis so `Statement::sql` stays the
/// byte-identical, driver-agnostic text the tests assert on.
fn to_positional(sql: &str, params: &[String]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;

    for (i, name) in params.iter().enumerate() {
        let token = format!(":{name}");
        match find_token(rest, &token) {
            Some(pos) => {
                out.push_str(&rest[..pos]);
                out.push_str(&format!("${}", i + 1));
                rest = &rest[pos + token.len()..];
            }
            None => {
                tracing::warn!(%name, "placeholder not found while binding positional params");
            }
        }
    }
    out.push_str(rest);
    out
}

/// Finds `token` in `rest` at a word boundary, so `:name` doesn't
/// false-match inside `:name2`.
fn find_token(rest: &str, token: &str) -> Option<usize> {
    let mut start = 0;
    while let Some(idx) = rest.get(start..)?.find(token) {
        let abs = start + idx;
        let after = abs + token.len();
        let boundary_ok = rest[after..]
            .chars()
            .next()
            .map_or(true, |c| !(c.is_alphanumeric() || c == '_'));
        if boundary_ok {
            return Some(abs);
        }
        start = abs + 1;
    }
    None
}

/// Executes a synthesized `Statement` against `pool`, binding each
/// placeholder (in occurrence order) from `params` (destination-column
/// keyed, as produced by `sanitize`).
pub async fn execute(pool: &PgPool, table: &str, stmt: &Statement, params: &HashMap<String, SqlValue>) -> Result<()> {
    let positional = to_positional(&stmt.sql, &stmt.params);
    let mut query = sqlx::query(&positional);

    for name in &stmt.params {
        query = match params.get(name) {
            Some(SqlValue::Null) | None => query.bind(Option::<String>::None),
            Some(SqlValue::Bool(b)) => query.bind(*b),
            Some(SqlValue::I64(i)) => query.bind(*i),
            Some(SqlValue::F64(f)) => query.bind(*f),
            Some(SqlValue::Text(s)) => query.bind(s.clone()),
            Some(SqlValue::Json(s)) => query.bind(s.clone()),
        };
    }

    query.execute(pool).await.map_err(|source| Error::Apply {
        table: table.to_string(),
        source,
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_rewrite_handles_repeats_and_prefix_collisions() {
        let sql = "INSERT INTO \"t\" (\"a\", \"ab\") VALUES (:a, :ab)\nON CONFLICT (\"_id\")\nDO UPDATE SET \"ab\" = :ab;";
        let params = vec!["a".to_string(), "ab".to_string(), "ab".to_string()];
        let out = to_positional(sql, &params);
        assert_eq!(
            out,
            "INSERT INTO \"t\" (\"a\", \"ab\") VALUES ($1, $2)\nON CONFLICT (\"_id\")\nDO UPDATE SET \"ab\" = $3;"
        );
    }
}
