use monresql_types::Collection;

/// A synthesized SQL statement using named placeholders (`:col`). `params`
/// lists the placeholder names in the exact order they occur in `sql`,
/// including repeats, so a caller translating to a driver's positional
/// bind order (`$1`, `$2`, ...) can zip it against a lookup of bound values
/// without re-parsing the SQL text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<String>,
}

fn quote_ident(name: &str) -> String {
    format!("\"{name}\"")
}

fn placeholder(name: &str) -> String {
    format!(":{name}")
}

/// `INSERT ... ON CONFLICT ("_id") DO UPDATE SET ...`. Fields are emitted
/// in lexicographic source-path order (`Collection::ordered_fields`
/// already iterates a `BTreeMap` keyed by source path). The `SET` clause
/// excludes `_id`: re-asserting a document's own primary key on conflict
/// is a no-op that only widens the statement for no benefit.
pub fn build_upsert(collection: &Collection) -> Statement {
    let fields: Vec<_> = collection.ordered_fields().collect();

    let columns = fields
        .iter()
        .map(|f| quote_ident(&f.pg_name))
        .collect::<Vec<_>>()
        .join(", ");
    let values = fields
        .iter()
        .map(|f| placeholder(&f.pg_name))
        .collect::<Vec<_>>()
        .join(", ");
    let set_clause = fields
        .iter()
        .filter(|f| !f.is_id())
        .map(|f| format!("{} = {}", quote_ident(&f.pg_name), placeholder(&f.pg_name)))
        .collect::<Vec<_>>()
        .join(", ");

    let sql = format!(
        "INSERT INTO {table} ({columns}) VALUES ({values})\nON CONFLICT (\"_id\")\nDO UPDATE SET {set_clause};",
        table = quote_ident(&collection.pg_table),
    );

    let mut params: Vec<String> = fields.iter().map(|f| f.pg_name.clone()).collect();
    params.extend(fields.iter().filter(|f| !f.is_id()).map(|f| f.pg_name.clone()));

    Statement { sql, params }
}

/// `build_insert` is `build_upsert` under another name: a plain insert is
/// just an upsert run against a table with no pre-existing row, so the
/// full replicator's synthetic inserts use this directly rather than
/// duplicating the SQL shape.
pub fn build_insert(collection: &Collection) -> Statement {
    build_upsert(collection)
}

/// `UPDATE "T" SET ... WHERE "_id" = :<source id name>`, updating only the
/// destination columns named in `subset` (source field names).
pub fn build_update(collection: &Collection, subset: &[&str]) -> Statement {
    let id_field = collection
        .id_field()
        .expect("collection has a validated _id field");

    let fields: Vec<_> = collection
        .ordered_fields()
        .filter(|f| !f.is_id() && subset.contains(&f.mongo_name.as_str()))
        .collect();

    let set_clause = fields
        .iter()
        .map(|f| format!("{} = {}", quote_ident(&f.pg_name), placeholder(&f.pg_name)))
        .collect::<Vec<_>>()
        .join(", ");

    let sql = format!(
        "UPDATE {table} SET {set_clause} WHERE \"_id\" = {id_placeholder};",
        table = quote_ident(&collection.pg_table),
        id_placeholder = placeholder(&id_field.mongo_name),
    );

    let mut params: Vec<String> = fields.iter().map(|f| f.pg_name.clone()).collect();
    params.push(id_field.mongo_name.clone());

    Statement { sql, params }
}

/// `DELETE FROM "T" WHERE "_id" = :<source id name>;`
pub fn build_delete(collection: &Collection) -> Statement {
    let id_field = collection
        .id_field()
        .expect("collection has a validated _id field");

    let sql = format!(
        "DELETE FROM {table} WHERE \"_id\" = {id_placeholder};",
        table = quote_ident(&collection.pg_table),
        id_placeholder = placeholder(&id_field.mongo_name),
    );

    Statement {
        sql,
        params: vec![id_field.mongo_name.clone()],
    }
}
