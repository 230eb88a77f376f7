use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// One column of a collection's field mapping.
///
/// `mongo_name` is the dot-notation source path; `pg_name` is always
/// lowercase and free of dots, satisfying the destination-column invariant
/// regardless of which form (shorthand or longhand) declared the field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub mongo_name: String,
    pub mongo_type: String,
    pub pg_name: String,
    pub pg_type: String,
}

impl Field {
    pub fn is_id(&self) -> bool {
        self.pg_name == "_id"
    }
}

/// A destination table and its declared column mapping.
///
/// Fields are stored keyed by source path in a `BTreeMap`, which is what
/// gives the statement synthesizer its lexicographic-by-source-path
/// iteration order for free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    pub pg_table: String,
    pub fields: BTreeMap<String, Field>,
}

impl Collection {
    /// The field mapped to the `_id` destination column, or `None` if the
    /// mapping loader's `_id` invariant was bypassed (only possible by
    /// constructing a `Collection` directly rather than via `FieldMap::from_value`).
    pub fn id_field(&self) -> Option<&Field> {
        self.fields.values().find(|f| f.is_id())
    }

    /// Fields in the order the synthesizer must emit them: lexicographic by
    /// source path (`BTreeMap` iteration order already satisfies this).
    pub fn ordered_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Db {
    pub collections: BTreeMap<String, Collection>,
}

/// The parsed, immutable field-mapping configuration. Shared read-only
/// (behind an `Arc`) by every worker once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMap {
    pub dbs: BTreeMap<String, Db>,
}

#[derive(Debug, Deserialize)]
struct RawDb {
    collections: BTreeMap<String, RawCollection>,
}

#[derive(Debug, Deserialize)]
struct RawCollection {
    name: String,
    pg_table: String,
    fields: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct NamedType {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Type")]
    r#type: String,
}

#[derive(Debug, Deserialize)]
struct LonghandSpec {
    #[serde(rename = "Postgres")]
    postgres: NamedType,
    #[serde(rename = "Mongo")]
    mongo: NamedType,
}

/// Rewrites a dot-notation source path into a flat, lowercase destination
/// column name: `a.b.c` -> `a_b_c`.
pub fn flatten_column_name(path: &str) -> String {
    path.replace('.', "_").to_lowercase()
}

/// Coerces a Mongo-side type name to its Postgres equivalent. `id` (in any
/// case) becomes `text`; every other type name is lowercased and passed
/// through otherwise unchanged.
pub fn coerce_type(mongo_type: &str) -> String {
    let lower = mongo_type.to_lowercase();
    if lower == "id" {
        "text".to_string()
    } else {
        lower
    }
}

fn parse_field(source_path: &str, value: &Value) -> Result<Field> {
    let shorthand_err = match serde_json::from_value::<String>(value.clone()) {
        Ok(pg_type) => {
            return Ok(Field {
                mongo_name: source_path.to_string(),
                mongo_type: pg_type.clone(),
                pg_name: flatten_column_name(source_path),
                pg_type: coerce_type(&pg_type),
            })
        }
        Err(e) => e.to_string(),
    };

    match serde_json::from_value::<LonghandSpec>(value.clone()) {
        Ok(spec) => Ok(Field {
            mongo_name: spec.mongo.name,
            mongo_type: spec.mongo.r#type,
            pg_name: flatten_column_name(&spec.postgres.name),
            pg_type: spec.postgres.r#type,
        }),
        Err(longhand_err) => Err(Error::ConfigParse {
            shorthand: shorthand_err,
            longhand: longhand_err.to_string(),
        }),
    }
}

impl FieldMap {
    /// Parses a field map from an in-memory JSON value. This is the core
    /// loader; `from_str` and `from_path` are thin convenience wrappers.
    pub fn from_value(value: Value) -> Result<FieldMap> {
        let raw: BTreeMap<String, RawDb> =
            serde_json::from_value(value).map_err(|e| Error::ConfigParse {
                shorthand: format!("top-level shape: {e}"),
                longhand: format!("top-level shape: {e}"),
            })?;

        let mut dbs = BTreeMap::new();
        for (db_name, raw_db) in raw {
            let mut collections = BTreeMap::new();
            for (coll_key, raw_coll) in raw_db.collections {
                let mut fields = BTreeMap::new();
                for (path, spec) in &raw_coll.fields {
                    let field = parse_field(path, spec)?;
                    fields.insert(field.mongo_name.clone(), field);
                }
                let collection = Collection {
                    name: raw_coll.name,
                    pg_table: raw_coll.pg_table,
                    fields,
                };
                if collection.id_field().is_none() {
                    return Err(Error::MissingIdField {
                        collection: collection.name,
                    });
                }
                collections.insert(coll_key, collection);
            }
            dbs.insert(db_name, Db { collections });
        }

        Ok(FieldMap { dbs })
    }

    pub fn from_str(json: &str) -> Result<FieldMap> {
        let value: Value = serde_json::from_str(json).map_err(|e| Error::ConfigParse {
            shorthand: format!("invalid json: {e}"),
            longhand: format!("invalid json: {e}"),
        })?;
        Self::from_value(value)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<FieldMap> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::ConfigParse {
            shorthand: format!("reading {:?}: {e}", path.as_ref()),
            longhand: format!("reading {:?}: {e}", path.as_ref()),
        })?;
        Self::from_str(&contents)
    }

    /// Iterates every configured `(db.collection, Collection)` pair.
    pub fn iter_collections(&self) -> impl Iterator<Item = (String, &Collection)> {
        self.dbs.iter().flat_map(|(db_name, db)| {
            db.collections
                .iter()
                .map(move |(_, coll)| (format!("{}.{}", db_name, coll.name), coll))
        })
    }

    pub fn collection(&self, db_name: &str, coll_name: &str) -> Option<&Collection> {
        self.dbs.get(db_name)?.collections.values().find(|c| c.name == coll_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn shorthand_expansion() {
        let value = json!({
            "d": {
                "collections": {
                    "c": {
                        "name": "c",
                        "pg_table": "c",
                        "fields": {
                            "_id": "TEXT",
                            "name": "TEXT"
                        }
                    }
                }
            }
        });
        let map = FieldMap::from_value(value).unwrap();
        let coll = map.collection("d", "c").unwrap();
        assert_eq!(coll.fields.len(), 2);
        assert_eq!(coll.fields["_id"].pg_name, "_id");
        assert_eq!(coll.fields["name"].pg_name, "name");
    }

    #[test]
    fn dot_path_shorthand_expands_with_coerced_type() {
        let value = json!({"d": {"collections": {"c": {
            "name": "c", "pg_table": "c",
            "fields": {"_id": "id", "a.b.c": "TEXT"}
        }}}});
        let map = FieldMap::from_value(value).unwrap();
        let coll = map.collection("d", "c").unwrap();
        let f = &coll.fields["a.b.c"];
        assert_eq!(f.mongo_name, "a.b.c");
        assert_eq!(f.mongo_type, "TEXT");
        assert_eq!(f.pg_name, "a_b_c");
        assert_eq!(f.pg_type, "text");
        assert_eq!(coll.fields["_id"].pg_type, "text");
    }

    #[test]
    fn longhand_is_verbatim_except_column_normalization() {
        let value = json!({"d": {"collections": {"c": {
            "name": "c", "pg_table": "c",
            "fields": {
                "_id": "id",
                "pref.unsub": {
                    "Postgres": {"Name": "is_unsub", "Type": "BOOLEAN"},
                    "Mongo": {"Name": "pref.unsub", "Type": "object"}
                }
            }
        }}}});
        let map = FieldMap::from_value(value).unwrap();
        let coll = map.collection("d", "c").unwrap();
        let f = &coll.fields["pref.unsub"];
        assert_eq!(f.mongo_name, "pref.unsub");
        assert_eq!(f.mongo_type, "object");
        assert_eq!(f.pg_name, "is_unsub");
        assert_eq!(f.pg_type, "BOOLEAN");
    }

    #[test]
    fn missing_id_field_is_rejected() {
        let value = json!({"d": {"collections": {"c": {
            "name": "c", "pg_table": "c",
            "fields": {"name": "TEXT"}
        }}}});
        assert!(matches!(
            FieldMap::from_value(value),
            Err(Error::MissingIdField { .. })
        ));
    }

    #[test]
    fn malformed_field_spec_names_both_attempts() {
        let value = json!({"d": {"collections": {"c": {
            "name": "c", "pg_table": "c",
            "fields": {"_id": "id", "bad": 42}
        }}}});
        match FieldMap::from_value(value) {
            Err(Error::ConfigParse { shorthand, longhand }) => {
                assert!(!shorthand.is_empty());
                assert!(!longhand.is_empty());
            }
            other => panic!("expected ConfigParse, got {other:?}"),
        }
    }
}
