use std::collections::HashMap;

use monresql_types::{Collection, DocId, OpKind, Operation, SqlValue};
use serde_json::Value;

fn extract<'a>(value: &'a Value, dot_path: &str) -> Option<&'a Value> {
    dot_path
        .split('.')
        .try_fold(value, |cur, part| cur.as_object()?.get(part))
}

/// Turns one operation's payload into a flat parameter map keyed by
/// destination column name, ready to be bound into the statement the
/// synthesizer emitted for the same collection.
pub fn sanitize(collection: &Collection, op: &Operation) -> HashMap<String, SqlValue> {
    let mut out = HashMap::new();

    if !matches!(op.kind, OpKind::Insert | OpKind::Update | OpKind::Delete) {
        return out;
    }

    for field in collection.ordered_fields() {
        let value = match extract(&op.payload, &field.mongo_name) {
            Some(v) => SqlValue::from(v),
            None => SqlValue::Null,
        };
        out.insert(field.pg_name.clone(), value);
    }

    if let Some(id) = &op.id {
        let bound = match id {
            DocId::ObjectId(bytes) => SqlValue::Text(hex::encode(bytes)),
            DocId::Scalar(v) => SqlValue::from(v),
        };
        out.insert("_id".to_string(), bound);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use monresql_types::{FieldMap, OpTimestamp};
    use serde_json::json;

    fn collection() -> Collection {
        let map = FieldMap::from_value(json!({
            "d": {"collections": {"c": {
                "name": "c", "pg_table": "c",
                "fields": {
                    "_id": "TEXT",
                    "name": "TEXT",
                    "pref.unsub": {
                        "Postgres": {"Name": "is_unsub", "Type": "BOOLEAN"},
                        "Mongo": {"Name": "pref.unsub", "Type": "object"}
                    }
                }
            }}}
        }))
        .unwrap();
        map.collection("d", "c").unwrap().clone()
    }

    fn op(payload: Value, id: Option<DocId>) -> Operation {
        Operation {
            kind: OpKind::Insert,
            database: "d".into(),
            collection: "c".into(),
            id,
            payload,
            timestamp: OpTimestamp::ZERO,
        }
    }

    #[test]
    fn s3_nested_flatten() {
        let params = sanitize(&collection(), &op(json!({"pref": {"unsub": true}}), None));
        assert_eq!(params["is_unsub"], SqlValue::Bool(true));
    }

    #[test]
    fn absent_field_binds_null() {
        let params = sanitize(&collection(), &op(json!({}), None));
        assert_eq!(params["name"], SqlValue::Null);
        assert_eq!(params["is_unsub"], SqlValue::Null);
    }

    #[test]
    fn nested_object_in_non_object_field_is_json_encoded() {
        let params = sanitize(
            &collection(),
            &op(json!({"name": {"first": "a", "last": "b"}}), None),
        );
        assert_eq!(params["name"], SqlValue::Json("{\"first\":\"a\",\"last\":\"b\"}".into()));
    }

    #[test]
    fn object_id_coerces_to_lowercase_hex() {
        let bytes: [u8; 12] = [0xAB, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 0xCD];
        let params = sanitize(&collection(), &op(json!({}), Some(DocId::ObjectId(bytes))));
        let expect = hex::encode(bytes);
        assert_eq!(expect.len(), 24);
        assert_eq!(params["_id"], SqlValue::Text(expect));
    }

    #[test]
    fn scalar_id_passes_through() {
        let params = sanitize(
            &collection(),
            &op(json!({}), Some(DocId::Scalar(json!("x")))),
        );
        assert_eq!(params["_id"], SqlValue::Text("x".into()));
    }

    #[test]
    fn non_mutation_op_produces_empty_map() {
        let mut o = op(json!({"name": "a"}), None);
        o.kind = OpKind::Other;
        assert!(sanitize(&collection(), &o).is_empty());
    }
}
