use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An oplog timestamp: epoch seconds plus the intra-second ordinal Mongo
/// uses to break ties within the same second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpTimestamp {
    pub epoch_secs: u32,
    pub counter: u32,
}

impl OpTimestamp {
    pub const ZERO: OpTimestamp = OpTimestamp { epoch_secs: 0, counter: 0 };

    pub fn new(epoch_secs: u32, counter: u32) -> Self {
        OpTimestamp { epoch_secs, counter }
    }
}

/// The kind of mutation an oplog entry represents. Anything the oplog
/// reader can't classify (no-ops, command entries) is `Other` and is
/// dropped by the sanitizer without touching Postgres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpKind {
    Insert,
    Update,
    Delete,
    Other,
}

/// A document id in whichever representation the source delivered it.
/// `ObjectId` is hex-encoded by the sanitizer; `Scalar` passes through
/// whatever JSON value (string, number) the source used as `_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocId {
    ObjectId([u8; 12]),
    Scalar(Value),
}

impl DocId {
    /// The representation used to key the consistent-hash ring and, for
    /// scalar ids, SQL parameter binding.
    pub fn stringify(&self) -> String {
        match self {
            DocId::ObjectId(bytes) => hex::encode(bytes),
            DocId::Scalar(Value::String(s)) => s.clone(),
            DocId::Scalar(v) => v.to_string(),
        }
    }
}

impl std::fmt::Display for DocId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.stringify())
    }
}

/// One decoded oplog entry, ready for the sanitizer and statement
/// synthesizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OpKind,
    pub database: String,
    pub collection: String,
    pub id: Option<DocId>,
    pub payload: Value,
    pub timestamp: OpTimestamp,
}

impl Operation {
    pub fn fan_key(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }
}

/// A single bound SQL value. Keeps the int/float/bool/text/json/null
/// distinction the sanitizer and statement synthesizer agree on, since a
/// generic `serde_json::Value` would blur "JSON-encoded subtree" and
/// "plain string" into the same variant.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Text(String),
    Json(String),
}

impl From<&Value> for SqlValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::I64(i)
                } else if let Some(f) = n.as_f64() {
                    SqlValue::F64(f)
                } else {
                    SqlValue::Text(n.to_string())
                }
            }
            Value::String(s) => SqlValue::Text(s.clone()),
            obj @ (Value::Object(_) | Value::Array(_)) => {
                SqlValue::Json(serde_json::to_string(obj).unwrap_or_default())
            }
        }
    }
}
