use serde_json::{Map, Value};

/// Keys that carry storage bookkeeping rather than business data. They are
/// dropped at every nesting level before hashing.
pub const VOLATILE_KEYS: [&str; 8] = [
    "id",
    "_id",
    "__v",
    "createdAt",
    "updatedAt",
    "created_at",
    "updated_at",
    "timestamp",
];

/// Produce the canonical form of a JSON value for content hashing.
///
/// Objects lose their [`VOLATILE_KEYS`]; arrays keep their order. Object
/// keys are sorted by `serde_json::Map` itself.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, inner) in map {
                if VOLATILE_KEYS.contains(&key.as_str()) {
                    continue;
                }
                out.insert(key.clone(), canonicalize(inner));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
