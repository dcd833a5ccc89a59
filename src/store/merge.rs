//! Stateless deep-merge and structural diff over JSON values.
//!
//! `merge` applies a partial patch to a value; `diff` computes the patch that
//! turns one value into another. The two are inverses for array-free changes:
//! `merge(a, diff(a, b)) == b`.
//!
//! Arrays are opaque: a patch whose value is an array always replaces the old
//! array wholesale, and `diff` emits the full new array on any structural
//! difference. Element-level array deltas are intentionally unsupported.

use serde_json::Map;
use serde_json::Value;

/// Applies `patch` to `target`, producing a new value. `target` is not
/// mutated.
///
/// Rules:
/// - a non-object patch (scalar, array, null) replaces the target outright;
/// - an explicit `Null` for a property removes that property;
/// - both sides plain objects: merge recursively per property;
/// - arrays are copied wholesale, never merged element-wise.
pub fn merge(
    target: &Value,
    patch: &Value,
) -> Value {
    let patch_map = match patch {
        Value::Object(map) => map,
        other => return other.clone(),
    };

    let mut result = match target {
        Value::Object(map) => map.clone(),
        _ => return materialize(patch_map),
    };

    for (key, patch_value) in patch_map {
        match patch_value {
            Value::Null => {
                result.remove(key);
            }
            Value::Object(nested) => match result.get(key) {
                Some(Value::Object(_)) => {
                    let merged = merge(&result[key], patch_value);
                    result.insert(key.clone(), merged);
                }
                _ => {
                    result.insert(key.clone(), materialize(nested));
                }
            },
            other => {
                result.insert(key.clone(), other.clone());
            }
        }
    }

    Value::Object(result)
}

/// Turns a patch object into a standalone value by dropping removal markers.
///
/// Applying a patch to an absent target adopts the patch itself, except that
/// `Null` entries mean "remove" and a removal of nothing is an absence.
fn materialize(patch: &Map<String, Value>) -> Value {
    let mut out = Map::new();
    for (key, value) in patch {
        match value {
            Value::Null => {}
            Value::Object(nested) => {
                out.insert(key.clone(), materialize(nested));
            }
            other => {
                out.insert(key.clone(), other.clone());
            }
        }
    }
    Value::Object(out)
}

/// Computes the patch that transforms `old` into `new`.
///
/// Removed properties appear as `Null`; added properties carry the new value;
/// nested plain objects recurse (the nested diff is included only when
/// non-empty). Any other change, including any array difference, yields the
/// full new value for that property.
pub fn diff(
    old: &Value,
    new: &Value,
) -> Value {
    let (old_map, new_map) = match (old, new) {
        (Value::Object(o), Value::Object(n)) => (o, n),
        (Value::Array(_), Value::Array(_)) => {
            // Arrays compare by structural equality; no element-level deltas.
            return if old != new {
                new.clone()
            } else {
                Value::Object(Map::new())
            };
        }
        _ => return new.clone(),
    };

    let mut patch = Map::new();

    for (key, old_value) in old_map {
        match new_map.get(key) {
            None => {
                patch.insert(key.clone(), Value::Null);
            }
            Some(new_value) if new_value != old_value => {
                if old_value.is_object() && new_value.is_object() {
                    let nested = diff(old_value, new_value);
                    if nested.as_object().is_some_and(|m| !m.is_empty()) {
                        patch.insert(key.clone(), nested);
                    }
                } else {
                    patch.insert(key.clone(), new_value.clone());
                }
            }
            Some(_) => {}
        }
    }

    for (key, new_value) in new_map {
        if !old_map.contains_key(key) {
            patch.insert(key.clone(), new_value.clone());
        }
    }

    Value::Object(patch)
}
