//! Lazily-activated secondary indices over object properties.
//!
//! For an activated property `P`, maintains `(scalar value → set of object
//! ids)` buckets plus an all-values map recording which values currently have
//! at least one member. Nothing is paid for a property until the first
//! `idx:P=...` subscription activates it; activation back-fills the buckets
//! with a single scan of the stored objects, and every later mutation updates
//! only the touched buckets.
//!
//! Index membership considers scalar property values only: an array-valued
//! property indexes each scalar element, nested objects are never indexed,
//! and `Null` is never indexed. Bucket keys are the scalar's JSON text.

use std::collections::HashMap;
use std::collections::HashSet;

use serde_json::Map;
use serde_json::Value;

use super::value_store::Deliveries;
use super::value_store::ValueStore;

/// Bucket payload: object id → `{}`.
type Bucket = Map<String, Value>;

/// Coalesced per-value membership changes for one mutation: object id →
/// `Null` (remove) or `{}` (add). An add overwrites an earlier remove for the
/// same object, so a no-op value change never transiently leaves the index.
type BucketPatch = Map<String, Value>;

pub(crate) struct IndexManager {
    indices: HashMap<String, HashMap<String, Bucket>>,
    all_values: HashMap<String, Bucket>,
    active: HashSet<String>,
}

impl IndexManager {
    pub(crate) fn new() -> Self {
        Self {
            indices: HashMap::new(),
            all_values: HashMap::new(),
            active: HashSet::new(),
        }
    }

    pub(crate) fn is_active(
        &self,
        property: &str,
    ) -> bool {
        self.active.contains(property)
    }

    /// Whether `value` is an object carrying any currently-indexed property.
    /// Gates index maintenance so non-indexed writes cost nothing here.
    pub(crate) fn touches_indexed_property(
        &self,
        value: &Value,
    ) -> bool {
        match value {
            Value::Object(map) => self.active.iter().any(|p| map.contains_key(p)),
            _ => false,
        }
    }

    /// Activates the index for `property`. No-op when already active.
    ///
    /// Scans every stored object once, builds the buckets and the all-values
    /// map, and queues the initial all-values state for existing `idx:P=?`
    /// subscribers.
    pub(crate) fn activate(
        &mut self,
        values: &ValueStore,
        property: &str,
        out: &mut Deliveries,
    ) {
        if !self.active.insert(property.to_string()) {
            return;
        }

        let mut buckets: HashMap<String, Bucket> = HashMap::new();
        let mut all_values: Bucket = Map::new();

        for (object_id, value) in values.iter_values() {
            let Value::Object(map) = value else {
                continue;
            };
            let Some(prop_value) = map.get(property) else {
                continue;
            };
            for scalar in scalar_keys(prop_value) {
                buckets
                    .entry(scalar.clone())
                    .or_default()
                    .insert(object_id.to_string(), Value::Object(Map::new()));
                all_values.insert(scalar, Value::Object(Map::new()));
            }
        }

        self.indices.insert(property.to_string(), buckets);
        self.all_values.insert(property.to_string(), all_values.clone());

        let key = all_values_key(property);
        values.notify_patch(&key, Value::Object(all_values.clone()), out);
        values.notify_set(&key, Value::Object(all_values), out);
    }

    /// Incrementally reindexes `object_id` after a committed mutation from
    /// `old` to `new`, queueing delta and full notifications for the touched
    /// `idx:P=V` and `idx:P=?` keys.
    pub(crate) fn update_indices(
        &mut self,
        values: &ValueStore,
        object_id: &str,
        old: &Value,
        new: &Value,
        out: &mut Deliveries,
    ) {
        if self.active.is_empty() {
            return;
        }
        if !self.touches_indexed_property(old) && !self.touches_indexed_property(new) {
            return;
        }

        let properties: Vec<String> = self.active.iter().cloned().collect();
        for property in properties {
            let mut patch: Map<String, Value> = Map::new();

            // Removals first, then additions, into one coalesced patch.
            if let Value::Object(map) = old {
                if let Some(prop_value) = map.get(&property) {
                    for scalar in scalar_keys(prop_value) {
                        bucket_patch(&mut patch, &scalar).insert(object_id.to_string(), Value::Null);
                    }
                }
            }
            if let Value::Object(map) = new {
                if let Some(prop_value) = map.get(&property) {
                    for scalar in scalar_keys(prop_value) {
                        bucket_patch(&mut patch, &scalar)
                            .insert(object_id.to_string(), Value::Object(Map::new()));
                    }
                }
            }

            if !patch.is_empty() {
                self.apply_patch(values, &property, patch, out);
            }
        }
    }

    /// Applies one property's coalesced bucket patch, derives the all-values
    /// delta, and queues the notifications.
    fn apply_patch(
        &mut self,
        values: &ValueStore,
        property: &str,
        patch: Map<String, Value>,
        out: &mut Deliveries,
    ) {
        let buckets = self.indices.entry(property.to_string()).or_default();
        let all_values = self.all_values.entry(property.to_string()).or_default();
        let mut all_values_patch: Bucket = Map::new();

        for (value_key, object_patch) in &patch {
            let Value::Object(object_patch) = object_patch else {
                continue;
            };
            let bucket = buckets.entry(value_key.clone()).or_default();
            let mut has_additions = false;
            for (object_id, action) in object_patch {
                if action.is_null() {
                    bucket.remove(object_id);
                } else {
                    bucket.insert(object_id.clone(), Value::Object(Map::new()));
                    has_additions = true;
                }
            }

            if bucket.is_empty() {
                buckets.remove(value_key);
                if all_values.remove(value_key).is_some() {
                    all_values_patch.insert(value_key.clone(), Value::Null);
                }
            } else if has_additions {
                all_values.insert(value_key.clone(), Value::Object(Map::new()));
                all_values_patch.insert(value_key.clone(), Value::Object(Map::new()));
            }
        }

        for (value_key, object_patch) in patch {
            let key = index_key(property, &value_key);
            let current = buckets.get(&value_key).cloned().unwrap_or_default();
            values.notify_patch(&key, object_patch, out);
            values.notify_set(&key, Value::Object(current), out);
        }

        // Delta only: values untouched by this mutation stay out of the patch.
        if !all_values_patch.is_empty() {
            let key = all_values_key(property);
            values.notify_patch(&key, Value::Object(all_values_patch), out);
            values.notify_set(&key, Value::Object(all_values.clone()), out);
        }
    }

    /// Live bucket for `(property, value)`; `{}` when empty or inactive.
    pub(crate) fn get_index(
        &self,
        property: &str,
        value: &str,
    ) -> Value {
        self.indices
            .get(property)
            .and_then(|buckets| buckets.get(value))
            .cloned()
            .map(Value::Object)
            .unwrap_or_else(|| Value::Object(Map::new()))
    }

    /// Live all-values map for `property`; `{}` when inactive.
    pub(crate) fn get_all_values(
        &self,
        property: &str,
    ) -> Value {
        self.all_values
            .get(property)
            .cloned()
            .map(Value::Object)
            .unwrap_or_else(|| Value::Object(Map::new()))
    }
}

fn bucket_patch<'a>(
    patch: &'a mut Map<String, Value>,
    value_key: &str,
) -> &'a mut BucketPatch {
    patch
        .entry(value_key.to_string())
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .expect("bucket patch entries are objects")
}

/// Index keys for a property value: one per scalar, none for `Null` or
/// nested objects; arrays contribute each scalar element.
fn scalar_keys(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(scalar_key).collect(),
        other => scalar_key(other).into_iter().collect(),
    }
}

fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn index_key(
    property: &str,
    value: &str,
) -> String {
    format!("idx:{property}={value}")
}

pub(crate) fn all_values_key(property: &str) -> String {
    format!("idx:{property}=?")
}
