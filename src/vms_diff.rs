//! Schema-driven diff engine.
//!
//! Unique responsibility: decide whether a remote resource matches a desired
//! declarative state, and compute the minimal patch that moves the former to
//! the latter.
//!
//! The engine works on untyped JSON mappings because VMS resources have no
//! fixed schema. Both the current state (an API read, full of computed
//! fields) and the desired state (user-declared configuration) are first
//! normalized through a [`FieldClassification`], so one comparison function
//! handles the asymmetric field sets. Patches are additive/overwrite only:
//! a key absent (or null) in the desired state is never touched, because the
//! VMS API has no "unset" verb.
//!
//! The engine never fails on data-shape anomalies. Lists whose elements
//! cannot be ordered degrade to a first-seen-order dedupe, and comparison
//! falls back to deep structural equality.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::vms_schema::FieldClassification;

/// Normalize a single value for comparison.
///
/// Set-like lists are replaced by a canonical unordered form: sorted and
/// deduplicated when all elements are mutually ordered scalars, otherwise
/// deduplicated in first-seen order. Everything else passes through.
#[must_use]
pub fn normalize_value(value: &Value, set_like: bool) -> Value {
    match value {
        Value::Array(items) if set_like => Value::Array(canonical_set(items)),
        other => other.clone(),
    }
}

/// Normalize a resource mapping for comparison.
///
/// Removes read-only fields unconditionally, immutable fields when
/// `for_update` is set (changing them would require recreation), and
/// ephemeral fields unless `include_ephemeral` is set. Ephemeral fields are
/// kept only when building a create payload, where secrets must be
/// transmitted once; for update diffs they are dropped on both sides since
/// the API never returns them and drift cannot be verified.
///
/// An empty mapping normalizes to an empty mapping.
#[must_use]
pub fn normalize_resource(
    resource: &Map<String, Value>,
    classification: &FieldClassification,
    for_update: bool,
    include_ephemeral: bool,
) -> Map<String, Value> {
    let mut result = Map::new();
    for (key, value) in resource {
        if classification.is_read_only(key) {
            continue;
        }
        if !include_ephemeral && classification.is_ephemeral(key) {
            continue;
        }
        if for_update && classification.is_immutable(key) {
            continue;
        }
        result.insert(
            key.clone(),
            normalize_value(value, classification.is_set_like(key)),
        );
    }
    result
}

/// Compare two values for equality.
///
/// Rules, in order:
/// 1. Both null: equal.
/// 2. Desired is `false` and current is null: equal. The VMS API omits
///    boolean fields entirely when they are false, so omission must read as
///    false or every pass would re-send the same patch forever. This is
///    limited to boolean false; no other falsy value gets the treatment.
/// 3. Set-like and both are lists: equal iff the unordered, deduplicated
///    element collections are equal.
/// 4. Otherwise deep structural equality.
#[must_use]
pub fn values_equal(current: &Value, desired: &Value, set_like: bool) -> bool {
    if current.is_null() && desired.is_null() {
        return true;
    }
    if desired == &Value::Bool(false) && current.is_null() {
        return true;
    }
    if set_like
        && let (Value::Array(cur), Value::Array(des)) = (current, desired)
    {
        return unordered_eq(cur, des);
    }
    current == desired
}

/// Compute the minimal patch from `current` to `desired`.
///
/// Both mappings should already be normalized with the same classification.
/// The patch contains exactly the keys of `desired` with non-null values
/// whose value differs from `current` under [`values_equal`]. Keys absent
/// from `desired` never appear: absence means "do not touch", not "clear".
#[must_use]
pub fn compute_patch(
    current: &Map<String, Value>,
    desired: &Map<String, Value>,
    classification: &FieldClassification,
) -> Map<String, Value> {
    let mut patch = Map::new();
    for (key, desired_val) in desired {
        if desired_val.is_null() {
            continue;
        }
        let current_val = current.get(key).unwrap_or(&Value::Null);
        if !values_equal(current_val, desired_val, classification.is_set_like(key)) {
            patch.insert(key.clone(), desired_val.clone());
        }
    }
    patch
}

/// Whether any field differs between `current` and `desired`.
#[must_use]
pub fn has_changes(
    current: &Map<String, Value>,
    desired: &Map<String, Value>,
    classification: &FieldClassification,
) -> bool {
    !compute_patch(current, desired, classification).is_empty()
}

/// Canonical unordered form of a list: sort-and-dedupe when every element is
/// a mutually ordered scalar, otherwise dedupe preserving first-seen order.
fn canonical_set(items: &[Value]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    if all_sortable(&out) {
        out.sort_by(|a, b| scalar_cmp(a, b).unwrap_or(Ordering::Equal));
    }
    out
}

/// Unordered, dedup-insensitive equality of two lists.
fn unordered_eq(a: &[Value], b: &[Value]) -> bool {
    a.iter().all(|item| b.contains(item)) && b.iter().all(|item| a.contains(item))
}

fn all_sortable(items: &[Value]) -> bool {
    items
        .iter()
        .zip(items.iter().skip(1))
        .all(|(a, b)| scalar_cmp(a, b).is_some())
}

/// Total order over scalars of the same JSON kind; `None` for mixed kinds
/// and for non-scalar elements.
fn scalar_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            Some(x.total_cmp(&y))
        }
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::vms_schema;
    use serde_json::json;

    const TAGS_SET_LIKE: FieldClassification = FieldClassification {
        read_only: &["id"],
        immutable: &["path"],
        ephemeral: &["password"],
        set_like_lists: &["tags"],
        lookup_field: "name",
        unique_constraints: &[],
    };

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn normalization_is_idempotent() {
        let resource = as_map(json!({
            "id": 7,
            "name": "vol1",
            "tags": ["b", "a", "b"],
            "password": "s3cret",
            "nested": {"x": [2, 1]},
        }));
        let once = normalize_resource(&resource, &TAGS_SET_LIKE, false, false);
        let twice = normalize_resource(&once, &TAGS_SET_LIKE, false, false);
        assert_eq!(once, twice);
        assert_eq!(once.get("tags"), Some(&json!(["a", "b"])));
        assert!(!once.contains_key("id"));
        assert!(!once.contains_key("password"));
    }

    #[test]
    fn immutable_fields_dropped_only_for_update() {
        let resource = as_map(json!({"path": "/vol1", "name": "vol1"}));
        let for_create = normalize_resource(&resource, &TAGS_SET_LIKE, false, false);
        assert!(for_create.contains_key("path"));
        let for_update = normalize_resource(&resource, &TAGS_SET_LIKE, true, false);
        assert!(!for_update.contains_key("path"));
    }

    #[test]
    fn ephemeral_fields_kept_for_create_payloads() {
        let resource = as_map(json!({"name": "alice", "password": "s3cret"}));
        let payload = normalize_resource(&resource, &TAGS_SET_LIKE, false, true);
        assert_eq!(payload.get("password"), Some(&json!("s3cret")));
    }

    #[test]
    fn empty_resource_normalizes_to_empty() {
        let empty = Map::new();
        assert!(normalize_resource(&empty, &TAGS_SET_LIKE, true, false).is_empty());
    }

    #[test]
    fn unsortable_elements_dedupe_in_first_seen_order() {
        let value = json!([{"b": 1}, {"a": 1}, {"b": 1}]);
        let normalized = normalize_value(&value, true);
        assert_eq!(normalized, json!([{"b": 1}, {"a": 1}]));
        // And it stays put on a second pass.
        assert_eq!(normalize_value(&normalized, true), normalized);
    }

    #[test]
    fn absent_equals_false_but_not_true() {
        assert!(values_equal(&Value::Null, &json!(false), false));
        assert!(!values_equal(&Value::Null, &json!(true), false));
        // Scope is boolean false only; empty string is not absent.
        assert!(!values_equal(&Value::Null, &json!(""), false));
        assert!(values_equal(&Value::Null, &Value::Null, false));
    }

    #[test]
    fn set_like_order_insensitivity() {
        let current = as_map(json!({"tags": ["b", "a"]}));
        let desired = as_map(json!({"tags": ["a", "b"]}));
        assert!(compute_patch(&current, &desired, &TAGS_SET_LIKE).is_empty());

        // Without the classification, order matters and a patch is produced.
        let patch = compute_patch(&current, &desired, &vms_schema::DEFAULT);
        assert_eq!(patch.get("tags"), Some(&json!(["a", "b"])));
    }

    #[test]
    fn set_like_comparison_ignores_duplicates() {
        let current = as_map(json!({"tags": ["a", "a", "b"]}));
        let desired = as_map(json!({"tags": ["b", "a"]}));
        assert!(!has_changes(&current, &desired, &TAGS_SET_LIKE));
    }

    #[test]
    fn patch_contains_exactly_the_drifted_keys() {
        let current = as_map(json!({"name": "vol1", "quota": 100, "tags": ["a"]}));
        let desired = as_map(json!({"name": "vol1", "quota": 200, "tags": ["a"]}));
        let patch = compute_patch(&current, &desired, &TAGS_SET_LIKE);
        assert_eq!(patch.len(), 1);
        assert_eq!(patch.get("quota"), Some(&json!(200)));
    }

    #[test]
    fn applying_the_patch_reaches_a_fixed_point() {
        let mut current = as_map(json!({"name": "vol1", "quota": 100}));
        let desired = as_map(json!({"name": "vol2", "quota": 200, "enabled": true}));
        let patch = compute_patch(&current, &desired, &TAGS_SET_LIKE);
        for (key, value) in patch {
            current.insert(key, value);
        }
        assert!(!has_changes(&current, &desired, &TAGS_SET_LIKE));
    }

    #[test]
    fn keys_absent_or_null_in_desired_never_patch() {
        let current = as_map(json!({"name": "vol1", "quota": 100}));
        let desired = as_map(json!({"quota": null}));
        assert!(compute_patch(&current, &desired, &TAGS_SET_LIKE).is_empty());
    }

    #[test]
    fn missing_current_key_patches_to_desired() {
        let current = Map::new();
        let desired = as_map(json!({"quota": 100}));
        let patch = compute_patch(&current, &desired, &TAGS_SET_LIKE);
        assert_eq!(patch.get("quota"), Some(&json!(100)));
    }
}
