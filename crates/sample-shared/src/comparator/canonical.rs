use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Number, Value};

use crate::sample::{FieldMap, FieldValue};

lazy_static! {
    static ref INDEX_REGEX: Regex = Regex::new(r"\[\d+\]").unwrap();
}

/// Whether `path` is covered by one of the `ignore` entries.
///
/// An entry matches when the path, or the path with its `[i]` list indices removed, is equal to
/// the entry or ends with `.entry`. So `timestamp` covers `data.timestamp` at any depth and
/// `data.items.ts` covers `data.items[3].ts`.
pub fn is_ignored_path(path: &str, ignore: &[String]) -> bool {
    if ignore.is_empty() {
        return false;
    }
    let stripped = INDEX_REGEX.replace_all(path, "");
    ignore
        .iter()
        .any(|entry| path_matches(path, entry) || path_matches(&stripped, entry))
}

fn path_matches(path: &str, entry: &str) -> bool {
    path == entry
        || path
            .strip_suffix(entry)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

pub(super) fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Content hash of a record for order-independent matching.
///
/// Ignored fields are removed and floats are replaced by their tolerance bucket
/// `round(x / tolerance)` before the record is serialized with sorted keys and hashed with
/// sha256. Two floats closer than the tolerance can still fall in neighbouring buckets and then
/// hash differently. Integers keep their own representation, so `1` and `1.0` never collide.
pub fn canonical_hash(record: &FieldMap, tolerance: f64, ignore: &[String]) -> String {
    let canonical = canonical_object(record, "", tolerance, ignore);
    let serialized = Value::Object(canonical).to_string();
    sha256::digest(serialized)
}

fn canonical_object(
    map: &FieldMap,
    prefix: &str,
    tolerance: f64,
    ignore: &[String],
) -> Map<String, Value> {
    // FieldMap iterates in key order, which keeps the serialization stable
    map.iter()
        .filter_map(|(key, value)| {
            let path = join_path(prefix, key);
            if is_ignored_path(&path, ignore) {
                return None;
            }
            Some((key.clone(), canonical_value(value, &path, tolerance, ignore)))
        })
        .collect()
}

fn canonical_value(value: &FieldValue, path: &str, tolerance: f64, ignore: &[String]) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Bool(b) => Value::Bool(*b),
        FieldValue::Int(i) => Value::Number((*i).into()),
        FieldValue::Float(f) => {
            let bucket = if tolerance > 0.0 { (f / tolerance).round() } else { *f };
            // Whole buckets still serialize as `N.0`, distinct from the integer `N`
            // A bucket overflowing to infinity keeps the raw bits instead
            Number::from_f64(bucket).map_or_else(
                || Value::String(format!("float:{:016x}", f.to_bits())),
                Value::Number,
            )
        }
        FieldValue::Str(s) => Value::String(s.clone()),
        FieldValue::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| canonical_value(item, &format!("{path}[{i}]"), tolerance, ignore))
                .collect(),
        ),
        FieldValue::Object(map) => Value::Object(canonical_object(map, path, tolerance, ignore)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("timestamp", "timestamp", true)]
    #[case("data.timestamp", "timestamp", true)]
    #[case("data.nested.timestamp", "timestamp", true)]
    #[case("data.items[3].ts", "data.items.ts", true)]
    #[case("data.items[3].ts", "ts", true)]
    #[case("data.items[3]", "data.items", true)]
    #[case("data.seq", "data.seq", true)]
    #[case("data.sequence", "seq", false)]
    #[case("data.my_timestamp", "timestamp", false)]
    #[case("topic", "data.topic", false)]
    fn test_is_ignored_path(#[case] path: &str, #[case] entry: &str, #[case] expected: bool) {
        assert_eq!(is_ignored_path(path, &[entry.to_string()]), expected);
    }

    fn record(pairs: &[(&str, FieldValue)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_overflowing_buckets_stay_distinct() {
        let hash = |value: FieldValue| canonical_hash(&record(&[("x", value)]), 1e-6, &[]);

        let huge = hash(FieldValue::Float(1e305));
        assert_ne!(huge, hash(FieldValue::Float(-1e305)));
        assert_ne!(huge, hash(FieldValue::Float(2e305)));
        assert_ne!(huge, hash(FieldValue::Null));
        assert_eq!(huge, hash(FieldValue::Float(1e305)));
    }

    #[test]
    fn test_hash_ignores_fields() {
        let ignore = vec!["ts".to_string()];
        let a = record(&[("x", FieldValue::Int(1)), ("ts", FieldValue::Int(10))]);
        let b = record(&[("x", FieldValue::Int(1)), ("ts", FieldValue::Int(99))]);

        assert_eq!(canonical_hash(&a, 1e-6, &ignore), canonical_hash(&b, 1e-6, &ignore));
        assert_ne!(canonical_hash(&a, 1e-6, &[]), canonical_hash(&b, 1e-6, &[]));
    }

    #[test]
    fn test_hash_buckets_floats() {
        let a = record(&[("v", FieldValue::Float(1.0000001))]);
        let b = record(&[("v", FieldValue::Float(1.0000002))]);
        let c = record(&[("v", FieldValue::Float(1.1))]);

        assert_eq!(canonical_hash(&a, 1e-3, &[]), canonical_hash(&b, 1e-3, &[]));
        assert_ne!(canonical_hash(&a, 1e-3, &[]), canonical_hash(&c, 1e-3, &[]));
    }

    #[test]
    fn test_hash_keeps_int_and_float_apart() {
        let int = record(&[("v", FieldValue::Int(1))]);
        let float = record(&[("v", FieldValue::Float(1.0))]);
        assert_ne!(canonical_hash(&int, 1.0, &[]), canonical_hash(&float, 1.0, &[]));
    }

    #[test]
    fn test_hash_without_tolerance_uses_raw_floats() {
        let a = record(&[("v", FieldValue::Float(0.5))]);
        let b = record(&[("v", FieldValue::Float(0.5000001))]);
        assert_eq!(canonical_hash(&a, 0.0, &[]), canonical_hash(&a, 0.0, &[]));
        assert_ne!(canonical_hash(&a, 0.0, &[]), canonical_hash(&b, 0.0, &[]));
    }
}
