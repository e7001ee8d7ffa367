//! Structural comparison of two sample sequences.
//!
//! Records are compared as field trees: ints and floats compare numerically, floats within
//! [`ComparatorOptions::float_tolerance`], and the fields named in
//! [`ComparatorOptions::ignore_fields`] are skipped at any depth.

mod canonical;
mod interfaces;

use std::collections::HashSet;
use std::path::Path;

use itertools::Itertools;
use log::debug;

use crate::sample::{FieldMap, FieldValue, read_jsonl};

pub use canonical::{canonical_hash, is_ignored_path};
pub use interfaces::*;

#[derive(Debug, Clone, Default)]
pub struct SampleComparator {
    options: ComparatorOptions,
}

impl SampleComparator {
    pub fn new(options: ComparatorOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ComparatorOptions {
        &self.options
    }

    /// Compare two JSONL files. A file that cannot be loaded makes the whole comparison fail
    /// with [`ComparisonResult::error`] set and no partial diff.
    pub fn compare_files(
        &self,
        actual_path: impl AsRef<Path>,
        expected_path: impl AsRef<Path>,
    ) -> ComparisonResult {
        let actual = match read_jsonl(actual_path) {
            Ok(records) => records,
            Err(e) => {
                return ComparisonResult::fatal(0, format!("Failed to load actual file: {e:#}"));
            }
        };
        let expected = match read_jsonl(expected_path) {
            Ok(records) => records,
            Err(e) => {
                return ComparisonResult::fatal(
                    actual.len(),
                    format!("Failed to load expected file: {e:#}"),
                );
            }
        };

        self.compare_records(&actual, &expected)
    }

    /// A tolerance rejected by [`check_float_tolerance`] makes the comparison fatal.
    pub fn compare_records(&self, actual: &[FieldMap], expected: &[FieldMap]) -> ComparisonResult {
        if let Err(e) = check_float_tolerance(self.options.float_tolerance) {
            return ComparisonResult::fatal(actual.len(), e.to_string());
        }
        debug!(
            "Comparing {} actual against {} expected records ({})",
            actual.len(),
            expected.len(),
            if self.options.order_independent {
                "order independent"
            } else {
                "ordered"
            }
        );

        if self.options.order_independent {
            self.compare_order_independent(actual, expected)
        } else {
            self.compare_ordered(actual, expected)
        }
    }

    fn compare_ordered(&self, actual: &[FieldMap], expected: &[FieldMap]) -> ComparisonResult {
        let mut mismatches = Vec::new();
        let mut matched_count = 0;

        if actual.len() != expected.len() {
            mismatches.push(SampleMismatch::new(
                None,
                SampleMismatchKind::CountMismatch,
                format!(
                    "Sample count mismatch: {} actual vs {} expected",
                    actual.len(),
                    expected.len()
                ),
            ));
        }

        for (index, (actual_record, expected_record)) in actual.iter().zip(expected).enumerate() {
            let field_mismatches = self.diff_records(actual_record, expected_record);
            if field_mismatches.is_empty() {
                matched_count += 1;
                continue;
            }
            mismatches.push(SampleMismatch {
                index: Some(index),
                kind: SampleMismatchKind::FieldMismatches,
                message: format!(
                    "Sample {index} has {} field mismatch(es)",
                    field_mismatches.len()
                ),
                field_mismatches,
            });
        }

        for index in actual.len()..expected.len() {
            mismatches.push(SampleMismatch::new(
                Some(index),
                SampleMismatchKind::Missing,
                format!("Missing sample {index} in actual output"),
            ));
        }
        for index in expected.len()..actual.len() {
            mismatches.push(SampleMismatch::new(
                Some(index),
                SampleMismatchKind::Extra,
                format!("Extra sample {index} in actual output"),
            ));
        }

        ComparisonResult::from_mismatches(actual.len(), expected.len(), matched_count, mismatches)
    }

    /// Matching on canonical hash sets: a record matches when its hash appears anywhere on the
    /// other side, so duplicates on one side are not counted against the other.
    fn compare_order_independent(
        &self,
        actual: &[FieldMap],
        expected: &[FieldMap],
    ) -> ComparisonResult {
        let hash = |record: &FieldMap| {
            canonical_hash(
                record,
                self.options.float_tolerance,
                &self.options.ignore_fields,
            )
        };
        let actual_hashes: Vec<String> = actual.iter().map(hash).collect();
        let expected_hashes: Vec<String> = expected.iter().map(hash).collect();
        let actual_set: HashSet<&str> = actual_hashes.iter().map(String::as_str).collect();
        let expected_set: HashSet<&str> = expected_hashes.iter().map(String::as_str).collect();

        let mut mismatches = Vec::new();
        let mut matched_count = 0;
        for (index, hash) in expected_hashes.iter().enumerate() {
            if actual_set.contains(hash.as_str()) {
                matched_count += 1;
            } else {
                mismatches.push(SampleMismatch::new(
                    Some(index),
                    SampleMismatchKind::Missing,
                    format!("Expected sample {index} not found in actual output"),
                ));
            }
        }

        for (index, hash) in actual_hashes.iter().enumerate() {
            if !expected_set.contains(hash.as_str()) {
                mismatches.push(SampleMismatch::new(
                    Some(index),
                    SampleMismatchKind::Extra,
                    format!("Actual sample {index} not in expected output"),
                ));
            }
        }

        ComparisonResult::from_mismatches(actual.len(), expected.len(), matched_count, mismatches)
    }

    /// Field-level differences between two records, in key order.
    pub fn diff_records(&self, actual: &FieldMap, expected: &FieldMap) -> Vec<FieldMismatch> {
        let mut mismatches = Vec::new();
        self.diff_objects(actual, expected, "", &mut mismatches);
        mismatches
    }

    fn diff_objects(
        &self,
        actual: &FieldMap,
        expected: &FieldMap,
        prefix: &str,
        out: &mut Vec<FieldMismatch>,
    ) {
        let keys = actual.keys().chain(expected.keys()).sorted().dedup();
        for key in keys {
            let path = canonical::join_path(prefix, key);
            if self.is_ignored(&path) {
                continue;
            }

            match (actual.get(key), expected.get(key)) {
                (None, Some(expected)) => out.push(FieldMismatch {
                    path,
                    kind: FieldMismatchKind::MissingField,
                    actual: FieldValue::Null,
                    expected: expected.clone(),
                    message: "Field missing in actual".to_string(),
                }),
                (Some(actual), None) => out.push(FieldMismatch {
                    path,
                    kind: FieldMismatchKind::ExtraField,
                    actual: actual.clone(),
                    expected: FieldValue::Null,
                    message: "Extra field in actual".to_string(),
                }),
                (Some(actual), Some(expected)) => self.diff_values(actual, expected, path, out),
                (None, None) => {}
            }
        }
    }

    fn diff_values(
        &self,
        actual: &FieldValue,
        expected: &FieldValue,
        path: String,
        out: &mut Vec<FieldMismatch>,
    ) {
        let mismatch = |kind, message: String| FieldMismatch {
            path: path.clone(),
            kind,
            actual: actual.clone(),
            expected: expected.clone(),
            message,
        };

        match (actual, expected) {
            (FieldValue::Null, FieldValue::Null) => {}
            (FieldValue::Null, _) | (_, FieldValue::Null) => out.push(mismatch(
                FieldMismatchKind::NullMismatch,
                "One value is null".to_string(),
            )),
            (FieldValue::Object(a), FieldValue::Object(e)) => self.diff_objects(a, e, &path, out),
            (FieldValue::Array(a), FieldValue::Array(e)) => self.diff_arrays(a, e, &path, out),
            (FieldValue::Int(a), FieldValue::Int(e)) => {
                if a != e {
                    out.push(mismatch(
                        FieldMismatchKind::ValueMismatch,
                        "Value mismatch".to_string(),
                    ));
                }
            }
            _ if actual.is_number() && expected.is_number() => {
                let (Some(a), Some(e)) = (actual.as_f64(), expected.as_f64()) else {
                    return;
                };
                if (a - e).abs() > self.options.float_tolerance {
                    out.push(mismatch(
                        FieldMismatchKind::FloatOutOfTolerance,
                        format!(
                            "Float mismatch (tolerance={})",
                            self.options.float_tolerance
                        ),
                    ));
                }
            }
            _ if actual.type_name() != expected.type_name() => out.push(mismatch(
                FieldMismatchKind::TypeMismatch,
                format!(
                    "Type mismatch: {} vs {}",
                    actual.type_name(),
                    expected.type_name()
                ),
            )),
            _ => {
                if actual != expected {
                    out.push(mismatch(
                        FieldMismatchKind::ValueMismatch,
                        "Value mismatch".to_string(),
                    ));
                }
            }
        }
    }

    fn diff_arrays(
        &self,
        actual: &[FieldValue],
        expected: &[FieldValue],
        path: &str,
        out: &mut Vec<FieldMismatch>,
    ) {
        if actual.len() != expected.len() {
            out.push(FieldMismatch {
                path: path.to_string(),
                kind: FieldMismatchKind::LengthMismatch,
                actual: FieldValue::Int(actual.len() as i64),
                expected: FieldValue::Int(expected.len() as i64),
                message: "List length mismatch".to_string(),
            });
        }

        for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
            let element_path = format!("{path}[{i}]");
            if self.is_ignored(&element_path) {
                continue;
            }
            self.diff_values(a, e, element_path, out);
        }
    }

    fn is_ignored(&self, path: &str) -> bool {
        is_ignored_path(path, &self.options.ignore_fields)
    }
}

/// Compare two JSONL files with a comparator built from `options`.
pub fn compare_sample_files(
    actual_path: impl AsRef<Path>,
    expected_path: impl AsRef<Path>,
    options: ComparatorOptions,
) -> ComparisonResult {
    SampleComparator::new(options).compare_files(actual_path, expected_path)
}

#[cfg(test)]
mod tests;
