use serde::{Deserialize, Serialize};

use crate::sample::FieldValue;

pub const DEFAULT_FLOAT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparatorOptions {
    /// Largest absolute difference under which two numbers are still equal, when one is a float.
    pub float_tolerance: f64,
    /// Field paths left out of the comparison, see [`super::is_ignored_path`].
    pub ignore_fields: Vec<String>,
    /// Match records by content hash instead of index by index.
    pub order_independent: bool,
}

/// Check that `tolerance` is a finite, non-negative number. A negative tolerance fails every
/// float comparison and `NaN` passes every one.
pub fn check_float_tolerance(tolerance: f64) -> anyhow::Result<f64> {
    anyhow::ensure!(
        tolerance.is_finite() && tolerance >= 0.0,
        "Invalid float tolerance {tolerance}: expected a finite, non-negative number"
    );
    Ok(tolerance)
}

impl Default for ComparatorOptions {
    fn default() -> Self {
        Self {
            float_tolerance: DEFAULT_FLOAT_TOLERANCE,
            ignore_fields: Vec::new(),
            order_independent: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldMismatchKind {
    MissingField,
    ExtraField,
    NullMismatch,
    TypeMismatch,
    LengthMismatch,
    FloatOutOfTolerance,
    ValueMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMismatch {
    pub path: String,
    pub kind: FieldMismatchKind,
    /// `null` when the field is absent on this side. Lengths for a list length mismatch.
    pub actual: FieldValue,
    pub expected: FieldValue,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleMismatchKind {
    /// The two sequences differ in length. Reported once, without an index.
    CountMismatch,
    /// Samples at the same index differ, see the field mismatches.
    FieldMismatches,
    /// An expected sample has no counterpart in the actual sequence.
    Missing,
    /// An actual sample has no counterpart in the expected sequence.
    Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleMismatch {
    pub index: Option<usize>,
    pub kind: SampleMismatchKind,
    pub message: String,
    pub field_mismatches: Vec<FieldMismatch>,
}

impl SampleMismatch {
    pub(super) fn new(index: Option<usize>, kind: SampleMismatchKind, message: String) -> Self {
        Self {
            index,
            kind,
            message,
            field_mismatches: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub passed: bool,
    pub actual_count: usize,
    pub expected_count: usize,
    pub matched_count: usize,
    pub mismatches: Vec<SampleMismatch>,
    pub error: Option<String>,
}

impl ComparisonResult {
    pub(super) fn from_mismatches(
        actual_count: usize,
        expected_count: usize,
        matched_count: usize,
        mismatches: Vec<SampleMismatch>,
    ) -> Self {
        Self {
            passed: mismatches.is_empty(),
            actual_count,
            expected_count,
            matched_count,
            mismatches,
            error: None,
        }
    }

    pub(super) fn fatal(actual_count: usize, error: String) -> Self {
        Self {
            passed: false,
            actual_count,
            expected_count: 0,
            matched_count: 0,
            mismatches: Vec::new(),
            error: Some(error),
        }
    }

    pub fn to_json_pretty(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
