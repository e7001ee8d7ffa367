use super::*;
use crate::sample::{FieldMap, FieldValue, Sample, parse_jsonl, write_jsonl};
use rstest::rstest;

fn records(jsonl: &str) -> Vec<FieldMap> {
    parse_jsonl(jsonl).unwrap()
}

fn comparator() -> SampleComparator {
    SampleComparator::default()
}

fn with_options(
    float_tolerance: f64,
    ignore_fields: &[&str],
    order_independent: bool,
) -> SampleComparator {
    SampleComparator::new(ComparatorOptions {
        float_tolerance,
        ignore_fields: ignore_fields.iter().map(|s| s.to_string()).collect(),
        order_independent,
    })
}

#[test]
fn test_identical_sequences_pass() {
    let samples = records(
        r#"{"topic": "T", "sample_count": 1, "data": {"x": 1, "y": [1.5, 2.5], "s": "a"}}
{"topic": "T", "sample_count": 2, "data": {"x": 2, "nested": {"flag": true, "none": null}}}"#,
    );

    let result = comparator().compare_records(&samples, &samples);

    assert!(result.passed);
    assert_eq!(result.matched_count, 2);
    assert!(result.mismatches.is_empty());
    assert!(result.error.is_none());
}

#[test]
fn test_float_out_of_tolerance() {
    let actual = records(r#"{"topic": "T", "sample_count": 1, "data": {"x": 1.0, "y": 2.0}}"#);
    let expected =
        records(r#"{"topic": "T", "sample_count": 1, "data": {"x": 1.0000001, "y": 2.1}}"#);

    let result = comparator().compare_records(&actual, &expected);

    assert!(!result.passed);
    assert_eq!(result.matched_count, 0);
    assert_eq!(result.mismatches.len(), 1);
    let mismatch = &result.mismatches[0];
    assert_eq!(mismatch.index, Some(0));
    assert_eq!(mismatch.kind, SampleMismatchKind::FieldMismatches);
    assert_eq!(mismatch.message, "Sample 0 has 1 field mismatch(es)");
    assert_eq!(mismatch.field_mismatches.len(), 1);
    assert_eq!(mismatch.field_mismatches[0].path, "data.y");
    assert_eq!(
        mismatch.field_mismatches[0].kind,
        FieldMismatchKind::FloatOutOfTolerance
    );
}

#[rstest]
#[case(r#"{"v": 1}"#, r#"{"v": 1.0}"#, None)]
#[case(r#"{"v": 1}"#, r#"{"v": 2}"#, Some(FieldMismatchKind::ValueMismatch))]
#[case(r#"{"v": 1}"#, r#"{"v": 1.5}"#, Some(FieldMismatchKind::FloatOutOfTolerance))]
#[case(r#"{"v": "1"}"#, r#"{"v": 1}"#, Some(FieldMismatchKind::TypeMismatch))]
#[case(r#"{"v": true}"#, r#"{"v": 1}"#, Some(FieldMismatchKind::TypeMismatch))]
#[case(r#"{"v": null}"#, r#"{"v": 0}"#, Some(FieldMismatchKind::NullMismatch))]
#[case(r#"{"v": null}"#, r#"{"v": null}"#, None)]
#[case(r#"{}"#, r#"{"v": 0}"#, Some(FieldMismatchKind::MissingField))]
#[case(r#"{"v": 0, "w": 0}"#, r#"{"v": 0}"#, Some(FieldMismatchKind::ExtraField))]
#[case(r#"{"v": [1, 2]}"#, r#"{"v": [1]}"#, Some(FieldMismatchKind::LengthMismatch))]
#[case(r#"{"v": "a"}"#, r#"{"v": "b"}"#, Some(FieldMismatchKind::ValueMismatch))]
#[case(r#"{"v": {"a": 1}}"#, r#"{"v": [1]}"#, Some(FieldMismatchKind::TypeMismatch))]
fn test_field_mismatch_kinds(
    #[case] actual: &str,
    #[case] expected: &str,
    #[case] kind: Option<FieldMismatchKind>,
) {
    let diff = comparator().diff_records(&records(actual)[0], &records(expected)[0]);
    let kinds: Vec<FieldMismatchKind> = diff.iter().map(|m| m.kind).collect();
    assert_eq!(kinds, kind.into_iter().collect::<Vec<_>>(), "{diff:?}");
}

#[test]
fn test_nested_paths() {
    let actual = records(r#"{"data": {"items": [{"id": 1}, {"id": 2}], "pos": {"x": 0}}}"#);
    let expected = records(r#"{"data": {"items": [{"id": 1}, {"id": 3}], "pos": {"y": 0}}}"#);

    let diff = comparator().diff_records(&actual[0], &expected[0]);
    let paths: Vec<&str> = diff.iter().map(|m| m.path.as_str()).collect();

    assert_eq!(paths, vec!["data.items[1].id", "data.pos.x", "data.pos.y"]);
}

#[test]
fn test_list_length_mismatch_still_compares_common_prefix() {
    let diff = comparator().diff_records(
        &records(r#"{"v": [1, 5, 3]}"#)[0],
        &records(r#"{"v": [1, 2]}"#)[0],
    );

    assert_eq!(diff.len(), 2);
    assert_eq!(diff[0].kind, FieldMismatchKind::LengthMismatch);
    assert_eq!(diff[0].actual, FieldValue::Int(3));
    assert_eq!(diff[0].expected, FieldValue::Int(2));
    assert_eq!(diff[1].path, "v[1]");
}

#[test]
fn test_count_mismatch_reports_missing_samples() {
    let expected = records(
        r#"{"topic": "T", "sample_count": 1, "data": {}}
{"topic": "T", "sample_count": 2, "data": {}}
{"topic": "T", "sample_count": 3, "data": {}}"#,
    );

    let result = comparator().compare_records(&expected[..1], &expected);

    assert!(!result.passed);
    assert_eq!(result.matched_count, 1);
    let summary: Vec<(Option<usize>, SampleMismatchKind)> =
        result.mismatches.iter().map(|m| (m.index, m.kind)).collect();
    assert_eq!(
        summary,
        vec![
            (None, SampleMismatchKind::CountMismatch),
            (Some(1), SampleMismatchKind::Missing),
            (Some(2), SampleMismatchKind::Missing),
        ]
    );
    assert_eq!(
        result.mismatches[0].message,
        "Sample count mismatch: 1 actual vs 3 expected"
    );
}

#[test]
fn test_extra_samples_in_ordered_mode() {
    let actual = records("{\"a\": 1}\n{\"a\": 2}");
    let result = comparator().compare_records(&actual, &actual[..1]);

    assert_eq!(result.mismatches.len(), 2);
    assert_eq!(result.mismatches[1].kind, SampleMismatchKind::Extra);
    assert_eq!(result.mismatches[1].message, "Extra sample 1 in actual output");
}

#[test]
fn test_empty_sequences_pass() {
    let result = comparator().compare_records(&[], &[]);
    assert!(result.passed);
    assert_eq!(result.matched_count, 0);
}

#[rstest]
#[case(&["timestamp"])]
#[case(&["data.timestamp"])]
fn test_ignored_fields_are_skipped(#[case] ignore: &[&str]) {
    let actual = records(r#"{"topic": "T", "data": {"timestamp": 1, "v": 1}}"#);
    let expected = records(r#"{"topic": "T", "data": {"timestamp": 2, "v": 1}}"#);

    assert!(!comparator().compare_records(&actual, &expected).passed);
    assert!(with_options(1e-6, ignore, false).compare_records(&actual, &expected).passed);
}

#[test]
fn test_ignore_entry_matches_inside_lists() {
    let actual = records(r#"{"data": {"items": [{"ts": 1, "v": 1}, {"ts": 2, "v": 2}]}}"#);
    let expected = records(r#"{"data": {"items": [{"ts": 8, "v": 1}, {"ts": 9, "v": 2}]}}"#);

    let result =
        with_options(1e-6, &["data.items.ts"], false).compare_records(&actual, &expected);
    assert!(result.passed, "{result:?}");
}

#[test]
fn test_order_independent_matches_permutation() {
    let actual = records("{\"id\": 1}\n{\"id\": 2}\n{\"id\": 3}");
    let expected = records("{\"id\": 3}\n{\"id\": 1}\n{\"id\": 2}");

    assert!(!comparator().compare_records(&actual, &expected).passed);

    let result = with_options(1e-6, &[], true).compare_records(&actual, &expected);
    assert!(result.passed);
    assert_eq!(result.matched_count, 3);
}

#[rstest]
#[case::duplicated_in_actual("{\"id\": 1}\n{\"id\": 1}", "{\"id\": 1}", 1)]
#[case::duplicated_in_expected("{\"id\": 1}", "{\"id\": 1}\n{\"id\": 1}", 2)]
fn test_order_independent_duplicates_match_by_presence(
    #[case] actual: &str,
    #[case] expected: &str,
    #[case] matched_count: usize,
) {
    let result =
        with_options(1e-6, &[], true).compare_records(&records(actual), &records(expected));

    assert!(result.passed, "{result:?}");
    assert_eq!(result.matched_count, matched_count);
}

#[test]
fn test_order_independent_reports_absent_hashes() {
    let actual = records("{\"id\": 1}\n{\"id\": 1}\n{\"id\": 3}");
    let expected = records("{\"id\": 1}\n{\"id\": 2}\n{\"id\": 2}");

    let result = with_options(1e-6, &[], true).compare_records(&actual, &expected);

    assert!(!result.passed);
    assert_eq!(result.matched_count, 1);
    let summary: Vec<(Option<usize>, SampleMismatchKind)> =
        result.mismatches.iter().map(|m| (m.index, m.kind)).collect();
    assert_eq!(
        summary,
        vec![
            (Some(1), SampleMismatchKind::Missing),
            (Some(2), SampleMismatchKind::Missing),
            (Some(2), SampleMismatchKind::Extra),
        ]
    );
    assert_eq!(
        result.mismatches[0].message,
        "Expected sample 1 not found in actual output"
    );
}

#[test]
fn test_order_independent_respects_ignored_fields() {
    let actual = records("{\"id\": 1, \"ts\": 5}\n{\"id\": 2, \"ts\": 6}");
    let expected = records("{\"id\": 2, \"ts\": 0}\n{\"id\": 1, \"ts\": 0}");

    let result = with_options(1e-6, &["ts"], true).compare_records(&actual, &expected);
    assert!(result.passed);
}

#[test]
fn test_float_bucketing_can_split_close_values() {
    // 0.149 and 0.151 are within 0.1 of each other but round to buckets 1 and 2
    let actual = records(r#"{"v": 0.149}"#);
    let expected = records(r#"{"v": 0.151}"#);

    assert!(with_options(0.1, &[], false).compare_records(&actual, &expected).passed);
    assert!(!with_options(0.1, &[], true).compare_records(&actual, &expected).passed);
}

#[rstest]
#[case::negative(-1.0, "-1")]
#[case::nan(f64::NAN, "NaN")]
#[case::infinite(f64::INFINITY, "inf")]
fn test_invalid_tolerance_is_fatal(
    #[case] tolerance: f64,
    #[case] shown: &str,
    #[values(false, true)] order_independent: bool,
) {
    let samples = records("{\"v\": 1.5}\n{\"v\": 2.5}");

    let result =
        with_options(tolerance, &[], order_independent).compare_records(&samples, &samples);

    assert!(!result.passed);
    assert_eq!(result.matched_count, 0);
    assert!(result.mismatches.is_empty());
    assert_eq!(
        result.error,
        Some(format!(
            "Invalid float tolerance {shown}: expected a finite, non-negative number"
        ))
    );
}

#[test]
fn test_zero_tolerance_is_valid() {
    let samples = records("{\"v\": 1.5}");
    assert!(with_options(0.0, &[], false).compare_records(&samples, &samples).passed);
    assert_eq!(check_float_tolerance(0.0).unwrap(), 0.0);
}

#[test]
fn test_compare_files() {
    let dir = tempfile::tempdir().unwrap();
    let actual_path = dir.path().join("actual.jsonl");
    let expected_path = dir.path().join("expected.jsonl");

    let mut data = FieldMap::new();
    data.insert("value".to_string(), FieldValue::Float(0.5));
    let samples = vec![Sample::new("T", 1, data.clone()), Sample::new("T", 2, data)];
    write_jsonl(std::fs::File::create(&actual_path).unwrap(), &samples).unwrap();
    write_jsonl(std::fs::File::create(&expected_path).unwrap(), &samples).unwrap();

    let result = compare_sample_files(&actual_path, &expected_path, ComparatorOptions::default());
    assert!(result.passed);
    assert_eq!(result.actual_count, 2);
}

#[test]
fn test_compare_files_with_invalid_json() {
    let dir = tempfile::tempdir().unwrap();
    let actual_path = dir.path().join("actual.jsonl");
    let expected_path = dir.path().join("expected.jsonl");
    std::fs::write(&actual_path, "{\"a\": 1}\n").unwrap();
    std::fs::write(&expected_path, "{\"a\": 1}\n{oops\n").unwrap();

    let result = comparator().compare_files(&actual_path, &expected_path);

    assert!(!result.passed);
    assert!(result.mismatches.is_empty());
    assert_eq!(result.actual_count, 1);
    let error = result.error.unwrap();
    assert!(
        error.starts_with("Failed to load expected file: Invalid JSON on line 2"),
        "{error}"
    );
}

#[test]
fn test_compare_files_with_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.jsonl");
    let result = comparator().compare_files(&missing, &missing);

    assert!(!result.passed);
    assert!(result.error.unwrap().starts_with("Failed to load actual file"));
}

#[test]
fn test_result_json_layout() {
    let actual = records(r#"{"v": 1}"#);
    let expected = records("{\"v\": 2}\n{\"v\": 3}");

    let result = comparator().compare_records(&actual, &expected);

    insta::assert_json_snapshot!(result, @r#"
    {
      "passed": false,
      "actual_count": 1,
      "expected_count": 2,
      "matched_count": 0,
      "mismatches": [
        {
          "index": null,
          "kind": "count_mismatch",
          "message": "Sample count mismatch: 1 actual vs 2 expected",
          "field_mismatches": []
        },
        {
          "index": 0,
          "kind": "field_mismatches",
          "message": "Sample 0 has 1 field mismatch(es)",
          "field_mismatches": [
            {
              "path": "v",
              "kind": "value_mismatch",
              "actual": 1,
              "expected": 2,
              "message": "Value mismatch"
            }
          ]
        },
        {
          "index": 1,
          "kind": "missing",
          "message": "Missing sample 1 in actual output",
          "field_mismatches": []
        }
      ],
      "error": null
    }
    "#);
}
