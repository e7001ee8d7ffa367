use super::*;
use crate::sample::{FieldMap, FieldValue};
use rstest::rstest;

const HELLO_WORLD: &str = include_str!("testdata/hello_world.txt");
const RTIDDSSPY_7: &str = include_str!("testdata/rtiddsspy7.txt");
const CRLF: &str = include_str!("testdata/crlf.txt");

fn stream(text: &str) -> Vec<Sample> {
    let mut parser = SpyParser::new();
    let mut samples = Vec::new();
    for line in text.split_inclusive('\n') {
        if let Some(sample) = parser.parse_line(line) {
            samples.push(sample);
        }
    }
    samples.extend(parser.flush());
    samples
}

#[test]
fn test_parse_simple_sample() {
    let samples =
        parse_spy_output("Sample received, count 1, topic \"Test\"\n    value: 100\n");

    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].topic, "Test");
    assert_eq!(samples[0].sample_count, 1);
    assert_eq!(
        samples[0].data,
        FieldMap::from([("value".to_string(), FieldValue::Int(100))])
    );
}

#[test]
fn test_parse_multiple_samples_with_banner() {
    let samples = parse_spy_output(HELLO_WORLD);

    assert_eq!(samples.len(), 3);
    for (i, sample) in samples.iter().enumerate() {
        assert_eq!(sample.topic, "HelloWorld");
        assert_eq!(sample.sample_count, i as u64 + 1);
        assert_eq!(sample.data["count"], FieldValue::Int(i as i64 + 1));
        assert_eq!(
            sample.data["message"],
            FieldValue::Str("Hello DDS World".to_string())
        );
    }
}

#[test]
fn test_new_data_headers_get_synthetic_counts() {
    let samples = parse_spy_output(RTIDDSSPY_7);

    let summary: Vec<(&str, u64)> = samples
        .iter()
        .map(|s| (s.topic.as_str(), s.sample_count))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("Vehicle_Position", 1),
            ("Vehicle_Status", 2),
            ("Vehicle_Position", 3)
        ]
    );
}

#[test]
fn test_writer_events_do_not_end_a_sample() {
    let samples = parse_spy_output(RTIDDSSPY_7);
    let status = &samples[1].data;

    assert_eq!(status["engine_on"], FieldValue::Bool(true));
    assert_eq!(status["flags"], FieldValue::Int(15));
    assert_eq!(
        status["tags"],
        FieldValue::Array(vec![
            FieldValue::Str("primary".to_string()),
            FieldValue::Str("fleet-a".to_string()),
        ])
    );
    let FieldValue::Array(sensors) = &status["sensors"] else {
        panic!("sensors should be an array");
    };
    assert_eq!(
        sensors[1].as_object().unwrap()["healthy"],
        FieldValue::Bool(false)
    );
}

#[test]
fn test_crlf_line_endings() {
    let samples = parse_spy_output(CRLF);

    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].sample_count, 7);
    assert_eq!(samples[1].data["rpm"], FieldValue::Int(3100));
    assert_eq!(samples[1].data["gear"], FieldValue::Str("D".to_string()));
}

#[test]
fn test_header_without_fields_yields_empty_sample() {
    let samples = parse_spy_output(
        "Sample received, count 1, topic \"Empty\"\nSample received, count 2, topic \"Empty\"\n",
    );
    assert_eq!(samples.len(), 2);
    assert!(samples.iter().all(|s| s.data.is_empty()));
}

#[rstest]
#[case("")]
#[case("rtiddsspy is listening for data, press CTRL+C to stop it.\n")]
#[case("    orphan: 1\n    lines: 2\n")]
fn test_no_samples(#[case] text: &str) {
    assert!(parse_spy_output(text).is_empty());
}

#[test]
fn test_streaming_returns_previous_sample_on_next_header() {
    let mut parser = SpyParser::new();

    assert!(
        parser
            .parse_line("Sample received, count 1, topic \"A\"")
            .is_none()
    );
    assert!(parser.parse_line("    field1: 100").is_none());
    assert!(parser.parse_line("    field2: 200").is_none());

    let first = parser
        .parse_line("Sample received, count 2, topic \"A\"")
        .expect("first sample is complete");
    assert_eq!(first.data["field1"], FieldValue::Int(100));
    assert_eq!(first.data["field2"], FieldValue::Int(200));

    assert!(parser.parse_line("    field1: 300").is_none());
    let last = parser.flush().expect("second sample is buffered");
    assert_eq!(last.data["field1"], FieldValue::Int(300));
    assert!(parser.flush().is_none());
}

#[rstest]
#[case(HELLO_WORLD)]
#[case(RTIDDSSPY_7)]
#[case(CRLF)]
#[case("noise\nSample received, count 4, topic \"X\"\n\n    a:\n        [0]: 1\n\n        [1]: 2\n")]
fn test_batch_and_streaming_agree(#[case] text: &str) {
    assert_eq!(parse_spy_output(text), stream(text));
}

#[test]
fn test_raw_text_keeps_field_lines() {
    let samples = parse_spy_output("Sample received, count 1, topic \"T\"\n    a: 1\n    b: 2\n");
    assert_eq!(samples[0].raw_text, "    a: 1\n    b: 2");
}

#[test]
fn test_rendered_sample_parses_back() {
    let mut data = FieldMap::new();
    data.insert("id".to_string(), FieldValue::Str("CAR-1".to_string()));
    data.insert("numeric_id".to_string(), FieldValue::Str("42".to_string()));
    data.insert("speed".to_string(), FieldValue::Float(42.0));
    data.insert("tiny".to_string(), FieldValue::Float(1e-9));
    data.insert("count".to_string(), FieldValue::Int(-3));
    data.insert("ok".to_string(), FieldValue::Bool(false));
    data.insert(
        "position".to_string(),
        FieldValue::Object(FieldMap::from([
            ("x".to_string(), FieldValue::Float(1.5)),
            ("y".to_string(), FieldValue::Float(-2.25)),
        ])),
    );
    data.insert(
        "readings".to_string(),
        FieldValue::Array(vec![
            FieldValue::Object(FieldMap::from([(
                "value".to_string(),
                FieldValue::Int(1),
            )])),
            FieldValue::Object(FieldMap::from([(
                "value".to_string(),
                FieldValue::Int(2),
            )])),
        ]),
    );
    data.insert(
        "matrix".to_string(),
        FieldValue::Array(vec![FieldValue::Array(vec![
            FieldValue::Int(1),
            FieldValue::Int(2),
        ])]),
    );
    let sample = Sample::new("Vehicle", 12, data);

    let text = render_sample(&sample);
    let parsed = parse_spy_output(&text);

    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].topic, sample.topic);
    assert_eq!(parsed[0].sample_count, sample.sample_count);
    assert_eq!(parsed[0].data, sample.data);

    // Parsing what was parsed and rendered again is stable
    let again = parse_spy_output(&render_sample(&parsed[0]));
    assert_eq!(again[0].data, parsed[0].data);
}

#[test]
fn test_rendered_strings_keep_the_record_intact() {
    let string = |s: &str| FieldValue::Str(s.to_string());
    let sample = Sample::new(
        "Chat",
        3,
        FieldMap::from([
            ("quoted".to_string(), string("\"already quoted\"")),
            ("empty".to_string(), string("")),
            ("padded".to_string(), string("  both sides  ")),
            ("multiline".to_string(), string("first\r\nsecond: 2")),
            ("after".to_string(), FieldValue::Int(7)),
        ]),
    );

    let text = render_sample(&sample);
    let parsed = parse_spy_output(&text);

    assert_eq!(text.lines().count(), 6);
    assert_eq!(parsed.len(), 1);
    let data = &parsed[0].data;
    assert_eq!(data["quoted"], string("\"already quoted\""));
    assert_eq!(data["empty"], string(""));
    assert_eq!(data["padded"], string("  both sides  "));
    assert_eq!(data["multiline"], string("first\\r\\nsecond: 2"));
    assert_eq!(data["after"], FieldValue::Int(7));
    assert!(!data.contains_key("second"));
}

#[test]
fn test_render_layout() {
    let sample = Sample::new(
        "Test",
        1,
        FieldMap::from([
            ("value".to_string(), FieldValue::Int(100)),
            (
                "pos".to_string(),
                FieldValue::Object(FieldMap::from([("x".to_string(), FieldValue::Float(1.0))])),
            ),
        ]),
    );

    insta::assert_snapshot!(render_sample(&sample), @r#"
    Sample received, count 1, topic "Test"
        pos:
            x: 1.0
        value: 100
    "#);
}
