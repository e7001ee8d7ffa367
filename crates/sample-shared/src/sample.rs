use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One nesting level of a sample payload. Keys are unique per level.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// A node of a sample's field tree.
///
/// `Null` never comes out of the trace parser, it only exists so that JSONL files written by
/// other tools can be loaded and compared.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<FieldValue>),
    Object(FieldMap),
}

impl FieldValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "bool",
            FieldValue::Int(_) => "int",
            FieldValue::Float(_) => "float",
            FieldValue::Str(_) => "string",
            FieldValue::Array(_) => "array",
            FieldValue::Object(_) => "object",
        }
    }

    /// Numeric view used when ints and floats are compared with each other.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, FieldValue::Int(_) | FieldValue::Float(_))
    }

    pub fn as_object(&self) -> Option<&FieldMap> {
        match self {
            FieldValue::Object(map) => Some(map),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(b) => FieldValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Int(i),
                // u64 above i64::MAX and every non-integer end up here
                None => FieldValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => FieldValue::Str(s),
            serde_json::Value::Array(items) => {
                FieldValue::Array(items.into_iter().map(FieldValue::from).collect())
            }
            serde_json::Value::Object(map) => FieldValue::Object(
                map.into_iter()
                    .map(|(key, value)| (key, FieldValue::from(value)))
                    .collect(),
            ),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            FieldValue::Null => serializer.serialize_unit(),
            FieldValue::Bool(b) => serializer.serialize_bool(*b),
            FieldValue::Int(i) => serializer.serialize_i64(*i),
            FieldValue::Float(f) => serializer.serialize_f64(*f),
            FieldValue::Str(s) => serializer.serialize_str(s),
            FieldValue::Array(items) => items.serialize(serializer),
            FieldValue::Object(map) => map.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(FieldValue::from)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&rendered)
    }
}

/// A sample parsed from one block of spy output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub topic: String,
    pub sample_count: u64,
    pub data: FieldMap,
    /// Field lines the sample was parsed from, kept for diagnostics only.
    #[serde(skip)]
    pub raw_text: String,
}

impl Sample {
    pub fn new(topic: impl Into<String>, sample_count: u64, data: FieldMap) -> Self {
        Self {
            topic: topic.into(),
            sample_count,
            data,
            raw_text: String::new(),
        }
    }

    pub fn to_json_line(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize sample")
    }

    /// The sample as the record object the comparator works on.
    pub fn to_field_map(&self) -> FieldMap {
        let sample_count = i64::try_from(self.sample_count)
            .map(FieldValue::Int)
            .unwrap_or(FieldValue::Float(self.sample_count as f64));

        let mut record = FieldMap::new();
        record.insert("topic".to_string(), FieldValue::Str(self.topic.clone()));
        record.insert("sample_count".to_string(), sample_count);
        record.insert("data".to_string(), FieldValue::Object(self.data.clone()));
        record
    }
}

/// Parse newline-delimited JSON records. Blank lines are skipped, every other line must hold a
/// JSON object.
pub fn parse_jsonl(text: &str) -> Result<Vec<FieldMap>> {
    let mut records = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line_num = index + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let value: serde_json::Value = serde_json::from_str(line)
            .map_err(|e| anyhow!("Invalid JSON on line {line_num}: {e}"))?;
        match FieldValue::from(value) {
            FieldValue::Object(record) => records.push(record),
            other => bail!(
                "Invalid record on line {line_num}: expected an object, got {}",
                other.type_name()
            ),
        }
    }
    Ok(records)
}

pub fn read_jsonl(path: impl AsRef<Path>) -> Result<Vec<FieldMap>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_jsonl(&content)
}

pub fn write_jsonl<W: Write>(mut writer: W, samples: &[Sample]) -> Result<()> {
    for sample in samples {
        writeln!(writer, "{}", sample.to_json_line()?)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_serializes_with_three_keys() {
        let mut data = FieldMap::new();
        data.insert("message".to_string(), FieldValue::Str("hello".to_string()));
        data.insert("value".to_string(), FieldValue::Int(42));
        let sample = Sample::new("Test", 1, data);

        insta::assert_snapshot!(
            sample.to_json_line().unwrap(),
            @r#"{"topic":"Test","sample_count":1,"data":{"message":"hello","value":42}}"#
        );
    }

    #[test]
    fn test_numbers_keep_their_kind() {
        let records = parse_jsonl(r#"{"a": 1, "b": 1.0, "c": -3, "d": 1e3}"#).unwrap();
        let record = &records[0];
        assert_eq!(record["a"], FieldValue::Int(1));
        assert_eq!(record["b"], FieldValue::Float(1.0));
        assert_eq!(record["c"], FieldValue::Int(-3));
        assert_eq!(record["d"], FieldValue::Float(1000.0));
    }

    #[test]
    fn test_parse_jsonl_skips_blank_lines() {
        let records = parse_jsonl("{\"a\": 1}\n\n   \n{\"a\": 2}\n").unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_parse_jsonl_reports_line_number() {
        let err = parse_jsonl("{\"a\": 1}\n{not json}\n").unwrap_err();
        assert!(err.to_string().starts_with("Invalid JSON on line 2"), "{err}");
    }

    #[test]
    fn test_parse_jsonl_rejects_non_objects() {
        let err = parse_jsonl("[1, 2, 3]\n").unwrap_err();
        assert!(err.to_string().contains("expected an object"), "{err}");
    }

    #[test]
    fn test_write_then_read_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.jsonl");

        let mut data = FieldMap::new();
        data.insert(
            "values".to_string(),
            FieldValue::Array(vec![FieldValue::Int(1), FieldValue::Float(2.5)]),
        );
        let sample = Sample::new("Numbers", 7, data);

        let file = std::fs::File::create(&path).unwrap();
        write_jsonl(file, std::slice::from_ref(&sample)).unwrap();

        let records = read_jsonl(&path).unwrap();
        assert_eq!(records, vec![sample.to_field_map()]);
    }

    #[test]
    fn test_display_is_json() {
        assert_eq!(FieldValue::Str("a".into()).to_string(), "\"a\"");
        assert_eq!(FieldValue::Null.to_string(), "null");
        assert_eq!(FieldValue::Float(1.5).to_string(), "1.5");
    }
}
