use std::fmt::Write;

use crate::sample::{FieldMap, FieldValue, Sample};

const INDENT: &str = "    ";

/// Render a sample the way the spy prints it, so that parsing the text gives the sample back.
///
/// An empty array renders exactly like an empty struct (`key:` with nothing below) and reads
/// back as an empty object. Line breaks inside a string cannot be expressed one field per line,
/// they are written as `\n` and `\r` escapes and read back as those two characters.
pub fn render_sample(sample: &Sample) -> String {
    let mut out = format!(
        "Sample received, count {}, topic \"{}\"\n",
        sample.sample_count, sample.topic
    );
    render_fields(&mut out, &sample.data, 1);
    out
}

fn render_fields(out: &mut String, fields: &FieldMap, depth: usize) {
    let indent = INDENT.repeat(depth);
    for (name, value) in fields {
        match value {
            FieldValue::Object(nested) => {
                let _ = writeln!(out, "{indent}{name}:");
                render_fields(out, nested, depth + 1);
            }
            FieldValue::Array(elements) => {
                let _ = writeln!(out, "{indent}{name}:");
                render_elements(out, elements, depth + 1);
            }
            scalar => {
                let _ = writeln!(out, "{indent}{name}: {}", render_scalar(scalar));
            }
        }
    }
}

fn render_elements(out: &mut String, elements: &[FieldValue], depth: usize) {
    let indent = INDENT.repeat(depth);
    for (index, element) in elements.iter().enumerate() {
        match element {
            FieldValue::Object(nested) => {
                let _ = writeln!(out, "{indent}[{index}]:");
                render_fields(out, nested, depth + 1);
            }
            FieldValue::Array(nested) => {
                let _ = writeln!(out, "{indent}[{index}]:");
                render_elements(out, nested, depth + 1);
            }
            scalar => {
                let _ = writeln!(out, "{indent}[{index}]: {}", render_scalar(scalar));
            }
        }
    }
}

pub(crate) fn render_scalar(value: &FieldValue) -> String {
    match value {
        FieldValue::Null => "null".to_string(),
        FieldValue::Bool(b) => b.to_string(),
        FieldValue::Int(i) => i.to_string(),
        // Debug keeps the decimal point on whole floats (`1.0`), Display would print `1`
        FieldValue::Float(f) => format!("{f:?}"),
        FieldValue::Str(s) => format!("\"{}\"", s.replace('\r', "\\r").replace('\n', "\\n")),
        FieldValue::Array(_) | FieldValue::Object(_) => String::new(),
    }
}
