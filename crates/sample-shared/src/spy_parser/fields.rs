use lazy_static::lazy_static;
use regex::Regex;

use super::value::coerce_scalar;
use crate::sample::{FieldMap, FieldValue};

lazy_static! {
    /// `    fieldName: value` or `    fieldName:`
    static ref FIELD_REGEX: Regex = Regex::new(r"^(\s*)(\w+):\s*(.*)$").unwrap();
    /// `    [0]: value` or `    [0]:`
    static ref ARRAY_ELEMENT_REGEX: Regex = Regex::new(r"^(\s*)\[(\d+)\]:\s*(.*)$").unwrap();
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Parse a block of `key: value` lines into a field tree.
///
/// Lines that are neither a scalar assignment nor a nested block opener are skipped.
pub(crate) fn parse_fields(lines: &[&str]) -> FieldMap {
    let mut fields = FieldMap::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if line.trim().is_empty() {
            i += 1;
            continue;
        }

        let Some(captures) = FIELD_REGEX.captures(line) else {
            i += 1;
            continue;
        };
        let indent = captures[1].len();
        let name = captures[2].to_string();
        let value = captures[3].trim();

        if value.is_empty() {
            let (nested, next) = collect_nested_lines(lines, i + 1, indent);
            fields.insert(name, parse_nested(&nested));
            i = next;
        } else {
            fields.insert(name, coerce_scalar(value));
            i += 1;
        }
    }

    fields
}

/// Collect the lines strictly more indented than `parent_indent`, starting at `start`.
///
/// Returns the collected lines and the index of the first line that is not part of the block.
fn collect_nested_lines<'a>(
    lines: &[&'a str],
    start: usize,
    parent_indent: usize,
) -> (Vec<&'a str>, usize) {
    let mut nested = Vec::new();
    let mut i = start;

    while i < lines.len() {
        let line = lines[i];
        if line.trim().is_empty() {
            i += 1;
            continue;
        }
        if indent_of(line) <= parent_indent {
            break;
        }
        nested.push(line);
        i += 1;
    }

    (nested, i)
}

/// A nested block is an array when its first line is an `[N]:` element, a struct otherwise.
fn parse_nested(lines: &[&str]) -> FieldValue {
    match lines.first() {
        None => FieldValue::Object(FieldMap::new()),
        Some(first) if first.trim_start().starts_with('[') => FieldValue::Array(parse_array(lines)),
        Some(_) => FieldValue::Object(parse_fields(lines)),
    }
}

/// Elements are appended in the order they appear, the printed index is not trusted.
fn parse_array(lines: &[&str]) -> Vec<FieldValue> {
    let mut elements = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let Some(captures) = ARRAY_ELEMENT_REGEX.captures(line) else {
            i += 1;
            continue;
        };
        let indent = captures[1].len();
        let value = captures[3].trim();

        if value.is_empty() {
            let (nested, next) = collect_nested_lines(lines, i + 1, indent);
            elements.push(parse_nested(&nested));
            i = next;
        } else {
            elements.push(coerce_scalar(value));
            i += 1;
        }
    }

    elements
}
