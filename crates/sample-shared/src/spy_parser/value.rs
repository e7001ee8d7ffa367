use crate::sample::FieldValue;

/// Turn the text after `key:` into a typed scalar.
///
/// Tried in order, first match wins: quoted string, boolean (any case), decimal integer,
/// `0x` hexadecimal integer, float literal. Anything else is kept verbatim as a string.
pub fn coerce_scalar(raw: &str) -> FieldValue {
    let value = raw.trim();

    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        return FieldValue::Str(value[1..value.len() - 1].to_string());
    }

    if value.eq_ignore_ascii_case("true") {
        return FieldValue::Bool(true);
    }
    if value.eq_ignore_ascii_case("false") {
        return FieldValue::Bool(false);
    }

    if let Ok(int) = value.parse::<i64>() {
        return FieldValue::Int(int);
    }

    if let Some(int) = parse_hex(value) {
        return FieldValue::Int(int);
    }

    if looks_like_float(value) {
        if let Ok(float) = value.parse::<f64>() {
            return FieldValue::Float(float);
        }
    }

    FieldValue::Str(value.to_string())
}

fn parse_hex(value: &str) -> Option<i64> {
    let digits = value.strip_prefix("0x")?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    i64::from_str_radix(digits, 16).ok()
}

/// Rust happily parses `inf`, `NaN` or `infinity` as floats, spy output never means those.
fn looks_like_float(value: &str) -> bool {
    value.chars().any(|c| c.is_ascii_digit())
        && value
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("\"Hello DDS World\"", FieldValue::Str("Hello DDS World".to_string()))]
    #[case("\"42\"", FieldValue::Str("42".to_string()))]
    #[case("\"\"", FieldValue::Str(String::new()))]
    #[case("true", FieldValue::Bool(true))]
    #[case("TRUE", FieldValue::Bool(true))]
    #[case("False", FieldValue::Bool(false))]
    #[case("42", FieldValue::Int(42))]
    #[case("-17", FieldValue::Int(-17))]
    #[case("0xDEADBEEF", FieldValue::Int(0xDEADBEEF))]
    #[case("0xff", FieldValue::Int(255))]
    #[case("12.375", FieldValue::Float(12.375))]
    #[case("-273.15", FieldValue::Float(-273.15))]
    #[case("1.23e-4", FieldValue::Float(1.23e-4))]
    #[case("1E3", FieldValue::Float(1000.0))]
    #[case("  7  ", FieldValue::Int(7))]
    #[case("RED", FieldValue::Str("RED".to_string()))]
    #[case("nan", FieldValue::Str("nan".to_string()))]
    #[case("inf", FieldValue::Str("inf".to_string()))]
    #[case("0x", FieldValue::Str("0x".to_string()))]
    #[case("0xZZ", FieldValue::Str("0xZZ".to_string()))]
    #[case("\"", FieldValue::Str("\"".to_string()))]
    fn test_coerce_scalar(#[case] raw: &str, #[case] expected: FieldValue) {
        assert_eq!(coerce_scalar(raw), expected);
    }

    #[test]
    fn test_integer_overflow_falls_back_to_float() {
        assert_eq!(
            coerce_scalar("18446744073709551615"),
            FieldValue::Float(18446744073709551615.0)
        );
    }

    #[test]
    fn test_coercion_is_idempotent_on_rendered_values() {
        for raw in ["12", "-3.5", "true", "\"text\"", "0x10", "1e-7"] {
            let first = coerce_scalar(raw);
            let rendered = crate::spy_parser::render::render_scalar(&first);
            assert_eq!(coerce_scalar(&rendered), first, "{raw} -> {rendered}");
        }
    }
}
