use regex::Regex;

use crate::prelude::*;

/// Shell-style topic pattern: `*`, `?`, `[abc]`, `[a-z]` and `[!abc]`.
#[derive(Debug, Clone)]
pub struct TopicFilter {
    pattern: String,
    regex: Option<Regex>,
}

impl TopicFilter {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = match pattern {
            "" | "*" => None,
            _ => Some(
                Regex::new(&glob_to_regex(pattern))
                    .with_context(|| format!("Invalid topic pattern '{pattern}'"))?,
            ),
        };
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn all() -> Self {
        Self {
            pattern: "*".to_string(),
            regex: None,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, topic: &str) -> bool {
        self.regex.as_ref().is_none_or(|regex| regex.is_match(topic))
    }
}

impl Default for TopicFilter {
    fn default() -> Self {
        Self::all()
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut regex = String::from("^");
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        i += 1;
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            '[' => {
                // A `]` right after `[` or `[!` belongs to the set
                let mut end = i;
                if chars.get(end) == Some(&'!') {
                    end += 1;
                }
                if chars.get(end) == Some(&']') {
                    end += 1;
                }
                while end < chars.len() && chars[end] != ']' {
                    end += 1;
                }
                if end >= chars.len() {
                    regex.push_str(r"\[");
                    continue;
                }

                let mut set = &chars[i..end];
                regex.push('[');
                if set.first() == Some(&'!') {
                    regex.push('^');
                    set = &set[1..];
                }
                for &member in set {
                    if matches!(member, '\\' | '[' | ']' | '^' | '&' | '~') {
                        regex.push('\\');
                    }
                    regex.push(member);
                }
                regex.push(']');
                i = end + 1;
            }
            other => regex.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }

    regex.push('$');
    regex
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("*", "Anything", true)]
    #[case("", "Anything", true)]
    #[case("Vehicle_*", "Vehicle_Position", true)]
    #[case("Vehicle_*", "Robot_Position", false)]
    #[case("Vehicle_*", "My_Vehicle_Position", false)]
    #[case("Sensor?", "Sensor1", true)]
    #[case("Sensor?", "Sensor12", false)]
    #[case("Sensor[0-3]", "Sensor2", true)]
    #[case("Sensor[0-3]", "Sensor7", false)]
    #[case("Sensor[!0-3]", "Sensor7", true)]
    #[case("Sensor[!0-3]", "Sensor2", false)]
    #[case("a.b", "a.b", true)]
    #[case("a.b", "axb", false)]
    #[case("[]]x", "]x", true)]
    #[case("open[", "open[", true)]
    #[case("*Status", "Vehicle_Status", true)]
    fn test_topic_patterns(#[case] pattern: &str, #[case] topic: &str, #[case] expected: bool) {
        assert_eq!(TopicFilter::new(pattern).unwrap().matches(topic), expected);
    }

    #[test]
    fn test_regex_translation() {
        assert_eq!(glob_to_regex("Vehicle_*"), "^Vehicle_.*$");
        assert_eq!(glob_to_regex("[!ab]?"), "^[^ab].$");
    }
}
