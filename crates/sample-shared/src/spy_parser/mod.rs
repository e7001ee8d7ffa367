//! Parser for the `-printSample` output of RTI DDS Spy (`rtiddsspy`).
//!
//! The spy prints one block per received sample: a header line naming the topic followed by
//! indented `key: value` lines.
//!
//! ```text
//! Sample received, count 1, topic "HelloWorld"
//!     message: "Hello DDS World"
//!     count: 42
//! ```
//!
//! Two header shapes are understood:
//! - `Sample received, count N, topic "Name"`, which carries its own count,
//! - `HH:MM:SS New data ... topic="Name" ...` (rtiddsspy 7.x), which does not. Those samples get a
//!   count assigned by the parser, starting at 1.
//!
//! Parsing is lenient: writer discovery lines, tool banners and any line that does not fit the
//! field grammar are dropped, and parsing never fails. A trace full of noise simply yields fewer
//! fields or fewer samples.

mod fields;
pub(crate) mod render;
mod value;

use lazy_static::lazy_static;
use regex::Regex;

use crate::sample::Sample;

pub use render::render_sample;
pub use value::coerce_scalar;

lazy_static! {
    static ref SAMPLE_HEADER_REGEX: Regex =
        Regex::new(r#"Sample\s+received,\s*count\s+(\d+),\s*topic\s+"([^"]+)""#).unwrap();
    static ref NEW_DATA_REGEX: Regex =
        Regex::new(r#"^\d{2}:\d{2}:\d{2}\s+New data\s+.*topic="([^"]+)""#).unwrap();
    static ref WRITER_EVENT_REGEX: Regex =
        Regex::new(r"^\d{2}:\d{2}:\d{2}\s+(New writer|Deleted writer|No writers)").unwrap();
}

const BANNER_PREFIXES: [&str; 3] = ["RTI Connext", "rtiddsspy", "~~"];

enum LineKind<'a> {
    Header(Header<'a>),
    Noise,
    Body,
}

enum Header<'a> {
    /// `Sample received, count N, topic "Name"`
    Counted { topic: &'a str, count: u64 },
    /// `HH:MM:SS New data ... topic="Name"`
    NewData { topic: &'a str },
}

fn classify(line: &str) -> LineKind<'_> {
    if WRITER_EVENT_REGEX.is_match(line)
        || BANNER_PREFIXES
            .iter()
            .any(|prefix| line.starts_with(prefix))
    {
        return LineKind::Noise;
    }

    if let Some(captures) = SAMPLE_HEADER_REGEX.captures(line) {
        let topic = captures.get(2).map_or("", |m| m.as_str());
        // A count too large for u64 is treated like a header without one
        return match captures[1].parse::<u64>() {
            Ok(count) => LineKind::Header(Header::Counted { topic, count }),
            Err(_) => LineKind::Header(Header::NewData { topic }),
        };
    }

    if let Some(captures) = NEW_DATA_REGEX.captures(line) {
        let topic = captures.get(1).map_or("", |m| m.as_str());
        return LineKind::Header(Header::NewData { topic });
    }

    LineKind::Body
}

struct PendingSample {
    topic: String,
    sample_count: u64,
    lines: Vec<String>,
}

impl PendingSample {
    fn finish(self) -> Sample {
        let lines: Vec<&str> = self.lines.iter().map(String::as_str).collect();
        let data = fields::parse_fields(&lines);
        Sample {
            topic: self.topic,
            sample_count: self.sample_count,
            data,
            raw_text: self.lines.join("\n"),
        }
    }
}

/// Incremental spy output parser.
///
/// Feed lines with [`SpyParser::parse_line`]: a sample is handed back once the header of the
/// following sample shows up, and [`SpyParser::flush`] returns the last one at end of stream.
/// [`SpyParser::parse_output`] is the same state machine driven over a whole text, so batch and
/// streaming parsing always agree.
#[derive(Default)]
pub struct SpyParser {
    pending: Option<PendingSample>,
    synthetic_count: u64,
}

impl SpyParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_line(&mut self, line: &str) -> Option<Sample> {
        let line = line.trim_end_matches(['\n', '\r']);

        match classify(line) {
            LineKind::Noise => None,
            LineKind::Header(header) => {
                let (topic, sample_count) = match header {
                    Header::Counted { topic, count } => (topic, count),
                    Header::NewData { topic } => {
                        self.synthetic_count += 1;
                        (topic, self.synthetic_count)
                    }
                };
                let previous = self.pending.replace(PendingSample {
                    topic: topic.to_string(),
                    sample_count,
                    lines: Vec::new(),
                });
                previous.map(PendingSample::finish)
            }
            LineKind::Body => {
                // Anything before the first header is not part of a sample
                if let Some(pending) = self.pending.as_mut() {
                    pending.lines.push(line.to_string());
                }
                None
            }
        }
    }

    pub fn flush(&mut self) -> Option<Sample> {
        self.pending.take().map(PendingSample::finish)
    }

    pub fn parse_output(&mut self, text: &str) -> Vec<Sample> {
        let mut samples: Vec<Sample> = text
            .lines()
            .filter_map(|line| self.parse_line(line))
            .collect();
        samples.extend(self.flush());
        samples
    }
}

/// Parse a complete spy trace with a fresh parser.
pub fn parse_spy_output(text: &str) -> Vec<Sample> {
    SpyParser::new().parse_output(text)
}

#[cfg(test)]
mod tests;
