//! Structured samples captured from a DDS spy trace, the trace parser that produces them and the
//! structural comparator that judges two sample sequences against each other.

pub mod comparator;
pub mod sample;
pub mod spy_parser;

pub use comparator::{
    ComparatorOptions, ComparisonResult, SampleComparator, check_float_tolerance,
    compare_sample_files,
};
pub use sample::{FieldMap, FieldValue, Sample};
pub use spy_parser::{SpyParser, parse_spy_output};
