use std::fmt::Write as _;
use std::path::PathBuf;

use clap::Args;
use console::style;
use sample_shared::{
    ComparatorOptions, ComparisonResult, SampleComparator, check_float_tolerance,
};

use super::CliContext;
use crate::prelude::*;

/// Field mismatches shown per sample in verbose mode.
const MAX_FIELD_MISMATCHES: usize = 5;

/// Exit status when one of the files could not be read.
pub const EXIT_FATAL: i32 = 2;

#[derive(Args, Debug)]
pub struct CompareArgs {
    /// Captured samples
    #[arg(short, long)]
    pub actual: PathBuf,

    /// Reference samples
    #[arg(short, long)]
    pub expected: PathBuf,

    /// Largest difference under which two numbers are equal when one of them is a float.
    /// Defaults to the configured tolerance, 1e-6 when not configured.
    #[arg(short, long, value_parser = parse_tolerance)]
    pub tolerance: Option<f64>,

    /// Field path to leave out of the comparison, e.g. `timestamp` or `data.items.ts`.
    /// Can be given multiple times.
    #[arg(short, long = "ignore")]
    pub ignore: Vec<String>,

    /// Compare the samples regardless of their order
    #[arg(long)]
    pub order_independent: bool,

    /// Print the comparison as JSON
    #[arg(long)]
    pub json: bool,

    /// Show the field mismatches of every differing sample
    #[arg(short, long)]
    pub verbose: bool,

    /// Mismatches shown before the rest is summarized
    #[arg(long, default_value_t = 10)]
    pub max_mismatches: usize,
}

fn parse_tolerance(value: &str) -> Result<f64, String> {
    let tolerance = value
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("Invalid float tolerance '{value}': {e}"))?;
    check_float_tolerance(tolerance).map_err(|e| e.to_string())
}

pub fn run(args: CompareArgs, context: &CliContext) -> Result<i32> {
    let comparator = SampleComparator::new(ComparatorOptions {
        float_tolerance: args
            .tolerance
            .unwrap_or_else(|| context.config.float_tolerance()),
        ignore_fields: args.ignore.clone(),
        order_independent: args.order_independent,
    });
    let result = comparator.compare_files(&args.actual, &args.expected);

    if args.json {
        println!("{}", result.to_json_pretty()?);
    } else {
        print!(
            "{}",
            render_comparison(&result, args.verbose, args.max_mismatches)
        );
    }
    Ok(exit_code(&result))
}

/// 0 when the samples match, 1 on a mismatch, 2 when the comparison could not be made.
pub fn exit_code(result: &ComparisonResult) -> i32 {
    if result.error.is_some() {
        EXIT_FATAL
    } else if result.passed {
        0
    } else {
        super::EXIT_FAILURE
    }
}

pub fn render_comparison(
    result: &ComparisonResult,
    verbose: bool,
    max_mismatches: usize,
) -> String {
    let mut out = String::new();
    let verdict = if result.passed {
        style("✓ PASSED").green().bold()
    } else {
        style("✗ FAILED").red().bold()
    };
    let _ = writeln!(out, "{verdict}\n");
    let _ = writeln!(out, "Actual samples:   {}", result.actual_count);
    let _ = writeln!(out, "Expected samples: {}", result.expected_count);
    let _ = writeln!(out, "Matched samples:  {}", result.matched_count);

    if let Some(error) = &result.error {
        let _ = writeln!(out, "\n{}", style(format!("Error: {error}")).red());
        return out;
    }
    if result.mismatches.is_empty() {
        return out;
    }

    let _ = writeln!(out, "\nMismatches: {}", result.mismatches.len());
    for mismatch in result.mismatches.iter().take(max_mismatches) {
        out.push('\n');
        if let Some(index) = mismatch.index {
            let _ = writeln!(out, "{}", style(format!("  Sample {index}:")).yellow());
        }
        let _ = writeln!(out, "    {}", mismatch.message);

        if !verbose {
            continue;
        }
        for field in mismatch.field_mismatches.iter().take(MAX_FIELD_MISMATCHES) {
            let _ = writeln!(out, "      - {}: {}", field.path, field.message);
            let _ = writeln!(out, "        actual:   {}", field.actual);
            let _ = writeln!(out, "        expected: {}", field.expected);
        }
        if mismatch.field_mismatches.len() > MAX_FIELD_MISMATCHES {
            let remaining = mismatch.field_mismatches.len() - MAX_FIELD_MISMATCHES;
            let _ = writeln!(out, "        ... and {remaining} more field mismatches");
        }
    }
    if result.mismatches.len() > max_mismatches {
        let remaining = result.mismatches.len() - max_mismatches;
        let _ = writeln!(out, "  ... and {remaining} more");
    }
    out
}
