use std::fs::{self, File};
use std::io::{self, BufWriter, Read};
use std::path::{Path, PathBuf};

use clap::Args;
use sample_shared::sample::write_jsonl;
use sample_shared::{Sample, parse_spy_output};

use crate::prelude::*;
use crate::spy::TopicFilter;

#[derive(Args, Debug)]
pub struct ParseArgs {
    /// Saved rtiddsspy output, `-` for stdin
    #[arg(short, long)]
    pub input: PathBuf,

    /// JSONL file to write the samples to, stdout by default
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Only keep the samples of matching topics, shell-style
    #[arg(short, long, default_value = "*")]
    pub topics: String,
}

pub fn run(args: ParseArgs) -> Result<i32> {
    let samples = parse_trace(&args.input, &TopicFilter::new(&args.topics)?)?;

    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file {}", path.display()))?;
            write_jsonl(BufWriter::new(file), &samples)?;
        }
        None => write_jsonl(io::stdout().lock(), &samples)?,
    }

    info!("Parsed {} samples", samples.len());
    Ok(0)
}

fn parse_trace(input: &Path, topics: &TopicFilter) -> Result<Vec<Sample>> {
    let text = if input == Path::new("-") {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read the trace from stdin")?;
        text
    } else {
        fs::read_to_string(input)
            .with_context(|| format!("Failed to read trace {}", input.display()))?
    };

    let mut samples = parse_spy_output(&text);
    samples.retain(|sample| topics.matches(&sample.topic));
    Ok(samples)
}
