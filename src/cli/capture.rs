use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use super::{CliContext, EXIT_FAILURE, parse_duration_arg};
use crate::prelude::*;
use crate::spy::{CaptureOptions, TopicFilter, capture_samples};

/// Registry name of the monitor process.
const MONITOR_NAME: &str = "spy";

#[derive(Args, Debug)]
pub struct CaptureArgs {
    /// DDS domain to monitor
    #[arg(short, long, default_value_t = 0)]
    pub domain: u32,

    /// Topic filter, shell-style: `Vehicle_*`, `Sensor?`, `Sensor[0-3]`
    #[arg(short, long, default_value = "*")]
    pub topics: String,

    /// Stop capturing after this long, `0` to capture until the monitor exits
    #[arg(long, default_value = "30s", value_parser = parse_duration_arg)]
    pub timeout: Duration,

    /// JSONL file to write the samples to, stdout by default
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Stop after this many samples, `0` for no limit
    #[arg(short = 'n', long, default_value_t = 0)]
    pub count: usize,

    /// QoS profile file giving rtiddsspy the type information
    #[arg(long)]
    pub qos_file: Option<PathBuf>,

    /// Monitor to run instead of `$NDDSHOME/bin/rtiddsspy`, after `--`. It must print samples
    /// in the rtiddsspy `-printSample` format on stdout.
    #[arg(last = true)]
    pub monitor: Vec<String>,
}

impl CaptureArgs {
    fn capture_options(&self, nddshome: Option<PathBuf>) -> Result<CaptureOptions> {
        let mut options = if self.monitor.is_empty() {
            let nddshome = nddshome
                .context("NDDSHOME is not set. Please source the RTI Connext setup script")?;
            CaptureOptions::rtiddsspy(&nddshome, self.domain, self.qos_file.as_deref())?
        } else {
            CaptureOptions::new(self.monitor.clone())
        };
        options.timeout = self.timeout;
        options.topics = TopicFilter::new(&self.topics)?;
        options.count = self.count;
        Ok(options)
    }
}

pub fn run(args: CaptureArgs, context: &CliContext) -> Result<i32> {
    let options = args.capture_options(context.config.nddshome())?;
    let supervisor = context.local_supervisor()?;

    info!(
        "Domain: {}, Topics: {}, Timeout: {}",
        args.domain,
        options.topics.pattern(),
        humantime::format_duration(options.timeout)
    );

    let writer: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(File::create(path).with_context(|| {
            format!("Failed to create output file {}", path.display())
        })?)),
        None => Box::new(io::stdout().lock()),
    };
    let samples_captured = write_samples(&supervisor, &options, writer)?;

    info!("Total samples captured: {samples_captured}");
    if samples_captured == 0 {
        return Ok(EXIT_FAILURE);
    }
    Ok(0)
}

fn write_samples(
    supervisor: &crate::supervisor::ProcessSupervisor,
    options: &CaptureOptions,
    mut writer: Box<dyn Write>,
) -> Result<usize> {
    let report = capture_samples(supervisor, MONITOR_NAME, options, |sample| {
        writeln!(writer, "{}", sample.to_json_line()?)?;
        writer.flush()?;
        Ok(())
    })?;

    if let Some(error) = &report.monitor.error_message {
        debug!("Monitor: {error}");
    }
    for line in &report.monitor.stderr_lines {
        debug!("[monitor stderr] {line}");
    }
    Ok(report.samples_captured)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        capture: CaptureArgs,
    }

    fn parse(args: &[&str]) -> CaptureArgs {
        TestCli::parse_from(std::iter::once("capture").chain(args.iter().copied())).capture
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert_eq!(args.domain, 0);
        assert_eq!(args.topics, "*");
        assert_eq!(args.timeout, Duration::from_secs(30));
        assert_eq!(args.count, 0);
        assert!(args.monitor.is_empty());
    }

    #[test]
    fn test_rtiddsspy_requires_nddshome() {
        let args = parse(&["--domain", "57"]);
        let err = args.capture_options(None).unwrap_err();
        assert!(err.to_string().starts_with("NDDSHOME is not set"));
    }

    #[test]
    fn test_explicit_monitor() {
        let args = parse(&["-t", "Vehicle_*", "--timeout", "2", "-n", "3", "--", "cat", "t.txt"]);

        let options = args.capture_options(None).unwrap();

        assert_eq!(options.monitor, vec!["cat", "t.txt"]);
        assert_eq!(options.timeout, Duration::from_secs(2));
        assert_eq!(options.count, 3);
        assert!(options.topics.matches("Vehicle_Status"));
        assert!(!options.topics.matches("Robot_Status"));
    }

    #[test]
    fn test_samples_are_written_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let trace = dir.path().join("trace.txt");
        std::fs::write(
            &trace,
            "Sample received, count 1, topic \"Chat\"\n    text: \"hi\"\n\
             Sample received, count 2, topic \"Chat\"\n    text: \"bye\"\n",
        )
        .unwrap();
        let output = dir.path().join("samples.jsonl");
        let options = CaptureOptions::new(vec!["cat".to_string(), trace.display().to_string()]);
        let supervisor = crate::supervisor::ProcessSupervisor::new(Default::default());

        let writer = Box::new(BufWriter::new(File::create(&output).unwrap()));
        let captured = write_samples(&supervisor, &options, writer).unwrap();

        assert_eq!(captured, 2);
        insta::assert_snapshot!(std::fs::read_to_string(&output).unwrap(), @r#"
        {"topic":"Chat","sample_count":1,"data":{"text":"hi"}}
        {"topic":"Chat","sample_count":2,"data":{"text":"bye"}}
        "#);
    }
}
