//! Publisher verification tests: start a publisher, capture what it publishes with the spy and
//! compare the samples against an expected JSONL file.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use console::style;
use sample_shared::{ComparatorOptions, SampleComparator, check_float_tolerance};
use tempfile::TempDir;

use crate::port_utils::{get_safe_domain_id, validate_domain_id};
use crate::prelude::*;
use crate::spy::{CaptureOptions, TopicFilter, capture_samples, rtiddsspy_path};
use crate::supervisor::{LaunchRequest, ProcessSupervisor, SupervisorOptions};

mod interfaces;

pub use interfaces::*;

/// Lines of publisher output kept in the result of a crashed publisher.
const CRASH_OUTPUT_LINES: usize = 20;

impl SuiteConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read(path)
            .with_context(|| format!("Failed to read test suite at {}", path.display()))?;
        let suite: Self = serde_yaml::from_slice(&content)
            .with_context(|| format!("Failed to parse test suite at {}", path.display()))?;
        suite.validate()?;
        Ok(suite)
    }

    fn validate(&self) -> Result<()> {
        for test in &self.tests {
            let context = || format!("Invalid test '{}'", test.name);
            let publisher = &test.publisher;
            interfaces::seconds(publisher.startup_delay, "startup_delay").with_context(context)?;
            interfaces::seconds(publisher.timeout, "publisher timeout").with_context(context)?;
            interfaces::seconds(test.spy.timeout, "spy timeout").with_context(context)?;
            TopicFilter::new(&test.spy.topics).with_context(context)?;
            check_float_tolerance(test.validation.float_tolerance).with_context(context)?;
        }
        Ok(())
    }

    pub fn test(&self, name: &str) -> Option<&TestCase> {
        self.tests.iter().find(|test| test.name == name)
    }
}

/// Runs the tests of a suite, one at a time, on a single domain.
pub struct TestRunner {
    suite: SuiteConfig,
    /// Directory of the suite file, where relative expected outputs are looked up
    suite_dir: Option<PathBuf>,
    work_dir: PathBuf,
    /// Removed when the runner is dropped
    _temp_dir: Option<TempDir>,
    nddshome: Option<PathBuf>,
    supervisor: ProcessSupervisor,
}

impl TestRunner {
    /// Create a runner working in `work_dir`, or in a fresh temporary directory.
    pub fn new(suite: SuiteConfig, work_dir: Option<PathBuf>) -> Result<Self> {
        let (work_dir, temp_dir) = match work_dir {
            Some(work_dir) => {
                fs::create_dir_all(&work_dir).with_context(|| {
                    format!("Failed to create work directory {}", work_dir.display())
                })?;
                (work_dir, None)
            }
            None => {
                let temp_dir = tempfile::Builder::new()
                    .prefix("dds_test_")
                    .tempdir()
                    .context("Failed to create a work directory")?;
                (temp_dir.path().to_path_buf(), Some(temp_dir))
            }
        };

        Ok(Self {
            suite,
            suite_dir: None,
            work_dir,
            _temp_dir: temp_dir,
            nddshome: None,
            supervisor: ProcessSupervisor::new(SupervisorOptions::default()),
        })
    }

    pub fn with_suite_dir(mut self, suite_dir: impl Into<PathBuf>) -> Self {
        self.suite_dir = Some(suite_dir.into());
        self
    }

    pub fn with_nddshome(mut self, nddshome: Option<PathBuf>) -> Self {
        self.nddshome = nddshome;
        self
    }

    pub fn with_supervisor(mut self, supervisor: ProcessSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// The configured domain when it is valid, otherwise a free one.
    pub fn select_domain(&self) -> u32 {
        if let Some(domain_id) = self.suite.domain_id {
            match validate_domain_id(domain_id) {
                Ok(domain_id) => return domain_id,
                Err(e) => match u32::try_from(domain_id) {
                    Ok(domain_id) => {
                        warn!("Warning: {e}");
                        return domain_id;
                    }
                    Err(_) => warn!("Warning: {e}, picking another domain"),
                },
            }
        }
        let domain_id = get_safe_domain_id();
        info!("Using domain ID: {domain_id}");
        domain_id
    }

    /// Run the named tests, or every test of the suite when `test_names` is empty.
    pub fn run_all(&self, test_names: &[String]) -> SuiteResult {
        let tests: Vec<&TestCase> = if test_names.is_empty() {
            self.suite.tests.iter().collect()
        } else {
            test_names
                .iter()
                .filter_map(|name| {
                    let test = self.suite.test(name);
                    if test.is_none() {
                        warn!("Unknown test '{name}', skipping it");
                    }
                    test
                })
                .collect()
        };
        if tests.is_empty() {
            return SuiteResult::default();
        }

        let domain_id = self.select_domain();
        let results = tests
            .into_iter()
            .map(|test| {
                start_group!(format!("Running test: {}", test.name));
                let result = self.run_test(test, domain_id);
                end_group!();
                if result.passed {
                    info!("PASSED ({} samples)", result.samples_matched);
                } else {
                    let error = result.error.as_deref().unwrap_or("unknown error");
                    error!("FAILED: {error}");
                }
                result
            })
            .collect();

        SuiteResult::from_results(results)
    }

    /// Run one test. Failures of any kind end up in the result, never as an error.
    pub fn run_test(&self, test: &TestCase, domain_id: u32) -> TestResult {
        let started = Instant::now();
        let publisher = format!("{}_publisher", test.name);

        let mut result = self
            .execute(test, domain_id, &publisher)
            .unwrap_or_else(|e| TestResult::failed(&test.name, format!("{e:#}")));

        if self.supervisor.terminate(&publisher, false) {
            debug!("Stopped publisher '{publisher}'");
        }
        result.duration_seconds = started.elapsed().as_secs_f64();
        result
    }

    fn execute(&self, test: &TestCase, domain_id: u32, publisher: &str) -> Result<TestResult> {
        let name = test.name.as_str();
        let output_file = self.work_dir.join(format!("{name}_samples.jsonl"));

        debug!("Starting publisher...");
        let command = test
            .publisher
            .command
            .to_argv()
            .context("Invalid publisher command")?;
        let command = self.substitute_vars(&command, domain_id);
        let timeout = interfaces::seconds(test.publisher.timeout, "publisher timeout")?;
        self.supervisor
            .launch(LaunchRequest::new(publisher, command).timeout(timeout))?;

        thread::sleep(interfaces::seconds(
            test.publisher.startup_delay,
            "startup_delay",
        )?);

        let process = self
            .supervisor
            .inspect(publisher)
            .context("Publisher left the registry")?;
        if !process.is_running() {
            let mut result = TestResult::failed(
                name,
                format!(
                    "Publisher crashed: {}",
                    process.error_message.as_deref().unwrap_or("Unknown error")
                ),
            );
            result
                .details
                .insert("publisher_exit_code".to_string(), process.exit_code.into());
            result
                .details
                .insert("stdout".to_string(), tail(&process.stdout_lines).into());
            result
                .details
                .insert("stderr".to_string(), tail(&process.stderr_lines).into());
            return Ok(result);
        }

        debug!("Capturing samples...");
        let samples_captured = self.capture(test, domain_id, &output_file)?;
        if samples_captured == 0 {
            return Ok(TestResult::failed(name, "No samples captured"));
        }

        debug!("Comparing samples...");
        let Some(expected) = self.resolve_expected(&test.validation.expected_output) else {
            let mut result = TestResult::failed(
                name,
                format!(
                    "Expected output file not found: {}",
                    test.validation.expected_output
                ),
            );
            result.samples_captured = samples_captured;
            return Ok(result);
        };

        let comparator = SampleComparator::new(ComparatorOptions {
            float_tolerance: test.validation.float_tolerance,
            ignore_fields: test.validation.ignore_fields.clone(),
            order_independent: test.validation.order_independent,
        });
        let comparison = comparator.compare_files(&output_file, &expected);

        let mut result = TestResult {
            test_name: name.to_string(),
            passed: comparison.passed,
            samples_captured,
            samples_matched: comparison.matched_count,
            duration_seconds: 0.0,
            error: None,
            details: serde_json::Map::new(),
        };
        if samples_captured < test.validation.min_samples {
            result.passed = false;
            result.error = Some(format!(
                "Insufficient samples: {samples_captured} < {}",
                test.validation.min_samples
            ));
        } else if !comparison.passed {
            result.error = Some("Sample comparison failed".to_string());
            result
                .details
                .insert("comparison".to_string(), serde_json::to_value(&comparison)?);
        }
        Ok(result)
    }

    /// Capture the test's samples into `output_file`, returning how many were written.
    fn capture(&self, test: &TestCase, domain_id: u32, output_file: &Path) -> Result<usize> {
        let mut options = match &test.spy.command {
            Some(command) => {
                let argv = command.to_argv().context("Invalid spy command")?;
                CaptureOptions::new(self.substitute_vars(&argv, domain_id))
            }
            None => {
                let nddshome = self
                    .nddshome
                    .as_deref()
                    .context("rtiddsspy not found. Is NDDSHOME set?")?;
                let qos_file = test.spy.qos_file.as_ref().map(PathBuf::from);
                CaptureOptions::rtiddsspy(nddshome, domain_id, qos_file.as_deref())?
            }
        };
        options.timeout = interfaces::seconds(test.spy.timeout, "spy timeout")?;
        options.topics = TopicFilter::new(&test.spy.topics)?;
        options.count = test.spy.count;

        let file = File::create(output_file)
            .with_context(|| format!("Failed to create {}", output_file.display()))?;
        let mut writer = BufWriter::new(file);
        let report = capture_samples(
            &self.supervisor,
            &format!("{}_spy", test.name),
            &options,
            |sample| {
                writeln!(writer, "{}", sample.to_json_line()?)?;
                Ok(())
            },
        )?;
        writer.flush()?;

        if !report.monitor.stderr_lines.is_empty() {
            debug!("Spy stderr:\n{}", report.monitor.stderr_lines.join("\n"));
        }
        Ok(report.samples_captured)
    }

    /// An expected output path as given, else relative to the suite file, else to the work
    /// directory.
    fn resolve_expected(&self, expected: &str) -> Option<PathBuf> {
        if expected.is_empty() {
            return None;
        }
        let path = PathBuf::from(expected);
        if path.is_absolute() {
            return path.exists().then_some(path);
        }
        [
            Some(path.clone()),
            self.suite_dir.as_ref().map(|dir| dir.join(&path)),
            Some(self.work_dir.join(&path)),
        ]
        .into_iter()
        .flatten()
        .find(|candidate| candidate.exists())
    }

    fn substitute_vars(&self, command: &[String], domain_id: u32) -> Vec<String> {
        let domain_id = domain_id.to_string();
        let work_dir = self.work_dir.display().to_string();
        command
            .iter()
            .map(|arg| {
                arg.replace("{DOMAIN_ID}", &domain_id)
                    .replace("{WORK_DIR}", &work_dir)
            })
            .collect()
    }

    /// Stop whatever the tests left running.
    pub fn cleanup(&self) {
        let reclaimed = self.supervisor.reclaim_all();
        if !reclaimed.is_empty() {
            debug!("Cleaned up {}", reclaimed.join(", "));
        }
    }
}

fn tail(lines: &[String]) -> String {
    let start = lines.len().saturating_sub(CRASH_OUTPUT_LINES);
    lines[start..].join("\n")
}

/// Human readable summary of a suite run.
pub fn render_results(suite: &SuiteResult) -> String {
    let rule = "=".repeat(60);
    let mut out = format!("\n{rule}\nTEST RESULTS\n{rule}\n\n");

    for result in &suite.results {
        let status = if result.passed {
            style("PASS").green()
        } else {
            style("FAIL").red()
        };
        out.push_str(&format!("  [{status}] {}\n", result.test_name));
        out.push_str(&format!(
            "         Duration: {:.2}s\n",
            result.duration_seconds
        ));
        out.push_str(&format!(
            "         Samples: {} captured, {} matched\n",
            result.samples_captured, result.samples_matched
        ));
        if let Some(error) = &result.error {
            out.push_str(&format!("         Error: {error}\n"));
        }
        out.push('\n');
    }

    out.push_str(&format!(
        "{rule}\nTotal: {} | Passed: {} | Failed: {}\n{rule}\n",
        suite.total, suite.passed, suite.failed
    ));
    out
}

/// What `harness check-env` found.
#[derive(Debug)]
pub struct EnvironmentReport {
    pub nddshome: Option<PathBuf>,
    pub rtiddsspy: Option<PathBuf>,
    pub domain_id: u32,
    pub issues: Vec<String>,
}

pub fn check_environment(nddshome: Option<&Path>) -> EnvironmentReport {
    let mut issues = Vec::new();
    let rtiddsspy = match nddshome {
        None => {
            issues.push("NDDSHOME environment variable is not set".to_string());
            None
        }
        Some(nddshome) => match rtiddsspy_path(nddshome) {
            Ok(path) => Some(path),
            Err(e) => {
                issues.push(e.to_string());
                None
            }
        },
    };

    EnvironmentReport {
        nddshome: nddshome.map(Path::to_path_buf),
        rtiddsspy,
        domain_id: get_safe_domain_id(),
        issues,
    }
}
