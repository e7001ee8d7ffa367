//! Run a DDS spy under the supervisor and turn its live output into samples.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use sample_shared::{Sample, SpyParser};

use crate::prelude::*;
use crate::supervisor::{LaunchRequest, ManagedProcess, OutputStream, ProcessSupervisor};

mod topic_filter;

pub use topic_filter::TopicFilter;

const OUTPUT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[cfg(target_os = "macos")]
pub const LIBRARY_PATH_VAR: &str = "DYLD_LIBRARY_PATH";
#[cfg(not(target_os = "macos"))]
pub const LIBRARY_PATH_VAR: &str = "LD_LIBRARY_PATH";

/// Locate `rtiddsspy` inside an RTI Connext installation.
pub fn rtiddsspy_path(nddshome: &Path) -> Result<PathBuf> {
    let spy_path = nddshome.join("bin").join("rtiddsspy");
    if !spy_path.exists() {
        bail!(
            "rtiddsspy not found at {}. Please verify your RTI Connext DDS installation.",
            spy_path.display()
        );
    }
    Ok(spy_path)
}

/// The library search path the spy needs, prepended to the current one.
///
/// Libraries live in an architecture directory under `lib/` (e.g. `lib/x64Linux4gcc7.3.0`); the
/// first one in name order is used, `lib/` itself when there is none.
pub fn library_path_env(nddshome: &Path) -> (String, String) {
    let lib_dir = nddshome.join("lib");
    let arch_dir = std::fs::read_dir(&lib_dir)
        .ok()
        .and_then(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.is_dir())
                .min()
        })
        .unwrap_or(lib_dir);

    let mut value = arch_dir.display().to_string();
    if let Ok(existing) = env::var(LIBRARY_PATH_VAR) {
        if !existing.is_empty() {
            value = format!("{value}:{existing}");
        }
    }
    (LIBRARY_PATH_VAR.to_string(), value)
}

pub fn spy_argv(spy_path: &Path, domain_id: u32, qos_file: Option<&Path>) -> Vec<String> {
    let mut argv = vec![
        spy_path.display().to_string(),
        "-domainId".to_string(),
        domain_id.to_string(),
        "-printSample".to_string(),
    ];
    if let Some(qos_file) = qos_file {
        argv.push("-qosFile".to_string());
        argv.push(qos_file.display().to_string());
    }
    argv
}

/// How to run the monitor and which samples to keep.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Monitor command line, printing spy-formatted samples on stdout
    pub monitor: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Zero captures until the monitor exits
    pub timeout: Duration,
    pub topics: TopicFilter,
    /// Stop after this many samples, zero for no limit
    pub count: usize,
}

impl CaptureOptions {
    pub fn new(monitor: Vec<String>) -> Self {
        Self {
            monitor,
            env: BTreeMap::new(),
            timeout: Duration::ZERO,
            topics: TopicFilter::all(),
            count: 0,
        }
    }

    /// Build the options to run `rtiddsspy` from `nddshome` on `domain_id`.
    pub fn rtiddsspy(nddshome: &Path, domain_id: u32, qos_file: Option<&Path>) -> Result<Self> {
        let spy_path = rtiddsspy_path(nddshome)?;
        let (key, value) = library_path_env(nddshome);
        let mut options = Self::new(spy_argv(&spy_path, domain_id, qos_file));
        options.env.insert(key, value);
        Ok(options)
    }
}

#[derive(Debug)]
pub struct CaptureReport {
    pub samples_captured: usize,
    /// The monitor process once capture ended
    pub monitor: ManagedProcess,
}

/// Run the monitor as `name` and hand every sample matching the topic filter to `on_sample`, in
/// arrival order.
///
/// Capture ends when the monitor exits (or times out), or as soon as `count` samples were
/// captured. The monitor is always stopped before returning.
pub fn capture_samples<F>(
    supervisor: &ProcessSupervisor,
    name: &str,
    options: &CaptureOptions,
    mut on_sample: F,
) -> Result<CaptureReport>
where
    F: FnMut(&Sample) -> Result<()>,
{
    let mut request = LaunchRequest::new(name, options.monitor.clone()).timeout(options.timeout);
    request.env = options.env.clone();
    debug!("Running monitor: {}", shell_words::join(&options.monitor));

    let launched = supervisor.launch(request)?;
    if let Some(error) = launched.error_message.filter(|_| launched.pid.is_none()) {
        bail!("Failed to start the monitor: {error}");
    }

    let mut captured = 0;
    let result = pump_samples(supervisor, name, options, &mut on_sample, &mut captured);

    let stop_started = Instant::now();
    if supervisor.terminate(name, false) {
        debug!("Stopped monitor '{name}' in {:?}", stop_started.elapsed());
    }
    result?;

    let monitor = supervisor
        .inspect(name)
        .with_context(|| format!("Monitor '{name}' left the registry"))?;
    Ok(CaptureReport {
        samples_captured: captured,
        monitor,
    })
}

/// Feed the monitor's stdout to the parser until it is sealed or the count limit is reached.
fn pump_samples<F>(
    supervisor: &ProcessSupervisor,
    name: &str,
    options: &CaptureOptions,
    on_sample: &mut F,
    captured: &mut usize,
) -> Result<()>
where
    F: FnMut(&Sample) -> Result<()>,
{
    let mut parser = SpyParser::new();
    let mut offset = 0;
    let mut handle = |sample: Sample| -> Result<bool> {
        if !options.topics.matches(&sample.topic) {
            trace!("Skipping sample of topic {}", sample.topic);
            return Ok(false);
        }
        on_sample(&sample)?;
        *captured += 1;
        debug!("Captured sample {captured} from topic {}", sample.topic);
        Ok(options.count > 0 && *captured >= options.count)
    };

    loop {
        let chunk = supervisor
            .read_output(name, OutputStream::Stdout, offset)
            .with_context(|| format!("Monitor '{name}' left the registry"))?;
        offset = chunk.next_offset;

        for line in &chunk.lines {
            if let Some(sample) = parser.parse_line(line) {
                if handle(sample)? {
                    debug!("Reached sample count limit: {}", options.count);
                    return Ok(());
                }
            }
        }

        if chunk.sealed {
            break;
        }
        // Seals the output once the monitor exited
        supervisor.inspect(name);
        thread::sleep(OUTPUT_POLL_INTERVAL);
    }

    if let Some(sample) = parser.flush() {
        handle(sample)?;
    }
    Ok(())
}
