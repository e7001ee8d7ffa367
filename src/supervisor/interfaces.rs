use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Pending,
    Running,
    Completed,
    Errored,
    TimedOut,
    Killed,
}

impl ProcessStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessStatus::Completed
                | ProcessStatus::Errored
                | ProcessStatus::TimedOut
                | ProcessStatus::Killed
        )
    }

    /// `Pending -> Running -> {Completed | Errored | TimedOut | Killed}`, and `Pending -> Errored`
    /// when the process could not be spawned. Terminal states are final.
    pub fn can_transition_to(self, next: ProcessStatus) -> bool {
        use ProcessStatus::*;

        match (self, next) {
            (Pending, Running | Errored) => true,
            (Running, Completed | Errored | TimedOut | Killed) => true,
            (Pending, Pending | Completed | TimedOut | Killed) => false,
            (Running, Pending | Running) => false,
            (Completed | Errored | TimedOut | Killed, _) => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessStatus::Pending => "pending",
            ProcessStatus::Running => "running",
            ProcessStatus::Completed => "completed",
            ProcessStatus::Errored => "errored",
            ProcessStatus::TimedOut => "timed_out",
            ProcessStatus::Killed => "killed",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Process '{0}' is already running")]
    DuplicateName(String),
    #[error("Process '{0}' not found")]
    NotFound(String),
    #[error("Timed out after {waited:?} waiting for process '{name}'")]
    WaitTimeout { name: String, waited: Duration },
}

/// What to run. `timeout` of zero means the process may run forever.
#[derive(Debug, Clone, Default)]
pub struct LaunchRequest {
    pub name: String,
    pub argv: Vec<String>,
    pub timeout: Duration,
    pub cwd: Option<PathBuf>,
    /// Merged over the supervisor's own environment
    pub env: BTreeMap<String, String>,
}

impl LaunchRequest {
    pub fn new(name: impl Into<String>, argv: Vec<String>) -> Self {
        Self {
            name: name.into(),
            argv,
            ..Default::default()
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Snapshot of a supervised process.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedProcess {
    pub name: String,
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
    pub pid: Option<u32>,
    pub status: ProcessStatus,
    /// Seconds since the Unix epoch
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
}

impl ManagedProcess {
    pub(super) fn pending(request: &LaunchRequest) -> Self {
        Self {
            name: request.name.clone(),
            argv: request.argv.clone(),
            cwd: request.cwd.clone(),
            env: request.env.clone(),
            timeout: request.timeout,
            pid: None,
            status: ProcessStatus::Pending,
            start_time: None,
            end_time: None,
            exit_code: None,
            error_message: None,
            stdout_lines: Vec::new(),
            stderr_lines: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ProcessStatus::Running
    }

    /// Seconds spent running so far, or in total once terminal.
    pub fn elapsed(&self) -> Option<f64> {
        let start = self.start_time?;
        let end = self.end_time.unwrap_or_else(now_secs);
        Some((end - start).max(0.0))
    }

    pub fn command_line(&self) -> String {
        shell_words::join(&self.argv)
    }
}

/// Lines captured on both streams.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => f.write_str("stdout"),
            OutputStream::Stderr => f.write_str("stderr"),
        }
    }
}

/// New lines of one stream, see [`super::ProcessSupervisor::read_output`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputChunk {
    pub lines: Vec<String>,
    /// Offset to pass to the next read
    pub next_offset: usize,
    /// The stream is closed, no line will be added after this chunk
    pub sealed: bool,
}

/// Serialized form of a process, used by the state file and `process status --json`.
///
/// Captured output is summarized by its line counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub name: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    pub pid: Option<u32>,
    pub status: ProcessStatus,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub exit_code: Option<i32>,
    /// Seconds, zero for no timeout
    pub timeout: f64,
    #[serde(default)]
    pub elapsed_time: Option<f64>,
    #[serde(default)]
    pub stdout_lines: usize,
    #[serde(default)]
    pub stderr_lines: usize,
    pub error_message: Option<String>,
}

impl From<&ManagedProcess> for ProcessRecord {
    fn from(process: &ManagedProcess) -> Self {
        Self {
            name: process.name.clone(),
            command: process.argv.clone(),
            cwd: process.cwd.clone(),
            pid: process.pid,
            status: process.status,
            start_time: process.start_time,
            end_time: process.end_time,
            exit_code: process.exit_code,
            timeout: process.timeout.as_secs_f64(),
            elapsed_time: process.elapsed(),
            stdout_lines: process.stdout_lines.len(),
            stderr_lines: process.stderr_lines.len(),
            error_message: process.error_message.clone(),
        }
    }
}

impl From<ProcessRecord> for ManagedProcess {
    fn from(record: ProcessRecord) -> Self {
        Self {
            name: record.name,
            argv: record.command,
            cwd: record.cwd,
            env: BTreeMap::new(),
            timeout: Duration::try_from_secs_f64(record.timeout).unwrap_or_default(),
            pid: record.pid,
            status: record.status,
            start_time: record.start_time,
            end_time: record.end_time,
            exit_code: record.exit_code,
            error_message: record.error_message,
            stdout_lines: Vec::new(),
            stderr_lines: Vec::new(),
        }
    }
}

pub(crate) fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
