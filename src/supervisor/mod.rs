//! Launch and track external processes.
//!
//! Every process runs in its own process group with both output streams captured line by line.
//! A process with a timeout gets a monitor thread that terminates it once the deadline passes.
//! The registry is optionally persisted to a JSON state file so another invocation of the CLI can
//! report on finished processes.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use std::os::unix::process::CommandExt;

use crate::config::DEFAULT_GRACE_PERIOD;
use crate::prelude::*;
use capture::{OutputBuffer, spawn_capture};
use interfaces::now_secs;

mod capture;
mod interfaces;
mod signal;
mod state_file;

pub use interfaces::*;
pub use signal::is_pid_alive;

/// How long to wait for the exit after SIGKILL.
const KILL_WAIT: Duration = Duration::from_secs(1);
/// Bound on joining the capture threads of a finished process.
const CAPTURE_JOIN_LIMIT: Duration = Duration::from_millis(500);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);
const MONITOR_TICK: Duration = Duration::from_millis(50);
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Where the registry is persisted, `None` keeps it in memory only
    pub state_file: Option<PathBuf>,
    /// Time between SIGTERM and SIGKILL
    pub grace_period: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            state_file: None,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

/// Registry of supervised processes. Cloning gives another handle on the same registry.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Mutex<BTreeMap<String, RegistryEntry>>,
    state_file: Option<PathBuf>,
    grace_period: Duration,
}

struct RegistryEntry {
    process: ManagedProcess,
    /// `None` for a process that never started or was restored from the state file
    handle: Option<Arc<ProcessHandle>>,
}

impl RegistryEntry {
    fn snapshot(&self) -> ManagedProcess {
        let mut process = self.process.clone();
        if let Some(handle) = &self.handle {
            process.stdout_lines = handle.stdout.lines();
            process.stderr_lines = handle.stderr.lines();
        }
        process
    }

    fn running_handle(&self) -> Option<Arc<ProcessHandle>> {
        self.handle
            .as_ref()
            .filter(|_| self.process.is_running())
            .cloned()
    }

    fn is_tracking(&self, handle: &Arc<ProcessHandle>) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, handle))
    }

    /// Record the terminal transition. Exit code and end time are only ever set here.
    fn finish(
        &mut self,
        status: ProcessStatus,
        exit_code: Option<i32>,
        error_message: Option<String>,
    ) {
        let current = self.process.status;
        if !current.can_transition_to(status) {
            debug!(
                "Ignoring transition of '{}' from {current} to {status}",
                self.process.name
            );
            return;
        }
        debug!("Process '{}': {current} -> {status}", self.process.name);
        self.process.status = status;
        self.process.end_time = Some(now_secs());
        self.process.exit_code = exit_code;
        if error_message.is_some() {
            self.process.error_message = error_message;
        }
    }
}

/// A started child and the threads attached to it.
struct ProcessHandle {
    pid: u32,
    child: Mutex<Child>,
    /// Set by whoever runs the finishing sequence, so it runs exactly once
    terminating: AtomicBool,
    /// Tells the capture threads to stop once nothing is left to read
    closed: Arc<AtomicBool>,
    capture_threads: Mutex<Vec<JoinHandle<()>>>,
    stdout: Arc<OutputBuffer>,
    stderr: Arc<OutputBuffer>,
}

impl ProcessHandle {
    fn spawn(request: &LaunchRequest) -> io::Result<Self> {
        let (program, args) = request
            .argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        if let Some(cwd) = &request.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn()?;
        let pid = child.id();
        let closed = Arc::new(AtomicBool::new(false));
        let stdout = Arc::new(OutputBuffer::default());
        let stderr = Arc::new(OutputBuffer::default());

        let started = start_capture(&request.name, &mut child, &stdout, &stderr, &closed);
        let capture_threads = match started {
            Ok(threads) => threads,
            Err(e) => {
                closed.store(true, Ordering::Release);
                let _ = signal::signal_group(pid, libc::SIGKILL);
                let _ = child.wait();
                return Err(io::Error::new(
                    e.kind(),
                    format!("failed to start capture thread: {e}"),
                ));
            }
        };

        Ok(Self {
            pid,
            child: Mutex::new(child),
            terminating: AtomicBool::new(false),
            closed,
            capture_threads: Mutex::new(capture_threads),
            stdout,
            stderr,
        })
    }

    fn claim(&self) -> bool {
        self.terminating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_claimed(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
    }

    fn try_wait(&self) -> io::Result<Option<ExitStatus>> {
        self.child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_wait()
    }

    /// Poll for the exit for at most `limit`.
    fn wait_exit(&self, limit: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + limit;
        loop {
            match self.try_wait() {
                Ok(Some(status)) => return Some(status),
                Ok(None) => {}
                Err(e) => {
                    debug!("Failed to wait for process {}: {e}", self.pid);
                    return None;
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            thread::sleep(EXIT_POLL_INTERVAL.min(deadline - now));
        }
    }

    fn close_streams(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Join the capture threads that finish within `limit`, the others are left detached.
    fn join_capture(&self, limit: Duration) {
        let threads = std::mem::take(
            &mut *self
                .capture_threads
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline && !threads.iter().all(JoinHandle::is_finished) {
            thread::sleep(EXIT_POLL_INTERVAL);
        }
        for thread in threads {
            if thread.is_finished() {
                let _ = thread.join();
            } else {
                debug!("Capture thread of process {} did not stop", self.pid);
            }
        }
    }

    fn seal(&self) {
        self.stdout.seal();
        self.stderr.seal();
    }

    fn capture_error(&self) -> Option<String> {
        self.stdout.error().or_else(|| self.stderr.error())
    }

    fn buffer(&self, stream: OutputStream) -> &OutputBuffer {
        match stream {
            OutputStream::Stdout => &self.stdout,
            OutputStream::Stderr => &self.stderr,
        }
    }
}

fn start_capture(
    name: &str,
    child: &mut Child,
    stdout: &Arc<OutputBuffer>,
    stderr: &Arc<OutputBuffer>,
    closed: &Arc<AtomicBool>,
) -> io::Result<Vec<JoinHandle<()>>> {
    let mut threads = Vec::with_capacity(2);
    if let Some(pipe) = child.stdout.take() {
        threads.push(spawn_capture(
            name,
            OutputStream::Stdout,
            pipe,
            stdout.clone(),
            closed.clone(),
        )?);
    }
    if let Some(pipe) = child.stderr.take() {
        threads.push(spawn_capture(
            name,
            OutputStream::Stderr,
            pipe,
            stderr.clone(),
            closed.clone(),
        )?);
    }
    Ok(threads)
}

/// Outcome of signalling a process group until it exits.
struct Stopped {
    status: Option<ExitStatus>,
    error: Option<String>,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(SupervisorOptions::default())
    }
}

impl ProcessSupervisor {
    /// Create a supervisor, restoring the finished processes recorded in the state file.
    pub fn new(options: SupervisorOptions) -> Self {
        let mut registry = BTreeMap::new();
        if let Some(path) = &options.state_file {
            match state_file::load(path) {
                Ok(processes) => {
                    for process in processes {
                        registry.insert(
                            process.name.clone(),
                            RegistryEntry {
                                process,
                                handle: None,
                            },
                        );
                    }
                }
                Err(e) => warn!("Ignoring process state: {e:#}"),
            }
        }

        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(registry),
                state_file: options.state_file,
                grace_period: options.grace_period,
            }),
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.inner.grace_period
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, RegistryEntry>> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, registry: &BTreeMap<String, RegistryEntry>) {
        let Some(path) = &self.inner.state_file else {
            return;
        };
        let processes: Vec<ManagedProcess> =
            registry.values().map(RegistryEntry::snapshot).collect();
        if let Err(e) = state_file::save(path, &processes) {
            warn!("Failed to save process state: {e:#}");
        }
    }

    /// Start a process under `request.name`.
    ///
    /// Fails only when a process of that name is still running. A command that cannot be
    /// started gives an `Errored` process.
    pub fn launch(&self, request: LaunchRequest) -> Result<ManagedProcess, SupervisorError> {
        self.reconcile(Some(&request.name));

        let mut registry = self.lock();
        if registry
            .get(&request.name)
            .is_some_and(|entry| entry.process.is_running())
        {
            return Err(SupervisorError::DuplicateName(request.name));
        }

        let mut process = ManagedProcess::pending(&request);
        let entry = match ProcessHandle::spawn(&request) {
            Ok(handle) => {
                debug!(
                    "Started process '{}' (pid {}): {}",
                    request.name,
                    handle.pid,
                    process.command_line()
                );
                process.status = ProcessStatus::Running;
                process.pid = Some(handle.pid);
                process.start_time = Some(now_secs());
                RegistryEntry {
                    process,
                    handle: Some(Arc::new(handle)),
                }
            }
            Err(e) => {
                debug!("Failed to start process '{}': {e}", request.name);
                let mut entry = RegistryEntry {
                    process,
                    handle: None,
                };
                entry.finish(
                    ProcessStatus::Errored,
                    None,
                    Some(format!("Failed to start process: {e}")),
                );
                entry
            }
        };

        let snapshot = entry.snapshot();
        if let Some(handle) = entry.running_handle() {
            if !request.timeout.is_zero() {
                self.spawn_monitor(request.name.clone(), handle, request.timeout);
            }
        }
        registry.insert(request.name, entry);
        self.persist(&registry);
        Ok(snapshot)
    }

    fn spawn_monitor(&self, name: String, handle: Arc<ProcessHandle>, timeout: Duration) {
        let supervisor = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("timeout-{name}"))
            .spawn(move || supervisor.monitor_timeout(&name, &handle, timeout));
        if let Err(e) = spawned {
            warn!("Failed to start the timeout monitor, the process may run forever: {e}");
        }
    }

    fn monitor_timeout(&self, name: &str, handle: &Arc<ProcessHandle>, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        loop {
            if handle.is_claimed() {
                return;
            }
            if !matches!(handle.try_wait(), Ok(None)) {
                self.reconcile_handle(name, handle);
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(MONITOR_TICK.min(deadline - now));
        }

        if !handle.claim() {
            return;
        }
        let timeout = humantime::format_duration(timeout);
        debug!("Process '{name}' timed out after {timeout}");

        let stopped = self.stop(handle, false);
        let mut message = format!("Process timed out after {timeout}");
        if let Some(error) = stopped.error {
            message = format!("{message}, {error}");
        }
        self.finish(
            name,
            handle,
            ProcessStatus::TimedOut,
            stopped.status,
            Some(message),
        );
    }

    /// Check every running process (or only `name`) for a natural exit.
    fn reconcile(&self, name: Option<&str>) {
        let handles: Vec<(String, Arc<ProcessHandle>)> = self
            .lock()
            .iter()
            .filter(|(entry_name, _)| name.is_none_or(|name| name == entry_name.as_str()))
            .filter_map(|(entry_name, entry)| {
                entry
                    .running_handle()
                    .map(|handle| (entry_name.clone(), handle))
            })
            .collect();

        for (name, handle) in handles {
            self.reconcile_handle(&name, &handle);
        }
    }

    /// Record the exit of a process that stopped on its own. Does nothing while it runs or when
    /// a termination already claimed it.
    fn reconcile_handle(&self, name: &str, handle: &Arc<ProcessHandle>) {
        let (status, exit_status, message) = match handle.try_wait() {
            Ok(None) => return,
            Ok(Some(exit_status)) => {
                let status = if exit_status.success() {
                    ProcessStatus::Completed
                } else {
                    ProcessStatus::Errored
                };
                (status, Some(exit_status), None)
            }
            Err(e) => (
                ProcessStatus::Errored,
                None,
                Some(format!("Failed to check process status: {e}")),
            ),
        };
        if !handle.claim() {
            return;
        }
        handle.close_streams();
        self.finish(name, handle, status, exit_status, message);
    }

    /// Signal the process group until the process exits, escalating to SIGKILL after the grace
    /// period.
    fn stop(&self, handle: &ProcessHandle, force: bool) -> Stopped {
        handle.close_streams();

        let mut errors = Vec::new();
        let mut send = |signal| {
            let name = signal::signal_name(signal);
            debug!("Sending {name} to process group {}", handle.pid);
            if let Err(e) = signal::signal_group(handle.pid, signal) {
                errors.push(format!("failed to send {name}: {e}"));
            }
        };

        let mut status = if force {
            send(libc::SIGKILL);
            handle.wait_exit(KILL_WAIT)
        } else {
            send(libc::SIGTERM);
            handle.wait_exit(self.inner.grace_period)
        };
        if status.is_none() && !force {
            debug!(
                "Process {} ignored SIGTERM for {:?}, escalating",
                handle.pid, self.inner.grace_period
            );
            send(libc::SIGKILL);
            status = handle.wait_exit(KILL_WAIT);
        }
        if status.is_none() {
            errors.push(format!("process {} did not exit after SIGKILL", handle.pid));
        }

        Stopped {
            status,
            error: (!errors.is_empty()).then(|| errors.join(", ")),
        }
    }

    /// Stop the capture, seal the output and record the terminal status.
    fn finish(
        &self,
        name: &str,
        handle: &Arc<ProcessHandle>,
        status: ProcessStatus,
        exit_status: Option<ExitStatus>,
        error_message: Option<String>,
    ) {
        handle.join_capture(CAPTURE_JOIN_LIMIT);
        handle.seal();
        let error_message = error_message.or_else(|| handle.capture_error());
        let exit_code = exit_status.and_then(signal::exit_code);

        let mut registry = self.lock();
        match registry.get_mut(name) {
            Some(entry) if entry.is_tracking(handle) => {
                entry.finish(status, exit_code, error_message);
            }
            _ => {
                debug!("Process '{name}' left the registry before it finished");
                return;
            }
        }
        self.persist(&registry);
    }

    /// Current state of a process, after checking whether it exited.
    pub fn inspect(&self, name: &str) -> Option<ManagedProcess> {
        self.reconcile(Some(name));
        self.lock().get(name).map(RegistryEntry::snapshot)
    }

    /// Every process, ordered by name.
    pub fn list_all(&self) -> Vec<ManagedProcess> {
        self.reconcile(None);
        self.lock().values().map(RegistryEntry::snapshot).collect()
    }

    /// Output captured so far, fixed once the process is terminal.
    pub fn output(&self, name: &str) -> Option<ProcessOutput> {
        let registry = self.lock();
        let entry = registry.get(name)?;
        Some(match &entry.handle {
            Some(handle) => ProcessOutput {
                stdout: handle.stdout.lines(),
                stderr: handle.stderr.lines(),
            },
            None => ProcessOutput::default(),
        })
    }

    /// Lines of one stream from `offset` on, to follow the output of a running process.
    pub fn read_output(
        &self,
        name: &str,
        stream: OutputStream,
        offset: usize,
    ) -> Option<OutputChunk> {
        let registry = self.lock();
        let entry = registry.get(name)?;
        Some(match &entry.handle {
            Some(handle) => handle.buffer(stream).chunk_from(offset),
            None => OutputChunk {
                lines: Vec::new(),
                next_offset: 0,
                sealed: true,
            },
        })
    }

    /// Stop a running process and mark it `Killed`.
    ///
    /// Returns `false` if there is no such running process, including one that exited on its own
    /// (its exit is recorded instead) or that is already being terminated.
    pub fn terminate(&self, name: &str, force: bool) -> bool {
        let Some(handle) = self.lock().get(name).and_then(RegistryEntry::running_handle) else {
            return false;
        };
        if !matches!(handle.try_wait(), Ok(None)) {
            self.reconcile_handle(name, &handle);
            return false;
        }
        if !handle.claim() {
            return false;
        }

        debug!("Terminating process '{name}' (pid {})", handle.pid);
        let stopped = self.stop(&handle, force);
        let error_message = stopped.error.map(|e| format!("Failed to kill: {e}"));
        self.finish(
            name,
            &handle,
            ProcessStatus::Killed,
            stopped.status,
            error_message,
        );
        true
    }

    /// Terminate every running process, empty the registry and delete the state file.
    ///
    /// Processes launched while the others are being terminated are terminated too. Returns the
    /// names of the processes that were running, sorted.
    pub fn reclaim_all(&self) -> Vec<String> {
        let mut reclaimed = BTreeSet::new();
        let mut attempted: Vec<Arc<ProcessHandle>> = Vec::new();

        loop {
            let mut registry = self.lock();
            // A handle that outlived its own round is not retried
            let running: Vec<(String, Arc<ProcessHandle>)> = registry
                .iter()
                .filter_map(|(name, entry)| {
                    entry
                        .running_handle()
                        .map(|handle| (name.clone(), handle))
                })
                .filter(|(_, handle)| !attempted.iter().any(|seen| Arc::ptr_eq(seen, handle)))
                .collect();

            if running.is_empty() {
                registry.clear();
                if let Some(path) = &self.inner.state_file {
                    if let Err(e) = state_file::remove(path) {
                        warn!("{e:#}");
                    }
                }
                break;
            }
            drop(registry);

            thread::scope(|scope| {
                for (name, handle) in &running {
                    scope.spawn(move || {
                        if !self.terminate(name, false) {
                            // Already finishing on another thread
                            self.wait_settled(name, handle);
                        }
                    });
                }
            });

            for (name, handle) in running {
                reclaimed.insert(name);
                attempted.push(handle);
            }
        }

        debug!("Reclaimed {} process(es)", reclaimed.len());
        reclaimed.into_iter().collect()
    }

    /// Wait until a process claimed elsewhere has its terminal status recorded.
    fn wait_settled(&self, name: &str, handle: &Arc<ProcessHandle>) {
        let deadline = Instant::now()
            + self.inner.grace_period
            + KILL_WAIT
            + CAPTURE_JOIN_LIMIT
            + Duration::from_secs(1);
        while Instant::now() < deadline {
            let settled = self
                .lock()
                .get(name)
                .is_none_or(|entry| {
                    !entry.is_tracking(handle) || !entry.process.is_running()
                });
            if settled {
                return;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
        warn!("Process '{name}' did not finish its termination in time");
    }

    /// Block until the process is terminal. `extra_timeout` of zero waits forever, otherwise the
    /// wait gives up with [`SupervisorError::WaitTimeout`].
    pub fn wait_for(
        &self,
        name: &str,
        extra_timeout: Duration,
    ) -> Result<ManagedProcess, SupervisorError> {
        let started = Instant::now();
        loop {
            let process = self
                .inspect(name)
                .ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
            if process.status.is_terminal() {
                return Ok(process);
            }
            if !extra_timeout.is_zero() && started.elapsed() >= extra_timeout {
                return Err(SupervisorError::WaitTimeout {
                    name: name.to_string(),
                    waited: extra_timeout,
                });
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }
}
