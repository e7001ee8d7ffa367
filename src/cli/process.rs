use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use console::style;
use tabled::settings::object::Columns;
use tabled::settings::{Alignment, Modify, Style};
use tabled::{Table, Tabled};

use super::{CliContext, EXIT_FAILURE, parse_duration_arg};
use crate::prelude::*;
use crate::supervisor::{
    LaunchRequest, ManagedProcess, ProcessRecord, ProcessStatus, ProcessSupervisor,
};

#[derive(Debug, Args)]
pub struct ProcessArgs {
    #[command(subcommand)]
    command: ProcessCommands,
}

#[derive(Debug, Subcommand)]
enum ProcessCommands {
    /// Start a process and print its PID
    ///
    /// Without `--wait` the process is left running on its own once this command returns: its
    /// timeout is only enforced and its output only captured while dds-verify waits for it.
    Start(StartArgs),
    /// Show the status of one or every process
    Status {
        /// Only show this process
        #[arg(short, long)]
        name: Option<String>,
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the captured output of a process
    Logs {
        #[arg(short, long)]
        name: String,
        /// Show stderr instead of stdout
        #[arg(long)]
        stderr: bool,
        /// Only show the last N lines
        #[arg(short, long, default_value_t = 0)]
        tail: usize,
    },
    /// Stop a process: SIGTERM, then SIGKILL after the grace period
    Kill {
        #[arg(short, long)]
        name: String,
        /// Send SIGKILL right away
        #[arg(short, long)]
        force: bool,
    },
    /// Stop every process and forget about them
    Cleanup,
    /// Wait for a process to finish, exiting with its exit code
    Wait {
        #[arg(short, long)]
        name: String,
        /// Give up after this long, e.g. `30s`. Waits until the process ends by default.
        #[arg(short, long, value_parser = parse_duration_arg)]
        timeout: Option<Duration>,
    },
}

#[derive(Debug, Args)]
pub struct StartArgs {
    /// Unique name of the process
    #[arg(short, long)]
    pub name: String,

    /// Kill the process after this long, e.g. `90s`, `2m` or a number of seconds. `0` disables
    /// the timeout. Defaults to the configured timeout, 60s when not configured.
    #[arg(short, long, value_parser = parse_duration_arg)]
    pub timeout: Option<Duration>,

    /// Working directory of the process
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Extra environment variable, as `KEY=VALUE`. Can be given multiple times.
    #[arg(long = "env", value_parser = parse_env_var)]
    pub env: Vec<(String, String)>,

    /// Stay attached until the process ends, then exit like `process wait`
    #[arg(long)]
    pub wait: bool,

    /// The command to run, after `--`
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

fn parse_env_var(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{value}'")),
    }
}

pub fn run(args: ProcessArgs, context: &CliContext) -> Result<i32> {
    let supervisor = context.persistent_supervisor()?;

    match args.command {
        ProcessCommands::Start(args) => {
            let default_timeout = context.config.default_timeout()?;
            start(&supervisor, args, default_timeout)
        }
        ProcessCommands::Status { name, json } => {
            status(&supervisor, name.as_deref(), json)?;
            Ok(0)
        }
        ProcessCommands::Logs { name, stderr, tail } => {
            let output = supervisor
                .output(&name)
                .with_context(|| format!("Process '{name}' not found"))?;
            let lines = if stderr { output.stderr } else { output.stdout };
            let start = if tail > 0 {
                lines.len().saturating_sub(tail)
            } else {
                0
            };
            for line in &lines[start..] {
                println!("{line}");
            }
            Ok(0)
        }
        ProcessCommands::Kill { name, force } => {
            if !supervisor.terminate(&name, force) {
                bail!("Could not kill process '{name}' (not found or not running)");
            }
            info!("Killed process '{name}'");
            Ok(0)
        }
        ProcessCommands::Cleanup => {
            let cleaned = supervisor.reclaim_all();
            if cleaned.is_empty() {
                info!("No processes to clean up");
            } else {
                info!(
                    "Cleaned up {} process(es): {}",
                    cleaned.len(),
                    cleaned.join(", ")
                );
            }
            Ok(0)
        }
        ProcessCommands::Wait { name, timeout } => {
            let process = supervisor.wait_for(&name, timeout.unwrap_or(Duration::ZERO))?;
            Ok(report_finished(&process))
        }
    }
}

fn start(
    supervisor: &ProcessSupervisor,
    args: StartArgs,
    default_timeout: Duration,
) -> Result<i32> {
    let timeout = args.timeout.unwrap_or(default_timeout);
    let mut request = LaunchRequest::new(&args.name, args.command).timeout(timeout);
    request.cwd = args.cwd;
    request.env = args.env.into_iter().collect::<BTreeMap<_, _>>();

    let process = supervisor.launch(request)?;
    let Some(pid) = process.pid else {
        bail!(
            "Failed to start process '{}': {}",
            process.name,
            process.error_message.as_deref().unwrap_or("unknown error")
        );
    };

    println!("{pid}");
    info!("Started process '{}' with PID {pid}", process.name);
    debug!("Command: {}", process.command_line());
    if timeout.is_zero() {
        info!("Timeout: none");
    } else {
        info!("Timeout: {}", humantime::format_duration(timeout));
    }

    if !args.wait {
        return Ok(0);
    }
    let process = supervisor.wait_for(&process.name, Duration::ZERO)?;
    Ok(report_finished(&process))
}

/// Log how the process ended and turn it into an exit status: 0 when it completed, its own exit
/// code when it failed with one, 1 otherwise.
fn report_finished(process: &ManagedProcess) -> i32 {
    info!(
        "Process '{}' finished with status: {}",
        process.name, process.status
    );
    if let Some(exit_code) = process.exit_code {
        info!("Exit code: {exit_code}");
    }
    if let Some(error) = &process.error_message {
        warn!("{error}");
    }
    wait_exit_code(process)
}

pub(crate) fn wait_exit_code(process: &ManagedProcess) -> i32 {
    match (process.status, process.exit_code) {
        (ProcessStatus::Completed, _) => 0,
        (ProcessStatus::Errored, Some(code)) if code > 0 => code,
        _ => EXIT_FAILURE,
    }
}

fn status(supervisor: &ProcessSupervisor, name: Option<&str>, json: bool) -> Result<()> {
    let processes = match name {
        Some(name) => vec![
            supervisor
                .inspect(name)
                .with_context(|| format!("Process '{name}' not found"))?,
        ],
        None => supervisor.list_all(),
    };

    if json {
        let records: Vec<ProcessRecord> = processes.iter().map(ProcessRecord::from).collect();
        let rendered = match (name, records.as_slice()) {
            (Some(_), [record]) => serde_json::to_string_pretty(record)?,
            _ => serde_json::to_string_pretty(&records)?,
        };
        println!("{rendered}");
        return Ok(());
    }

    match processes.as_slice() {
        [] => println!("No managed processes"),
        [process] if name.is_some() => print!("{}", render_process(process)),
        _ => println!("{}", render_process_table(&processes)),
    }
    Ok(())
}

fn status_style(status: ProcessStatus) -> console::Style {
    let style = console::Style::new();
    match status {
        ProcessStatus::Running => style.green(),
        ProcessStatus::Completed => style.blue(),
        ProcessStatus::TimedOut | ProcessStatus::Killed => style.yellow(),
        ProcessStatus::Errored => style.red(),
        ProcessStatus::Pending => style.white(),
    }
}

fn render_process(process: &ManagedProcess) -> String {
    let mut out = String::new();
    let pid = process
        .pid
        .map_or_else(|| "N/A".to_string(), |pid| pid.to_string());
    let _ = writeln!(out, "Name: {}", process.name);
    let _ = writeln!(out, "  PID: {pid}");
    let _ = writeln!(
        out,
        "  Status: {}",
        status_style(process.status).apply_to(process.status)
    );
    let _ = writeln!(out, "  Command: {}", process.command_line());
    if let Some(elapsed) = process.elapsed() {
        let _ = writeln!(out, "  Elapsed: {elapsed:.2}s");
    }
    if let Some(exit_code) = process.exit_code {
        let _ = writeln!(out, "  Exit code: {exit_code}");
    }
    if let Some(error) = &process.error_message {
        let _ = writeln!(out, "  Error: {}", style(error).red());
    }
    let _ = writeln!(out, "  Stdout lines: {}", process.stdout_lines.len());
    let _ = writeln!(out, "  Stderr lines: {}", process.stderr_lines.len());
    out
}

#[derive(Tabled)]
struct ProcessRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "PID")]
    pid: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Elapsed")]
    elapsed: String,
    #[tabled(rename = "Exit code")]
    exit_code: String,
    #[tabled(rename = "Command")]
    command: String,
}

fn render_process_table(processes: &[ManagedProcess]) -> String {
    let dash = || "-".to_string();
    let rows: Vec<ProcessRow> = processes
        .iter()
        .map(|process| ProcessRow {
            name: process.name.clone(),
            pid: process.pid.map_or_else(dash, |pid| pid.to_string()),
            status: process.status.to_string(),
            elapsed: process
                .elapsed()
                .map_or_else(dash, |elapsed| format!("{elapsed:.2}s")),
            exit_code: process.exit_code.map_or_else(dash, |code| code.to_string()),
            command: process.command_line(),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..2)).with(Alignment::right()));
    table.to_string()
}
