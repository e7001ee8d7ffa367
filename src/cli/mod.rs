mod capture;
mod compare;
mod harness;
mod parse;
mod process;

use std::path::PathBuf;

use crate::{
    VERSION,
    config::{DdsVerifyConfig, parse_duration},
    local_logger::{DDS_VERIFY_U8_COLOR_CODE, init_local_logger},
    prelude::*,
    supervisor::{ProcessSupervisor, SupervisorOptions},
};
use clap::{
    Parser, Subcommand,
    builder::{Styles, styling},
};

/// Exit status of a command that ran to completion but reports a negative outcome.
pub const EXIT_FAILURE: i32 = 1;

fn create_styles() -> Styles {
    styling::Styles::styled()
        .header(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .usage(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .literal(
            styling::Ansi256Color(DDS_VERIFY_U8_COLOR_CODE).on_default() | styling::Effects::BOLD,
        )
        .placeholder(styling::AnsiColor::Cyan.on_default())
}

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Supervise DDS test processes, capture what they publish and verify it",
    styles = create_styles()
)]
pub struct Cli {
    /// The configuration name to use
    /// If provided, the configuration will be loaded from ~/.config/dds-verify/{config-name}.yaml
    /// Otherwise, loads from ~/.config/dds-verify/config.yaml
    #[arg(long, env = "DDS_VERIFY_CONFIG_NAME", global = true)]
    pub config_name: Option<String>,

    /// State file of the process registry, shared between `process` invocations
    /// Defaults to ~/.dds-verify/process_state.json
    #[arg(long, env = "DDS_VERIFY_STATE_FILE", global = true)]
    pub state_file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compare captured samples against expected samples, both in JSONL
    Compare(compare::CompareArgs),
    /// Manage supervised processes with timeout enforcement
    #[command(alias = "p")]
    Process(process::ProcessArgs),
    /// Run rtiddsspy (or another monitor) and write the samples it sees as JSONL
    Capture(capture::CaptureArgs),
    /// Convert a saved spy trace to JSONL
    Parse(parse::ParseArgs),
    /// Run publisher verification tests described in a YAML suite
    Harness(harness::HarnessArgs),
}

/// What every command gets from the global flags and the configuration file.
pub(crate) struct CliContext {
    pub config: DdsVerifyConfig,
    pub state_file: PathBuf,
}

impl CliContext {
    /// A supervisor sharing its registry with other invocations through the state file.
    pub fn persistent_supervisor(&self) -> Result<ProcessSupervisor> {
        Ok(ProcessSupervisor::new(SupervisorOptions {
            state_file: Some(self.state_file.clone()),
            grace_period: self.config.grace_period()?,
        }))
    }

    /// A supervisor private to this invocation.
    pub fn local_supervisor(&self) -> Result<ProcessSupervisor> {
        Ok(ProcessSupervisor::new(SupervisorOptions {
            state_file: None,
            grace_period: self.config.grace_period()?,
        }))
    }
}

/// Durations on the command line: `500ms`, `2m`, or a number of seconds.
pub(crate) fn parse_duration_arg(value: &str) -> Result<std::time::Duration, String> {
    parse_duration(value).map_err(|e| format!("{e:#}"))
}

/// Parse the command line and run the command, returning the process exit status.
pub fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_local_logger()?;
    debug!("dds-verify v{VERSION}");

    let config = DdsVerifyConfig::load(cli.config_name.as_deref())?;
    let context = CliContext {
        state_file: config.state_file(cli.state_file.as_deref()),
        config,
    };
    debug!("Using state file {}", context.state_file.display());

    match cli.command {
        Commands::Compare(args) => compare::run(args, &context),
        Commands::Process(args) => process::run(args, &context),
        Commands::Capture(args) => capture::run(args, &context),
        Commands::Parse(args) => parse::run(args),
        Commands::Harness(args) => harness::run(args, &context),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_from_env() {
        temp_env::with_vars(
            [
                ("DDS_VERIFY_STATE_FILE", Some("/tmp/state.json")),
                ("DDS_VERIFY_CONFIG_NAME", Some("lab")),
            ],
            || {
                let cli = Cli::parse_from(["dds-verify", "process", "cleanup"]);
                assert_eq!(cli.state_file.as_deref(), Some("/tmp/state.json"));
                assert_eq!(cli.config_name.as_deref(), Some("lab"));
            },
        );
    }

    #[test]
    fn test_flag_overrides_env() {
        temp_env::with_var("DDS_VERIFY_STATE_FILE", Some("/tmp/state.json"), || {
            let cli = Cli::parse_from([
                "dds-verify",
                "process",
                "status",
                "--state-file",
                "/tmp/other.json",
            ]);
            assert_eq!(cli.state_file.as_deref(), Some("/tmp/other.json"));
        });
    }
}
