use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use console::style;

use super::{CliContext, EXIT_FAILURE};
use crate::harness::{
    EnvironmentReport, SuiteConfig, TestRunner, check_environment, render_results,
};
use crate::prelude::*;

#[derive(Debug, Args)]
pub struct HarnessArgs {
    #[command(subcommand)]
    command: HarnessCommands,
}

#[derive(Debug, Subcommand)]
enum HarnessCommands {
    /// Run the tests of a suite
    ///
    /// Each test starts its publisher, captures what it publishes with the spy and compares the
    /// samples against the expected output.
    Run(RunArgs),
    /// List the tests of a suite
    List {
        /// Test suite YAML file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Check that the RTI Connext installation can be used
    CheckEnv,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Test suite YAML file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Only run this test. Can be given multiple times.
    #[arg(short, long = "test")]
    pub tests: Vec<String>,

    /// Domain to run on, instead of the suite's
    #[arg(short, long)]
    pub domain: Option<i64>,

    /// Keep the captured samples in this directory instead of a temporary one
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Print the results as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: HarnessArgs, context: &CliContext) -> Result<i32> {
    match args.command {
        HarnessCommands::Run(args) => run_suite(args, context),
        HarnessCommands::List { config } => {
            let suite = SuiteConfig::load(&config)?;
            print!("{}", render_test_list(&config, &suite));
            Ok(0)
        }
        HarnessCommands::CheckEnv => {
            let report = check_environment(context.config.nddshome().as_deref());
            print!("{}", render_environment(&report));
            if report.issues.is_empty() {
                Ok(0)
            } else {
                Ok(EXIT_FAILURE)
            }
        }
    }
}

fn run_suite(args: RunArgs, context: &CliContext) -> Result<i32> {
    let mut suite = SuiteConfig::load(&args.config)?;
    if let Some(domain) = args.domain {
        suite.domain_id = Some(domain);
    }
    let suite_dir = args
        .config
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let runner = TestRunner::new(suite, args.work_dir)?
        .with_suite_dir(suite_dir)
        .with_nddshome(context.config.nddshome())
        .with_supervisor(context.local_supervisor()?);
    debug!("Working in {}", runner.work_dir().display());

    let result = runner.run_all(&args.tests);
    runner.cleanup();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", render_results(&result));
    }
    Ok(if result.all_passed() { 0 } else { EXIT_FAILURE })
}

fn render_test_list(config: &Path, suite: &SuiteConfig) -> String {
    if suite.tests.is_empty() {
        return "No tests defined in configuration\n".to_string();
    }
    let mut out = format!("Tests in {}:\n\n", config.display());
    for test in &suite.tests {
        let _ = writeln!(out, "  {}", test.name);
        if !test.description.is_empty() {
            let _ = writeln!(out, "    {}", test.description);
        }
    }
    out
}

fn render_environment(report: &EnvironmentReport) -> String {
    let mut out = String::new();
    if let Some(nddshome) = &report.nddshome {
        let _ = writeln!(out, "NDDSHOME: {}", nddshome.display());
    }
    if let Some(rtiddsspy) = &report.rtiddsspy {
        let _ = writeln!(
            out,
            "{}",
            style(format!("rtiddsspy: {} ✓", rtiddsspy.display())).green()
        );
    }
    let _ = writeln!(out, "Available domain ID: {}", report.domain_id);

    out.push('\n');
    if report.issues.is_empty() {
        let _ = writeln!(out, "{}", style("Environment check passed ✓").green());
    } else {
        let _ = writeln!(out, "{}", style("Issues found:").red());
        for issue in &report.issues {
            let _ = writeln!(out, "  - {issue}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_test_list() {
        let suite: SuiteConfig = serde_yaml::from_str(
            r#"
tests:
  hello_world:
    description: HelloWorld publisher sends 10 samples
  vehicle:
"#,
        )
        .unwrap();

        insta::assert_snapshot!(render_test_list(Path::new("suite.yaml"), &suite), @r"
        Tests in suite.yaml:

          hello_world
            HelloWorld publisher sends 10 samples
          vehicle
        ");
        assert_eq!(
            render_test_list(Path::new("suite.yaml"), &SuiteConfig::default()),
            "No tests defined in configuration\n"
        );
    }

    #[test]
    fn test_render_environment() {
        console::set_colors_enabled(false);
        let report = EnvironmentReport {
            nddshome: Some(PathBuf::from("/opt/rti")),
            rtiddsspy: None,
            domain_id: 57,
            issues: vec!["rtiddsspy not found at /opt/rti/bin/rtiddsspy".to_string()],
        };

        insta::assert_snapshot!(render_environment(&report), @r"
        NDDSHOME: /opt/rti
        Available domain ID: 57

        Issues found:
          - rtiddsspy not found at /opt/rti/bin/rtiddsspy
        ");
    }

    #[test]
    fn test_run_suite_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("trace.txt"),
            "Sample received, count 1, topic \"Ping\"\n    seq: 1\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("ping.jsonl"),
            "{\"topic\": \"Ping\", \"sample_count\": 1, \"data\": {\"seq\": 1}}\n",
        )
        .unwrap();
        let config = dir.path().join("suite.yaml");
        std::fs::write(
            &config,
            format!(
                r#"
domain_id: 60
tests:
  ping:
    publisher:
      command: ["sleep", "30"]
      startup_delay: 0.1
    spy:
      command: ["cat", "{}"]
      timeout: 5
    validation:
      expected_output: ping.jsonl
"#,
                dir.path().join("trace.txt").display()
            ),
        )
        .unwrap();
        let context = CliContext {
            config: Default::default(),
            state_file: dir.path().join("state.json"),
        };
        let args = RunArgs {
            config,
            tests: Vec::new(),
            domain: None,
            work_dir: Some(dir.path().join("work")),
            json: true,
        };

        assert_eq!(run_suite(args, &context).unwrap(), 0);
        assert!(dir.path().join("work/ping_samples.jsonl").exists());
    }
}
