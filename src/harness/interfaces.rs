use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

/// A suite of publisher verification tests, loaded from YAML.
///
/// ```yaml
/// domain_id: 57
/// tests:
///   hello_world:
///     description: HelloWorld publisher sends 10 samples
///     publisher:
///       command: ["python", "publisher.py", "--domain", "{DOMAIN_ID}"]
///       startup_delay: 2.0
///     spy:
///       topics: "HelloWorld*"
///       timeout: 15
///     validation:
///       expected_output: expected/hello_world.jsonl
///       min_samples: 10
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SuiteConfig {
    /// Picked automatically when absent
    #[serde(default)]
    pub domain_id: Option<i64>,
    /// In file order
    #[serde(default, deserialize_with = "ordered_tests")]
    pub tests: Vec<TestCase>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TestCase {
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub spy: SpyConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

/// A command line, either as a list of arguments or as a single shell-quoted string.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CommandSpec {
    Argv(Vec<String>),
    Line(String),
}

impl Default for CommandSpec {
    fn default() -> Self {
        CommandSpec::Argv(Vec::new())
    }
}

impl CommandSpec {
    pub fn to_argv(&self) -> Result<Vec<String>, shell_words::ParseError> {
        match self {
            CommandSpec::Argv(argv) => Ok(argv.clone()),
            CommandSpec::Line(line) => shell_words::split(line),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub command: CommandSpec,
    /// Seconds to wait before checking the publisher survived its startup
    pub startup_delay: f64,
    /// Seconds, zero for no timeout
    pub timeout: f64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            command: CommandSpec::default(),
            startup_delay: 2.0,
            timeout: 60.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SpyConfig {
    /// Topic glob
    pub topics: String,
    /// Seconds of capture
    pub timeout: f64,
    /// Monitor to run instead of `$NDDSHOME/bin/rtiddsspy`
    pub command: Option<CommandSpec>,
    pub qos_file: Option<String>,
    /// Stop capturing after this many samples, zero for no limit
    pub count: usize,
}

impl Default for SpyConfig {
    fn default() -> Self {
        Self {
            topics: "*".to_string(),
            timeout: 30.0,
            command: None,
            qos_file: None,
            count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub expected_output: String,
    pub min_samples: usize,
    pub float_tolerance: f64,
    pub ignore_fields: Vec<String>,
    pub order_independent: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            expected_output: String::new(),
            min_samples: 1,
            float_tolerance: sample_shared::comparator::DEFAULT_FLOAT_TOLERANCE,
            ignore_fields: Vec::new(),
            order_independent: false,
        }
    }
}

/// Seconds from the suite file as a duration, negative values being rejected.
pub(super) fn seconds(value: f64, what: &str) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| anyhow::anyhow!("Invalid {what}: {value} seconds"))
}

fn ordered_tests<'de, D>(deserializer: D) -> Result<Vec<TestCase>, D::Error>
where
    D: Deserializer<'de>,
{
    let mapping = serde_yaml::Mapping::deserialize(deserializer)?;
    mapping
        .into_iter()
        .map(|(key, value)| {
            let name = match key {
                serde_yaml::Value::String(name) => name,
                other => serde_yaml::to_string(&other)
                    .map(|name| name.trim().to_string())
                    .map_err(de::Error::custom)?,
            };
            let mut test: TestCase = match value {
                serde_yaml::Value::Null => TestCase::default(),
                value => serde_yaml::from_value(value)
                    .map_err(|e| de::Error::custom(format!("test '{name}': {e}")))?,
            };
            test.name = name;
            Ok(test)
        })
        .collect()
}

/// Outcome of one test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestResult {
    pub test_name: String,
    pub passed: bool,
    pub samples_captured: usize,
    pub samples_matched: usize,
    pub duration_seconds: f64,
    pub error: Option<String>,
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl TestResult {
    pub(super) fn failed(test_name: &str, error: impl Into<String>) -> Self {
        Self {
            test_name: test_name.to_string(),
            passed: false,
            samples_captured: 0,
            samples_matched: 0,
            duration_seconds: 0.0,
            error: Some(error.into()),
            details: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<TestResult>,
}

impl SuiteResult {
    pub fn from_results(results: Vec<TestResult>) -> Self {
        let passed = results.iter().filter(|result| result.passed).count();
        Self {
            total: results.len(),
            passed,
            failed: results.len() - passed,
            results,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}
