use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::prelude::*;
use nestify::nest;
use serde::{Deserialize, Serialize};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);
pub const DEFAULT_PROCESS_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_STATE_FILE: &str = "~/.dds-verify/process_state.json";

nest! {
    #[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]*
    #[serde(rename_all = "kebab-case", default)]*
    /// Persistent configuration for dds-verify.
    ///
    /// Stored at `~/.config/dds-verify/config.yaml` (following `XDG_CONFIG_HOME`). Every key is
    /// optional, command line flags and environment variables take precedence over it.
    pub struct DdsVerifyConfig {
        pub supervisor: pub struct SupervisorConfig {
            /// Where the process registry is persisted between invocations
            pub state_file: Option<String>,
            /// Time left to a process between SIGTERM and SIGKILL
            pub grace_period: Option<String>,
            /// Timeout applied to `process start` when `--timeout` is not given
            pub default_timeout: Option<String>,
        },
        pub spy: pub struct SpyConfig {
            /// RTI Connext installation, overrides `NDDSHOME`
            pub nddshome: Option<String>,
        },
        pub compare: pub struct CompareConfig {
            pub float_tolerance: Option<f64>,
        },
    }
}

/// Get the path to the configuration file, following the XDG Base Directory Specification
/// at https://specifications.freedesktop.org/basedir-spec/basedir-spec-latest.html
///
/// If config_name is None, returns ~/.config/dds-verify/config.yaml (default)
/// If config_name is Some, returns ~/.config/dds-verify/{config_name}.yaml
fn get_configuration_file_path(config_name: Option<&str>) -> Result<PathBuf> {
    let config_dir = match env::var("XDG_CONFIG_HOME") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => {
            let home = env::var("HOME").context("HOME env variable not set")?;
            PathBuf::from(home).join(".config")
        }
    };
    let config_dir = config_dir.join("dds-verify");

    Ok(match config_name {
        Some(name) => config_dir.join(format!("{name}.yaml")),
        None => config_dir.join("config.yaml"),
    })
}

/// Parse a duration string.
///
/// Supports humantime format: "1s", "500ms", "1.5s", "2m", "1h", etc.
/// Also supports pure numbers interpreted as seconds (e.g., "2" = 2s, "1.5" = 1.5s)
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();

    if let Ok(seconds) = s.parse::<f64>() {
        return Duration::try_from_secs_f64(seconds)
            .with_context(|| format!("Invalid duration: '{s}' seconds"));
    }

    humantime::parse_duration(s).with_context(|| {
        format!(
            "Invalid duration format: '{s}'. Expected format like '1s', '500ms', '2m', '1h' or a number in seconds"
        )
    })
}

/// Expand a leading `~` the way a shell would.
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

impl DdsVerifyConfig {
    /// Load the configuration. If it does not exist, return a default configuration.
    pub fn load(config_name: Option<&str>) -> Result<Self> {
        let config_path = get_configuration_file_path(config_name)?;
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        match fs::read(config_path) {
            Ok(config_str) => {
                let config: DdsVerifyConfig = serde_yaml::from_slice(&config_str).context(
                    format!("Failed to parse dds-verify config at {}", config_path.display()),
                )?;
                if let Some(tolerance) = config.compare.float_tolerance {
                    sample_shared::check_float_tolerance(tolerance).with_context(|| {
                        format!("Invalid dds-verify config at {}", config_path.display())
                    })?;
                }
                debug!("Config loaded from {}", config_path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Config file not found at {}", config_path.display());
                Ok(DdsVerifyConfig::default())
            }
            Err(e) => bail!("Failed to load config: {e}"),
        }
    }

    /// Resolve the state file, `state_file_override` coming from `--state-file` or
    /// `DDS_VERIFY_STATE_FILE`.
    pub fn state_file(&self, state_file_override: Option<&str>) -> PathBuf {
        let path = state_file_override
            .or(self.supervisor.state_file.as_deref())
            .unwrap_or(DEFAULT_STATE_FILE);
        expand_path(path)
    }

    pub fn grace_period(&self) -> Result<Duration> {
        self.supervisor
            .grace_period
            .as_deref()
            .map(parse_duration)
            .transpose()
            .map(|d| d.unwrap_or(DEFAULT_GRACE_PERIOD))
    }

    pub fn default_timeout(&self) -> Result<Duration> {
        self.supervisor
            .default_timeout
            .as_deref()
            .map(parse_duration)
            .transpose()
            .map(|d| d.unwrap_or(DEFAULT_PROCESS_TIMEOUT))
    }

    /// The RTI Connext installation: configuration first, then `NDDSHOME`.
    pub fn nddshome(&self) -> Option<PathBuf> {
        self.spy
            .nddshome
            .clone()
            .or_else(|| env::var("NDDSHOME").ok())
            .filter(|home| !home.is_empty())
            .map(|home| expand_path(&home))
    }

    pub fn float_tolerance(&self) -> f64 {
        self.compare
            .float_tolerance
            .unwrap_or(sample_shared::comparator::DEFAULT_FLOAT_TOLERANCE)
    }
}
