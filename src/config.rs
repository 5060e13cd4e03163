//! Layered settings
//!
//! Built-in defaults, then a TOML file, then `MK5CTL_*` environment
//! variables. Command-line flags are applied on top by the binary.

use crate::device::SwitchPolicy;
use crate::workflow::{EraseMode, MIN_SAMPLE_INTERVAL};
use ::config::{Config, ConfigError, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of the environment variables read by [`Settings::load`]
pub const ENV_PREFIX: &str = "MK5CTL";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub address: String,
    pub port: u16,
    /// Connect timeout, and the longest wait for any reply
    #[serde(deserialize_with = "duration")]
    pub timeout: Duration,
    #[serde(deserialize_with = "duration")]
    pub sample_interval: Duration,
    pub condition: bool,
    pub rw_benchmark: bool,
    /// Show sizes in GB (10^9 bytes)
    pub gigabyte_units: bool,
    #[serde(deserialize_with = "duration")]
    pub bank_poll_interval: Duration,
    #[serde(deserialize_with = "duration")]
    pub bank_switch_deadline: Duration,
    /// Extra connection attempts while the device daemon is unreachable
    pub connect_retries: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            address: "localhost".to_string(),
            port: 2620,
            timeout: Duration::from_secs(5),
            sample_interval: Duration::from_secs(60),
            condition: false,
            rw_benchmark: false,
            gigabyte_units: false,
            bank_poll_interval: Duration::from_millis(100),
            bank_switch_deadline: Duration::from_secs(5),
            connect_retries: 0,
        }
    }
}

impl Settings {
    /// Load from `path`, or from the per-user config file when `path` is
    /// `None`. An explicit path must exist, the per-user file need not.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path).format(FileFormat::Toml));
            }
            None => {
                if let Some(default) = default_path() {
                    tracing::debug!(path = %default.display(), "Looking for configuration file");
                    builder = builder.add_source(
                        File::from(default)
                            .format(FileFormat::Toml)
                            .required(false),
                    );
                }
            }
        }

        let settings: Settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .build()?
            .try_deserialize()?;

        Ok(settings.normalized())
    }

    /// Raise a sampling cadence below the minimum
    pub fn normalized(mut self) -> Self {
        if self.sample_interval < MIN_SAMPLE_INTERVAL {
            tracing::warn!(
                requested = %humantime::format_duration(self.sample_interval),
                "Sample interval raised to {}",
                humantime::format_duration(MIN_SAMPLE_INTERVAL)
            );
            self.sample_interval = MIN_SAMPLE_INTERVAL;
        }
        self
    }

    pub fn erase_mode(&self) -> EraseMode {
        if self.rw_benchmark {
            EraseMode::ReadWriteBenchmark
        } else if self.condition {
            EraseMode::Condition
        } else {
            EraseMode::Quick
        }
    }

    pub fn switch_policy(&self) -> SwitchPolicy {
        SwitchPolicy {
            poll_interval: self.bank_poll_interval,
            deadline: self.bank_switch_deadline,
        }
    }
}

/// `<config dir>/mk5ctl/config.toml`
pub fn default_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "mk5ctl").map(|dirs| dirs.config_dir().join("config.toml"))
}

fn duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}
