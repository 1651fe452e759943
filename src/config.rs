use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::functions::{FileRole, FunctionSpec};

pub const DEFAULT_CONFIG_FILE: &str = "batchrun.toml";
pub const DEFAULT_MAX_THREADS: usize = 12;
pub const DEFAULT_UNITS_PER_THREAD: usize = 6;
pub const DEFAULT_SKIP_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Default, Deserialize)]
struct RawScheduler {
    #[serde(default)]
    max_threads: Option<usize>,
    #[serde(default)]
    units_per_thread: Option<usize>,
    #[serde(default)]
    skip_interval: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawFunction {
    name: String,
    #[serde(default)]
    usage: Option<String>,
    #[serde(default)]
    command: Option<Vec<String>>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    collect_results: bool,
    #[serde(default)]
    layouts: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    derive: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    scheduler: RawScheduler,
    #[serde(default)]
    functions: Vec<RawFunction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

/// Limits applied by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Hard maximum accepted for `-threads:N`.
    pub max_threads: usize,
    /// Units each thread receives per iteration.
    pub units_per_thread: usize,
    /// Default idle time a batch input file needs before it is picked up.
    pub skip_interval: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_threads: DEFAULT_MAX_THREADS,
            units_per_thread: DEFAULT_UNITS_PER_THREAD,
            skip_interval: Duration::from_secs(DEFAULT_SKIP_INTERVAL_SECS),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub scheduler: SchedulerSettings,
    pub functions: Vec<FunctionSpec>,
}

impl Config {
    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(&input, path)
    }

    #[cfg(test)]
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        Self::parse(input, Path::new("<inline>"))
    }

    fn parse(input: &str, path: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(input).map_err(|e| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let scheduler = Self::convert_scheduler(raw.scheduler)?;

        let mut seen = HashSet::new();
        let mut functions = Vec::new();
        for raw_function in raw.functions {
            if !seen.insert(raw_function.name.to_ascii_lowercase()) {
                return Err(ConfigError::DuplicateFunction {
                    name: raw_function.name,
                });
            }
            functions.push(Self::convert_function(raw_function)?);
        }

        Ok(Config {
            scheduler,
            functions,
        })
    }

    fn convert_scheduler(raw: RawScheduler) -> Result<SchedulerSettings, ConfigError> {
        let defaults = SchedulerSettings::default();
        let max_threads = raw.max_threads.unwrap_or(defaults.max_threads);
        if max_threads == 0 {
            return Err(ConfigError::ZeroSchedulerLimit {
                setting: "max_threads",
            });
        }
        let units_per_thread = raw.units_per_thread.unwrap_or(defaults.units_per_thread);
        if units_per_thread == 0 {
            return Err(ConfigError::ZeroSchedulerLimit {
                setting: "units_per_thread",
            });
        }
        Ok(SchedulerSettings {
            max_threads,
            units_per_thread,
            skip_interval: raw
                .skip_interval
                .map(Duration::from_secs)
                .unwrap_or(defaults.skip_interval),
        })
    }

    fn convert_function(raw: RawFunction) -> Result<FunctionSpec, ConfigError> {
        let name = raw.name;

        let command = match raw.command {
            Some(cmd) => match cmd.split_first() {
                Some((program, args)) => Some(CommandSpec {
                    program: program.clone(),
                    args: args.to_vec(),
                }),
                None => return Err(ConfigError::EmptyCommand { name }),
            },
            None => None,
        };

        let parse_role = |role: &str| {
            role.parse::<FileRole>()
                .map_err(|role| ConfigError::UnknownRole {
                    name: name.clone(),
                    role,
                })
        };

        let mut spec = FunctionSpec::new(name.clone());
        for (key, roles) in &raw.layouts {
            let count: usize = key.trim().parse().map_err(|_| ConfigError::InvalidLayoutKey {
                name: name.clone(),
                key: key.clone(),
            })?;
            if roles.len() != count {
                return Err(ConfigError::LayoutLengthMismatch {
                    name: name.clone(),
                    key: key.clone(),
                });
            }
            let roles = roles
                .iter()
                .map(|role| parse_role(role.as_str()))
                .collect::<Result<Vec<_>, _>>()?;
            spec = spec.layout(roles);
        }

        for (role, template) in raw.derive {
            spec = spec.derive(parse_role(role.as_str())?, template);
        }
        if let Some(usage) = raw.usage {
            spec = spec.usage(usage);
        }

        spec.command = command;
        spec.env = raw.env;
        spec.timeout = raw.timeout.map(Duration::from_secs);
        spec.cwd = raw.cwd;
        spec.collect_results = raw.collect_results;
        Ok(spec)
    }
}
