//! Error types for batchrun.
//!
//! Configuration errors are fatal to a run. Expansion errors abort the run but
//! are reported through the exit status. Unit-level errors never leave the unit
//! they belong to.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors in the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config at {path}: {reason}")]
    ReadFailed { path: PathBuf, reason: String },

    /// Failed to parse the configuration file.
    #[error("failed to parse config at {path}: {reason}")]
    ParseFailed { path: PathBuf, reason: String },

    /// A function has an empty command.
    #[error("function '{name}' must define a non-empty command")]
    EmptyCommand { name: String },

    /// A layout key is not a file count.
    #[error("function '{name}' has invalid layout key '{key}' (expected a file count)")]
    InvalidLayoutKey { name: String, key: String },

    /// A layout lists more roles than its key allows.
    #[error("function '{name}' layout '{key}' must list exactly {key} role(s)")]
    LayoutLengthMismatch { name: String, key: String },

    /// A role name is not one of the known file roles.
    #[error("function '{name}' references unknown file role '{role}'")]
    UnknownRole { name: String, role: String },

    /// Two functions share a name.
    #[error("function '{name}' is defined more than once")]
    DuplicateFunction { name: String },

    /// A scheduler limit is zero.
    #[error("scheduler setting '{setting}' must be greater than 0")]
    ZeroSchedulerLimit { setting: &'static str },
}

/// Errors that stop a run before any unit executes.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("aoe value '{0}' is not numeric")]
    InvalidAbortLimit(String),

    #[error("aoe value cannot be zero")]
    ZeroAbortLimit,

    #[error("threads value '{0}' is not numeric")]
    InvalidThreadCount(String),

    #[error("threads value {requested} exceeds the maximum of {maximum}")]
    ExcessiveThreadCount { requested: usize, maximum: usize },

    #[error("skpi value '{0}' is not numeric")]
    InvalidSkipInterval(String),
}

/// Errors while turning the model command into work units.
#[derive(Debug, Error)]
pub enum ExpandError {
    #[error("script file not found: {0}")]
    ScriptNotFound(PathBuf),

    #[error("-script requires a file name")]
    MissingScriptPath,

    #[error("batch input file is missing")]
    MissingBatchInput,

    #[error("input file/folder does not exist: {0}")]
    InputNotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid wildcard pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Why a unit's command line cannot be assigned to a function.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidUnit {
    #[error("no function found on the command line")]
    NoFunction,

    #[error("multiple function switches found on the command line: {0:?}")]
    MultipleFunctions(Vec<String>),

    #[error("function '{function}' does not accept {count} file(s) (allowed: {allowed:?})")]
    FileCount {
        function: String,
        count: usize,
        allowed: Vec<usize>,
    },
}

/// Errors raised while invoking a function for one unit.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("input file not found: {0}")]
    InputNotFound(PathBuf),

    #[error("function '{0}' has no command configured")]
    NoCommand(String),

    #[error("function '{function}' was terminated without an exit code")]
    Terminated { function: String },

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Errors that can occur during process execution.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Failed to spawn the process.
    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    /// The process timed out.
    #[error("process timed out after {0:?}")]
    Timeout(Duration),

    /// Failed to wait on the process.
    #[error("failed to wait on process: {0}")]
    WaitFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::EmptyCommand {
            name: "write".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "function 'write' must define a non-empty command"
        );
    }

    #[test]
    fn batch_error_display() {
        let err = BatchError::ExcessiveThreadCount {
            requested: 40,
            maximum: 12,
        };
        assert!(err.to_string().contains("40"));
        assert!(err.to_string().contains("12"));
        assert_eq!(BatchError::ZeroAbortLimit.to_string(), "aoe value cannot be zero");
    }

    #[test]
    fn expand_error_display() {
        let err = ExpandError::ScriptNotFound(PathBuf::from("jobs.txt"));
        assert!(err.to_string().contains("jobs.txt"));
    }

    #[test]
    fn invalid_unit_display() {
        let err = InvalidUnit::FileCount {
            function: "merge".to_string(),
            count: 3,
            allowed: vec![2],
        };
        assert!(err.to_string().contains("merge"));
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn process_error_display() {
        let err = ProcessError::SpawnFailed("not found".to_string());
        assert!(err.to_string().contains("spawn"));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn dispatch_error_wraps_process_error() {
        let err: DispatchError = ProcessError::Timeout(Duration::from_secs(5)).into();
        assert!(err.to_string().contains("timed out"));
    }
}
