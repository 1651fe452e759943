//! Per-run logging. A run carries its own `tracing::Dispatch` instead of
//! installing a global subscriber, so several runs can coexist in one process.

use std::fs::{self, File};
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Local;
use tracing::Dispatch;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::command::CommandModel;

pub const SWITCH_DEBUG: &str = "debug";
pub const SWITCH_LOG_FOLDER: &str = "log";
pub const SWITCH_CONSOLE_OFF: &str = "consoleOff";

/// Logging switches taken from the model command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub debug: bool,
    pub console: bool,
    pub folder: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            debug: false,
            console: true,
            folder: None,
        }
    }
}

impl LogSettings {
    pub fn from_command(command: &CommandModel, quiet: bool) -> Self {
        Self {
            debug: command.is_set(SWITCH_DEBUG),
            console: !quiet && !command.is_set(SWITCH_CONSOLE_OFF),
            folder: command.value_of(SWITCH_LOG_FOLDER).map(PathBuf::from),
        }
    }

    fn default_level(&self) -> &'static str {
        if self.debug { "debug" } else { "info" }
    }
}

/// The subscriber a run logs through, plus the log file it writes (if any).
#[derive(Clone)]
pub struct LogContext {
    dispatch: Dispatch,
    log_file: Option<PathBuf>,
}

impl LogContext {
    /// Assemble a subscriber from `settings`. `RUST_LOG` overrides the level.
    pub fn build(settings: &LogSettings) -> io::Result<Self> {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(settings.default_level()));

        let console = settings
            .console
            .then(|| fmt::layer().with_writer(io::stderr).with_target(false));

        let (file_layer, log_file) = match &settings.folder {
            Some(folder) => {
                fs::create_dir_all(folder)?;
                let path = folder.join(log_file_name());
                let file = File::create(&path)?;
                let layer = fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file));
                (Some(layer), Some(path))
            }
            None => (None, None),
        };

        let subscriber = tracing_subscriber::registry()
            .with(console)
            .with(file_layer)
            .with(filter);

        Ok(Self {
            dispatch: Dispatch::new(subscriber),
            log_file,
        })
    }

    /// A context that discards everything.
    pub fn disabled() -> Self {
        Self {
            dispatch: Dispatch::none(),
            log_file: None,
        }
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    pub fn log_file(&self) -> Option<&PathBuf> {
        self.log_file.as_ref()
    }
}

impl std::fmt::Debug for LogContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogContext")
            .field("log_file", &self.log_file)
            .finish_non_exhaustive()
    }
}

/// `batchrun_YYYYMMDD_HHMMSS.log`
fn log_file_name() -> String {
    format!("batchrun_{}.log", Local::now().format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_from_switches() {
        let cmd = CommandModel::parse(["-write", "-debug", "-consoleOff", "-log:logs"]);
        let settings = LogSettings::from_command(&cmd, false);
        assert!(settings.debug);
        assert!(!settings.console);
        assert_eq!(settings.folder, Some(PathBuf::from("logs")));

        let settings = LogSettings::from_command(&CommandModel::parse(["-write"]), false);
        assert_eq!(settings, LogSettings::default());
    }

    #[test]
    fn quiet_turns_console_off() {
        let settings = LogSettings::from_command(&CommandModel::parse(["-write"]), true);
        assert!(!settings.console);
    }

    #[test]
    fn log_file_name_format() {
        let name = log_file_name();
        assert!(name.starts_with("batchrun_"));
        assert!(name.ends_with(".log"));
        assert_eq!(name.len(), "batchrun_20240101_120000.log".len());
    }

    #[test]
    fn file_layer_writes_to_folder() {
        let dir = tempfile::tempdir().unwrap();
        let settings = LogSettings {
            debug: false,
            console: false,
            folder: Some(dir.path().join("logs")),
        };
        let ctx = LogContext::build(&settings).unwrap();
        let path = ctx.log_file().cloned().unwrap();

        tracing::dispatcher::with_default(ctx.dispatch(), || {
            tracing::info!(unit = 3, "hello from the batch");
        });

        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("hello from the batch"));
        assert!(text.contains("unit=3"));
    }
}
