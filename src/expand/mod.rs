//! Turn the model command into an ordered list of work units.
//!
//! `-batch` rewrites the model once per matching input file, `-script:path`
//! reads one command per line, and anything else is a single unit.

mod batch;
mod placeholders;
mod script;

use std::time::Duration;

use tracing::{error, info, warn};

use crate::command::CommandModel;
use crate::error::{BatchError, ExpandError};
use crate::functions::FunctionRegistry;
use crate::list::{AbortLimit, RunMode, WorkUnitList};
use crate::status::EXIT_STATUS_ABORTED;

pub const SWITCH_BATCH: &str = "batch";
pub const SWITCH_SCRIPT: &str = "script";

/// Which expansion a model command asks for. `-script` wins over `-batch`.
pub fn mode_of(command: &CommandModel) -> RunMode {
    if command.is_set(SWITCH_SCRIPT) {
        RunMode::Script
    } else if command.is_set(SWITCH_BATCH) {
        RunMode::Batch
    } else {
        RunMode::SingleEntry
    }
}

/// Build the work unit list for `command`.
///
/// Bad switch values are returned as errors. Expansion failures are logged and
/// leave an empty list whose status is "aborted"; an expansion that matches
/// nothing leaves an empty list whose status is "file not found".
pub fn expand(
    command: &CommandModel,
    registry: &FunctionRegistry,
    default_skip: Duration,
) -> Result<WorkUnitList, BatchError> {
    let abort_limit = AbortLimit::from_command(command)?;
    let mode = mode_of(command);
    let mut list = WorkUnitList::new(command.clone(), mode, abort_limit);

    let commands = match mode {
        RunMode::SingleEntry => Ok(vec![command.clone()]),
        RunMode::Batch => {
            let skip = batch::skip_interval(command, default_skip)?;
            batch::expand_batch(command, skip)
        }
        RunMode::Script => {
            script::script_path(command).and_then(|path| script::read_script(&path))
        }
    };

    match commands {
        Ok(commands) if commands.is_empty() => {
            warn!(?mode, "expansion produced no work units");
            list.mark_nothing_matched();
        }
        Ok(commands) => {
            for cmd in commands {
                list.add(cmd, registry);
            }
            info!(?mode, units = list.len(), "work units created");
        }
        Err(err) => {
            log_expand_error(&err);
            list.update_exit_status(EXIT_STATUS_ABORTED);
        }
    }
    Ok(list)
}

fn log_expand_error(err: &ExpandError) {
    error!(error = %err, "unable to expand the command into work units");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::{FileRole, FunctionSpec};
    use crate::status::{EXIT_STATUS_FILE_NOT_FOUND, EXIT_STATUS_ZERO};
    use std::fs;
    use std::path::PathBuf;

    fn registry() -> FunctionRegistry {
        FunctionRegistry::new(vec![
            FunctionSpec::new("write").layout([FileRole::Input, FileRole::Output]),
        ])
    }

    fn model(tokens: &[&str]) -> CommandModel {
        CommandModel::parse(tokens.iter().copied())
    }

    #[test]
    fn mode_selection() {
        assert_eq!(mode_of(&model(&["-write", "a", "b"])), RunMode::SingleEntry);
        assert_eq!(mode_of(&model(&["-write", "-batch", "*.csv"])), RunMode::Batch);
        assert_eq!(mode_of(&model(&["-script:x.txt"])), RunMode::Script);
    }

    #[test]
    fn single_entry_is_one_unit() {
        let list = expand(&model(&["-write", "a.csv", "a.x9"]), &registry(), Duration::ZERO).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list.mode(), RunMode::SingleEntry);
        assert_eq!(list.units()[0].function_name(), Some("write"));
        assert_eq!(list.exit_status(), EXIT_STATUS_ZERO);
    }

    #[test]
    fn bad_abort_limit_is_fatal() {
        let err = expand(&model(&["-write", "-aoe:0", "a", "b"]), &registry(), Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, BatchError::ZeroAbortLimit));
    }

    #[test]
    fn bad_skip_interval_is_fatal() {
        let err = expand(&model(&["-write", "-batch", "-skpi:x", "*.csv"]), &registry(), Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, BatchError::InvalidSkipInterval(_)));
    }

    #[test]
    fn nothing_matched_is_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let wild = format!("{}/*.csv", dir.path().display());
        let list = expand(&model(&["-write", "-batch", &wild]), &registry(), Duration::ZERO).unwrap();
        assert!(list.is_empty());
        assert!(list.nothing_matched());
        assert_eq!(list.exit_status(), EXIT_STATUS_FILE_NOT_FOUND);
    }

    #[test]
    fn missing_script_aborts_the_list() {
        let list = expand(&model(&["-script:/no/such/jobs.txt"]), &registry(), Duration::ZERO).unwrap();
        assert!(list.is_empty());
        assert_eq!(list.exit_status(), EXIT_STATUS_ABORTED);
    }

    #[test]
    fn script_lines_become_units() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("jobs.txt");
        fs::write(&script, "-write a.csv a.x9\n-write b.csv b.x9\n").unwrap();
        let arg = format!("-script:{}", script.display());

        let list = expand(&model(&[&arg]), &registry(), Duration::ZERO).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.units()[1].output_path(), Some(PathBuf::from("b.x9").as_path()));
    }
}
