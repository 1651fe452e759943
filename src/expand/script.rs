use std::path::{Path, PathBuf};

use tracing::info;

use crate::command::CommandModel;
use crate::error::ExpandError;

use super::SWITCH_SCRIPT;

/// Path named by `-script:path`.
pub fn script_path(command: &CommandModel) -> Result<PathBuf, ExpandError> {
    command
        .value_of(SWITCH_SCRIPT)
        .map(PathBuf::from)
        .ok_or(ExpandError::MissingScriptPath)
}

/// Each non-blank line of the script is one command, taken verbatim.
pub fn read_script(path: &Path) -> Result<Vec<CommandModel>, ExpandError> {
    if !path.is_file() {
        return Err(ExpandError::ScriptNotFound(path.to_path_buf()));
    }
    info!(script = %path.display(), "reading script lines");
    let text = std::fs::read_to_string(path).map_err(|source| ExpandError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut commands = Vec::new();
    for (number, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        info!(line_number = number + 1, script_line = line, "script line");
        commands.push(CommandModel::from_line(line));
    }
    info!(line_count = commands.len(), "end of script file");
    Ok(commands)
}
