use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Local;
use regex::{Regex, RegexBuilder};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::command::{CommandModel, split_switch};
use crate::error::{BatchError, ExpandError};
use crate::list::{SWITCH_ABORT_ON_EXCEPTION, clean_path};
use crate::runner::SWITCH_THREADS;

use super::SWITCH_BATCH;
use super::placeholders::Placeholders;

pub const SWITCH_SKIP_INTERVAL: &str = "skpi";
const DIRECTORY_PATTERN: &str = "*.*";

/// Where batch files come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchInput {
    /// Recursively scan `folder` for names matching `pattern`.
    Folder { folder: PathBuf, pattern: String },
    /// A single existing file.
    File(PathBuf),
}

/// Idle time a file needs before it is picked up: `-skpi:N` seconds, or the default.
pub fn skip_interval(command: &CommandModel, default: Duration) -> Result<Duration, BatchError> {
    match command.value_of(SWITCH_SKIP_INTERVAL) {
        None => Ok(default),
        Some(value) => value
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| BatchError::InvalidSkipInterval(value.to_string())),
    }
}

/// Interpret the first positional file of the model as a folder, wildcard or file.
pub fn resolve_input(command: &CommandModel) -> Result<(String, BatchInput), ExpandError> {
    let spec = command
        .files()
        .first()
        .ok_or(ExpandError::MissingBatchInput)?;
    let text = spec.to_string_lossy().into_owned();

    let input = if spec.is_dir() {
        BatchInput::Folder {
            folder: spec.clone(),
            pattern: DIRECTORY_PATTERN.to_string(),
        }
    } else if text.contains('*') {
        let folder = match spec.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let pattern = spec
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| DIRECTORY_PATTERN.to_string());
        BatchInput::Folder { folder, pattern }
    } else if spec.is_file() {
        BatchInput::File(spec.clone())
    } else {
        return Err(ExpandError::InputNotFound(spec.clone()));
    };
    Ok((text, input))
}

/// Compile a `*` / `?` wildcard into an anchored regex. Matching ignores case
/// only where the file system does.
pub fn wildcard_regex(pattern: &str) -> Result<Regex, ExpandError> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            c => source.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    source.push('$');

    RegexBuilder::new(&source)
        .case_insensitive(cfg!(windows))
        .build()
        .map_err(|e| ExpandError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

/// Files under `folder` (recursively, sorted by name) whose name matches
/// `pattern` and that have been idle for at least `skip`.
pub fn enumerate(
    folder: &Path,
    pattern: &str,
    skip: Duration,
    now: SystemTime,
) -> Result<Vec<PathBuf>, ExpandError> {
    let matcher = wildcard_regex(pattern)?;
    let mut files = Vec::new();

    for entry in WalkDir::new(folder).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().unwrap_or(folder).to_path_buf();
                warn!(path = %path.display(), error = %err, "unreadable batch entry skipped");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !matcher.is_match(&name) {
            continue;
        }
        let modified = match entry
            .metadata()
            .map_err(std::io::Error::from)
            .and_then(|meta| meta.modified())
        {
            Ok(modified) => modified,
            Err(err) => {
                warn!(file = %entry.path().display(), error = %err, "batch file skipped; no modification time");
                continue;
            }
        };
        let idle = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if idle < skip {
            debug!(file = %entry.path().display(), ?idle, "file skipped; still active");
            continue;
        }
        files.push(entry.into_path());
    }
    Ok(files)
}

/// One rewritten command per matched file.
pub fn expand_batch(command: &CommandModel, skip: Duration) -> Result<Vec<CommandModel>, ExpandError> {
    let (spec_text, input) = resolve_input(command)?;
    let files = match &input {
        BatchInput::Folder { folder, pattern } => {
            let files = enumerate(folder, pattern, skip, SystemTime::now())?;
            info!(
                folder = %folder.display(),
                pattern = %pattern,
                file_count = files.len(),
                "batch input enumerated"
            );
            files
        }
        BatchInput::File(path) => vec![path.clone()],
    };

    Ok(files
        .iter()
        .enumerate()
        .map(|(i, file)| rewrite(command, &spec_text, &clean_path(file), i + 1))
        .collect())
}

/// Substitute the concrete file for the input spec, apply placeholders and
/// drop the switches that only steer the batch itself.
fn rewrite(command: &CommandModel, spec_text: &str, file: &Path, index: usize) -> CommandModel {
    let placeholders = Placeholders::new(file, index, Local::now());
    let file_text = file.to_string_lossy();

    let tokens = command
        .tokens()
        .iter()
        .filter(|token| !is_batch_directive(token))
        .map(|token| {
            let token = if spec_text.is_empty() {
                token.clone()
            } else {
                token.replace(spec_text, &file_text)
            };
            placeholders.apply(&token)
        });
    CommandModel::parse(tokens)
}

fn is_batch_directive(token: &str) -> bool {
    matches!(
        split_switch(token),
        Some((name, _)) if name == SWITCH_BATCH
            || name == SWITCH_THREADS
            || name == SWITCH_ABORT_ON_EXCEPTION
    )
}
