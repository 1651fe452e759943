use std::num::NonZeroUsize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;
use tracing::error;

use crate::command::CommandModel;
use crate::error::BatchError;
use crate::functions::{FunctionRegistry, ProcessingError};
use crate::status::{EXIT_STATUS_FILE_NOT_FOUND, ExitStatus};
use crate::unit::WorkUnit;

pub const SWITCH_ABORT_ON_EXCEPTION: &str = "aoe";

/// How many failed units a run tolerates before skipping the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortLimit {
    Unlimited,
    After(NonZeroUsize),
}

impl AbortLimit {
    /// `-aoe` absent: unlimited. `-aoe` alone: one. `-aoe:N`: N, which must be
    /// a positive integer.
    pub fn from_command(command: &CommandModel) -> Result<Self, BatchError> {
        if !command.is_set(SWITCH_ABORT_ON_EXCEPTION) {
            return Ok(AbortLimit::Unlimited);
        }
        let Some(value) = command.value_of(SWITCH_ABORT_ON_EXCEPTION) else {
            return Ok(AbortLimit::After(NonZeroUsize::MIN));
        };
        let count: usize = value
            .parse()
            .map_err(|_| BatchError::InvalidAbortLimit(value.to_string()))?;
        NonZeroUsize::new(count)
            .map(AbortLimit::After)
            .ok_or(BatchError::ZeroAbortLimit)
    }

    /// Whether a unit may still run after `abort_count` failures.
    pub fn permits(self, abort_count: usize) -> bool {
        match self {
            AbortLimit::Unlimited => true,
            AbortLimit::After(limit) => abort_count < limit.get(),
        }
    }
}

/// How the work units of a list were produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    SingleEntry,
    Batch,
    Script,
}

/// State shared by every worker executing units of one list.
#[derive(Debug)]
pub struct ListShared {
    abort_count: AtomicUsize,
    abort_limit: AbortLimit,
    exit_status: ExitStatus,
    total_bytes: AtomicU64,
    completed_bytes: AtomicU64,
}

impl ListShared {
    pub fn new(abort_limit: AbortLimit) -> Self {
        Self {
            abort_count: AtomicUsize::new(0),
            abort_limit,
            exit_status: ExitStatus::new(),
            total_bytes: AtomicU64::new(0),
            completed_bytes: AtomicU64::new(0),
        }
    }

    pub fn abort_limit(&self) -> AbortLimit {
        self.abort_limit
    }

    pub fn abort_count(&self) -> usize {
        self.abort_count.load(Ordering::SeqCst)
    }

    pub fn increment_abort_count(&self) -> usize {
        self.abort_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn update_exit_status(&self, status: i32) -> i32 {
        self.exit_status.update(status)
    }

    pub fn exit_status(&self) -> i32 {
        self.exit_status.get()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::SeqCst)
    }

    pub(crate) fn set_total_bytes(&self, bytes: u64) {
        self.total_bytes.store(bytes, Ordering::SeqCst);
        self.completed_bytes.store(0, Ordering::SeqCst);
    }

    /// Add a completed unit's bytes and return the running total.
    pub(crate) fn add_completed_bytes(&self, bytes: u64) -> u64 {
        self.completed_bytes.fetch_add(bytes, Ordering::SeqCst) + bytes
    }
}

/// Ordered work units of one run plus their shared counters.
#[derive(Debug)]
pub struct WorkUnitList {
    command: CommandModel,
    mode: RunMode,
    units: Vec<Arc<WorkUnit>>,
    shared: Arc<ListShared>,
    nothing_matched: AtomicBool,
}

impl WorkUnitList {
    pub fn new(command: CommandModel, mode: RunMode, abort_limit: AbortLimit) -> Self {
        Self {
            command,
            mode,
            units: Vec::new(),
            shared: Arc::new(ListShared::new(abort_limit)),
            nothing_matched: AtomicBool::new(false),
        }
    }

    /// The invoking (model) command line.
    pub fn command(&self) -> &CommandModel {
        &self.command
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Append a unit built from `command`; its position never changes.
    pub fn add(&mut self, command: CommandModel, registry: &FunctionRegistry) -> &Arc<WorkUnit> {
        let index = self.units.len();
        self.units
            .push(Arc::new(WorkUnit::new(index, command, registry)));
        &self.units[index]
    }

    pub fn units(&self) -> &[Arc<WorkUnit>] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn shared(&self) -> &Arc<ListShared> {
        &self.shared
    }

    pub fn exit_status(&self) -> i32 {
        self.shared.exit_status()
    }

    pub fn update_exit_status(&self, status: i32) -> i32 {
        self.shared.update_exit_status(status)
    }

    /// Flag an expansion that found no files. The run ends with "file not found".
    pub fn mark_nothing_matched(&self) {
        self.nothing_matched.store(true, Ordering::SeqCst);
        self.update_exit_status(EXIT_STATUS_FILE_NOT_FOUND);
    }

    pub fn nothing_matched(&self) -> bool {
        self.nothing_matched.load(Ordering::SeqCst)
    }

    /// Index of an earlier unit that already designates the same output file.
    pub fn output_claimed_earlier(&self, index: usize) -> Option<usize> {
        let output = self.units.get(index)?.output_path()?;
        let output = clean_path(output);
        let owner = self.units[..index].iter().position(|earlier| {
            earlier
                .output_path()
                .is_some_and(|path| clean_path(path) == output)
        })?;
        error!(
            index,
            owner,
            output = %output.display(),
            "duplicated output already created by an earlier work unit"
        );
        Some(owner)
    }

    /// Processing errors from all units, in list order.
    pub fn processing_errors(&self) -> Vec<ProcessingError> {
        self.units
            .iter()
            .flat_map(|unit| unit.processing_errors())
            .collect()
    }

    /// Sum of input file sizes; missing files count as zero.
    pub fn total_input_bytes(&self) -> u64 {
        self.units
            .iter()
            .filter_map(|unit| unit.input_path())
            .filter_map(|path| std::fs::metadata(path).ok())
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
            .sum()
    }
}

/// Lexically normalize a path: drop `.`, resolve `..` against earlier normal
/// parts. Leading `..` of a relative path are kept.
pub(crate) fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                // `..` directly under the root stays at the root.
                let last_is_normal =
                    matches!(out.components().next_back(), Some(Component::Normal(_)));
                if last_is_normal {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(comp.as_os_str()),
            Component::Normal(c) => out.push(c),
        }
    }
    out
}
