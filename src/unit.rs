use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local};

use crate::command::CommandModel;
use crate::error::InvalidUnit;
use crate::functions::{Assignment, DispatchOutcome, FileSet, FunctionRegistry, ProcessingError};

/// Mutable part of a work unit, written only while the unit executes.
#[derive(Debug, Clone, Default)]
pub struct UnitState {
    /// `None` until the unit has been considered for execution.
    pub status: Option<i32>,
    pub started: Option<DateTime<Local>>,
    pub finished: Option<DateTime<Local>>,
    pub results: Vec<Vec<String>>,
    pub errors: Vec<ProcessingError>,
}

/// One resolved invocation: a function, its files, and its outcome.
#[derive(Debug)]
pub struct WorkUnit {
    index: usize,
    command: CommandModel,
    assignment: Result<Assignment, InvalidUnit>,
    state: Mutex<UnitState>,
}

impl WorkUnit {
    pub fn new(index: usize, command: CommandModel, registry: &FunctionRegistry) -> Self {
        let assignment = registry.assign(&command);
        Self {
            index,
            command,
            assignment,
            state: Mutex::new(UnitState::default()),
        }
    }

    /// Position in the owning list.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn command(&self) -> &CommandModel {
        &self.command
    }

    pub fn assignment(&self) -> Result<&Assignment, &InvalidUnit> {
        self.assignment.as_ref()
    }

    pub fn function_name(&self) -> Option<&str> {
        self.assignment.as_ref().ok().map(|a| a.function.as_str())
    }

    pub fn files(&self) -> Option<&FileSet> {
        self.assignment.as_ref().ok().map(|a| &a.files)
    }

    pub fn input_path(&self) -> Option<&Path> {
        self.files().and_then(|f| f.input.as_deref())
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.files().and_then(|f| f.output.as_deref())
    }

    pub fn results_path(&self) -> Option<&Path> {
        self.files().and_then(|f| f.results.as_deref())
    }

    fn lock(&self) -> MutexGuard<'_, UnitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> Option<i32> {
        self.lock().status
    }

    pub fn set_status(&self, status: i32) {
        self.lock().status = Some(status);
    }

    pub fn mark_started(&self) {
        let mut state = self.lock();
        state.started = Some(Local::now());
        state.finished = None;
    }

    /// Record the end time and terminal status.
    pub fn mark_finished(&self, status: i32) {
        let mut state = self.lock();
        state.finished = Some(Local::now());
        state.status = Some(status);
    }

    /// Copy result rows and processing errors produced by the function.
    pub fn record_outcome(&self, outcome: DispatchOutcome) {
        let mut state = self.lock();
        state.results.extend(outcome.results);
        state.errors.extend(outcome.errors);
    }

    pub fn was_started(&self) -> bool {
        self.lock().started.is_some()
    }

    /// Elapsed run time; zero when never started. An unfinished unit is measured
    /// up to now.
    pub fn duration(&self) -> Duration {
        let state = self.lock();
        let Some(started) = state.started else {
            return Duration::ZERO;
        };
        let finished = state.finished.unwrap_or_else(Local::now);
        (finished - started).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn results(&self) -> Vec<Vec<String>> {
        self.lock().results.clone()
    }

    pub fn result_row_count(&self) -> usize {
        self.lock().results.len()
    }

    pub fn processing_errors(&self) -> Vec<ProcessingError> {
        self.lock().errors.clone()
    }
}
