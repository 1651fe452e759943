//! The scheduler: expands a model command, runs its units sequentially or in
//! bounded iterations on a worker pool, and reduces everything to one status.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc::Sender;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{error, info, warn};

use crate::command::CommandModel;
use crate::config::{Config, SchedulerSettings};
use crate::error::BatchError;
use crate::expand;
use crate::functions::{FunctionDispatcher, FunctionRegistry};
use crate::list::{RunMode, WorkUnitList};
use crate::logging::LogContext;
use crate::pool::Pool;
use crate::progress::ProgressEvent;
use crate::results::{self, CombinedResults};
use crate::status::{self, EXIT_STATUS_ABORTED, EXIT_STATUS_FILE_NOT_FOUND, EXIT_STATUS_ZERO};
use crate::unit::WorkUnit;

mod execution;
mod process_runner;
mod selection;

pub use process_runner::ProcessDispatcher;

use execution::UnitContext;

pub const SWITCH_THREADS: &str = "threads";

/// A model command turned into work units, with its execution mode decided.
#[derive(Debug)]
pub struct PreparedRun {
    pub list: WorkUnitList,
    /// `None` runs the units one after another.
    pub threads: Option<usize>,
}

/// Outcome of one unit, as reported after the run.
#[derive(Debug, Clone, Serialize)]
pub struct UnitSummary {
    pub index: usize,
    pub function: Option<String>,
    pub command: String,
    pub status: Option<i32>,
    pub started: bool,
    pub duration_ms: u128,
    pub result_rows: usize,
}

impl UnitSummary {
    fn from_unit(unit: &WorkUnit) -> Self {
        Self {
            index: unit.index(),
            function: unit.function_name().map(str::to_string),
            command: unit.command().to_string(),
            status: unit.status(),
            started: unit.was_started(),
            duration_ms: unit.duration().as_millis(),
            result_rows: unit.result_row_count(),
        }
    }
}

/// Everything known about a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub mode: RunMode,
    pub threads: Option<usize>,
    pub exit_status: i32,
    pub iterations: usize,
    pub monitor_status: i32,
    pub elapsed_secs: f64,
    pub threading_benefit: f64,
    pub nothing_matched: bool,
    pub cancelled: bool,
    pub units: Vec<UnitSummary>,
    pub processing_errors: Vec<String>,
    pub results: Option<CombinedResults>,
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default)]
struct MonitorStats {
    iterations: usize,
    monitor_status: i32,
}

pub struct Scheduler {
    registry: Arc<FunctionRegistry>,
    settings: SchedulerSettings,
    dispatcher: Arc<dyn FunctionDispatcher>,
    log: LogContext,
    progress: Option<Sender<ProgressEvent>>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        registry: Arc<FunctionRegistry>,
        settings: SchedulerSettings,
        dispatcher: Arc<dyn FunctionDispatcher>,
    ) -> Self {
        Self {
            registry,
            settings,
            dispatcher,
            log: LogContext::disabled(),
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    /// A scheduler whose functions run the external commands named in `config`.
    /// Relative working directories resolve against `root`.
    pub fn from_config(config: Config, root: &Path) -> Self {
        let registry = Arc::new(FunctionRegistry::new(config.functions));
        let dispatcher = Arc::new(ProcessDispatcher::new(registry.clone(), root));
        Self::new(registry, config.scheduler, dispatcher)
    }

    pub fn with_log(mut self, log: LogContext) -> Self {
        self.log = log;
        self
    }

    pub fn with_progress(mut self, progress: Sender<ProgressEvent>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Cancelling this token stops dispatch; units not yet started end aborted.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Validate the model's switches and expand it into work units. Only bad
    /// switch values are errors; expansion problems end up in the list status.
    pub fn prepare(&self, command: &CommandModel) -> Result<PreparedRun, BatchError> {
        tracing::dispatcher::with_default(self.log.dispatch(), || -> Result<PreparedRun, BatchError> {
            info!(command = %command, "preparing run");
            let threads = selection::thread_count(command, &self.settings)?;
            let list = expand::expand(command, &self.registry, self.settings.skip_interval)?;
            Ok(PreparedRun { list, threads })
        })
    }

    /// Run every unit and reduce the outcome. Never fails.
    pub async fn execute(&self, run: PreparedRun) -> RunSummary {
        self.execute_inner(run)
            .with_subscriber(self.log.dispatch().clone())
            .await
    }

    /// `prepare` followed by `execute`.
    pub async fn launch(&self, command: &CommandModel) -> Result<RunSummary, BatchError> {
        let run = self.prepare(command)?;
        Ok(self.execute(run).await)
    }

    async fn execute_inner(&self, run: PreparedRun) -> RunSummary {
        let PreparedRun { list, threads } = run;
        let started = Instant::now();
        list.shared().set_total_bytes(list.total_input_bytes());

        let ctx = UnitContext {
            shared: list.shared().clone(),
            registry: self.registry.clone(),
            dispatcher: self.dispatcher.clone(),
            progress: self.progress.clone(),
            cancel: self.cancel.clone(),
        };

        let stats = match threads {
            Some(threads) => self.run_threaded(&list, threads, &ctx).await,
            None => self.run_sequential(&list, &ctx).await,
        };

        let elapsed = started.elapsed();
        let total: Duration = list.units().iter().map(|unit| unit.duration()).sum();
        let benefit = threading_benefit(total, elapsed);

        let combined = results::write_combined(&list);
        let summary = self.summarize(&list, threads, stats, elapsed, benefit, combined);

        if let Some(tx) = self.progress.as_ref() {
            let _ = tx
                .send(ProgressEvent::Done {
                    exit_status: summary.exit_status,
                })
                .await;
        }
        summary
    }

    async fn run_sequential(&self, list: &WorkUnitList, ctx: &UnitContext) -> MonitorStats {
        let pool = Pool::with_cancel(1, self.cancel.clone());
        for unit in list.units() {
            let status = if list.output_claimed_earlier(unit.index()).is_some() {
                unit.set_status(EXIT_STATUS_ABORTED);
                EXIT_STATUS_ABORTED
            } else {
                let handle = self.spawn_unit(&pool, unit, ctx);
                join_status(unit, ctx, handle.await)
            };
            list.update_exit_status(status);
        }
        MonitorStats {
            iterations: usize::from(!list.is_empty()),
            monitor_status: list.exit_status(),
        }
    }

    async fn run_threaded(
        &self,
        list: &WorkUnitList,
        threads: usize,
        ctx: &UnitContext,
    ) -> MonitorStats {
        let pool = Pool::with_cancel(threads, self.cancel.clone());
        let max_per_iteration = threads * self.settings.units_per_thread;
        let mut pending: VecDeque<Arc<WorkUnit>> = list.units().iter().cloned().collect();
        let mut stats = MonitorStats::default();

        while !pending.is_empty() {
            if pool.is_cancelled() {
                warn!(remaining = pending.len(), "run cancelled; remaining work units aborted");
                for unit in pending.drain(..) {
                    unit.set_status(EXIT_STATUS_ABORTED);
                }
                break;
            }

            let chunk = selection::next_chunk(list, &mut pending, max_per_iteration);
            if chunk.is_empty() {
                continue;
            }
            stats.iterations += 1;
            info!(
                iteration = stats.iterations,
                processing = chunk.units.len(),
                collided = chunk.collided,
                remaining = pending.len(),
                maximum_thread_count = pool.capacity(),
                "iteration started"
            );

            let handles: Vec<_> = chunk
                .units
                .iter()
                .map(|unit| (unit.clone(), self.spawn_unit(&pool, unit, ctx)))
                .collect();

            if let Some(tx) = self.progress.as_ref() {
                let _ = tx
                    .send(ProgressEvent::IterationStarted {
                        iteration: stats.iterations,
                        units: handles.len(),
                        pool: pool.stats(),
                    })
                    .await;
            }

            let mut iteration_status = EXIT_STATUS_ZERO;
            for (unit, handle) in handles {
                let status = join_status(&unit, ctx, handle.await);
                iteration_status = status::fold(iteration_status, status);
            }
            stats.monitor_status = status::fold(stats.monitor_status, iteration_status);
        }

        list.update_exit_status(status::fold_all(
            list.units()
                .iter()
                .map(|unit| unit.status().unwrap_or(EXIT_STATUS_ABORTED)),
        ));

        info!(
            iteration_count = stats.iterations,
            total_entries = list.len(),
            maximum_thread_count = threads,
            monitor_status = stats.monitor_status,
            exit_status = list.exit_status(),
            "thread monitor completed"
        );
        stats
    }

    fn spawn_unit(&self, pool: &Pool, unit: &Arc<WorkUnit>, ctx: &UnitContext) -> JoinHandle<i32> {
        let task = execution::execute_unit(unit.clone(), ctx.clone());
        pool.spawn(task.with_subscriber(self.log.dispatch().clone()))
    }

    fn summarize(
        &self,
        list: &WorkUnitList,
        threads: Option<usize>,
        stats: MonitorStats,
        elapsed: Duration,
        benefit: f64,
        results: Option<CombinedResults>,
    ) -> RunSummary {
        let units: Vec<UnitSummary> = list
            .units()
            .iter()
            .map(|unit| UnitSummary::from_unit(unit))
            .collect();

        for unit in units.iter().filter(|unit| unit.started) {
            info!(
                index = unit.index,
                status = unit.status,
                duration_ms = unit.duration_ms as u64,
                command = %unit.command,
                "work unit summary"
            );
        }

        let processing_errors: Vec<String> = list
            .processing_errors()
            .iter()
            .map(ToString::to_string)
            .collect();
        if !processing_errors.is_empty() {
            warn!(count = processing_errors.len(), "processing errors encountered");
            for message in &processing_errors {
                warn!(error = %message, "processing error");
            }
        }

        let exit_status = list.exit_status();
        info!(
            model = %list.command(),
            mode = ?list.mode(),
            units = list.len(),
            exit_status,
            elapsed_secs = elapsed.as_secs_f64(),
            threading_benefit = benefit,
            "batch completed"
        );

        RunSummary {
            mode: list.mode(),
            threads,
            exit_status,
            iterations: stats.iterations,
            monitor_status: stats.monitor_status,
            elapsed_secs: elapsed.as_secs_f64(),
            threading_benefit: benefit,
            nothing_matched: list.nothing_matched(),
            cancelled: self.cancel.is_cancelled(),
            units,
            processing_errors,
            results,
            log_file: self.log.log_file().cloned(),
        }
    }
}

/// Status of a joined unit task. A task that panicked or was cancelled counts
/// as a failure with "file not found".
fn join_status(unit: &WorkUnit, ctx: &UnitContext, joined: Result<i32, JoinError>) -> i32 {
    match joined {
        Ok(status) => status,
        Err(err) => {
            error!(index = unit.index(), error = %err, "work unit task terminated abnormally");
            unit.mark_finished(EXIT_STATUS_FILE_NOT_FOUND);
            ctx.shared.increment_abort_count();
            EXIT_STATUS_FILE_NOT_FOUND
        }
    }
}

/// Sum of unit run times over wall-clock time; zero when no time elapsed.
pub fn threading_benefit(total: Duration, elapsed: Duration) -> f64 {
    if elapsed.is_zero() {
        0.0
    } else {
        total.as_secs_f64() / elapsed.as_secs_f64()
    }
}
