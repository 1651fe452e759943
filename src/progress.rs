use std::time::Duration;

use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::instrument::WithSubscriber;
use tracing::{Dispatch, info};

use crate::pool::PoolStats;

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A unit has been handed to a worker.
    UnitStarted { index: usize, function: String },
    /// A unit has finished, successfully or not.
    UnitFinished {
        index: usize,
        status: i32,
        duration: Duration,
        completed_bytes: u64,
        total_bytes: u64,
    },
    /// A threaded iteration has been built and submitted.
    IterationStarted {
        iteration: usize,
        units: usize,
        pool: PoolStats,
    },
    /// All work is done.
    Done { exit_status: i32 },
}

/// Percentage of input bytes processed; `None` when there is nothing to measure.
pub fn percent_complete(completed: u64, total: u64) -> Option<u64> {
    (total > 0).then(|| completed.saturating_mul(100) / total)
}

/// Start a task that logs progress events through `dispatch`.
pub fn spawn_reporter(dispatch: Dispatch) -> (Sender<ProgressEvent>, JoinHandle<usize>) {
    let (tx, rx) = mpsc::channel(100);
    let handle = tokio::spawn(report(rx).with_subscriber(dispatch));
    (tx, handle)
}

/// Consume events until every sender is dropped; returns the finished-unit count.
async fn report(mut rx: Receiver<ProgressEvent>) -> usize {
    let mut finished = 0;
    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::UnitStarted { index, function } => {
                info!(index, function = %function, "work unit started");
            }
            ProgressEvent::UnitFinished {
                index,
                status,
                duration,
                completed_bytes,
                total_bytes,
            } => {
                finished += 1;
                match percent_complete(completed_bytes, total_bytes) {
                    Some(percent) => info!(
                        index,
                        status,
                        ?duration,
                        completed_bytes,
                        total_bytes,
                        percent,
                        "work unit finished"
                    ),
                    None => info!(index, status, ?duration, "work unit finished"),
                }
            }
            ProgressEvent::IterationStarted {
                iteration,
                units,
                pool,
            } => {
                info!(
                    iteration,
                    units,
                    workers = pool.capacity,
                    "iteration submitted"
                );
            }
            ProgressEvent::Done { exit_status } => {
                info!(exit_status, finished, "all work units processed");
            }
        }
    }
    finished
}
