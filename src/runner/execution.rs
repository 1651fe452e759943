use std::sync::Arc;

use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::DispatchError;
use crate::functions::{DispatchOutcome, DispatchRequest, FunctionDispatcher, FunctionRegistry};
use crate::list::ListShared;
use crate::progress::ProgressEvent;
use crate::status::{
    EXIT_STATUS_ABORTED, EXIT_STATUS_FILE_NOT_FOUND, EXIT_STATUS_INVALID_FUNCTION,
    EXIT_STATUS_ZERO,
};
use crate::unit::WorkUnit;

pub const SWITCH_HELP: &str = "h";
pub const SWITCH_LOGGER: &str = "logger";
const USER_LOGGER_FRAME: &str = "#####";

/// Everything a worker needs to run a unit, shared by all units of a run.
#[derive(Clone)]
pub(crate) struct UnitContext {
    pub shared: Arc<ListShared>,
    pub registry: Arc<FunctionRegistry>,
    pub dispatcher: Arc<dyn FunctionDispatcher>,
    pub progress: Option<Sender<ProgressEvent>>,
    pub cancel: CancellationToken,
}

/// Run one unit to completion and return its terminal status. Never fails:
/// every problem is turned into a status on the unit.
pub(crate) async fn execute_unit(unit: Arc<WorkUnit>, ctx: UnitContext) -> i32 {
    let index = unit.index();
    unit.set_status(EXIT_STATUS_ABORTED);

    if ctx.cancel.is_cancelled() {
        info!(index, "work unit skipped; run cancelled");
        return EXIT_STATUS_ABORTED;
    }

    let abort_count = ctx.shared.abort_count();
    if !ctx.shared.abort_limit().permits(abort_count) {
        warn!(index, abort_count, "work unit skipped; abort limit exceeded");
        return EXIT_STATUS_ABORTED;
    }

    let assignment = match unit.assignment() {
        Ok(assignment) => assignment.clone(),
        Err(reason) => {
            error!(index, command = %unit.command(), %reason, "command line parse unsuccessful");
            unit.set_status(EXIT_STATUS_INVALID_FUNCTION);
            ctx.shared.increment_abort_count();
            return EXIT_STATUS_INVALID_FUNCTION;
        }
    };

    if let Some(tx) = ctx.progress.as_ref() {
        let _ = tx
            .send(ProgressEvent::UnitStarted {
                index,
                function: assignment.function.clone(),
            })
            .await;
    }

    unit.mark_started();

    if let Some(text) = unit.command().value_of(SWITCH_LOGGER) {
        info!("{USER_LOGGER_FRAME} {text} {USER_LOGGER_FRAME}");
    }

    let status = if unit.command().is_set(SWITCH_HELP) {
        let usage = ctx
            .registry
            .get(&assignment.function)
            .and_then(|spec| spec.usage.as_deref())
            .unwrap_or("no usage available");
        info!(function = %assignment.function, usage, "function usage");
        EXIT_STATUS_ZERO
    } else {
        let request = DispatchRequest {
            index,
            function: assignment.function.clone(),
            files: assignment.files.clone(),
            command: unit.command().clone(),
        };
        match invoke(&ctx, request).await {
            Ok(outcome) => {
                let status = outcome.status;
                unit.record_outcome(outcome);
                status
            }
            Err(err) => {
                error!(index, function = %assignment.function, error = %err, "work unit failed");
                EXIT_STATUS_FILE_NOT_FOUND
            }
        }
    };

    unit.mark_finished(status);
    if status < 0 {
        ctx.shared.increment_abort_count();
    }

    let duration = unit.duration();
    info!(
        index,
        function = %assignment.function,
        ?duration,
        status,
        "function completed"
    );

    if let Some(tx) = ctx.progress.as_ref() {
        let bytes = unit
            .input_path()
            .and_then(|path| std::fs::metadata(path).ok())
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
            .unwrap_or(0);
        let _ = tx
            .send(ProgressEvent::UnitFinished {
                index,
                status,
                duration,
                completed_bytes: ctx.shared.add_completed_bytes(bytes),
                total_bytes: ctx.shared.total_bytes(),
            })
            .await;
    }

    status
}

async fn invoke(
    ctx: &UnitContext,
    request: DispatchRequest,
) -> Result<DispatchOutcome, DispatchError> {
    if let Some(input) = request.files.input.as_ref()
        && !input.exists()
    {
        return Err(DispatchError::InputNotFound(input.clone()));
    }
    ctx.dispatcher.dispatch(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandModel;
    use crate::functions::{FileRole, FunctionSpec};
    use crate::list::AbortLimit;
    use std::num::NonZeroUsize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry() -> FunctionRegistry {
        FunctionRegistry::new(vec![
            FunctionSpec::new("scan")
                .layout([])
                .layout([FileRole::Input])
                .usage("-scan [input]"),
        ])
    }

    fn context(limit: AbortLimit, calls: Arc<AtomicUsize>, status: i32) -> UnitContext {
        let dispatcher = move |_req: DispatchRequest| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, DispatchError>(DispatchOutcome {
                status,
                results: vec![vec!["row".to_string()]],
                errors: Vec::new(),
            })
        };
        UnitContext {
            shared: Arc::new(ListShared::new(limit)),
            registry: Arc::new(registry()),
            dispatcher: Arc::new(dispatcher),
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    fn unit(tokens: &[&str]) -> Arc<WorkUnit> {
        Arc::new(WorkUnit::new(0, CommandModel::parse(tokens.iter().copied()), &registry()))
    }

    #[tokio::test]
    async fn successful_unit_records_outcome() {
        let calls = Arc::new(AtomicUsize::new(0));
        let ctx = context(AbortLimit::Unlimited, calls.clone(), 2);
        let u = unit(&["-scan"]);

        assert_eq!(execute_unit(u.clone(), ctx.clone()).await, 2);
        assert_eq!(u.status(), Some(2));
        assert_eq!(u.result_row_count(), 1);
        assert!(u.was_started());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.shared.abort_count(), 0);
    }

    #[tokio::test]
    async fn invalid_function_is_minus_two_and_counts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let ctx = context(AbortLimit::Unlimited, calls.clone(), 0);
        let u = unit(&["-bogus"]);

        assert_eq!(execute_unit(u.clone(), ctx.clone()).await, EXIT_STATUS_INVALID_FUNCTION);
        assert_eq!(u.status(), Some(EXIT_STATUS_INVALID_FUNCTION));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.shared.abort_count(), 1);
    }

    #[tokio::test]
    async fn missing_input_is_file_not_found() {
        let calls = Arc::new(AtomicUsize::new(0));
        let ctx = context(AbortLimit::Unlimited, calls.clone(), 0);
        let u = unit(&["-scan", "/no/such/input.x9"]);

        assert_eq!(execute_unit(u.clone(), ctx.clone()).await, EXIT_STATUS_FILE_NOT_FOUND);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.shared.abort_count(), 1);
    }

    #[tokio::test]
    async fn abort_limit_skips_without_counting() {
        let calls = Arc::new(AtomicUsize::new(0));
        let limit = AbortLimit::After(NonZeroUsize::new(1).unwrap());
        let ctx = context(limit, calls.clone(), 0);
        ctx.shared.increment_abort_count();

        let u = unit(&["-scan"]);
        assert_eq!(execute_unit(u.clone(), ctx.clone()).await, EXIT_STATUS_ABORTED);
        assert_eq!(u.status(), Some(EXIT_STATUS_ABORTED));
        assert!(!u.was_started());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.shared.abort_count(), 1);
    }

    #[tokio::test]
    async fn help_switch_logs_usage_instead_of_running() {
        let calls = Arc::new(AtomicUsize::new(0));
        let ctx = context(AbortLimit::Unlimited, calls.clone(), 4);
        let u = unit(&["-scan", "-h"]);

        assert_eq!(execute_unit(u, ctx).await, EXIT_STATUS_ZERO);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancelled_run_skips_units() {
        let calls = Arc::new(AtomicUsize::new(0));
        let ctx = context(AbortLimit::Unlimited, calls.clone(), 0);
        ctx.cancel.cancel();

        assert_eq!(execute_unit(unit(&["-scan"]), ctx).await, EXIT_STATUS_ABORTED);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dispatch_error_is_minus_three() {
        let ctx = UnitContext {
            dispatcher: Arc::new(|_req: DispatchRequest| {
                Err::<DispatchOutcome, DispatchError>(DispatchError::NoCommand("scan".to_string()))
            }),
            ..context(AbortLimit::Unlimited, Arc::new(AtomicUsize::new(0)), 0)
        };
        let u = unit(&["-scan"]);
        assert_eq!(execute_unit(u.clone(), ctx).await, EXIT_STATUS_FILE_NOT_FOUND);
        assert_eq!(u.status(), Some(EXIT_STATUS_FILE_NOT_FOUND));
    }

    #[tokio::test]
    async fn progress_reports_completion() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let ctx = UnitContext {
            progress: Some(tx),
            ..context(AbortLimit::Unlimited, Arc::new(AtomicUsize::new(0)), 0)
        };
        execute_unit(unit(&["-scan"]), ctx).await;

        assert!(matches!(rx.recv().await, Some(ProgressEvent::UnitStarted { index: 0, .. })));
        assert!(matches!(
            rx.recv().await,
            Some(ProgressEvent::UnitFinished { index: 0, status: 0, .. })
        ));
    }
}
