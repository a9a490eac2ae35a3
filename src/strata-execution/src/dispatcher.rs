use std::{future::Future, sync::Arc};

use common_error::{StrataError, StrataResult};
use common_runtime::{catch_panic, RuntimeRef};
use parking_lot::Mutex;
use snafu::futures::TryFutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::PipelineExecutionSnafu;

/// Schedules the tasks of one query on a runtime and records the first failure among them.
///
/// Aborting cancels the query's token, which every source and transport watches.
pub struct Dispatcher {
    runtime: RuntimeRef,
    cancel: CancellationToken,
    error: Mutex<Option<StrataError>>,
    tasks: Mutex<JoinSet<()>>,
}

impl Dispatcher {
    pub fn new(runtime: RuntimeRef, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            cancel,
            error: Mutex::new(None),
            tasks: Mutex::new(JoinSet::new()),
        })
    }

    /// Spawns `task` on the runtime. An error or panic inside it aborts the query.
    pub fn schedule<F>(self: &Arc<Self>, node_name: &str, task: F)
    where
        F: Future<Output = StrataResult<()>> + Send + 'static,
    {
        if self.is_stopped() {
            log::debug!("Dispatcher is stopped, not scheduling {node_name}");
            return;
        }
        let dispatcher = Arc::downgrade(self);
        let pool_type = self.runtime.pool_type().clone();
        let span = tracing::info_span!("Dispatcher::task", node = node_name);
        let node_name = node_name.to_string();
        let task = task.with_context(move |_| PipelineExecutionSnafu { node_name });
        let wrapped = async move {
            let result = match catch_panic(task, pool_type).await {
                Ok(result) => result.map_err(StrataError::from),
                Err(panic) => Err(panic),
            };
            if let (Err(err), Some(dispatcher)) = (result, dispatcher.upgrade()) {
                dispatcher.abort(err);
            }
        }
        .instrument(span);
        self.tasks.lock().spawn_on(wrapped, self.runtime.handle());
    }

    /// Records `err` unless an earlier error is already recorded, then cancels the query.
    pub fn abort(&self, err: StrataError) {
        {
            let mut error = self.error.lock();
            if error.is_none() {
                if err.is_cancelled() {
                    log::debug!("Query cancelled");
                } else {
                    log::error!("Aborting query: {err}");
                }
                *error = Some(err);
            }
        }
        self.cancel.cancel();
    }

    pub fn err(&self) -> Option<StrataError> {
        self.error.lock().clone()
    }

    /// Cancels the query without recording an error.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn num_tasks(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Aborts every task still running.
    pub fn shutdown(&self) {
        self.tasks.lock().abort_all();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common_error::StrataError;
    use common_runtime::get_compute_runtime;

    use super::*;

    fn dispatcher() -> Arc<Dispatcher> {
        Dispatcher::new(get_compute_runtime(), CancellationToken::new())
    }

    async fn wait_stopped(dispatcher: &Dispatcher) {
        tokio::time::timeout(Duration::from_secs(5), dispatcher.cancellation_token().cancelled())
            .await
            .expect("dispatcher was not stopped in time");
    }

    #[tokio::test]
    async fn failing_task_aborts_the_query() {
        let dispatcher = dispatcher();
        dispatcher.schedule("failing", async {
            Err::<(), _>(StrataError::ComputeError("boom".to_string()))
        });
        wait_stopped(&dispatcher).await;
        let Some(StrataError::ComputeError(msg)) = dispatcher.err() else {
            panic!("expected a compute error, got {:?}", dispatcher.err());
        };
        assert_eq!(msg, "boom");
    }

    #[tokio::test]
    async fn panics_are_reported_as_errors() {
        async fn explode() -> StrataResult<()> {
            panic!("kaboom")
        }
        let dispatcher = dispatcher();
        dispatcher.schedule("panicking", explode());
        wait_stopped(&dispatcher).await;
        assert!(matches!(dispatcher.err(), Some(StrataError::ComputeError(msg)) if msg.contains("kaboom")));
    }

    #[tokio::test]
    async fn first_error_wins() {
        let dispatcher = dispatcher();
        dispatcher.abort(StrataError::ValueError("first".to_string()));
        dispatcher.abort(StrataError::ValueError("second".to_string()));
        assert!(matches!(dispatcher.err(), Some(StrataError::ValueError(msg)) if msg == "first"));
        assert!(dispatcher.is_stopped());
    }

    #[tokio::test]
    async fn stopped_dispatcher_schedules_nothing() {
        let dispatcher = dispatcher();
        dispatcher.stop();
        dispatcher.schedule("late", async { Ok::<(), StrataError>(()) });
        assert_eq!(dispatcher.num_tasks(), 0);
        assert!(dispatcher.err().is_none());
    }
}
