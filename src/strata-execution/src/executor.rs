use std::sync::Arc;

use common_error::{StrataError, StrataResult};
use common_runtime::{get_compute_runtime, RuntimeRef};
use common_strata_config::ExecutionConfig;
use futures::future::try_join_all;
use indexmap::IndexMap;
use snafu::ResultExt;
use strata_plan::{OperationId, ProcedurePlan};
use strata_table::Table;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::{
    dataset::{AccumulationMode, DatasetId},
    dispatcher::Dispatcher,
    pipeline::build_pipeline,
    registry::ExecutionRegistry,
    result::ResultSink,
    sources::TableReaderFactory,
    state::ExecutionState,
    transport::ConsecutiveTransport,
    OneShotRecvSnafu,
};

/// Tables produced by each leaf of a query, in plan order.
#[derive(Debug, Default)]
pub struct QueryResults {
    tables: IndexMap<OperationId, Vec<Table>>,
    tables_processed: u64,
    nested_pipelines: usize,
}

impl QueryResults {
    pub fn get(&self, leaf: &OperationId) -> Option<&[Table]> {
        self.tables.get(leaf).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OperationId, &[Table])> {
        self.tables.iter().map(|(id, t)| (id, t.as_slice()))
    }

    pub fn num_leaves(&self) -> usize {
        self.tables.len()
    }

    pub fn into_tables(self) -> IndexMap<OperationId, Vec<Table>> {
        self.tables
    }

    /// Tables handled by every transport of the query, nested pipelines included.
    pub fn tables_processed(&self) -> u64 {
        self.tables_processed
    }

    pub fn nested_pipelines(&self) -> usize {
        self.nested_pipelines
    }
}

/// Runs procedure plans to completion on the compute runtime.
///
/// Cancelling the executor cancels every query it is running and every query it will run.
pub struct Executor {
    registry: Arc<ExecutionRegistry>,
    reader: Option<Arc<dyn TableReaderFactory>>,
    config: Arc<ExecutionConfig>,
    runtime: RuntimeRef,
    cancel: CancellationToken,
}

impl Executor {
    pub fn new(registry: Arc<ExecutionRegistry>, config: Arc<ExecutionConfig>) -> Self {
        Self {
            registry,
            reader: None,
            config,
            runtime: get_compute_runtime(),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_reader(mut self, reader: Arc<dyn TableReaderFactory>) -> Self {
        self.reader = Some(reader);
        self
    }

    #[must_use]
    pub fn with_runtime(mut self, runtime: RuntimeRef) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[instrument(skip_all, name = "Executor::execute")]
    pub async fn execute(&self, plan: &ProcedurePlan) -> StrataResult<QueryResults> {
        let token = self.cancel.child_token();
        if token.is_cancelled() {
            return Err(StrataError::Cancelled);
        }
        let dispatcher = Dispatcher::new(self.runtime.clone(), token.clone());
        let result = self.run(plan, &dispatcher, &token).await;
        dispatcher.shutdown();
        result
    }

    async fn run(
        &self,
        plan: &ProcedurePlan,
        dispatcher: &Arc<Dispatcher>,
        token: &CancellationToken,
    ) -> StrataResult<QueryResults> {
        let state = ExecutionState::new(
            DatasetId::random(),
            dispatcher.clone(),
            self.registry.clone(),
            self.reader.clone(),
            self.config.clone(),
            plan.resources().clone(),
            plan.now(),
        );
        let mut pipeline = build_pipeline(plan, &state, AccumulationMode::Discarding)?;

        let mut receivers = Vec::with_capacity(pipeline.leaves.len());
        for (leaf, output) in std::mem::take(&mut pipeline.leaves) {
            let (sink, rx) = ResultSink::new();
            let transport = ConsecutiveTransport::new(
                &format!("{leaf}/result"),
                Box::new(sink),
                1,
                dispatcher,
                state.accounting.clone(),
            );
            pipeline.attach(&output, Box::new(transport))?;
            receivers.push((leaf, rx));
        }
        for source in pipeline.sources {
            let name = source.name();
            dispatcher.schedule(name, source.run(token.clone()));
        }

        let collect = try_join_all(receivers.into_iter().map(|(leaf, rx)| async move {
            let tables = rx.await.context(OneShotRecvSnafu).map_err(StrataError::from)??;
            Ok::<_, StrataError>((leaf, tables))
        }));
        let result = tokio::select! {
            biased;
            tables = collect => tables.map(|tables| QueryResults {
                tables: tables.into_iter().collect(),
                tables_processed: state.accounting.tables_processed(),
                nested_pipelines: state.accounting.nested_pipelines_created(),
            }),
            () = token.cancelled() => Err(StrataError::Cancelled),
        };
        log::debug!(
            "Query {} processed {} tables across {} nested pipelines",
            state.id,
            state.accounting.tables_processed(),
            state.accounting.nested_pipelines_created()
        );
        // The first recorded failure explains any later one.
        result.map_err(|err| dispatcher.err().unwrap_or(err))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::{stream, StreamExt};
    use strata_plan::{ProcedureRegistry, Spec, StageOperationSpec};
    use strata_table::Time;

    use super::*;
    use crate::{
        sources::SourceStream,
        test::{host_key, keyed_table},
    };

    enum Reader {
        Tables,
        Failing,
        Endless,
    }

    impl TableReaderFactory for Reader {
        fn create_reader(&self, _spec: &Spec) -> StrataResult<SourceStream<'static>> {
            Ok(match self {
                Self::Tables => {
                    stream::iter(vec![Ok(keyed_table("a", &[1])), Ok(keyed_table("b", &[2]))])
                        .boxed()
                }
                Self::Failing => {
                    stream::iter(vec![Err(StrataError::ComputeError("corrupt block".to_string()))])
                        .boxed()
                }
                Self::Endless => stream::pending().boxed(),
            })
        }
    }

    fn stage_plan() -> StrataResult<ProcedurePlan> {
        let spec = Spec::new(Time(0)).with_operation("stage0", StageOperationSpec::new(Time(0)));
        ProcedurePlan::build(&spec, &ProcedureRegistry::builder().build())
    }

    fn executor(reader: Reader) -> Executor {
        Executor::new(
            Arc::new(ExecutionRegistry::builder().build()),
            Arc::new(ExecutionConfig::default()),
        )
        .with_reader(Arc::new(reader))
    }

    #[tokio::test]
    async fn collects_every_table_of_a_leaf() -> StrataResult<()> {
        let results = executor(Reader::Tables).execute(&stage_plan()?).await?;
        let tables = results.get(&"stage0".into()).expect("leaf results");
        let keys: Vec<_> = tables.iter().map(|t| t.key().clone()).collect();
        assert_eq!(keys, vec![host_key("a"), host_key("b")]);
        assert_eq!(results.num_leaves(), 1);
        Ok(())
    }

    #[test]
    fn runs_on_a_dedicated_runtime() -> StrataResult<()> {
        let runtime = common_runtime::new_custom_runtime("query", 1)?;
        let executor = executor(Reader::Tables).with_runtime(runtime.clone());
        let plan = stage_plan()?;
        let results = runtime.runtime.block_on(executor.execute(&plan))?;
        assert_eq!(results.get(&"stage0".into()).map(<[Table]>::len), Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn read_failures_fail_the_query() -> StrataResult<()> {
        let res = executor(Reader::Failing).execute(&stage_plan()?).await;
        assert!(matches!(res, Err(StrataError::ComputeError(msg)) if msg == "corrupt block"));
        Ok(())
    }

    #[tokio::test]
    async fn missing_reader_fails_before_running() -> StrataResult<()> {
        let executor = Executor::new(
            Arc::new(ExecutionRegistry::builder().build()),
            Arc::new(ExecutionConfig::default()),
        );
        let res = executor.execute(&stage_plan()?).await;
        assert!(matches!(res, Err(StrataError::InvalidPlan(_))));
        Ok(())
    }

    #[tokio::test]
    async fn cancellation_ends_a_running_query() -> StrataResult<()> {
        let executor = Arc::new(executor(Reader::Endless));
        let plan = stage_plan()?;
        let canceller = executor.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });
        let res = tokio::time::timeout(Duration::from_secs(5), executor.execute(&plan))
            .await
            .expect("query did not stop after cancellation");
        assert!(matches!(res, Err(StrataError::Cancelled)));
        assert!(executor.is_cancelled());
        Ok(())
    }
}
