//! Strata: a streaming query engine that pushes stages of a query down to storage.
//!
//! A query arrives as a [`Spec`]. The [`Planner`] extracts the storage-evaluable prefix into
//! stage operations, [`ProcedurePlan::build`] resolves the procedure graph, and the
//! [`Executor`] runs it on the compute runtime.

use std::sync::Arc;

pub use common_error::{StrataError, StrataResult};
pub use common_strata_config::{ExecutionConfig, PlanningConfig};
pub use strata_execution::{Executor, QueryResults, TableReaderFactory};
pub use strata_functions::{register_builtins, MemoryTableReader, Registries, RegistryBuilders};
pub use strata_plan::{Planner, ProcedurePlan, Spec};
pub use strata_table::{Bounds, Duration, GroupKey, Table, Time, Value};
pub use strata_execution as execution;
pub use strata_functions as functions;
pub use strata_plan as plan;

/// Registries holding the built-in operation catalog.
pub fn default_registries() -> Registries {
    RegistryBuilders::with_builtins().build()
}

/// Stage plans `spec` and resolves it into a runnable procedure plan.
pub fn plan_query(
    spec: Spec,
    registries: &Registries,
    config: PlanningConfig,
) -> StrataResult<ProcedurePlan> {
    let planned = Planner::with_stage_planning(registries.push_down.clone(), config).plan(spec)?;
    ProcedurePlan::build(&planned, &registries.procedures)
}

/// An executor over `registries` reading through `reader`.
///
/// Sizes the shared compute pool from `config` when it has not been started yet.
pub fn executor(
    registries: &Registries,
    reader: Arc<dyn TableReaderFactory>,
    config: ExecutionConfig,
) -> Executor {
    if let Some(threads) = config.num_worker_threads {
        if let Err(err) = common_runtime::set_compute_runtime_num_worker_threads(threads) {
            log::warn!("Ignoring configured worker threads: {err}");
        }
    }
    Executor::new(registries.execution.clone(), Arc::new(config)).with_reader(reader)
}

fn should_enable_chrome_trace() -> bool {
    std::env::var("STRATA_DEV_ENABLE_CHROME_TRACE")
        .is_ok_and(|val| matches!(val.trim().to_lowercase().as_str(), "1" | "true"))
}

/// Installs the global subscriber, with chrome tracing when
/// `STRATA_DEV_ENABLE_CHROME_TRACE` is set.
pub fn init_tracing_from_env() {
    common_tracing::init_tracing(should_enable_chrome_trace());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::{FromOpSpec, RangeOpSpec, SumOpSpec};

    #[tokio::test]
    async fn plans_and_runs_with_the_builtin_catalog() -> StrataResult<()> {
        let registries = default_registries();
        let spec = Spec::new(Time(0))
            .with_operation("from", FromOpSpec::new("db"))
            .with_operation("range", RangeOpSpec::absolute(0, 10))
            .with_operation("sum", SumOpSpec::default())
            .with_edge("from", "range")
            .with_edge("range", "sum");
        let plan = plan_query(spec, &registries, PlanningConfig::default())?;
        assert_eq!(plan.roots().len(), 1);

        let table = Table::new(
            GroupKey::empty(),
            vec!["_time".into(), "_value".into()],
            vec![
                vec![Value::Time(Time(1)), Value::Int(2)],
                vec![Value::Time(Time(3)), Value::Int(5)],
                vec![Value::Time(Time(30)), Value::Int(100)],
            ],
        )?;
        let reader = MemoryTableReader::new(registries.procedures.clone()).with_table("db", table);
        let results = executor(&registries, Arc::new(reader), ExecutionConfig::default())
            .execute(&plan)
            .await?;
        let (_, tables) = results.iter().next().expect("one leaf");
        assert_eq!(tables.len(), 1);
        let value = tables[0].column_index("_value").expect("_value");
        assert_eq!(tables[0].rows()[0][value], Value::Int(7));
        Ok(())
    }

    #[test]
    fn chrome_trace_is_off_by_default() {
        if std::env::var("STRATA_DEV_ENABLE_CHROME_TRACE").is_err() {
            assert!(!should_enable_chrome_trace());
        }
    }
}
