use std::sync::Arc;

use common_error::{StrataError, StrataResult};
use common_strata_config::{ExecutionConfig, PlanningConfig};
use strata_execution::{Executor, QueryResults};
use strata_functions::{
    CompareOp, FilterOpSpec, FirstOpSpec, FromOpSpec, GroupOpSpec, LastOpSpec,
    MemoryTableReader, Predicate, RangeOpSpec, Registries, RegistryBuilders, SumOpSpec,
    WindowOpSpec,
};
use strata_plan::{
    operation_spec_as, Edge, Operation, Planner, ProcedurePlan, Spec, StageOperationSpec,
    STAGE_KIND,
};
use strata_table::{Duration, GroupKey, Table, Time, Value};

fn host_table(host: &str, points: &[(i64, i64)]) -> Table {
    Table::new(
        GroupKey::new(vec![("host".into(), Value::from(host))]),
        vec!["_time".into(), "_value".into()],
        points
            .iter()
            .map(|(t, v)| vec![Value::Time(Time(*t)), Value::Int(*v)])
            .collect(),
    )
    .expect("rows match columns")
}

/// `(host, first _value)` of every table at `leaf`, sorted by host.
fn host_sums(results: &QueryResults, leaf: &str) -> Vec<(String, Value)> {
    let mut sums: Vec<_> = results
        .get(&leaf.into())
        .expect("leaf has results")
        .iter()
        .map(|t| {
            let host = t.key().get("host").map(ToString::to_string).unwrap_or_default();
            (host, t.rows()[0][t.column_index("_value").expect("_value")].clone())
        })
        .collect();
    sums.sort();
    sums
}

fn host(name: &str) -> String {
    Value::from(name).to_string()
}

fn executor(registries: &Registries, reader: MemoryTableReader) -> Executor {
    Executor::new(registries.execution.clone(), Arc::new(ExecutionConfig::default()))
        .with_reader(Arc::new(reader))
}

fn planner(registries: &Registries) -> Planner {
    Planner::with_stage_planning(registries.push_down.clone(), PlanningConfig::default())
}

#[tokio::test]
async fn staged_prefix_is_read_by_storage() -> StrataResult<()> {
    let registries = RegistryBuilders::with_builtins().build();
    let spec = Spec::new(Time(1_000))
        .with_operation("from", FromOpSpec::new("db"))
        .with_operation("range", RangeOpSpec::absolute(0, 50))
        .with_operation(
            "filter",
            FilterOpSpec {
                predicate: Predicate::new("_value", CompareOp::Gt, 1_i64),
            },
        )
        .with_operation("group", GroupOpSpec::by(&["host"]))
        .with_operation("sum", SumOpSpec::default())
        .with_edge("from", "range")
        .with_edge("range", "filter")
        .with_edge("filter", "group")
        .with_edge("group", "sum");

    let planned = planner(&registries).plan(spec)?;
    let ids: Vec<_> = planned.operations.iter().map(|op| op.id.as_str()).collect();
    assert_eq!(ids, vec!["stage0", "group", "sum"]);
    assert_eq!(
        planned.edges,
        vec![Edge::new("stage0", "group"), Edge::new("group", "sum")]
    );
    let stage = operation_spec_as::<StageOperationSpec>(planned.operations[0].spec.as_ref())?;
    assert_eq!(stage.spec.operations.len(), 3);
    assert_eq!(stage.spec.edges.len(), 2);

    // The planned spec survives a trip through JSON.
    let planned: Spec = serde_json::from_str(&serde_json::to_string(&planned)?)?;
    let plan = ProcedurePlan::build(&planned, &registries.procedures)?;
    assert_eq!(plan.node(&"stage0".into())?.kind(), STAGE_KIND);

    let reader = MemoryTableReader::new(registries.procedures.clone())
        .with_table("db", host_table("a", &[(1, 1), (2, 5), (60, 100)]))
        .with_table("db", host_table("b", &[(3, 2)]))
        .with_table("db", host_table("a", &[(4, 7)]));
    let results = executor(&registries, reader).execute(&plan).await?;
    assert_eq!(
        host_sums(&results, "sum"),
        vec![(host("a"), Value::Int(12)), (host("b"), Value::Int(2))]
    );
    assert_eq!(results.nested_pipelines(), 0);
    Ok(())
}

#[tokio::test]
async fn windows_stay_in_the_query() -> StrataResult<()> {
    let registries = RegistryBuilders::with_builtins().build();
    let spec = Spec::new(Time(0))
        .with_operation("from", FromOpSpec::new("db"))
        .with_operation("range", RangeOpSpec::absolute(0, 20))
        .with_operation("window", WindowOpSpec::every(Duration(10)))
        .with_operation("sum", SumOpSpec::default())
        .with_edge("from", "range")
        .with_edge("range", "window")
        .with_edge("window", "sum");
    let planned = planner(&registries).plan(spec)?;
    let ids: Vec<_> = planned.operations.iter().map(|op| op.id.as_str()).collect();
    assert_eq!(ids, vec!["stage0", "window", "sum"]);

    let plan = ProcedurePlan::build(&planned, &registries.procedures)?;
    let reader = MemoryTableReader::new(registries.procedures.clone())
        .with_table("db", host_table("a", &[(1, 1), (5, 2), (11, 3), (25, 4)]));
    let results = executor(&registries, reader).execute(&plan).await?;
    let mut windows: Vec<_> = results
        .get(&"sum".into())
        .expect("leaf has results")
        .iter()
        .map(|t| (t.key().get("_stop").cloned(), t.rows()[0][0].clone()))
        .collect();
    windows.sort();
    assert_eq!(
        windows,
        vec![
            (Some(Value::Time(Time(10))), Value::Int(3)),
            (Some(Value::Time(Time(20))), Value::Int(3)),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn mid_pipeline_stage_runs_bounded_nested_pipelines() -> StrataResult<()> {
    let registries = RegistryBuilders::with_builtins().build();
    let mut stage = StageOperationSpec::new(Time(0));
    stage.add_operation(Operation::new("range", RangeOpSpec::absolute(0, 50)));
    stage.add_operation(Operation::new(
        "filter",
        FilterOpSpec {
            predicate: Predicate::new("_value", CompareOp::Ne, 0_i64),
        },
    ));
    stage.add_edge(Edge::new("range", "filter"));
    let mut spec = Spec::new(Time(0))
        .with_operation("from", FromOpSpec::new("db"))
        .with_operation("stage0", stage)
        .with_operation("sum", SumOpSpec::default())
        .with_edge("from", "stage0")
        .with_edge("stage0", "sum");
    spec.resources.concurrency_quota = 2;

    let plan = ProcedurePlan::build(&spec, &registries.procedures)?;
    let mut reader = MemoryTableReader::new(registries.procedures.clone());
    let hosts = ["h0", "h1", "h2", "h3", "h4"];
    for (i, name) in (0_i64..).zip(hosts) {
        reader = reader.with_table("db", host_table(name, &[(1, i + 1), (2, 0), (70, 9)]));
    }
    let results = executor(&registries, reader).execute(&plan).await?;

    assert_eq!(results.nested_pipelines(), 2);
    let expected: Vec<_> = (1_i64..)
        .zip(hosts)
        .map(|(v, name)| (host(name), Value::Int(v)))
        .collect();
    assert_eq!(host_sums(&results, "sum"), expected);
    Ok(())
}

#[tokio::test]
async fn unstaged_queries_read_from_a_source() -> StrataResult<()> {
    let registries = RegistryBuilders::with_builtins().build();
    let spec = Spec::new(Time(0))
        .with_operation("from", FromOpSpec::new("db"))
        .with_operation("first", FirstOpSpec::default())
        .with_operation("last", LastOpSpec::default())
        .with_edge("from", "first")
        .with_edge("from", "last");
    let plan = ProcedurePlan::build(&spec, &registries.procedures)?;
    let reader = MemoryTableReader::new(registries.procedures.clone())
        .with_table("db", host_table("a", &[(1, 4), (2, 5), (3, 6)]));
    let results = executor(&registries, reader).execute(&plan).await?;
    assert_eq!(results.num_leaves(), 2);
    assert_eq!(host_sums(&results, "first"), vec![(host("a"), Value::Int(4))]);
    assert_eq!(host_sums(&results, "last"), vec![(host("a"), Value::Int(6))]);
    Ok(())
}

#[tokio::test]
async fn operator_failures_abort_the_query() -> StrataResult<()> {
    let registries = RegistryBuilders::with_builtins().build();
    let spec = Spec::new(Time(0))
        .with_operation("from", FromOpSpec::new("db"))
        .with_operation("sum", SumOpSpec::default())
        .with_edge("from", "sum");
    let plan = ProcedurePlan::build(&spec, &registries.procedures)?;
    let strings = Table::new(
        GroupKey::empty(),
        vec!["_value".into()],
        vec![vec![Value::from("not a number")]],
    )?;
    let reader = MemoryTableReader::new(registries.procedures.clone()).with_table("db", strings);
    let res = executor(&registries, reader).execute(&plan).await;
    assert!(matches!(res, Err(StrataError::TypeError(_))));
    Ok(())
}

#[tokio::test]
async fn cancelled_executors_refuse_new_queries() -> StrataResult<()> {
    let registries = RegistryBuilders::with_builtins().build();
    let spec = Spec::new(Time(0)).with_operation("from", FromOpSpec::new("db"));
    let plan = ProcedurePlan::build(&spec, &registries.procedures)?;
    let reader = MemoryTableReader::new(registries.procedures.clone())
        .with_table("db", host_table("a", &[(1, 1)]));
    let executor = executor(&registries, reader);
    executor.cancel();
    let res = executor.execute(&plan).await;
    assert!(matches!(res, Err(StrataError::Cancelled)));
    Ok(())
}
