//! The built-in operation catalog.
//!
//! Every kind plugs into three registries: the procedure registry (planning), the push-down
//! registry (stage planning) and the execution registry (runtime constructors). Nothing is
//! registered implicitly; callers run [`register_builtins`] once, before building.

mod filter;
mod from;
mod group;
mod operator;
mod range;
mod reader;
mod sample;
mod selector;
mod sum;
mod window;


use std::sync::Arc;

pub use filter::{CompareOp, FilterOpSpec, FilterOperator, FilterProcedureSpec, Predicate};
pub use from::{FromOpSpec, FromProcedureSpec, FromSource};
pub use group::{GroupMode, GroupOpSpec, GroupOperator, GroupProcedureSpec};
pub use operator::{row_operator, ProcessorTransformation, TableOperator};
pub use range::{RangeOpSpec, RangeOperator, RangeProcedureSpec, TimeBound};
pub use reader::MemoryTableReader;
pub use sample::{SampleOpSpec, SampleOperator, SampleProcedureSpec};
pub use selector::{
    FirstOpSpec, LastOpSpec, Selector, SelectorOperator, SelectorProcedureSpec,
};
use strata_execution::{ExecutionRegistry, ExecutionRegistryBuilder};
use strata_plan::{
    kinds, CreateProcedureSpec, ProcedureRegistry, ProcedureRegistryBuilder, PushDownRegistry,
};
pub use sum::{SumOpSpec, SumOperator, SumProcedureSpec};
pub use window::{WindowOpSpec, WindowOperator, WindowProcedureSpec};

/// The registries under construction, filled in by the catalog and any extension.
pub struct RegistryBuilders {
    pub procedures: ProcedureRegistryBuilder,
    pub execution: ExecutionRegistryBuilder,
    pub push_down: PushDownRegistry,
}

/// Finished, shareable registries.
#[derive(Clone)]
pub struct Registries {
    pub procedures: Arc<ProcedureRegistry>,
    pub execution: Arc<ExecutionRegistry>,
    pub push_down: Arc<PushDownRegistry>,
}

impl Default for RegistryBuilders {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilders {
    /// Builders that only know about stages.
    pub fn new() -> Self {
        Self {
            procedures: ProcedureRegistry::builder(),
            execution: ExecutionRegistry::builder(),
            push_down: PushDownRegistry::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut builders = Self::new();
        register_builtins(&mut builders);
        builders
    }

    pub fn build(self) -> Registries {
        Registries {
            procedures: Arc::new(self.procedures.build()),
            execution: Arc::new(self.execution.build()),
            push_down: Arc::new(self.push_down),
        }
    }
}

/// Registers every built-in kind. Running it twice leaves the registries unchanged.
pub fn register_builtins(builders: &mut RegistryBuilders) {
    let procedures: [(&str, CreateProcedureSpec); 9] = [
        (kinds::FROM, Arc::new(from::create_from_procedure)),
        (kinds::RANGE, Arc::new(range::create_range_procedure)),
        (kinds::FILTER, Arc::new(filter::create_filter_procedure)),
        (kinds::GROUP, Arc::new(group::create_group_procedure)),
        (kinds::WINDOW, Arc::new(window::create_window_procedure)),
        (kinds::FIRST, Arc::new(selector::create_first_procedure)),
        (kinds::LAST, Arc::new(selector::create_last_procedure)),
        (kinds::SUM, Arc::new(sum::create_sum_procedure)),
        (kinds::SAMPLE, Arc::new(sample::create_sample_procedure)),
    ];
    for (kind, create) in procedures {
        builders
            .procedures
            .register_procedure_spec(kind, create, kind);
        builders.push_down.register(kind, true);
        if kind != kinds::FROM {
            builders.execution.register_transformation(
                kind,
                Arc::new(operator::create_processor_transformation),
            );
        }
    }
    builders
        .execution
        .register_source(kinds::FROM, Arc::new(from::create_from_source));
    log::debug!("Registered built-in operation catalog");
}

#[cfg(test)]
mod tests {
    use strata_plan::{Operation, PlanAdministration};

    use super::*;

    #[test]
    fn every_kind_plans_stages_and_runs() -> common_error::StrataResult<()> {
        let registries = RegistryBuilders::with_builtins().build();
        let ops = [
            Operation::new("from", FromOpSpec::new("db")),
            Operation::new("range", RangeOpSpec::absolute(0, 10)),
            Operation::new(
                "filter",
                FilterOpSpec {
                    predicate: Predicate::new("_value", CompareOp::Eq, 1_i64),
                },
            ),
            Operation::new("group", GroupOpSpec::by(&["host"])),
            Operation::new("window", WindowOpSpec::every(strata_table::Duration(5))),
            Operation::new("first", FirstOpSpec::default()),
            Operation::new("last", LastOpSpec::default()),
            Operation::new("sum", SumOpSpec::default()),
            Operation::new("sample", SampleOpSpec::new(2, 0)),
        ];
        let admin = PlanAdministration::default();
        for op in &ops {
            let spec = registries.procedures.create_procedure_spec(op, &admin)?;
            assert_eq!(spec.kind(), op.kind());
            assert!(registries.push_down.is_push_down_op(op));
            let runnable = if op.kind() == kinds::FROM {
                registries.execution.has_source(op.kind())
            } else {
                registries.execution.has_transformation(op.kind())
            };
            assert!(runnable, "{} has no runtime constructor", op.kind());
        }
        Ok(())
    }

    #[test]
    fn registering_twice_is_harmless() {
        let mut builders = RegistryBuilders::with_builtins();
        register_builtins(&mut builders);
        let registries = builders.build();
        assert!(registries.procedures.contains(kinds::SUM));
        assert!(registries.execution.has_source(strata_plan::STAGE_KIND));
    }

    #[test]
    fn op_specs_serialize_by_kind() -> common_error::StrataResult<()> {
        let spec = strata_plan::Spec::new(strata_table::Time(0))
            .with_operation("from", FromOpSpec::new("db"))
            .with_operation("sum", SumOpSpec::default())
            .with_edge("from", "sum");
        let json = serde_json::to_string(&spec)?;
        assert!(json.contains("\"kind\":\"from\""));
        let back: strata_plan::Spec = serde_json::from_str(&json)?;
        assert_eq!(back.operations[1].kind(), kinds::SUM);
        Ok(())
    }
}
