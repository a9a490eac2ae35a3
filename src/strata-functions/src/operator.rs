use common_error::{StrataError, StrataResult};
use strata_execution::{
    AccumulationMode, CachedDataset, Dataset, DatasetId, DatasetRef, ExecutionContext,
    PassthroughDataset, Transformation, TriggerSpec,
};
use strata_plan::{kinds, PlanNode, ProcedureSpec, GROUPING_BOUNDARY_KINDS};
use strata_table::{Bounds, Duration, GroupKey, Table, Time};

use crate::{
    filter::FilterOperator, group::GroupOperator, range::RangeOperator,
    sample::SampleOperator, selector::SelectorOperator, sum::SumOperator,
    window::WindowOperator,
};

/// Per-table work of one operation kind.
///
/// An operator sees every table of its node in arrival order and may return any number
/// of tables, under any keys. Empty output tables are dropped by the caller.
pub trait TableOperator: Send {
    fn name(&self) -> &'static str;
    fn execute(&mut self, input: Table) -> StrataResult<Vec<Table>>;
}

/// Builds the operator for a procedure spec of a per-table kind.
///
/// `bounds` are the bounds reaching the node, used by kinds that clip to them.
pub fn row_operator(
    spec: &dyn ProcedureSpec,
    bounds: Option<Bounds>,
) -> StrataResult<Box<dyn TableOperator>> {
    Ok(match spec.kind() {
        kinds::RANGE => Box::new(RangeOperator::try_new(spec)?),
        kinds::FILTER => Box::new(FilterOperator::try_new(spec)?),
        kinds::GROUP => Box::new(GroupOperator::try_new(spec)?),
        kinds::WINDOW => Box::new(WindowOperator::try_new(spec, bounds)?),
        kinds::FIRST | kinds::LAST => Box::new(SelectorOperator::try_new(spec)?),
        kinds::SUM => Box::new(SumOperator::try_new(spec)?),
        kinds::SAMPLE => Box::new(SampleOperator::try_new(spec)?),
        other => {
            return Err(StrataError::UnsupportedKind(format!(
                "{other} has no table operator"
            )))
        }
    })
}

/// Runs a [`TableOperator`] on every incoming table and hands the output to its dataset.
pub struct ProcessorTransformation {
    operator: Box<dyn TableOperator>,
    dataset: DatasetRef,
}

impl ProcessorTransformation {
    pub fn new(operator: Box<dyn TableOperator>, dataset: DatasetRef) -> Self {
        Self { operator, dataset }
    }
}

impl Transformation for ProcessorTransformation {
    fn process(&mut self, _id: DatasetId, table: Table) -> StrataResult<()> {
        for output in self.operator.execute(table)? {
            if !output.is_empty() {
                self.dataset.process(output)?;
            }
        }
        Ok(())
    }

    fn retract_table(&mut self, _id: DatasetId, key: &GroupKey) -> StrataResult<()> {
        self.dataset.retract_table(key)
    }

    fn update_watermark(&mut self, _id: DatasetId, mark: Time) -> StrataResult<()> {
        self.dataset.update_watermark(mark)
    }

    fn update_processing_time(&mut self, _id: DatasetId, time: Time) -> StrataResult<()> {
        self.dataset.update_processing_time(time)
    }

    fn finish(&mut self, _id: DatasetId, err: Option<StrataError>) {
        log::debug!(
            "{} finishing dataset {}",
            self.operator.name(),
            self.dataset.id()
        );
        self.dataset.finish(err);
    }
}

/// Runtime constructor shared by every per-table kind.
///
/// Kinds that re-key their output cache it until the trigger fires; every other kind
/// forwards as it goes.
pub(crate) fn create_processor_transformation(
    id: DatasetId,
    mode: AccumulationMode,
    node: &PlanNode,
    ctx: &ExecutionContext,
) -> StrataResult<(Box<dyn Transformation>, DatasetRef)> {
    let operator = row_operator(node.spec.as_ref(), ctx.bounds)?;
    let dataset: DatasetRef = if GROUPING_BOUNDARY_KINDS.contains(&node.kind()) {
        let trigger = TriggerSpec::AfterWatermark {
            allowed_lateness: Duration(ctx.state.config.default_allowed_lateness_ns),
        };
        CachedDataset::new(id, trigger, mode, ctx.bounds)
    } else {
        PassthroughDataset::new(id)
    };
    let transformation: Box<dyn Transformation> =
        Box::new(ProcessorTransformation::new(operator, dataset.clone()));
    Ok((transformation, dataset))
}
