use std::{collections::HashSet, sync::Arc};

use common_error::{StrataError, StrataResult};
use strata_plan::{PlanNode, ProcedurePlanRef};
use strata_table::{GroupKey, Table, Time};

use crate::{
    concurrent::ConcurrentDataset,
    dataset::{AccumulationMode, Dataset, DatasetId, DatasetRef, Transformation, TransformationSet},
    pipeline::build_pipeline,
    stage::merge::SlotMerge,
    state::{ExecutionContext, ExecutionState},
};

/// A stage in the middle of a query: runs its staged sub-graph as nested pipelines.
///
/// The first time a group key is seen, and while fewer than `cap` pipelines exist, a new
/// nested pipeline is built for it. Tables are then handed to the pipelines round robin, so
/// a key is not pinned to the pipeline created for it.
pub struct StageTransformer {
    id: DatasetId,
    plan: ProcedurePlanRef,
    state: Arc<ExecutionState>,
    slots: Arc<ConcurrentDataset>,
    merge: Arc<SlotMerge>,
    seen: HashSet<DatasetId>,
}

impl StageTransformer {
    pub fn new(
        id: DatasetId,
        plan: ProcedurePlanRef,
        state: Arc<ExecutionState>,
        concurrency: usize,
        merge: Arc<SlotMerge>,
    ) -> Self {
        Self {
            id,
            plan,
            state,
            slots: ConcurrentDataset::new(id, concurrency),
            merge,
            seen: HashSet::new(),
        }
    }

    pub fn num_pipelines(&self) -> usize {
        self.slots.size()
    }

    fn spawn_nested(&mut self, nested_id: DatasetId) -> StrataResult<()> {
        let nested = self.state.nested(nested_id);
        // Nested pipelines always discard: the stage's consumer decides what to accumulate.
        let mut pipeline = build_pipeline(&self.plan, &nested, AccumulationMode::Discarding)?;
        let leaves = std::mem::take(&mut pipeline.leaves);
        let routes = self.merge.add_slot(leaves.len());
        for ((_, output), route) in leaves.iter().zip(routes) {
            pipeline.attach(output, Box::new(route))?;
        }
        let mut entries: Vec<Box<dyn Transformation>> = pipeline
            .entries
            .into_iter()
            .map(|t| Box::new(t) as Box<dyn Transformation>)
            .collect();
        let entry = if entries.len() == 1 {
            entries.remove(0)
        } else {
            Box::new(TransformationSet::from(entries))
        };
        self.slots.add_transformation(entry)?;
        self.state.accounting.nested_started();
        log::debug!(
            "Stage {} started nested pipeline {nested_id} ({} of {})",
            self.id,
            self.slots.size(),
            self.slots.cap()
        );
        Ok(())
    }
}

impl Transformation for StageTransformer {
    fn process(&mut self, _id: DatasetId, table: Table) -> StrataResult<()> {
        let nested_id = DatasetId::for_key(self.id, table.key());
        if self.slots.size() < self.slots.cap() && self.seen.insert(nested_id) {
            self.spawn_nested(nested_id)?;
        }
        self.slots.process(table)
    }

    fn retract_table(&mut self, _id: DatasetId, key: &GroupKey) -> StrataResult<()> {
        self.slots.retract_table(key)
    }

    fn update_watermark(&mut self, _id: DatasetId, mark: Time) -> StrataResult<()> {
        self.slots.update_watermark(mark)
    }

    fn update_processing_time(&mut self, _id: DatasetId, time: Time) -> StrataResult<()> {
        self.slots.update_processing_time(time)
    }

    fn finish(&mut self, _id: DatasetId, err: Option<StrataError>) {
        self.merge.seal(err.clone());
        self.slots.finish(err);
    }
}

pub(crate) fn create_stage_transformer(
    id: DatasetId,
    _mode: AccumulationMode,
    node: &PlanNode,
    ctx: &ExecutionContext,
) -> StrataResult<(Box<dyn Transformation>, DatasetRef)> {
    let plan = node.embedded.clone().ok_or_else(|| {
        StrataError::InvalidPlan(format!("stage {} carries no embedded plan", node.id))
    })?;
    let state = &ctx.state;
    let concurrency = state
        .config
        .stage_concurrency_for(state.resources.concurrency_quota);
    let merge = SlotMerge::new(id, state.accounting.clone());
    let transformer: Box<dyn Transformation> = Box::new(StageTransformer::new(
        id,
        plan,
        state.clone(),
        concurrency,
        merge.clone(),
    ));
    let output: DatasetRef = merge;
    Ok((transformer, output))
}
