use std::{collections::HashMap, sync::Arc};

use common_error::{StrataError, StrataResult};
use snafu::ResultExt;
use strata_plan::{OperationId, PlanNode, ProcedurePlan};

use crate::{
    dataset::{AccumulationMode, DatasetRef, Transformation},
    sources::Source,
    state::{ExecutionContext, ExecutionState},
    transport::ConsecutiveTransport,
    PipelineCreationSnafu,
};

/// Where a node's output can be consumed from.
pub(crate) enum NodeOutput {
    /// Index into [`Pipeline::sources`].
    Source(usize),
    Dataset(DatasetRef),
}

/// A wired dataflow graph for one plan, not yet running.
pub(crate) struct Pipeline {
    pub sources: Vec<Box<dyn Source>>,
    /// Transports of root transformations, for pipelines fed from outside.
    pub entries: Vec<ConsecutiveTransport>,
    pub leaves: Vec<(OperationId, NodeOutput)>,
}

impl Pipeline {
    pub fn attach(
        &mut self,
        output: &NodeOutput,
        transformation: Box<dyn Transformation>,
    ) -> StrataResult<()> {
        match output {
            NodeOutput::Source(idx) => {
                let source = self.sources.get_mut(*idx).ok_or_else(|| {
                    StrataError::InternalError(format!("pipeline has no source {idx}"))
                })?;
                source.add_transformation(transformation);
                Ok(())
            }
            NodeOutput::Dataset(dataset) => dataset.add_transformation(transformation),
        }
    }
}

fn node_context(node: &PlanNode, state: &Arc<ExecutionState>) -> StrataResult<ExecutionContext> {
    let parents = node
        .predecessors
        .iter()
        .map(|p| state.node_dataset(p))
        .collect::<StrataResult<Vec<_>>>()?;
    Ok(ExecutionContext {
        state: state.clone(),
        parents,
        bounds: node.bounds,
    })
}

/// Builds the runtime graph of `plan`, in topological order.
///
/// At the top level every root becomes a source. In a nested pipeline roots are fed by the
/// enclosing stage, so they become transformations reachable through
/// [`Pipeline::entries`]. Every other node becomes a transformation behind its own
/// [`ConsecutiveTransport`], attached to the output of each of its predecessors.
pub(crate) fn build_pipeline(
    plan: &ProcedurePlan,
    state: &Arc<ExecutionState>,
    mode: AccumulationMode,
) -> crate::Result<Pipeline> {
    let mut pipeline = Pipeline {
        sources: vec![],
        entries: vec![],
        leaves: vec![],
    };
    let mut outputs: HashMap<OperationId, NodeOutput> = HashMap::new();
    for node in plan.nodes() {
        let id = state.dataset_id_for(&node.id);
        state.register_node(&node.id, id);
        let plan_name = node.id.to_string();
        let ctx = node_context(node, state).context(PipelineCreationSnafu {
            plan_name: plan_name.clone(),
        })?;

        if node.is_root() && !state.is_nested() {
            let source = state
                .registry
                .create_source(id, node, &ctx)
                .context(PipelineCreationSnafu { plan_name })?;
            outputs.insert(node.id.clone(), NodeOutput::Source(pipeline.sources.len()));
            pipeline.sources.push(source);
            continue;
        }

        let (transformation, dataset) = state
            .registry
            .create_transformation(id, mode, node, &ctx)
            .context(PipelineCreationSnafu {
                plan_name: plan_name.clone(),
            })?;
        let transport = ConsecutiveTransport::new(
            &plan_name,
            transformation,
            node.predecessors.len(),
            &state.dispatcher,
            state.accounting.clone(),
        );
        if node.is_root() {
            pipeline.entries.push(transport);
        } else {
            for parent in &node.predecessors {
                let output = outputs.get(parent).ok_or_else(|| {
                    StrataError::InternalError(format!("{parent} was not built before {}", node.id))
                });
                let attached = output.and_then(|o| pipeline.attach(o, Box::new(transport.clone())));
                attached.context(PipelineCreationSnafu {
                    plan_name: plan_name.clone(),
                })?;
            }
        }
        outputs.insert(node.id.clone(), NodeOutput::Dataset(dataset));
    }

    for leaf in plan.leaves() {
        if let Some(output) = outputs.remove(&leaf.id) {
            pipeline.leaves.push((leaf.id.clone(), output));
        }
    }
    log::debug!(
        "Built pipeline {} with {} sources, {} entries and {} leaves",
        state.id,
        pipeline.sources.len(),
        pipeline.entries.len(),
        pipeline.leaves.len()
    );
    Ok(pipeline)
}
