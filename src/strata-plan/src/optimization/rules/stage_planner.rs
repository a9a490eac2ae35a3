use std::{collections::HashSet, sync::Arc};

use common_error::StrataResult;
use common_strata_config::PlanningConfig;

use crate::{
    optimization::rules::{PlanRule, Transformed},
    push_down::{PushDownRegistry, GROUPING_BOUNDARY_KINDS, SKIP_POINT_KINDS},
    spec::{Adjacency, Edge, Operation, OperationId, Spec},
    stage::{StageOperationSpec, STAGE_KIND},
};

/// Extracts the push-down eligible prefix below every root into a stage operation.
///
/// The prefix is a linear chain: a child joins only when it is the sole child of the
/// current tail, has no other parent and is eligible. The walk ends after a grouping
/// boundary, and a chain ending in a skip point leaves that operation in the outer graph.
#[derive(Debug)]
pub struct StagePlanner {
    push_down: Arc<PushDownRegistry>,
    config: PlanningConfig,
}

impl StagePlanner {
    pub fn new(push_down: Arc<PushDownRegistry>, config: PlanningConfig) -> Self {
        Self { push_down, config }
    }

    fn eligible_chain(
        &self,
        spec: &Spec,
        adjacency: &Adjacency,
        root: &OperationId,
    ) -> Vec<OperationId> {
        let Some(root_op) = spec.operation(root) else {
            return vec![];
        };
        if root_op.kind() == STAGE_KIND || !self.push_down.is_push_down_op(root_op) {
            return vec![];
        }
        let max_len = self.config.max_stage_operations.unwrap_or(usize::MAX);
        let mut chain = vec![root.clone()];
        let mut tail = root_op;
        while chain.len() < max_len && !GROUPING_BOUNDARY_KINDS.contains(&tail.kind()) {
            let [child] = adjacency.children_of(&tail.id) else {
                break;
            };
            if adjacency.parents_of(child).len() != 1 {
                break;
            }
            match spec.operation(child) {
                Some(op) if self.push_down.is_push_down_op(op) => {
                    chain.push(child.clone());
                    tail = op;
                }
                _ => break,
            }
        }
        chain
    }

    fn next_stage_id(spec: &Spec) -> OperationId {
        (0..)
            .map(|n| OperationId(format!("{STAGE_KIND}{n}")))
            .find(|id| !spec.contains(id))
            .unwrap_or_else(|| OperationId(STAGE_KIND.to_string()))
    }

    fn extract_stage(spec: Spec, chain: &[OperationId]) -> Spec {
        let stage_id = Self::next_stage_id(&spec);
        let members: HashSet<&OperationId> = chain.iter().collect();
        let mut stage = StageOperationSpec::new(spec.now);
        stage.spec.resources = spec.resources.clone();
        for id in chain {
            if let Some(op) = spec.operation(id) {
                stage.add_operation(op.clone());
            }
        }

        let Spec {
            operations,
            edges,
            now,
            resources,
        } = spec;
        let mut outer_edges = Vec::with_capacity(edges.len());
        for edge in edges {
            match (
                members.contains(&edge.parent),
                members.contains(&edge.child),
            ) {
                (true, true) => stage.add_edge(edge),
                (true, false) => outer_edges.push(Edge::new(stage_id.clone(), edge.child)),
                (false, true) => outer_edges.push(Edge::new(edge.parent, stage_id.clone())),
                (false, false) => outer_edges.push(edge),
            }
        }

        let mut outer_operations = Vec::with_capacity(operations.len());
        let mut stage = Some(stage);
        for op in operations {
            if op.id == chain[0] {
                if let Some(stage) = stage.take() {
                    outer_operations.push(Operation::new(stage_id.clone(), stage));
                }
            } else if !members.contains(&op.id) {
                outer_operations.push(op);
            }
        }
        log::debug!(
            "Staged {} operations starting at {} as {stage_id}",
            chain.len(),
            chain[0]
        );
        Spec {
            operations: outer_operations,
            edges: outer_edges,
            now,
            resources,
        }
    }
}

impl PlanRule for StagePlanner {
    fn name(&self) -> &'static str {
        "StagePlanner"
    }

    fn rewrite(&self, spec: Spec) -> StrataResult<Transformed<Spec>> {
        if !self.config.enable_stage_planning {
            return Ok(Transformed::no(spec));
        }
        let adjacency = spec.determine_parents_children_and_roots()?;
        let mut chains = vec![];
        for root in &adjacency.roots {
            let mut chain = self.eligible_chain(&spec, &adjacency, root);
            let ends_in_skip_point = chain
                .last()
                .and_then(|id| spec.operation(id))
                .is_some_and(|op| SKIP_POINT_KINDS.contains(&op.kind()));
            if ends_in_skip_point {
                chain.pop();
            }
            if !chain.is_empty() {
                chains.push(chain);
            }
        }
        if chains.is_empty() {
            return Ok(Transformed::no(spec));
        }
        // Chains are disjoint: every member past the root has exactly one parent.
        let spec = chains
            .iter()
            .fold(spec, |spec, chain| Self::extract_stage(spec, chain));
        spec.validate()?;
        Ok(Transformed::yes(spec))
    }
}
