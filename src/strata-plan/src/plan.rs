use std::{
    fmt::{Display, Formatter},
    sync::Arc,
};

use common_error::{StrataError, StrataResult};
use indexmap::IndexMap;
use strata_table::{Bounds, Time};

use crate::{
    procedure::{PlanAdministration, ProcedureRegistry, ProcedureSpec},
    spec::{OperationId, ResourceManagement, Spec},
    stage::StageProcedureSpec,
};

pub type ProcedurePlanRef = Arc<ProcedurePlan>;

/// One node of a [`ProcedurePlan`].
#[derive(Debug, Clone)]
pub struct PlanNode {
    pub id: OperationId,
    pub spec: Arc<dyn ProcedureSpec>,
    pub predecessors: Vec<OperationId>,
    pub successors: Vec<OperationId>,
    /// Own bounds, the embedded plan's bounds for a stage, or the first bounded predecessor's.
    pub bounds: Option<Bounds>,
    /// Plan of the sub-graph carried by a stage node.
    pub embedded: Option<ProcedurePlanRef>,
}

impl PlanNode {
    pub fn kind(&self) -> &str {
        self.spec.kind()
    }

    pub fn is_root(&self) -> bool {
        self.predecessors.is_empty()
    }

    pub fn is_leaf(&self) -> bool {
        self.successors.is_empty()
    }
}

/// A validated query graph resolved into procedure specs, nodes in topological order.
#[derive(Debug, Clone)]
pub struct ProcedurePlan {
    nodes: IndexMap<OperationId, PlanNode>,
    roots: Vec<OperationId>,
    now: Time,
    resources: ResourceManagement,
}

impl ProcedurePlan {
    pub fn build(spec: &Spec, registry: &ProcedureRegistry) -> StrataResult<Self> {
        let adjacency = spec.determine_parents_children_and_roots()?;
        let admin = PlanAdministration::from_spec(spec);
        let mut nodes: IndexMap<OperationId, PlanNode> = IndexMap::new();
        for op in spec.topological_order()? {
            let procedure = registry.create_procedure_spec(op, &admin)?;
            let embedded = match procedure.as_any().downcast_ref::<StageProcedureSpec>() {
                Some(stage) => Some(Arc::new(Self::build(&stage.spec, registry)?)),
                None => None,
            };
            let predecessors = adjacency.parents_of(&op.id).to_vec();
            let bounds = procedure
                .bounds(spec.now)
                .or_else(|| embedded.as_ref().and_then(|plan| plan.bounds()))
                .or_else(|| {
                    predecessors
                        .iter()
                        .find_map(|p| nodes.get(p).and_then(|n| n.bounds))
                });
            nodes.insert(
                op.id.clone(),
                PlanNode {
                    id: op.id.clone(),
                    spec: procedure,
                    predecessors,
                    successors: adjacency.children_of(&op.id).to_vec(),
                    bounds,
                    embedded,
                },
            );
        }
        Ok(Self {
            nodes,
            roots: adjacency.roots,
            now: spec.now,
            resources: spec.resources.clone(),
        })
    }

    pub fn node(&self, id: &OperationId) -> StrataResult<&PlanNode> {
        self.nodes
            .get(id)
            .ok_or_else(|| StrataError::InternalError(format!("plan has no node {id}")))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &PlanNode> {
        self.nodes.values()
    }

    pub fn roots(&self) -> &[OperationId] {
        &self.roots
    }

    pub fn leaves(&self) -> impl Iterator<Item = &PlanNode> {
        self.nodes.values().filter(|n| n.is_leaf())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn now(&self) -> Time {
        self.now
    }

    pub fn resources(&self) -> &ResourceManagement {
        &self.resources
    }

    /// Bounds reaching the plan's output: those of the first bounded leaf.
    pub fn bounds(&self) -> Option<Bounds> {
        self.leaves().find_map(|n| n.bounds)
    }

    fn fmt_indented(&self, f: &mut Formatter<'_>, depth: usize) -> std::fmt::Result {
        for node in self.nodes.values() {
            write!(f, "{:indent$}{} [{}]", "", node.id, node.kind(), indent = depth * 2)?;
            if let Some(bounds) = node.bounds {
                write!(f, " bounds={bounds}")?;
            }
            if !node.successors.is_empty() {
                let succ: Vec<_> = node.successors.iter().map(OperationId::as_str).collect();
                write!(f, " -> {}", succ.join(", "))?;
            }
            writeln!(f)?;
            if let Some(embedded) = &node.embedded {
                embedded.fmt_indented(f, depth + 1)?;
            }
        }
        Ok(())
    }
}

impl Display for ProcedurePlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.fmt_indented(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use common_error::StrataResult;
    use common_strata_config::PlanningConfig;
    use strata_table::{Bounds, Time};

    use super::*;
    use crate::{test::{test_registry, TestOp}, Planner, PushDownRegistry};

    fn staged() -> StrataResult<Spec> {
        let spec = Spec::new(Time(0))
            .with_operation("from", TestOp::new("from"))
            .with_operation("range", TestOp::new("range"))
            .with_operation("filter", TestOp::new("filter"))
            .with_operation("group", TestOp::new("group"))
            .with_operation("sum", TestOp::new("sum"))
            .with_edge("from", "range")
            .with_edge("range", "filter")
            .with_edge("filter", "group")
            .with_edge("group", "sum");
        Planner::with_stage_planning(
            Arc::new(PushDownRegistry::with_defaults()),
            PlanningConfig::default(),
        )
        .plan(spec)
    }

    #[test]
    fn stage_nodes_embed_their_sub_plan() -> StrataResult<()> {
        let plan = ProcedurePlan::build(&staged()?, &test_registry())?;
        assert_eq!(plan.roots(), &[OperationId::from("stage0")]);
        let stage = plan.node(&"stage0".into())?;
        assert_eq!(stage.kind(), "stage");
        let embedded = stage.embedded.as_ref().expect("embedded plan");
        assert_eq!(embedded.len(), 3);
        assert_eq!(embedded.roots(), &[OperationId::from("from")]);
        assert_eq!(
            embedded.leaves().map(|n| n.id.as_str()).collect::<Vec<_>>(),
            vec!["filter"]
        );
        Ok(())
    }

    #[test]
    fn bounds_flow_from_range_through_the_stage() -> StrataResult<()> {
        let plan = ProcedurePlan::build(&staged()?, &test_registry())?;
        let expected = Some(Bounds::new(Time(0), Time(100)));
        assert_eq!(plan.node(&"stage0".into())?.bounds, expected);
        assert_eq!(plan.node(&"group".into())?.bounds, expected);
        assert_eq!(plan.node(&"sum".into())?.bounds, expected);
        let embedded = plan.node(&"stage0".into())?.embedded.clone().expect("embedded plan");
        assert_eq!(embedded.node(&"from".into())?.bounds, None);
        Ok(())
    }

    #[test]
    fn unknown_kinds_fail_the_build() -> StrataResult<()> {
        let spec = Spec::new(Time(0)).with_operation("x", TestOp::new("mystery"));
        assert!(ProcedurePlan::build(&spec, &test_registry()).is_err());
        Ok(())
    }

    #[test]
    fn display_nests_stage_plans() -> StrataResult<()> {
        let plan = ProcedurePlan::build(&staged()?, &test_registry())?;
        let rendered = plan.to_string();
        assert!(rendered.starts_with("stage0 [stage]"));
        assert!(rendered.contains("\n  from [from] -> range\n"));
        Ok(())
    }
}
