mod optimization;
mod plan;
mod procedure;
mod push_down;
mod spec;
mod stage;

#[cfg(test)]
mod test;

pub use optimization::{
    PlanRule, PlanRuleBatch, Planner, PlannerConfig, RuleExecutionStrategy, StagePlanner,
    Transformed,
};
pub use plan::{PlanNode, ProcedurePlan, ProcedurePlanRef};
pub use procedure::{
    procedure_spec_as, Administration, CreateProcedureSpec, PlanAdministration,
    ProcedureRegistry, ProcedureRegistryBuilder, ProcedureSpec,
};
pub use push_down::{
    kinds, PushDownPredicate, PushDownRegistry, GROUPING_BOUNDARY_KINDS, SKIP_POINT_KINDS,
};
pub use spec::{
    operation_spec_as, Adjacency, Edge, Operation, OperationId, OperationSpec,
    ResourceManagement, Spec,
};
pub use stage::{StageOperationSpec, StageProcedureSpec, STAGE_KIND};
