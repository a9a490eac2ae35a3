use std::{any::Any, sync::Arc};

use common_error::StrataResult;
use serde::{Deserialize, Serialize};
use strata_table::Time;

use crate::{
    procedure::{Administration, ProcedureSpec},
    spec::{operation_spec_as, Edge, Operation, OperationSpec, Spec},
};

pub const STAGE_KIND: &str = "stage";

/// Payload of a stage operation: the extracted, independently executable sub-graph.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StageOperationSpec {
    pub spec: Spec,
}

impl StageOperationSpec {
    pub fn new(now: Time) -> Self {
        Self {
            spec: Spec::new(now),
        }
    }

    pub fn add_operation(&mut self, operation: Operation) {
        self.spec.add_operation(operation);
    }

    pub fn add_edge(&mut self, edge: Edge) {
        self.spec.add_edge(edge);
    }
}

#[typetag::serde(name = "stage")]
impl OperationSpec for StageOperationSpec {
    fn kind(&self) -> &str {
        STAGE_KIND
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Clone, Debug)]
pub struct StageProcedureSpec {
    pub spec: Spec,
}

impl ProcedureSpec for StageProcedureSpec {
    fn kind(&self) -> &str {
        STAGE_KIND
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn create_stage_procedure_spec(
    op: &Operation,
    _admin: &dyn Administration,
) -> StrataResult<Arc<dyn ProcedureSpec>> {
    let stage = operation_spec_as::<StageOperationSpec>(op.spec.as_ref())?;
    stage.spec.validate()?;
    Ok(Arc::new(StageProcedureSpec {
        spec: stage.spec.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test::TestOp, PlanAdministration};

    fn stage() -> StageOperationSpec {
        let mut stage = StageOperationSpec::new(Time(5));
        stage.add_operation(Operation::new("from", TestOp::new("from")));
        stage.add_operation(Operation::new("range", TestOp::new("range")));
        stage.add_edge(Edge::new("from", "range"));
        stage
    }

    #[test]
    fn nested_spec_round_trips_through_json() -> StrataResult<()> {
        let outer = Spec::new(Time(5)).with_operation("stage0", stage());
        let json = serde_json::to_string(&outer)?;
        let back: Spec = serde_json::from_str(&json)?;
        let stage = operation_spec_as::<StageOperationSpec>(back.operations[0].spec.as_ref())?;
        assert_eq!(stage.spec.operations.len(), 2);
        assert_eq!(stage.spec.edges, vec![Edge::new("from", "range")]);
        assert_eq!(stage.spec.now, Time(5));
        Ok(())
    }

    #[test]
    fn procedure_spec_rejects_invalid_payload() {
        let mut bad = stage();
        bad.add_edge(Edge::new("range", "nowhere"));
        let op = Operation::new("stage0", bad);
        assert!(create_stage_procedure_spec(&op, &PlanAdministration::default()).is_err());

        let not_a_stage = Operation::new("stage0", TestOp::new("stage"));
        assert!(create_stage_procedure_spec(&not_a_stage, &PlanAdministration::default()).is_err());
    }
}
