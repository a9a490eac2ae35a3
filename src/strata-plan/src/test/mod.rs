use std::{any::Any, sync::Arc};

use common_error::StrataResult;
use serde::{Deserialize, Serialize};
use strata_table::{Bounds, Time};

use crate::{
    spec::OperationSpec, Administration, Operation, ProcedureRegistry, ProcedureSpec,
};

/// Operation payload that only carries its kind, enough to drive planning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestOp {
    name: String,
}

impl TestOp {
    pub fn new(kind: &str) -> Self {
        Self {
            name: kind.to_string(),
        }
    }
}

#[typetag::serde(name = "test")]
impl OperationSpec for TestOp {
    fn kind(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Clone, Debug)]
pub struct TestProcedure {
    pub kind: String,
    pub bounds: Option<Bounds>,
}

impl ProcedureSpec for TestProcedure {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn bounds(&self, _now: Time) -> Option<Bounds> {
        self.bounds
    }
}

fn create_test_procedure(
    op: &Operation,
    _admin: &dyn Administration,
) -> StrataResult<Arc<dyn ProcedureSpec>> {
    // "range" nodes get fixed bounds so inheritance can be observed.
    let bounds = (op.kind() == "range").then(|| Bounds::new(Time(0), Time(100)));
    Ok(Arc::new(TestProcedure {
        kind: op.kind().to_string(),
        bounds,
    }))
}

/// Registry that maps every kind used in these tests to [`TestProcedure`].
pub fn test_registry() -> ProcedureRegistry {
    let mut builder = ProcedureRegistry::builder();
    for kind in ["from", "range", "filter", "group", "window", "sum", "yield", "pivot"] {
        builder.register_procedure_spec(kind, Arc::new(create_test_procedure), kind);
    }
    builder.build()
}
