use std::{any::Any, sync::Arc};

use common_error::{StrataError, StrataResult};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use strata_plan::{
    kinds, operation_spec_as, procedure_spec_as, Administration, Operation, OperationSpec,
    ProcedureSpec,
};
use strata_table::Table;
use tracing::instrument;

use crate::operator::TableOperator;

fn random_pos() -> i64 {
    -1
}

/// Keeps every `n`-th row of a table starting at `pos`. A negative `pos` picks a random
/// offset per table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SampleOpSpec {
    pub n: i64,
    #[serde(default = "random_pos")]
    pub pos: i64,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl SampleOpSpec {
    pub fn new(n: i64, pos: i64) -> Self {
        Self { n, pos, seed: None }
    }
}

#[typetag::serde(name = "sample")]
impl OperationSpec for SampleOpSpec {
    fn kind(&self) -> &str {
        kinds::SAMPLE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Clone, Debug)]
pub struct SampleProcedureSpec {
    pub n: usize,
    pub pos: Option<usize>,
    pub seed: Option<u64>,
}

impl ProcedureSpec for SampleProcedureSpec {
    fn kind(&self) -> &str {
        kinds::SAMPLE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn create_sample_procedure(
    op: &Operation,
    _admin: &dyn Administration,
) -> StrataResult<Arc<dyn ProcedureSpec>> {
    let spec = operation_spec_as::<SampleOpSpec>(op.spec.as_ref())?;
    let n = usize::try_from(spec.n)
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| {
            StrataError::ValueError(format!("{}: n must be positive, got {}", op.id, spec.n))
        })?;
    let pos = usize::try_from(spec.pos).ok();
    if pos.is_some_and(|pos| pos >= n) {
        return Err(StrataError::ValueError(format!(
            "{}: pos must be less than n ({} >= {n})",
            op.id, spec.pos
        )));
    }
    Ok(Arc::new(SampleProcedureSpec {
        n,
        pos,
        seed: spec.seed,
    }))
}

pub struct SampleOperator {
    n: usize,
    pos: Option<usize>,
    rng: StdRng,
}

impl SampleOperator {
    pub fn try_new(spec: &dyn ProcedureSpec) -> StrataResult<Self> {
        let spec = procedure_spec_as::<SampleProcedureSpec>(spec)?;
        let rng = match spec.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            n: spec.n,
            pos: spec.pos,
            rng,
        })
    }
}

impl TableOperator for SampleOperator {
    fn name(&self) -> &'static str {
        "SampleOperator"
    }

    #[instrument(skip_all, name = "SampleOperator::execute")]
    fn execute(&mut self, input: Table) -> StrataResult<Vec<Table>> {
        let pos = match self.pos {
            Some(pos) => pos,
            None => self.rng.gen_range(0..self.n),
        };
        let (key, columns, rows) = input.into_parts();
        let rows = rows
            .into_iter()
            .skip(pos)
            .step_by(self.n)
            .collect();
        Ok(vec![Table::new(key, columns, rows)?])
    }
}
