use std::{any::Any, sync::Arc};

use common_error::{StrataError, StrataResult};
use serde::{Deserialize, Serialize};
use strata_plan::{
    kinds, operation_spec_as, procedure_spec_as, Administration, Operation, OperationSpec,
    ProcedureSpec,
};
use strata_table::{Table, Value, DEFAULT_VALUE_COLUMN};
use tracing::instrument;

use crate::operator::TableOperator;

fn default_columns() -> Vec<String> {
    vec![DEFAULT_VALUE_COLUMN.to_string()]
}

/// Sums each listed column over a table into a single row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SumOpSpec {
    #[serde(default = "default_columns")]
    pub columns: Vec<String>,
}

impl Default for SumOpSpec {
    fn default() -> Self {
        Self {
            columns: default_columns(),
        }
    }
}

#[typetag::serde(name = "sum")]
impl OperationSpec for SumOpSpec {
    fn kind(&self) -> &str {
        kinds::SUM
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Clone, Debug)]
pub struct SumProcedureSpec {
    pub columns: Vec<String>,
}

impl ProcedureSpec for SumProcedureSpec {
    fn kind(&self) -> &str {
        kinds::SUM
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn create_sum_procedure(
    op: &Operation,
    _admin: &dyn Administration,
) -> StrataResult<Arc<dyn ProcedureSpec>> {
    let spec = operation_spec_as::<SumOpSpec>(op.spec.as_ref())?;
    if spec.columns.is_empty() {
        return Err(StrataError::ValueError(format!(
            "{} must sum at least one column",
            op.id
        )));
    }
    Ok(Arc::new(SumProcedureSpec {
        columns: spec.columns.clone(),
    }))
}

/// Running sum of one column. Stays integral while every input is of one integer type.
#[derive(Debug, Default)]
enum Accumulator {
    #[default]
    Empty,
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Accumulator {
    fn add(self, column: &str, value: &Value) -> StrataResult<Self> {
        let overflow = || StrataError::ComputeError(format!("sum of {column} overflowed"));
        Ok(match (self, value) {
            (acc, Value::Null) => acc,
            (Self::Empty, Value::Int(v)) => Self::Int(*v),
            (Self::Empty, Value::UInt(v)) => Self::UInt(*v),
            (Self::Int(a), Value::Int(v)) => Self::Int(a.checked_add(*v).ok_or_else(overflow)?),
            (Self::UInt(a), Value::UInt(v)) => Self::UInt(a.checked_add(*v).ok_or_else(overflow)?),
            (acc, v) => {
                let v = v.as_f64().ok_or_else(|| {
                    StrataError::TypeError(format!(
                        "cannot sum {} value {v} in column {column}",
                        v.type_name()
                    ))
                })?;
                Self::Float(acc.as_f64() + v)
            }
        })
    }

    fn as_f64(&self) -> f64 {
        match self {
            Self::Empty => 0.0,
            Self::Int(v) => *v as f64,
            Self::UInt(v) => *v as f64,
            Self::Float(v) => *v,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Self::Empty => Value::Null,
            Self::Int(v) => Value::Int(v),
            Self::UInt(v) => Value::UInt(v),
            Self::Float(v) => Value::Float(v),
        }
    }
}

pub struct SumOperator {
    columns: Vec<String>,
}

impl SumOperator {
    pub fn try_new(spec: &dyn ProcedureSpec) -> StrataResult<Self> {
        let spec = procedure_spec_as::<SumProcedureSpec>(spec)?;
        Ok(Self {
            columns: spec.columns.clone(),
        })
    }
}

impl TableOperator for SumOperator {
    fn name(&self) -> &'static str {
        "SumOperator"
    }

    #[instrument(skip_all, name = "SumOperator::execute")]
    fn execute(&mut self, input: Table) -> StrataResult<Vec<Table>> {
        let mut row = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let mut acc = Accumulator::default();
            for value in input.column_values(column)? {
                acc = acc.add(column, value)?;
            }
            row.push(acc.into_value());
        }
        Ok(vec![Table::new(
            input.key().clone(),
            self.columns.clone(),
            vec![row],
        )?])
    }
}
