use std::{any::Any, sync::Arc};

use common_error::{StrataError, StrataResult};
use serde::{Deserialize, Serialize};
use strata_plan::{
    kinds, operation_spec_as, procedure_spec_as, Administration, Operation, OperationSpec,
    ProcedureSpec,
};
use strata_table::{Table, DEFAULT_VALUE_COLUMN};
use tracing::instrument;

use crate::operator::TableOperator;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selector {
    First,
    Last,
}

impl Selector {
    fn kind(self) -> &'static str {
        match self {
            Self::First => kinds::FIRST,
            Self::Last => kinds::LAST,
        }
    }
}

fn default_value_column() -> String {
    DEFAULT_VALUE_COLUMN.to_string()
}

/// Keeps the first row of each table whose `column` is not null.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FirstOpSpec {
    #[serde(default = "default_value_column")]
    pub column: String,
}

/// Keeps the last row of each table whose `column` is not null.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LastOpSpec {
    #[serde(default = "default_value_column")]
    pub column: String,
}

impl Default for FirstOpSpec {
    fn default() -> Self {
        Self {
            column: default_value_column(),
        }
    }
}

impl Default for LastOpSpec {
    fn default() -> Self {
        Self {
            column: default_value_column(),
        }
    }
}

#[typetag::serde(name = "first")]
impl OperationSpec for FirstOpSpec {
    fn kind(&self) -> &str {
        kinds::FIRST
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[typetag::serde(name = "last")]
impl OperationSpec for LastOpSpec {
    fn kind(&self) -> &str {
        kinds::LAST
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Clone, Debug)]
pub struct SelectorProcedureSpec {
    pub selector: Selector,
    pub column: String,
}

impl ProcedureSpec for SelectorProcedureSpec {
    fn kind(&self) -> &str {
        self.selector.kind()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn create_first_procedure(
    op: &Operation,
    _admin: &dyn Administration,
) -> StrataResult<Arc<dyn ProcedureSpec>> {
    let spec = operation_spec_as::<FirstOpSpec>(op.spec.as_ref())?;
    Ok(Arc::new(SelectorProcedureSpec {
        selector: Selector::First,
        column: spec.column.clone(),
    }))
}

pub(crate) fn create_last_procedure(
    op: &Operation,
    _admin: &dyn Administration,
) -> StrataResult<Arc<dyn ProcedureSpec>> {
    let spec = operation_spec_as::<LastOpSpec>(op.spec.as_ref())?;
    Ok(Arc::new(SelectorProcedureSpec {
        selector: Selector::Last,
        column: spec.column.clone(),
    }))
}

pub struct SelectorOperator {
    selector: Selector,
    column: String,
}

impl SelectorOperator {
    pub fn try_new(spec: &dyn ProcedureSpec) -> StrataResult<Self> {
        let spec = procedure_spec_as::<SelectorProcedureSpec>(spec)?;
        Ok(Self {
            selector: spec.selector,
            column: spec.column.clone(),
        })
    }
}

impl TableOperator for SelectorOperator {
    fn name(&self) -> &'static str {
        match self.selector {
            Selector::First => "FirstOperator",
            Selector::Last => "LastOperator",
        }
    }

    #[instrument(skip_all, name = "SelectorOperator::execute")]
    fn execute(&mut self, input: Table) -> StrataResult<Vec<Table>> {
        let idx = input.column_index(&self.column).ok_or_else(|| {
            StrataError::ValueError(format!(
                "{} requires column {} in table {}",
                self.selector.kind(),
                self.column,
                input.key()
            ))
        })?;
        let (key, columns, rows) = input.into_parts();
        let mut candidates = rows.into_iter().filter(|row| !row[idx].is_null());
        let selected = match self.selector {
            Selector::First => candidates.next(),
            Selector::Last => candidates.last(),
        };
        Ok(vec![Table::new(key, columns, selected.into_iter().collect())?])
    }
}
