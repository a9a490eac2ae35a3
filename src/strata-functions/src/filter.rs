use std::{any::Any, cmp::Ordering, sync::Arc};

use common_error::StrataResult;
use serde::{Deserialize, Serialize};
use strata_plan::{
    kinds, operation_spec_as, procedure_spec_as, Administration, Operation, OperationSpec,
    ProcedureSpec,
};
use strata_table::{GroupKey, Table, Value};
use tracing::instrument;

use crate::operator::TableOperator;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }
}

/// `column <op> value`. The column is looked up in the row, then in the group key.
///
/// Nulls, missing columns and values of incomparable types never match.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    pub op: CompareOp,
    pub value: Value,
}

impl Predicate {
    pub fn new(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    fn matches(&self, cell: Option<&Value>) -> bool {
        match cell {
            Some(v) if !v.is_null() => v
                .compare(&self.value)
                .is_some_and(|ordering| self.op.accepts(ordering)),
            _ => false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilterOpSpec {
    pub predicate: Predicate,
}

#[typetag::serde(name = "filter")]
impl OperationSpec for FilterOpSpec {
    fn kind(&self) -> &str {
        kinds::FILTER
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Clone, Debug)]
pub struct FilterProcedureSpec {
    pub predicate: Predicate,
}

impl ProcedureSpec for FilterProcedureSpec {
    fn kind(&self) -> &str {
        kinds::FILTER
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn create_filter_procedure(
    op: &Operation,
    _admin: &dyn Administration,
) -> StrataResult<Arc<dyn ProcedureSpec>> {
    let spec = operation_spec_as::<FilterOpSpec>(op.spec.as_ref())?;
    Ok(Arc::new(FilterProcedureSpec {
        predicate: spec.predicate.clone(),
    }))
}

pub struct FilterOperator {
    predicate: Predicate,
}

impl FilterOperator {
    pub fn try_new(spec: &dyn ProcedureSpec) -> StrataResult<Self> {
        let spec = procedure_spec_as::<FilterProcedureSpec>(spec)?;
        Ok(Self {
            predicate: spec.predicate.clone(),
        })
    }

    fn key_value<'a>(&self, key: &'a GroupKey) -> Option<&'a Value> {
        key.get(&self.predicate.column)
    }
}

impl TableOperator for FilterOperator {
    fn name(&self) -> &'static str {
        "FilterOperator"
    }

    #[instrument(skip_all, name = "FilterOperator::execute")]
    fn execute(&mut self, input: Table) -> StrataResult<Vec<Table>> {
        let output = match input.column_index(&self.predicate.column) {
            Some(idx) => input.filter_rows(|row| Ok(self.predicate.matches(Some(&row[idx]))))?,
            // Key columns are constant across the table: all rows pass or none do.
            None if self.predicate.matches(self.key_value(input.key())) => input,
            None => Table::empty(input.key().clone(), input.columns().to_vec()),
        };
        Ok(vec![output])
    }
}
