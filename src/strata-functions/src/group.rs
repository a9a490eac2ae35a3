use std::{any::Any, sync::Arc};

use common_error::StrataResult;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strata_plan::{
    kinds, operation_spec_as, procedure_spec_as, Administration, Operation, OperationSpec,
    ProcedureSpec,
};
use strata_table::{GroupKey, Row, Table, Value};
use tracing::instrument;

use crate::operator::TableOperator;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupMode {
    /// The new key is made of the listed columns.
    #[default]
    By,
    /// The new key is the current key without the listed columns.
    Except,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GroupOpSpec {
    #[serde(default)]
    pub mode: GroupMode,
    #[serde(default)]
    pub columns: Vec<String>,
}

impl GroupOpSpec {
    pub fn by(columns: &[&str]) -> Self {
        Self {
            mode: GroupMode::By,
            columns: columns.iter().map(ToString::to_string).collect(),
        }
    }

    pub fn except(columns: &[&str]) -> Self {
        Self {
            mode: GroupMode::Except,
            columns: columns.iter().map(ToString::to_string).collect(),
        }
    }
}

#[typetag::serde(name = "group")]
impl OperationSpec for GroupOpSpec {
    fn kind(&self) -> &str {
        kinds::GROUP
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Clone, Debug)]
pub struct GroupProcedureSpec {
    pub mode: GroupMode,
    pub columns: Vec<String>,
}

impl ProcedureSpec for GroupProcedureSpec {
    fn kind(&self) -> &str {
        kinds::GROUP
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn create_group_procedure(
    op: &Operation,
    _admin: &dyn Administration,
) -> StrataResult<Arc<dyn ProcedureSpec>> {
    let spec = operation_spec_as::<GroupOpSpec>(op.spec.as_ref())?;
    Ok(Arc::new(GroupProcedureSpec {
        mode: spec.mode,
        columns: spec.columns.clone(),
    }))
}

/// Re-keys rows. A row column wins over a key column of the same name; columns found in
/// neither are left out of the new key.
pub struct GroupOperator {
    mode: GroupMode,
    columns: Vec<String>,
}

impl GroupOperator {
    pub fn try_new(spec: &dyn ProcedureSpec) -> StrataResult<Self> {
        let spec = procedure_spec_as::<GroupProcedureSpec>(spec)?;
        Ok(Self {
            mode: spec.mode,
            columns: spec.columns.clone(),
        })
    }

    fn key_for(&self, key: &GroupKey, row_columns: &[(String, usize)], row: &Row) -> GroupKey {
        match self.mode {
            GroupMode::Except => GroupKey::new(
                key.entries()
                    .iter()
                    .filter(|(c, _)| !self.columns.contains(c))
                    .cloned()
                    .collect(),
            ),
            GroupMode::By => {
                let mut entries: Vec<(String, Value)> = Vec::with_capacity(self.columns.len());
                for column in &self.columns {
                    let value = match row_columns.iter().find(|(c, _)| c == column) {
                        Some((_, idx)) => Some(row[*idx].clone()),
                        None => key.get(column).cloned(),
                    };
                    if let Some(value) = value {
                        entries.push((column.clone(), value));
                    }
                }
                GroupKey::new(entries)
            }
        }
    }
}

impl TableOperator for GroupOperator {
    fn name(&self) -> &'static str {
        "GroupOperator"
    }

    #[instrument(skip_all, name = "GroupOperator::execute")]
    fn execute(&mut self, input: Table) -> StrataResult<Vec<Table>> {
        let row_columns: Vec<(String, usize)> = match self.mode {
            GroupMode::By => self
                .columns
                .iter()
                .filter_map(|c| input.column_index(c).map(|idx| (c.clone(), idx)))
                .collect(),
            GroupMode::Except => vec![],
        };
        let (key, columns, rows) = input.into_parts();
        if row_columns.is_empty() {
            // Only key columns are involved: every row lands under the same new key.
            let new_key = self.key_for(&key, &[], &Row::new());
            return Ok(vec![Table::new(new_key, columns, rows)?]);
        }
        let mut groups: IndexMap<GroupKey, Vec<Row>> = IndexMap::new();
        for row in rows {
            let new_key = self.key_for(&key, &row_columns, &row);
            groups.entry(new_key).or_default().push(row);
        }
        groups
            .into_iter()
            .map(|(key, rows)| Table::new(key, columns.clone(), rows))
            .collect()
    }
}
