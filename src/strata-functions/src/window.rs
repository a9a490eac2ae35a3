use std::{any::Any, sync::Arc};

use common_error::{StrataError, StrataResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strata_plan::{
    kinds, operation_spec_as, procedure_spec_as, Administration, Operation, OperationSpec,
    ProcedureSpec,
};
use strata_table::{
    Bounds, Duration, Row, Table, Value, DEFAULT_START_COLUMN, DEFAULT_STOP_COLUMN,
    DEFAULT_TIME_COLUMN,
};
use tracing::instrument;

use crate::operator::TableOperator;

fn default_time_column() -> String {
    DEFAULT_TIME_COLUMN.to_string()
}

/// Splits rows into fixed, aligned windows of `every`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WindowOpSpec {
    pub every: Duration,
    #[serde(default = "default_time_column")]
    pub time_column: String,
}

impl WindowOpSpec {
    pub fn every(every: Duration) -> Self {
        Self {
            every,
            time_column: default_time_column(),
        }
    }
}

#[typetag::serde(name = "window")]
impl OperationSpec for WindowOpSpec {
    fn kind(&self) -> &str {
        kinds::WINDOW
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Clone, Debug)]
pub struct WindowProcedureSpec {
    pub every: Duration,
    pub time_column: String,
}

impl ProcedureSpec for WindowProcedureSpec {
    fn kind(&self) -> &str {
        kinds::WINDOW
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn create_window_procedure(
    op: &Operation,
    _admin: &dyn Administration,
) -> StrataResult<Arc<dyn ProcedureSpec>> {
    let spec = operation_spec_as::<WindowOpSpec>(op.spec.as_ref())?;
    if !spec.every.is_positive() {
        return Err(StrataError::ValueError(format!(
            "{} needs a positive window duration, got {}",
            op.id, spec.every
        )));
    }
    Ok(Arc::new(WindowProcedureSpec {
        every: spec.every,
        time_column: spec.time_column.clone(),
    }))
}

/// Assigns every row to the window holding its time and sets `_start`/`_stop` in the key.
///
/// Windows are clipped to the bounds reaching the node. Rows without a time are dropped.
pub struct WindowOperator {
    every: Duration,
    time_column: String,
    bounds: Option<Bounds>,
}

impl WindowOperator {
    pub fn try_new(spec: &dyn ProcedureSpec, bounds: Option<Bounds>) -> StrataResult<Self> {
        let spec = procedure_spec_as::<WindowProcedureSpec>(spec)?;
        Ok(Self {
            every: spec.every,
            time_column: spec.time_column.clone(),
            bounds,
        })
    }

    fn window_of(&self, row: &Row, idx: usize) -> Option<Bounds> {
        let t = row[idx].as_time()?;
        let start = t.truncate(self.every);
        let window = Bounds::new(start, start.add(self.every));
        let window = match self.bounds {
            Some(bounds) => window.intersect(&bounds),
            None => window,
        };
        (!window.is_empty()).then_some(window)
    }
}

impl TableOperator for WindowOperator {
    fn name(&self) -> &'static str {
        "WindowOperator"
    }

    #[instrument(skip_all, name = "WindowOperator::execute")]
    fn execute(&mut self, input: Table) -> StrataResult<Vec<Table>> {
        let idx = input.column_index(&self.time_column).ok_or_else(|| {
            StrataError::ValueError(format!(
                "window requires column {} in table {}",
                self.time_column,
                input.key()
            ))
        })?;
        let (key, columns, rows) = input.into_parts();
        let mut windows: IndexMap<Bounds, Vec<Row>> = IndexMap::new();
        for row in rows {
            if let Some(window) = self.window_of(&row, idx) {
                windows.entry(window).or_default().push(row);
            }
        }
        windows
            .into_iter()
            .map(|(window, rows)| {
                let key = key
                    .with(DEFAULT_START_COLUMN, Value::Time(window.start))
                    .with(DEFAULT_STOP_COLUMN, Value::Time(window.stop));
                Table::new(key, columns.clone(), rows)
            })
            .collect()
    }
}
