use std::{any::Any, sync::Arc};

use common_error::{StrataError, StrataResult};
use serde::{Deserialize, Serialize};
use strata_plan::{
    kinds, operation_spec_as, procedure_spec_as, Administration, Operation, OperationSpec,
    ProcedureSpec,
};
use strata_table::{
    Bounds, Duration, Table, Time, Value, DEFAULT_START_COLUMN, DEFAULT_STOP_COLUMN,
    DEFAULT_TIME_COLUMN,
};
use tracing::instrument;

use crate::operator::TableOperator;

/// One end of a range: a fixed time, or an offset from the query's `now`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBound {
    Absolute(Time),
    Relative(Duration),
}

impl TimeBound {
    pub fn resolve(self, now: Time) -> Time {
        match self {
            Self::Absolute(t) => t,
            Self::Relative(d) => now.add(d),
        }
    }
}

impl Default for TimeBound {
    fn default() -> Self {
        Self::Relative(Duration::ZERO)
    }
}

fn default_time_column() -> String {
    DEFAULT_TIME_COLUMN.to_string()
}

/// Keeps rows whose time falls in `[start, stop)`; `stop` defaults to now.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RangeOpSpec {
    pub start: TimeBound,
    #[serde(default)]
    pub stop: TimeBound,
    #[serde(default = "default_time_column")]
    pub time_column: String,
}

impl RangeOpSpec {
    pub fn new(start: TimeBound, stop: TimeBound) -> Self {
        Self {
            start,
            stop,
            time_column: default_time_column(),
        }
    }

    pub fn absolute(start: i64, stop: i64) -> Self {
        Self::new(TimeBound::Absolute(Time(start)), TimeBound::Absolute(Time(stop)))
    }
}

#[typetag::serde(name = "range")]
impl OperationSpec for RangeOpSpec {
    fn kind(&self) -> &str {
        kinds::RANGE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Clone, Debug)]
pub struct RangeProcedureSpec {
    pub bounds: Bounds,
    pub time_column: String,
}

impl ProcedureSpec for RangeProcedureSpec {
    fn kind(&self) -> &str {
        kinds::RANGE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn bounds(&self, _now: Time) -> Option<Bounds> {
        Some(self.bounds)
    }
}

pub(crate) fn create_range_procedure(
    op: &Operation,
    admin: &dyn Administration,
) -> StrataResult<Arc<dyn ProcedureSpec>> {
    let spec = operation_spec_as::<RangeOpSpec>(op.spec.as_ref())?;
    let now = admin.now();
    let bounds = Bounds::new(spec.start.resolve(now), spec.stop.resolve(now));
    if bounds.is_empty() {
        return Err(StrataError::ValueError(format!(
            "{} cannot query an empty range {bounds}",
            op.id
        )));
    }
    Ok(Arc::new(RangeProcedureSpec {
        bounds,
        time_column: spec.time_column.clone(),
    }))
}

/// Drops rows outside the bounds and records the bounds in the group key.
pub struct RangeOperator {
    bounds: Bounds,
    time_column: String,
}

impl RangeOperator {
    pub fn try_new(spec: &dyn ProcedureSpec) -> StrataResult<Self> {
        let spec = procedure_spec_as::<RangeProcedureSpec>(spec)?;
        Ok(Self {
            bounds: spec.bounds,
            time_column: spec.time_column.clone(),
        })
    }
}

impl TableOperator for RangeOperator {
    fn name(&self) -> &'static str {
        "RangeOperator"
    }

    #[instrument(skip_all, name = "RangeOperator::execute")]
    fn execute(&mut self, input: Table) -> StrataResult<Vec<Table>> {
        let idx = input.column_index(&self.time_column).ok_or_else(|| {
            StrataError::ValueError(format!(
                "range requires column {} in table {}",
                self.time_column,
                input.key()
            ))
        })?;
        let (key, columns, rows) = input.into_parts();
        let rows = rows
            .into_iter()
            .filter(|row| row[idx].as_time().is_some_and(|t| self.bounds.contains(t)))
            .collect();
        let key = key
            .with(DEFAULT_START_COLUMN, Value::Time(self.bounds.start))
            .with(DEFAULT_STOP_COLUMN, Value::Time(self.bounds.stop));
        Ok(vec![Table::new(key, columns, rows)?])
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use strata_plan::{PlanAdministration, ResourceManagement};

    use super::*;
    use crate::test::{host_table, host_values};

    fn admin(now: i64) -> PlanAdministration {
        PlanAdministration::new(Time(now), ResourceManagement::default())
    }

    #[rstest]
    #[case(TimeBound::Relative(Duration(-10)), TimeBound::default(), (90, 100))]
    #[case(TimeBound::Absolute(Time(5)), TimeBound::Relative(Duration(-50)), (5, 50))]
    #[case(TimeBound::Absolute(Time(0)), TimeBound::Absolute(Time(7)), (0, 7))]
    fn bounds_resolve_against_now(
        #[case] start: TimeBound,
        #[case] stop: TimeBound,
        #[case] expected: (i64, i64),
    ) -> StrataResult<()> {
        let op = Operation::new("range", RangeOpSpec::new(start, stop));
        let spec = create_range_procedure(&op, &admin(100))?;
        let expected = Bounds::new(Time(expected.0), Time(expected.1));
        assert_eq!(spec.bounds(Time(0)), Some(expected));
        Ok(())
    }

    #[test]
    fn empty_ranges_are_rejected() {
        let op = Operation::new("range", RangeOpSpec::absolute(10, 10));
        let res = create_range_procedure(&op, &admin(0));
        assert!(matches!(res, Err(StrataError::ValueError(_))));
    }

    #[test]
    fn keeps_rows_inside_the_half_open_range() -> StrataResult<()> {
        let spec = create_range_procedure(
            &Operation::new("range", RangeOpSpec::absolute(10, 20)),
            &admin(0),
        )?;
        let mut op = RangeOperator::try_new(spec.as_ref())?;
        let out = op.execute(host_table("a", &[(9, 1), (10, 2), (19, 3), (20, 4)]))?;
        assert_eq!(out.len(), 1);
        assert_eq!(host_values(&out[0]), ("a".to_string(), vec![2, 3]));
        assert_eq!(out[0].key().get(DEFAULT_STOP_COLUMN), Some(&Value::Time(Time(20))));
        Ok(())
    }

    #[test]
    fn missing_time_column_is_an_error() -> StrataResult<()> {
        let spec = create_range_procedure(
            &Operation::new("range", RangeOpSpec::absolute(0, 10)),
            &admin(0),
        )?;
        let mut op = RangeOperator::try_new(spec.as_ref())?;
        let table = Table::empty(crate::test::host_key("a"), vec!["_value".to_string()]);
        assert!(matches!(op.execute(table), Err(StrataError::ValueError(_))));
        Ok(())
    }
}
