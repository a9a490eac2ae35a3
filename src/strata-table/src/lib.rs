mod group_key;
mod time;
mod value;

use std::fmt::{Display, Formatter};

use common_error::{StrataError, StrataResult};
pub use group_key::GroupKey;
pub use time::{Bounds, Duration, Time};
pub use value::Value;

pub type Row = Vec<Value>;

/// Conventional column names shared by time-series operations.
pub const DEFAULT_TIME_COLUMN: &str = "_time";
pub const DEFAULT_START_COLUMN: &str = "_start";
pub const DEFAULT_STOP_COLUMN: &str = "_stop";
pub const DEFAULT_VALUE_COLUMN: &str = "_value";

/// A batch of rows sharing one [`GroupKey`].
///
/// A table has exactly one owner. It is deliberately not `Clone`: handing the same batch
/// to a second consumer goes through [`Table::copy`].
#[derive(Debug, PartialEq)]
pub struct Table {
    key: GroupKey,
    columns: Vec<String>,
    rows: Vec<Row>,
}

#[inline]
fn validate_rows(columns: &[String], rows: &[Row]) -> StrataResult<()> {
    for (i, row) in rows.iter().enumerate() {
        if row.len() != columns.len() {
            return Err(StrataError::ValueError(format!(
                "While building a Table, row {i} had {} values but the table has {} columns",
                row.len(),
                columns.len()
            )));
        }
    }
    Ok(())
}

impl Table {
    pub fn new(key: GroupKey, columns: Vec<String>, rows: Vec<Row>) -> StrataResult<Self> {
        validate_rows(&columns, &rows)?;
        Ok(Self { key, columns, rows })
    }

    pub fn empty(key: GroupKey, columns: Vec<String>) -> Self {
        Self {
            key,
            columns,
            rows: vec![],
        }
    }

    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column_values<'a>(&'a self, name: &str) -> StrataResult<impl Iterator<Item = &'a Value>> {
        let idx = self.column_index(name).ok_or_else(|| {
            StrataError::ValueError(format!("column {name} not found in table {}", self.key))
        })?;
        Ok(self.rows.iter().map(move |row| &row[idx]))
    }

    /// Duplicates the batch for an additional consumer. This is a full copy of every row.
    pub fn copy(&self) -> Self {
        Self {
            key: self.key.clone(),
            columns: self.columns.clone(),
            rows: self.rows.clone(),
        }
    }

    pub fn into_parts(self) -> (GroupKey, Vec<String>, Vec<Row>) {
        (self.key, self.columns, self.rows)
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// Keeps only the rows for which `predicate` holds.
    pub fn filter_rows<F>(self, mut predicate: F) -> StrataResult<Self>
    where
        F: FnMut(&Row) -> StrataResult<bool>,
    {
        let mut kept = Vec::with_capacity(self.rows.len());
        for row in self.rows {
            if predicate(&row)? {
                kept.push(row);
            }
        }
        Ok(Self {
            key: self.key,
            columns: self.columns,
            rows: kept,
        })
    }
}

impl Display for Table {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Table {} ({} rows)", self.key, self.rows.len())?;
        writeln!(f, "{}", self.columns.join("\t"))?;
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(ToString::to_string).collect();
            writeln!(f, "{}", cells.join("\t"))?;
        }
        Ok(())
    }
}

/// Accumulates rows for one key.
#[derive(Debug)]
pub struct TableBuilder {
    key: GroupKey,
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl TableBuilder {
    pub fn new(key: GroupKey, columns: Vec<String>) -> Self {
        Self {
            key,
            columns,
            rows: vec![],
        }
    }

    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn append_row(&mut self, row: Row) -> StrataResult<()> {
        if row.len() != self.columns.len() {
            return Err(StrataError::ValueError(format!(
                "cannot append a row of {} values to a builder with {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Appends every row of `table`, matching columns by name. Missing columns become nulls.
    pub fn append_table(&mut self, table: Table) -> StrataResult<()> {
        if table.columns == self.columns {
            self.rows.extend(table.rows);
            return Ok(());
        }
        let mapping: Vec<Option<usize>> = self
            .columns
            .iter()
            .map(|c| table.column_index(c))
            .collect();
        for row in table.rows {
            self.rows.push(
                mapping
                    .iter()
                    .map(|idx| idx.map_or(Value::Null, |i| row[i].clone()))
                    .collect(),
            );
        }
        Ok(())
    }

    pub fn build(self) -> Table {
        Table {
            key: self.key,
            columns: self.columns,
            rows: self.rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(host: &str) -> GroupKey {
        GroupKey::new(vec![("host".into(), Value::from(host))])
    }

    #[test]
    fn rejects_ragged_rows() {
        let res = Table::new(
            key("a"),
            vec!["_time".into(), "_value".into()],
            vec![vec![Value::Int(1)]],
        );
        assert!(res.is_err());
    }

    #[test]
    fn copy_is_independent() -> StrataResult<()> {
        let table = Table::new(
            key("a"),
            vec!["_value".into()],
            vec![vec![Value::Int(1)], vec![Value::Int(2)]],
        )?;
        let copy = table.copy();
        let filtered = table.filter_rows(|row| Ok(row[0] == Value::Int(1)))?;
        assert_eq!(filtered.num_rows(), 1);
        assert_eq!(copy.num_rows(), 2);
        Ok(())
    }

    #[test]
    fn builder_aligns_columns_by_name() -> StrataResult<()> {
        let mut builder = TableBuilder::new(key("a"), vec!["_value".into(), "host".into()]);
        builder.append_table(Table::new(
            key("a"),
            vec!["host".into(), "_value".into()],
            vec![vec![Value::from("a"), Value::Int(3)]],
        )?)?;
        builder.append_table(Table::new(
            key("a"),
            vec!["_value".into()],
            vec![vec![Value::Int(4)]],
        )?)?;
        let table = builder.build();
        assert_eq!(
            table.rows(),
            &[
                vec![Value::Int(3), Value::from("a")],
                vec![Value::Int(4), Value::Null]
            ]
        );
        Ok(())
    }
}
