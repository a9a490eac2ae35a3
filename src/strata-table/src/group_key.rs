use std::{
    fmt::{Display, Formatter, Result},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::Value;

/// Immutable partition identity carried by every [`crate::Table`].
///
/// Cloning is cheap; the column/value pairs are shared.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    entries: Arc<[(String, Value)]>,
}

impl GroupKey {
    pub fn new(entries: Vec<(String, Value)>) -> Self {
        Self {
            entries: entries.into(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(c, _)| c.as_str())
    }

    pub fn entries(&self) -> &[(String, Value)] {
        &self.entries
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v)
    }

    /// Returns a new key with `column` set to `value`, replacing an existing entry.
    #[must_use]
    pub fn with(&self, column: &str, value: Value) -> Self {
        let mut entries = self.entries.to_vec();
        match entries.iter_mut().find(|(c, _)| c == column) {
            Some(entry) => entry.1 = value,
            None => entries.push((column.to_string(), value)),
        }
        Self::new(entries)
    }
}

impl Display for GroupKey {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "{{")?;
        for (i, (column, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{column:?}={value}")?;
        }
        write!(f, "}}")
    }
}
