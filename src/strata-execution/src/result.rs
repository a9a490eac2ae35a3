use common_error::{StrataError, StrataResult};
use strata_table::{GroupKey, Table, Time};
use tokio::sync::oneshot;

use crate::dataset::{DatasetId, Transformation};

/// Collects the tables reaching one leaf of a query and hands them over when it finishes.
pub struct ResultSink {
    tables: Vec<Table>,
    tx: Option<oneshot::Sender<StrataResult<Vec<Table>>>>,
}

impl ResultSink {
    pub fn new() -> (Self, oneshot::Receiver<StrataResult<Vec<Table>>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tables: vec![],
                tx: Some(tx),
            },
            rx,
        )
    }
}

impl Transformation for ResultSink {
    fn process(&mut self, _id: DatasetId, table: Table) -> StrataResult<()> {
        self.tables.push(table);
        Ok(())
    }

    fn retract_table(&mut self, _id: DatasetId, key: &GroupKey) -> StrataResult<()> {
        self.tables.retain(|t| t.key() != key);
        Ok(())
    }

    fn update_watermark(&mut self, _id: DatasetId, _mark: Time) -> StrataResult<()> {
        Ok(())
    }

    fn update_processing_time(&mut self, _id: DatasetId, _time: Time) -> StrataResult<()> {
        Ok(())
    }

    fn finish(&mut self, _id: DatasetId, err: Option<StrataError>) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        let result = match err {
            Some(err) => Err(err),
            None => Ok(std::mem::take(&mut self.tables)),
        };
        if tx.send(result).is_err() {
            log::debug!("Result receiver dropped before the query finished");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{host_key, keyed_table};

    #[tokio::test]
    async fn retractions_remove_collected_tables() -> StrataResult<()> {
        let (mut sink, rx) = ResultSink::new();
        let id = DatasetId::random();
        sink.process(id, keyed_table("a", &[1]))?;
        sink.process(id, keyed_table("b", &[2]))?;
        sink.retract_table(id, &host_key("a"))?;
        sink.finish(id, None);
        let tables = rx.await.expect("sink sent its result")?;
        assert_eq!(tables, vec![keyed_table("b", &[2])]);
        Ok(())
    }

    #[tokio::test]
    async fn errors_replace_the_tables() {
        let (mut sink, rx) = ResultSink::new();
        let id = DatasetId::random();
        sink.finish(id, Some(StrataError::Cancelled));
        sink.finish(id, None);
        assert!(matches!(rx.await, Ok(Err(StrataError::Cancelled))));
    }
}
