use std::sync::Arc;

use common_error::{StrataError, StrataResult};
use parking_lot::Mutex;
use strata_table::{GroupKey, Table, Time};
use tokio_util::sync::CancellationToken;

use crate::{
    dataset::{DatasetId, Transformation},
    dispatcher::Dispatcher,
    state::ResourceAccounting,
};

enum Message {
    Process(DatasetId, Table),
    Retract(DatasetId, GroupKey),
    Watermark(DatasetId, Time),
    ProcessingTime(DatasetId, Time),
    Finish(DatasetId, Option<StrataError>),
}

struct FinishState {
    remaining_parents: usize,
    finished: bool,
}

/// Moves every signal for one transformation onto a queue drained by a single task, so
/// that the transformation sees its input strictly in arrival order and never concurrently.
///
/// The inner transformation is finished once every parent has finished, or at the first
/// parent that finishes with an error. Cancelling the query finishes it with
/// [`StrataError::Cancelled`] even if nothing reached it yet.
#[derive(Clone)]
pub struct ConsecutiveTransport {
    name: Arc<str>,
    tx: kanal::Sender<Message>,
    dispatcher: Arc<Dispatcher>,
    finish: Arc<Mutex<FinishState>>,
}

impl ConsecutiveTransport {
    pub fn new(
        name: &str,
        inner: Box<dyn Transformation>,
        num_parents: usize,
        dispatcher: &Arc<Dispatcher>,
        accounting: Arc<ResourceAccounting>,
    ) -> Self {
        // Reported as the finishing dataset when the transport finishes before any input.
        let own_id = DatasetId::random();
        let (tx, rx) = kanal::unbounded();
        let cancel = dispatcher.cancellation_token();
        dispatcher.schedule(name, drain(own_id, rx.to_async(), inner, accounting, cancel));
        Self {
            name: name.into(),
            tx,
            dispatcher: dispatcher.clone(),
            finish: Arc::new(Mutex::new(FinishState {
                remaining_parents: num_parents.max(1),
                finished: false,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn push(&self, message: Message) -> StrataResult<()> {
        if self.finish.lock().finished {
            return Err(StrataError::DatasetFinished(self.name.to_string()));
        }
        self.tx.send(message).map_err(|_| {
            self.dispatcher
                .err()
                .unwrap_or_else(|| StrataError::DatasetFinished(self.name.to_string()))
        })
    }
}

impl Transformation for ConsecutiveTransport {
    fn process(&mut self, id: DatasetId, table: Table) -> StrataResult<()> {
        self.push(Message::Process(id, table))
    }

    fn retract_table(&mut self, id: DatasetId, key: &GroupKey) -> StrataResult<()> {
        self.push(Message::Retract(id, key.clone()))
    }

    fn update_watermark(&mut self, id: DatasetId, mark: Time) -> StrataResult<()> {
        self.push(Message::Watermark(id, mark))
    }

    fn update_processing_time(&mut self, id: DatasetId, time: Time) -> StrataResult<()> {
        self.push(Message::ProcessingTime(id, time))
    }

    fn finish(&mut self, id: DatasetId, err: Option<StrataError>) {
        let mut state = self.finish.lock();
        if state.finished {
            log::debug!("Transport {} already finished, ignoring finish from {id}", self.name);
            return;
        }
        state.remaining_parents = state.remaining_parents.saturating_sub(1);
        if err.is_none() && state.remaining_parents > 0 {
            return;
        }
        state.finished = true;
        if self.tx.send(Message::Finish(id, err)).is_err() {
            log::debug!("Transport {} closed before its finish was delivered", self.name);
        }
    }
}

async fn drain(
    own_id: DatasetId,
    rx: kanal::AsyncReceiver<Message>,
    mut inner: Box<dyn Transformation>,
    accounting: Arc<ResourceAccounting>,
    cancel: CancellationToken,
) -> StrataResult<()> {
    let mut last = None;
    loop {
        let message = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                inner.finish(last.unwrap_or(own_id), Some(StrataError::Cancelled));
                return Err(StrataError::Cancelled);
            }
            message = rx.recv() => message,
        };
        let Ok(message) = message else {
            let Some(id) = last else {
                // Dropped before it was ever fed, as when building its pipeline failed.
                log::debug!("Transport {own_id} dropped before receiving anything");
                return Ok(());
            };
            // Every sender is gone without a finish.
            let err = StrataError::InternalError("transport closed before finishing".to_string());
            inner.finish(id, Some(err.clone()));
            return Err(err);
        };
        let (id, result) = match message {
            Message::Process(id, table) => {
                accounting.table_processed();
                (id, inner.process(id, table))
            }
            Message::Retract(id, key) => (id, inner.retract_table(id, &key)),
            Message::Watermark(id, mark) => (id, inner.update_watermark(id, mark)),
            Message::ProcessingTime(id, time) => (id, inner.update_processing_time(id, time)),
            Message::Finish(id, err) => {
                let failed = err.clone();
                inner.finish(id, err);
                return failed.map_or(Ok(()), Err);
            }
        };
        last = Some(id);
        if let Err(err) = result {
            inner.finish(id, Some(err.clone()));
            return Err(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common_error::StrataError;
    use common_runtime::get_compute_runtime;
    use strata_table::Time;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::test::{keyed_table, Event, Recorder};

    fn dispatcher() -> Arc<Dispatcher> {
        Dispatcher::new(get_compute_runtime(), CancellationToken::new())
    }

    async fn wait_for_finish(recorder: &Recorder, name: &str) -> Vec<Event> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let events = recorder.events_for(name);
                if matches!(events.last(), Some(Event::Finish(_))) {
                    return events;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("transport did not finish in time")
    }

    #[tokio::test]
    async fn delivers_in_arrival_order() -> StrataResult<()> {
        let recorder = Recorder::new();
        let dispatcher = dispatcher();
        let accounting = Arc::new(ResourceAccounting::default());
        let mut transport = ConsecutiveTransport::new(
            "t",
            recorder.transformation("t"),
            1,
            &dispatcher,
            accounting.clone(),
        );
        let id = DatasetId::random();
        for i in 0..20 {
            transport.process(id, keyed_table("a", &[i]))?;
        }
        transport.update_watermark(id, Time(3))?;
        transport.finish(id, None);

        let events = wait_for_finish(&recorder, "t").await;
        let values: Vec<i64> = events
            .iter()
            .filter_map(|e| match e {
                Event::Process { values, .. } => values.first().copied(),
                _ => None,
            })
            .collect();
        assert_eq!(values, (0..20).collect::<Vec<_>>());
        assert_eq!(events[20], Event::Watermark(Time(3)));
        assert_eq!(accounting.tables_processed(), 20);
        assert!(dispatcher.err().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn finishes_after_the_last_parent() -> StrataResult<()> {
        let recorder = Recorder::new();
        let dispatcher = dispatcher();
        let mut transport = ConsecutiveTransport::new(
            "join",
            recorder.transformation("join"),
            2,
            &dispatcher,
            Arc::new(ResourceAccounting::default()),
        );
        let (left, right) = (DatasetId::random(), DatasetId::random());
        transport.process(left, keyed_table("a", &[1]))?;
        transport.finish(left, None);
        transport.process(right, keyed_table("b", &[2]))?;
        transport.finish(right, None);

        let events = wait_for_finish(&recorder, "join").await;
        assert_eq!(events.len(), 3);
        assert!(matches!(
            transport.process(left, keyed_table("a", &[3])),
            Err(StrataError::DatasetFinished(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn parent_error_finishes_immediately() {
        let recorder = Recorder::new();
        let dispatcher = dispatcher();
        let mut transport = ConsecutiveTransport::new(
            "join",
            recorder.transformation("join"),
            2,
            &dispatcher,
            Arc::new(ResourceAccounting::default()),
        );
        transport.finish(
            DatasetId::random(),
            Some(StrataError::ComputeError("upstream".to_string())),
        );
        let events = wait_for_finish(&recorder, "join").await;
        assert_eq!(events, vec![Event::Finish(Some("upstream".to_string()))]);
    }

    #[tokio::test]
    async fn cancellation_finishes_an_idle_transport() {
        let recorder = Recorder::new();
        let dispatcher = dispatcher();
        let _transport = ConsecutiveTransport::new(
            "idle",
            recorder.transformation("idle"),
            1,
            &dispatcher,
            Arc::new(ResourceAccounting::default()),
        );
        dispatcher.abort(StrataError::Cancelled);
        let events = wait_for_finish(&recorder, "idle").await;
        assert_eq!(events, vec![Event::Finish(Some("query cancelled".to_string()))]);
    }

    #[tokio::test]
    async fn dropping_an_unused_transport_is_not_an_error() {
        let recorder = Recorder::new();
        let dispatcher = dispatcher();
        let transport = ConsecutiveTransport::new(
            "unused",
            recorder.transformation("unused"),
            1,
            &dispatcher,
            Arc::new(ResourceAccounting::default()),
        );
        drop(transport);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(dispatcher.err().is_none());
        assert!(!dispatcher.is_stopped());
        assert!(recorder.events_for("unused").is_empty());
    }

    #[tokio::test]
    async fn failing_transformation_aborts_the_query() -> StrataResult<()> {
        let recorder = Recorder::new();
        let dispatcher = dispatcher();
        let mut transport = ConsecutiveTransport::new(
            "bad",
            recorder.failing_transformation("bad"),
            1,
            &dispatcher,
            Arc::new(ResourceAccounting::default()),
        );
        transport.process(DatasetId::random(), keyed_table("a", &[1]))?;
        tokio::time::timeout(
            Duration::from_secs(5),
            dispatcher.cancellation_token().cancelled(),
        )
        .await
        .expect("query was not aborted");
        assert!(matches!(dispatcher.err(), Some(StrataError::ComputeError(msg)) if msg == "bad failed"));
        let events = wait_for_finish(&recorder, "bad").await;
        assert_eq!(events, vec![Event::Finish(Some("bad failed".to_string()))]);
        Ok(())
    }
}
