use std::sync::Arc;

use common_error::{StrataError, StrataResult};
use indexmap::IndexMap;
use parking_lot::Mutex;
use strata_table::{Bounds, GroupKey, Table, TableBuilder, Time, DEFAULT_STOP_COLUMN};

use crate::{
    dataset::{AccumulationMode, Clock, Dataset, DatasetId, Transformation, TransformationSet},
    trigger::{TriggerContext, TriggerSpec},
};

struct Entry {
    table: Table,
    first_seen: Option<Time>,
    emitted: bool,
    /// Rows arrived since the last emission.
    dirty: bool,
}

impl Entry {
    fn append(&mut self, table: Table) -> StrataResult<()> {
        let key = self.table.key().clone();
        let current = std::mem::replace(&mut self.table, Table::empty(key.clone(), vec![]));
        let mut builder = TableBuilder::new(key, current.columns().to_vec());
        builder.append_table(current)?;
        builder.append_table(table)?;
        self.table = builder.build();
        self.dirty = true;
        Ok(())
    }
}

struct CacheState {
    transformations: TransformationSet,
    clock: Clock,
    entries: IndexMap<GroupKey, Entry>,
    finished: bool,
}

/// Holds tables per group key until the trigger fires for that key.
pub struct CachedDataset {
    id: DatasetId,
    trigger: TriggerSpec,
    mode: AccumulationMode,
    bounds: Option<Bounds>,
    state: Mutex<CacheState>,
}

impl CachedDataset {
    pub fn new(
        id: DatasetId,
        trigger: TriggerSpec,
        mode: AccumulationMode,
        bounds: Option<Bounds>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            trigger,
            mode,
            bounds,
            state: Mutex::new(CacheState {
                transformations: TransformationSet::new(),
                clock: Clock::default(),
                entries: IndexMap::new(),
                finished: false,
            }),
        })
    }

    pub fn num_cached_keys(&self) -> usize {
        self.state.lock().entries.len()
    }

    fn ensure_live(&self, state: &CacheState) -> StrataResult<()> {
        if state.finished {
            return Err(StrataError::DatasetFinished(self.id.to_string()));
        }
        Ok(())
    }

    fn context(&self, clock: &Clock, key: &GroupKey, entry: &Entry) -> TriggerContext {
        let stop = key
            .get(DEFAULT_STOP_COLUMN)
            .and_then(|v| v.as_time())
            .or_else(|| self.bounds.map(|b| b.stop));
        TriggerContext {
            watermark: clock.watermark(),
            processing_time: clock.processing_time(),
            stop,
            first_seen: entry.first_seen,
            rows: entry.table.num_rows(),
        }
    }

    /// Emits every pending key the trigger fires for, or every pending key when `flush`.
    fn evaluate(&self, state: &mut CacheState, flush: bool) -> StrataResult<()> {
        let now = state.clock.processing_time();
        let ready: Vec<GroupKey> = state
            .entries
            .iter_mut()
            .filter_map(|(key, entry)| {
                if entry.first_seen.is_none() {
                    entry.first_seen = now;
                }
                let fire = entry.dirty
                    && (flush || self.trigger.fires(&self.context(&state.clock, key, entry)));
                fire.then(|| key.clone())
            })
            .collect();
        for key in ready {
            self.emit(state, &key)?;
        }
        Ok(())
    }

    fn emit(&self, state: &mut CacheState, key: &GroupKey) -> StrataResult<()> {
        match self.mode {
            AccumulationMode::Discarding => {
                if let Some(entry) = state.entries.shift_remove(key) {
                    state.transformations.process(self.id, entry.table)?;
                }
            }
            AccumulationMode::Accumulating => {
                let Some(entry) = state.entries.get_mut(key) else {
                    return Ok(());
                };
                let retract = entry.emitted;
                let table = entry.table.copy();
                entry.emitted = true;
                entry.dirty = false;
                if retract {
                    state.transformations.retract_table(self.id, key)?;
                }
                state.transformations.process(self.id, table)?;
            }
        }
        Ok(())
    }
}

impl Dataset for CachedDataset {
    fn id(&self) -> DatasetId {
        self.id
    }

    fn add_transformation(&self, transformation: Box<dyn Transformation>) -> StrataResult<()> {
        let mut state = self.state.lock();
        self.ensure_live(&state)?;
        state.transformations.push(transformation);
        Ok(())
    }

    fn process(&self, table: Table) -> StrataResult<()> {
        let mut state = self.state.lock();
        self.ensure_live(&state)?;
        let key = table.key().clone();
        match state.entries.get_mut(&key) {
            Some(entry) => entry.append(table)?,
            None => {
                let first_seen = state.clock.processing_time();
                state.entries.insert(
                    key,
                    Entry {
                        table,
                        first_seen,
                        emitted: false,
                        dirty: true,
                    },
                );
            }
        }
        self.evaluate(&mut state, false)
    }

    fn retract_table(&self, key: &GroupKey) -> StrataResult<()> {
        let mut state = self.state.lock();
        self.ensure_live(&state)?;
        state.entries.shift_remove(key);
        state.transformations.retract_table(self.id, key)
    }

    fn update_watermark(&self, mark: Time) -> StrataResult<()> {
        let mut state = self.state.lock();
        self.ensure_live(&state)?;
        if !state.clock.advance_watermark(self.id, mark) {
            return Ok(());
        }
        self.evaluate(&mut state, false)?;
        state.transformations.update_watermark(self.id, mark)
    }

    fn update_processing_time(&self, time: Time) -> StrataResult<()> {
        let mut state = self.state.lock();
        self.ensure_live(&state)?;
        if !state.clock.advance_processing_time(self.id, time) {
            return Ok(());
        }
        self.evaluate(&mut state, false)?;
        state.transformations.update_processing_time(self.id, time)
    }

    fn finish(&self, err: Option<StrataError>) {
        let mut state = self.state.lock();
        if state.finished {
            log::warn!("Dataset {} received a second finish", self.id);
            return;
        }
        let err = match err {
            Some(err) => Some(err),
            None => self.evaluate(&mut state, true).err(),
        };
        state.finished = true;
        state.entries.clear();
        state.transformations.finish(self.id, err);
    }
}

#[cfg(test)]
mod tests {
    use common_error::StrataResult;
    use strata_table::{Bounds, Duration, Table, Time, Value, DEFAULT_VALUE_COLUMN};

    use super::*;
    use crate::test::{host_key, keyed_table, Event, Recorder};

    fn cache(trigger: TriggerSpec, mode: AccumulationMode, recorder: &Recorder) -> Arc<CachedDataset> {
        let ds = CachedDataset::new(
            DatasetId::random(),
            trigger,
            mode,
            Some(Bounds::new(Time(0), Time(100))),
        );
        ds.add_transformation(recorder.transformation("out"))
            .expect("live dataset");
        ds
    }

    fn processed(recorder: &Recorder) -> Vec<Vec<i64>> {
        recorder
            .events_for("out")
            .into_iter()
            .filter_map(|e| match e {
                Event::Process { values, .. } => Some(values),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn watermark_past_bounds_emits_each_key_once() -> StrataResult<()> {
        let recorder = Recorder::new();
        let ds = cache(TriggerSpec::default(), AccumulationMode::Discarding, &recorder);
        ds.process(keyed_table("a", &[1]))?;
        ds.process(keyed_table("b", &[2]))?;
        ds.process(keyed_table("a", &[3]))?;
        ds.update_watermark(Time(50))?;
        assert!(processed(&recorder).is_empty());

        ds.update_watermark(Time(100))?;
        assert_eq!(processed(&recorder), vec![vec![1, 3], vec![2]]);
        assert_eq!(ds.num_cached_keys(), 0);
        assert_eq!(
            recorder.events_for("out").last(),
            Some(&Event::Watermark(Time(100)))
        );
        Ok(())
    }

    #[test]
    fn key_stop_column_overrides_bounds() -> StrataResult<()> {
        let recorder = Recorder::new();
        let ds = cache(TriggerSpec::default(), AccumulationMode::Discarding, &recorder);
        let key = host_key("a").with(DEFAULT_STOP_COLUMN, Value::Time(Time(10)));
        ds.process(Table::new(
            key,
            vec![DEFAULT_VALUE_COLUMN.to_string()],
            vec![vec![Value::Int(7)]],
        )?)?;
        ds.process(keyed_table("b", &[8]))?;
        ds.update_watermark(Time(10))?;
        assert_eq!(processed(&recorder), vec![vec![7]]);
        Ok(())
    }

    #[test]
    fn finish_flushes_pending_keys_before_forwarding() -> StrataResult<()> {
        let recorder = Recorder::new();
        let ds = cache(TriggerSpec::default(), AccumulationMode::Discarding, &recorder);
        ds.process(keyed_table("a", &[1, 2]))?;
        ds.finish(None);
        assert_eq!(
            recorder.events_for("out"),
            vec![
                Event::Process {
                    key: host_key("a"),
                    rows: 2,
                    values: vec![1, 2]
                },
                Event::Finish(None)
            ]
        );
        Ok(())
    }

    #[test]
    fn failed_finish_drops_pending_keys() -> StrataResult<()> {
        let recorder = Recorder::new();
        let ds = cache(TriggerSpec::default(), AccumulationMode::Discarding, &recorder);
        ds.process(keyed_table("a", &[1]))?;
        ds.finish(Some(StrataError::Cancelled));
        assert_eq!(
            recorder.events_for("out"),
            vec![Event::Finish(Some("query cancelled".to_string()))]
        );
        Ok(())
    }

    #[test]
    fn accumulating_retracts_before_reemitting() -> StrataResult<()> {
        let recorder = Recorder::new();
        let ds = cache(
            TriggerSpec::AfterAtLeastCount { count: 1 },
            AccumulationMode::Accumulating,
            &recorder,
        );
        ds.process(keyed_table("a", &[1]))?;
        ds.process(keyed_table("a", &[2]))?;
        assert_eq!(
            recorder.events_for("out"),
            vec![
                Event::Process {
                    key: host_key("a"),
                    rows: 1,
                    values: vec![1]
                },
                Event::Retract(host_key("a")),
                Event::Process {
                    key: host_key("a"),
                    rows: 2,
                    values: vec![1, 2]
                },
            ]
        );
        // Nothing new arrived, so finishing emits nothing more.
        ds.finish(None);
        assert_eq!(recorder.events_for("out").len(), 4);
        Ok(())
    }

    #[test]
    fn processing_time_trigger_counts_from_first_row() -> StrataResult<()> {
        let recorder = Recorder::new();
        let ds = cache(
            TriggerSpec::AfterProcessingTime {
                duration: Duration(10),
            },
            AccumulationMode::Discarding,
            &recorder,
        );
        ds.update_processing_time(Time(5))?;
        ds.process(keyed_table("a", &[1]))?;
        ds.update_processing_time(Time(14))?;
        assert!(processed(&recorder).is_empty());
        ds.update_processing_time(Time(15))?;
        assert_eq!(processed(&recorder), vec![vec![1]]);
        Ok(())
    }

    #[test]
    fn retraction_drops_the_cached_key() -> StrataResult<()> {
        let recorder = Recorder::new();
        let ds = cache(TriggerSpec::default(), AccumulationMode::Discarding, &recorder);
        ds.process(keyed_table("a", &[1]))?;
        ds.retract_table(&host_key("a"))?;
        ds.finish(None);
        assert_eq!(
            recorder.events_for("out"),
            vec![Event::Retract(host_key("a")), Event::Finish(None)]
        );
        Ok(())
    }
}
