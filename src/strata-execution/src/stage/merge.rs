use std::sync::Arc;

use common_error::{StrataError, StrataResult};
use parking_lot::Mutex;
use strata_table::{GroupKey, Table, Time};

use crate::{
    dataset::{Clock, Dataset, DatasetId, Transformation, TransformationSet},
    state::ResourceAccounting,
};

struct RouteState {
    slot: usize,
    watermark: Option<Time>,
    finished: bool,
}

struct MergeState {
    transformations: TransformationSet,
    clock: Clock,
    routes: Vec<RouteState>,
    /// Unfinished routes per slot.
    open_routes: Vec<usize>,
    sealed: bool,
    finished: bool,
}

impl MergeState {
    /// Lowest watermark among unfinished routes, once every one of them has reported.
    fn combined_watermark(&self) -> Option<Time> {
        let mut live = self.routes.iter().filter(|r| !r.finished).peekable();
        live.peek()?;
        live.map(|r| r.watermark).min().flatten()
    }

    fn all_routes_finished(&self) -> bool {
        self.routes.iter().all(|r| r.finished)
    }
}

/// Recombines the leaf outputs of a stage's nested pipelines into the stage's own output.
///
/// Downstream sees one dataset: tables keep their keys, the watermark is the minimum
/// across unfinished nested leaves, and a single finish follows once the stage is sealed
/// and every nested leaf has finished.
pub struct SlotMerge {
    id: DatasetId,
    accounting: Arc<ResourceAccounting>,
    state: Mutex<MergeState>,
}

impl SlotMerge {
    pub fn new(id: DatasetId, accounting: Arc<ResourceAccounting>) -> Arc<Self> {
        Arc::new(Self {
            id,
            accounting,
            state: Mutex::new(MergeState {
                transformations: TransformationSet::new(),
                clock: Clock::default(),
                routes: vec![],
                open_routes: vec![],
                sealed: false,
                finished: false,
            }),
        })
    }

    /// Registers one nested pipeline with `num_leaves` leaves and returns a route per leaf.
    pub fn add_slot(self: &Arc<Self>, num_leaves: usize) -> Vec<MergeRoute> {
        let mut state = self.state.lock();
        let slot = state.open_routes.len();
        state.open_routes.push(num_leaves);
        (0..num_leaves)
            .map(|_| {
                let route = state.routes.len();
                state.routes.push(RouteState {
                    slot,
                    watermark: None,
                    finished: false,
                });
                MergeRoute {
                    merge: self.clone(),
                    route,
                }
            })
            .collect()
    }

    pub fn num_slots(&self) -> usize {
        self.state.lock().open_routes.len()
    }

    /// No further slots will be added.
    pub fn seal(&self, err: Option<StrataError>) {
        let mut state = self.state.lock();
        state.sealed = true;
        self.try_finish(&mut state, err);
    }

    fn try_finish(&self, state: &mut MergeState, err: Option<StrataError>) {
        if state.finished {
            return;
        }
        if err.is_none() && !(state.sealed && state.all_routes_finished()) {
            return;
        }
        state.finished = true;
        state.transformations.finish(self.id, err);
    }

    fn route_process(&self, table: Table) -> StrataResult<()> {
        let mut state = self.state.lock();
        if state.finished {
            return Ok(());
        }
        state.transformations.process(self.id, table)
    }

    fn route_retract(&self, key: &GroupKey) -> StrataResult<()> {
        let mut state = self.state.lock();
        if state.finished {
            return Ok(());
        }
        state.transformations.retract_table(self.id, key)
    }

    fn forward_watermark(&self, state: &mut MergeState) -> StrataResult<()> {
        let Some(mark) = state.combined_watermark() else {
            return Ok(());
        };
        if !state.clock.advance_watermark(self.id, mark) {
            return Ok(());
        }
        state.transformations.update_watermark(self.id, mark)
    }

    fn route_watermark(&self, route: usize, mark: Time) -> StrataResult<()> {
        let mut state = self.state.lock();
        if state.finished {
            return Ok(());
        }
        if let Some(r) = state.routes.get_mut(route) {
            r.watermark = Some(r.watermark.map_or(mark, |w| w.max(mark)));
        }
        self.forward_watermark(&mut state)
    }

    fn route_processing_time(&self, time: Time) -> StrataResult<()> {
        let mut state = self.state.lock();
        if state.finished || !state.clock.advance_processing_time(self.id, time) {
            return Ok(());
        }
        state.transformations.update_processing_time(self.id, time)
    }

    fn route_finish(&self, route: usize, err: Option<StrataError>) {
        let mut state = self.state.lock();
        let Some(slot) = state.routes.get_mut(route).and_then(|r| {
            let first = !r.finished;
            r.finished = true;
            first.then_some(r.slot)
        }) else {
            return;
        };
        let open = &mut state.open_routes[slot];
        *open = open.saturating_sub(1);
        if *open == 0 {
            self.accounting.nested_finished();
        }
        if err.is_none() && !state.finished {
            // A finished route no longer holds back the combined watermark.
            if let Err(e) = self.forward_watermark(&mut state) {
                self.try_finish(&mut state, Some(e));
                return;
            }
        }
        self.try_finish(&mut state, err);
    }
}

impl Dataset for SlotMerge {
    fn id(&self) -> DatasetId {
        self.id
    }

    fn add_transformation(&self, transformation: Box<dyn Transformation>) -> StrataResult<()> {
        let mut state = self.state.lock();
        if state.finished {
            return Err(StrataError::DatasetFinished(self.id.to_string()));
        }
        state.transformations.push(transformation);
        Ok(())
    }

    fn process(&self, table: Table) -> StrataResult<()> {
        self.route_process(table)
    }

    fn retract_table(&self, key: &GroupKey) -> StrataResult<()> {
        self.route_retract(key)
    }

    fn update_watermark(&self, mark: Time) -> StrataResult<()> {
        let mut state = self.state.lock();
        if state.finished || !state.clock.advance_watermark(self.id, mark) {
            return Ok(());
        }
        state.transformations.update_watermark(self.id, mark)
    }

    fn update_processing_time(&self, time: Time) -> StrataResult<()> {
        self.route_processing_time(time)
    }

    fn finish(&self, err: Option<StrataError>) {
        self.seal(err);
    }
}

/// Transformation attached to one leaf of one nested pipeline, feeding a [`SlotMerge`].
pub struct MergeRoute {
    merge: Arc<SlotMerge>,
    route: usize,
}

impl Transformation for MergeRoute {
    fn process(&mut self, _id: DatasetId, table: Table) -> StrataResult<()> {
        self.merge.route_process(table)
    }

    fn retract_table(&mut self, _id: DatasetId, key: &GroupKey) -> StrataResult<()> {
        self.merge.route_retract(key)
    }

    fn update_watermark(&mut self, _id: DatasetId, mark: Time) -> StrataResult<()> {
        self.merge.route_watermark(self.route, mark)
    }

    fn update_processing_time(&mut self, _id: DatasetId, time: Time) -> StrataResult<()> {
        self.merge.route_processing_time(time)
    }

    fn finish(&mut self, _id: DatasetId, err: Option<StrataError>) {
        self.merge.route_finish(self.route, err);
    }
}
