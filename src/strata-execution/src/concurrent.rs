use std::sync::Arc;

use common_error::{StrataError, StrataResult};
use parking_lot::Mutex;
use strata_table::{GroupKey, Table, Time};

use crate::dataset::{Clock, Dataset, DatasetId, Transformation};

struct SlotState {
    slots: Vec<Box<dyn Transformation>>,
    next: usize,
    clock: Clock,
    finished: bool,
}

/// Fixed-capacity fan-out that hands each table to exactly one slot, round robin.
///
/// Retractions and control signals go to every slot.
pub struct ConcurrentDataset {
    id: DatasetId,
    cap: usize,
    state: Mutex<SlotState>,
}

impl ConcurrentDataset {
    pub fn new(id: DatasetId, cap: usize) -> Arc<Self> {
        let cap = cap.max(1);
        Arc::new(Self {
            id,
            cap,
            state: Mutex::new(SlotState {
                slots: Vec::with_capacity(cap),
                next: 0,
                clock: Clock::default(),
                finished: false,
            }),
        })
    }

    pub fn size(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    fn ensure_live(&self, state: &SlotState) -> StrataResult<()> {
        if state.finished {
            return Err(StrataError::DatasetFinished(self.id.to_string()));
        }
        Ok(())
    }
}

impl Dataset for ConcurrentDataset {
    fn id(&self) -> DatasetId {
        self.id
    }

    fn add_transformation(&self, transformation: Box<dyn Transformation>) -> StrataResult<()> {
        let mut state = self.state.lock();
        self.ensure_live(&state)?;
        if state.slots.len() >= self.cap {
            return Err(StrataError::InternalError(format!(
                "dataset {} already holds its {} concurrent slots",
                self.id, self.cap
            )));
        }
        state.slots.push(transformation);
        Ok(())
    }

    fn process(&self, table: Table) -> StrataResult<()> {
        let mut state = self.state.lock();
        self.ensure_live(&state)?;
        if state.slots.is_empty() {
            return Err(StrataError::InternalError(format!(
                "dataset {} has no slot to process table {}",
                self.id,
                table.key()
            )));
        }
        // The call count keeps growing as slots are added, so a new slot is next in line.
        let idx = state.next % state.slots.len();
        state.next = state.next.wrapping_add(1);
        state.slots[idx].process(self.id, table)
    }

    fn retract_table(&self, key: &GroupKey) -> StrataResult<()> {
        let mut state = self.state.lock();
        self.ensure_live(&state)?;
        for slot in &mut state.slots {
            slot.retract_table(self.id, key)?;
        }
        Ok(())
    }

    fn update_watermark(&self, mark: Time) -> StrataResult<()> {
        let mut state = self.state.lock();
        self.ensure_live(&state)?;
        if !state.clock.advance_watermark(self.id, mark) {
            return Ok(());
        }
        for slot in &mut state.slots {
            slot.update_watermark(self.id, mark)?;
        }
        Ok(())
    }

    fn update_processing_time(&self, time: Time) -> StrataResult<()> {
        let mut state = self.state.lock();
        self.ensure_live(&state)?;
        if !state.clock.advance_processing_time(self.id, time) {
            return Ok(());
        }
        for slot in &mut state.slots {
            slot.update_processing_time(self.id, time)?;
        }
        Ok(())
    }

    fn finish(&self, err: Option<StrataError>) {
        let mut state = self.state.lock();
        if state.finished {
            return;
        }
        state.finished = true;
        for slot in &mut state.slots {
            slot.finish(self.id, err.clone());
        }
    }
}
