use std::{
    fmt::{Display, Formatter},
    sync::Arc,
};

use common_error::{StrataError, StrataResult};
use parking_lot::Mutex;
use strata_plan::OperationId;
use strata_table::{GroupKey, Table, Time};
use uuid::Uuid;

// Namespace under which plan node IDs are hashed into dataset IDs.
const NODE_NAMESPACE: Uuid = Uuid::from_u128(0x6a1f_3c2e_8b4d_4f59_9e07_52d1_c0a8_e3b6);

/// Identity of one runtime dataflow node instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetId(Uuid);

impl DatasetId {
    pub fn from_node_id(id: &OperationId) -> Self {
        Self(Uuid::new_v5(&NODE_NAMESPACE, id.as_str().as_bytes()))
    }

    /// Deterministic child ID, hashed with `parent` as the namespace.
    pub fn derive(parent: Self, name: &str) -> Self {
        Self(Uuid::new_v5(&parent.0, name.as_bytes()))
    }

    /// ID of the nested pipeline that `parent` runs for `key`.
    pub fn for_key(parent: Self, key: &GroupKey) -> Self {
        Self::derive(parent, &key.to_string())
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Display for DatasetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AccumulationMode {
    /// Emitted rows are dropped from the cache.
    #[default]
    Discarding,
    /// Emitted rows stay cached; a re-emission retracts the previous one first.
    Accumulating,
}

/// Consumer side of a dataflow edge. `id` names the upstream dataset a signal came from.
pub trait Transformation: Send {
    fn process(&mut self, id: DatasetId, table: Table) -> StrataResult<()>;
    fn retract_table(&mut self, id: DatasetId, key: &GroupKey) -> StrataResult<()>;
    fn update_watermark(&mut self, id: DatasetId, mark: Time) -> StrataResult<()>;
    fn update_processing_time(&mut self, id: DatasetId, time: Time) -> StrataResult<()>;
    /// Terminal: nothing may follow for this route.
    fn finish(&mut self, id: DatasetId, err: Option<StrataError>);
}

/// Producer side of a dataflow node: its fan-out plus control-signal forwarding.
///
/// Methods take `&self` because a node's transformation keeps a handle to its dataset
/// while the executor attaches downstream consumers to it.
pub trait Dataset: Send + Sync {
    fn id(&self) -> DatasetId;
    fn add_transformation(&self, transformation: Box<dyn Transformation>) -> StrataResult<()>;
    fn process(&self, table: Table) -> StrataResult<()>;
    fn retract_table(&self, key: &GroupKey) -> StrataResult<()>;
    fn update_watermark(&self, mark: Time) -> StrataResult<()>;
    fn update_processing_time(&self, time: Time) -> StrataResult<()>;
    fn finish(&self, err: Option<StrataError>);
}

pub type DatasetRef = Arc<dyn Dataset>;

/// Ordered fan-out. Forwarding stops at the first error.
#[derive(Default)]
pub struct TransformationSet {
    transformations: Vec<Box<dyn Transformation>>,
}

impl TransformationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, transformation: Box<dyn Transformation>) {
        self.transformations.push(transformation);
    }

    pub fn len(&self) -> usize {
        self.transformations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformations.is_empty()
    }
}

impl From<Vec<Box<dyn Transformation>>> for TransformationSet {
    fn from(transformations: Vec<Box<dyn Transformation>>) -> Self {
        Self { transformations }
    }
}

impl Transformation for TransformationSet {
    /// Every consumer but the last gets its own copy; the last takes the original.
    fn process(&mut self, id: DatasetId, table: Table) -> StrataResult<()> {
        let Some((last, rest)) = self.transformations.split_last_mut() else {
            return Ok(());
        };
        for t in rest {
            t.process(id, table.copy())?;
        }
        last.process(id, table)
    }

    fn retract_table(&mut self, id: DatasetId, key: &GroupKey) -> StrataResult<()> {
        for t in &mut self.transformations {
            t.retract_table(id, key)?;
        }
        Ok(())
    }

    fn update_watermark(&mut self, id: DatasetId, mark: Time) -> StrataResult<()> {
        for t in &mut self.transformations {
            t.update_watermark(id, mark)?;
        }
        Ok(())
    }

    fn update_processing_time(&mut self, id: DatasetId, time: Time) -> StrataResult<()> {
        for t in &mut self.transformations {
            t.update_processing_time(id, time)?;
        }
        Ok(())
    }

    fn finish(&mut self, id: DatasetId, err: Option<StrataError>) {
        for t in &mut self.transformations {
            t.finish(id, err.clone());
        }
    }
}

/// Tracks the last watermark and processing time seen so that neither moves backward.
#[derive(Clone, Copy, Debug, Default)]
pub struct Clock {
    watermark: Option<Time>,
    processing_time: Option<Time>,
}

impl Clock {
    pub fn watermark(&self) -> Option<Time> {
        self.watermark
    }

    pub fn processing_time(&self) -> Option<Time> {
        self.processing_time
    }

    /// Returns false, leaving the clock untouched, when `mark` does not advance it.
    pub fn advance_watermark(&mut self, id: DatasetId, mark: Time) -> bool {
        match self.watermark {
            Some(current) if mark <= current => {
                log::debug!("Ignoring watermark {mark} on dataset {id}, already at {current}");
                false
            }
            _ => {
                self.watermark = Some(mark);
                true
            }
        }
    }

    pub fn advance_processing_time(&mut self, id: DatasetId, time: Time) -> bool {
        match self.processing_time {
            Some(current) if time <= current => {
                log::debug!("Ignoring processing time {time} on dataset {id}, already at {current}");
                false
            }
            _ => {
                self.processing_time = Some(time);
                true
            }
        }
    }
}

struct ForwardState {
    transformations: TransformationSet,
    clock: Clock,
    finished: bool,
}

/// Forwards every signal unchanged to its transformations.
pub struct PassthroughDataset {
    id: DatasetId,
    state: Mutex<ForwardState>,
}

impl PassthroughDataset {
    pub fn new(id: DatasetId) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: Mutex::new(ForwardState {
                transformations: TransformationSet::new(),
                clock: Clock::default(),
                finished: false,
            }),
        })
    }

    fn ensure_live(&self, state: &ForwardState) -> StrataResult<()> {
        if state.finished {
            return Err(StrataError::DatasetFinished(self.id.to_string()));
        }
        Ok(())
    }
}

impl Dataset for PassthroughDataset {
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
        state.transformations.process(self.id, table)
    }

    fn retract_table(&self, key: &GroupKey) -> StrataResult<()> {
        let mut state = self.state.lock();
        self.ensure_live(&state)?;
        state.transformations.retract_table(self.id, key)
    }

    fn update_watermark(&self, mark: Time) -> StrataResult<()> {
        let mut state = self.state.lock();
        self.ensure_live(&state)?;
        if !state.clock.advance_watermark(self.id, mark) {
            return Ok(());
        }
        state.transformations.update_watermark(self.id, mark)
    }

    fn update_processing_time(&self, time: Time) -> StrataResult<()> {
        let mut state = self.state.lock();
        self.ensure_live(&state)?;
        if !state.clock.advance_processing_time(self.id, time) {
            return Ok(());
        }
        state.transformations.update_processing_time(self.id, time)
    }

    fn finish(&self, err: Option<StrataError>) {
        let mut state = self.state.lock();
        if state.finished {
            log::warn!("Dataset {} received a second finish", self.id);
            return;
        }
        state.finished = true;
        state.transformations.finish(self.id, err);
    }
}
