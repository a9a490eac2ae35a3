use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use common_error::{StrataError, StrataResult};
use common_strata_config::ExecutionConfig;
use parking_lot::Mutex;
use strata_plan::{OperationId, ResourceManagement};
use strata_table::{Bounds, Time};

use crate::{
    dataset::DatasetId, dispatcher::Dispatcher, registry::ExecutionRegistry,
    sources::TableReaderFactory,
};

/// Counters shared by a query and every nested pipeline it spawns.
#[derive(Debug, Default)]
pub struct ResourceAccounting {
    tables_processed: AtomicU64,
    nested_created: AtomicUsize,
    nested_live: AtomicUsize,
}

impl ResourceAccounting {
    pub(crate) fn table_processed(&self) {
        self.tables_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn nested_started(&self) {
        self.nested_created.fetch_add(1, Ordering::Relaxed);
        self.nested_live.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn nested_finished(&self) {
        let _ = self
            .nested_live
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn tables_processed(&self) -> u64 {
        self.tables_processed.load(Ordering::Relaxed)
    }

    pub fn nested_pipelines_created(&self) -> usize {
        self.nested_created.load(Ordering::Relaxed)
    }

    pub fn nested_pipelines_live(&self) -> usize {
        self.nested_live.load(Ordering::Relaxed)
    }
}

/// Everything a pipeline under construction needs from its query.
///
/// A nested pipeline gets its own state sharing the query's dispatcher, registry, reader,
/// configuration and accounting, with a fresh node map.
pub struct ExecutionState {
    pub id: DatasetId,
    pub parent: Option<DatasetId>,
    pub dispatcher: Arc<Dispatcher>,
    pub registry: Arc<ExecutionRegistry>,
    pub reader: Option<Arc<dyn TableReaderFactory>>,
    pub config: Arc<ExecutionConfig>,
    pub resources: ResourceManagement,
    pub now: Time,
    pub accounting: Arc<ResourceAccounting>,
    nodes: Mutex<HashMap<OperationId, DatasetId>>,
}

impl ExecutionState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: DatasetId,
        dispatcher: Arc<Dispatcher>,
        registry: Arc<ExecutionRegistry>,
        reader: Option<Arc<dyn TableReaderFactory>>,
        config: Arc<ExecutionConfig>,
        resources: ResourceManagement,
        now: Time,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            parent: None,
            dispatcher,
            registry,
            reader,
            config,
            resources,
            now,
            accounting: Arc::new(ResourceAccounting::default()),
            nodes: Mutex::new(HashMap::new()),
        })
    }

    pub fn nested(self: &Arc<Self>, id: DatasetId) -> Arc<Self> {
        Arc::new(Self {
            id,
            parent: Some(self.id),
            dispatcher: self.dispatcher.clone(),
            registry: self.registry.clone(),
            reader: self.reader.clone(),
            config: self.config.clone(),
            resources: self.resources.clone(),
            now: self.now,
            accounting: self.accounting.clone(),
            nodes: Mutex::new(HashMap::new()),
        })
    }

    pub fn is_nested(&self) -> bool {
        self.parent.is_some()
    }

    /// Top-level nodes hash their plan ID; nested nodes also hash the pipeline's own ID so
    /// that sibling pipelines never share a dataset ID.
    pub fn dataset_id_for(&self, node: &OperationId) -> DatasetId {
        if self.is_nested() {
            DatasetId::derive(self.id, node.as_str())
        } else {
            DatasetId::from_node_id(node)
        }
    }

    pub(crate) fn register_node(&self, node: &OperationId, id: DatasetId) {
        self.nodes.lock().insert(node.clone(), id);
    }

    pub fn node_dataset(&self, node: &OperationId) -> StrataResult<DatasetId> {
        self.nodes.lock().get(node).copied().ok_or_else(|| {
            StrataError::InternalError(format!("node {node} has no dataset in pipeline {}", self.id))
        })
    }

    pub fn reader(&self) -> StrataResult<Arc<dyn TableReaderFactory>> {
        self.reader.clone().ok_or_else(|| {
            StrataError::InvalidPlan("query reads storage but no table reader is configured".to_string())
        })
    }
}

/// Per-node view handed to source and transformation constructors.
#[derive(Clone)]
pub struct ExecutionContext {
    pub state: Arc<ExecutionState>,
    /// Dataset IDs of the node's predecessors, in plan order.
    pub parents: Vec<DatasetId>,
    pub bounds: Option<Bounds>,
}
