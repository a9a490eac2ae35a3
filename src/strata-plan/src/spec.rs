use std::{
    any::Any,
    collections::{HashSet, VecDeque},
    fmt::{Debug, Display, Formatter},
    sync::Arc,
};

use common_error::{StrataError, StrataResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strata_table::Time;

/// Kind-tagged payload of an [`Operation`].
///
/// Implementations register under their kind with `#[typetag::serde(name = "...")]` so that
/// a whole [`Spec`], nested stage specs included, serializes with kind tags.
#[typetag::serde(tag = "kind")]
pub trait OperationSpec: Debug + Send + Sync {
    fn kind(&self) -> &str;
    fn as_any(&self) -> &dyn Any;
}

/// Downcasts an operation payload, failing with a construction error on a kind mismatch.
pub fn operation_spec_as<T: 'static>(spec: &dyn OperationSpec) -> StrataResult<&T> {
    spec.as_any().downcast_ref::<T>().ok_or_else(|| {
        StrataError::TypeError(format!(
            "operation spec of kind {} is not a {}",
            spec.kind(),
            std::any::type_name::<T>()
        ))
    })
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(pub String);

impl OperationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for OperationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OperationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OperationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub spec: Arc<dyn OperationSpec>,
}

impl Operation {
    pub fn new(id: impl Into<OperationId>, spec: impl OperationSpec + 'static) -> Self {
        Self {
            id: id.into(),
            spec: Arc::new(spec),
        }
    }

    pub fn kind(&self) -> &str {
        self.spec.kind()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub parent: OperationId,
    pub child: OperationId,
}

impl Edge {
    pub fn new(parent: impl Into<OperationId>, child: impl Into<OperationId>) -> Self {
        Self {
            parent: parent.into(),
            child: child.into(),
        }
    }
}

/// Resource metadata carried by a query.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceManagement {
    pub priority: i32,
    /// Number of nested pipelines a staged transformer may run at once; zero means unset.
    pub concurrency_quota: usize,
    pub memory_bytes_quota: u64,
}

/// A query graph: operations addressed by ID plus parent-to-child edges.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Spec {
    pub operations: Vec<Operation>,
    pub edges: Vec<Edge>,
    pub now: Time,
    pub resources: ResourceManagement,
}

/// Parent/child lists keyed by operation ID, in spec order, plus the roots.
#[derive(Debug, Default)]
pub struct Adjacency {
    pub parents: IndexMap<OperationId, Vec<OperationId>>,
    pub children: IndexMap<OperationId, Vec<OperationId>>,
    pub roots: Vec<OperationId>,
}

impl Adjacency {
    pub fn parents_of(&self, id: &OperationId) -> &[OperationId] {
        self.parents.get(id).map_or(&[], Vec::as_slice)
    }

    pub fn children_of(&self, id: &OperationId) -> &[OperationId] {
        self.children.get(id).map_or(&[], Vec::as_slice)
    }
}

impl Spec {
    pub fn new(now: Time) -> Self {
        Self {
            now,
            ..Default::default()
        }
    }

    pub fn with_operation(
        mut self,
        id: impl Into<OperationId>,
        spec: impl OperationSpec + 'static,
    ) -> Self {
        self.operations.push(Operation::new(id, spec));
        self
    }

    pub fn with_edge(mut self, parent: impl Into<OperationId>, child: impl Into<OperationId>) -> Self {
        self.edges.push(Edge::new(parent, child));
        self
    }

    pub fn add_operation(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    pub fn operation(&self, id: &OperationId) -> Option<&Operation> {
        self.operations.iter().find(|op| &op.id == id)
    }

    pub fn contains(&self, id: &OperationId) -> bool {
        self.operation(id).is_some()
    }

    /// Checks that IDs are unique, edges only reference existing operations and the graph
    /// is acyclic.
    pub fn validate(&self) -> StrataResult<()> {
        self.determine_parents_children_and_roots()?;
        self.topological_order()?;
        Ok(())
    }

    pub fn determine_parents_children_and_roots(&self) -> StrataResult<Adjacency> {
        let mut adjacency = Adjacency::default();
        for op in &self.operations {
            if adjacency.parents.contains_key(&op.id) {
                return Err(StrataError::InvalidPlan(format!(
                    "found duplicate operation ID {}",
                    op.id
                )));
            }
            adjacency.parents.insert(op.id.clone(), vec![]);
            adjacency.children.insert(op.id.clone(), vec![]);
        }
        let mut seen = HashSet::new();
        for edge in &self.edges {
            if !seen.insert(edge) {
                return Err(StrataError::InvalidPlan(format!(
                    "found duplicate edge {} -> {}",
                    edge.parent, edge.child
                )));
            }
            let Some(children) = adjacency.children.get_mut(&edge.parent) else {
                return Err(StrataError::InvalidPlan(format!(
                    "edge references unknown parent operation {}",
                    edge.parent
                )));
            };
            children.push(edge.child.clone());
            let Some(parents) = adjacency.parents.get_mut(&edge.child) else {
                return Err(StrataError::InvalidPlan(format!(
                    "edge references unknown child operation {}",
                    edge.child
                )));
            };
            parents.push(edge.parent.clone());
        }
        adjacency.roots = adjacency
            .parents
            .iter()
            .filter(|(_, parents)| parents.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        Ok(adjacency)
    }

    /// Operations ordered so that every parent precedes its children. Ties keep spec order.
    pub fn topological_order(&self) -> StrataResult<Vec<&Operation>> {
        let adjacency = self.determine_parents_children_and_roots()?;
        let mut in_degree: IndexMap<&OperationId, usize> = adjacency
            .parents
            .iter()
            .map(|(id, parents)| (id, parents.len()))
            .collect();
        let mut ready: VecDeque<&OperationId> = adjacency.roots.iter().collect();
        let mut order = Vec::with_capacity(self.operations.len());
        while let Some(id) = ready.pop_front() {
            order.push(id);
            for child in adjacency.children_of(id) {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(child);
                    }
                }
            }
        }
        if order.len() != self.operations.len() {
            return Err(StrataError::InvalidPlan(
                "query graph contains a cycle".to_string(),
            ));
        }
        Ok(order
            .into_iter()
            .filter_map(|id| self.operation(id))
            .collect())
    }

    /// Visits every operation in topological order.
    pub fn walk<F>(&self, mut f: F) -> StrataResult<()>
    where
        F: FnMut(&Operation) -> StrataResult<()>,
    {
        for op in self.topological_order()? {
            f(op)?;
        }
        Ok(())
    }
}
