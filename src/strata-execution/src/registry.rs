use std::{collections::HashMap, sync::Arc};

use common_error::{StrataError, StrataResult};
use strata_plan::{PlanNode, STAGE_KIND};

use crate::{
    dataset::{AccumulationMode, DatasetId, DatasetRef, Transformation},
    sources::Source,
    stage::{create_stage_source, create_stage_transformer},
    state::ExecutionContext,
};

pub type CreateSource =
    Arc<dyn Fn(DatasetId, &PlanNode, &ExecutionContext) -> StrataResult<Box<dyn Source>> + Send + Sync>;

pub type CreateTransformation = Arc<
    dyn Fn(
            DatasetId,
            AccumulationMode,
            &PlanNode,
            &ExecutionContext,
        ) -> StrataResult<(Box<dyn Transformation>, DatasetRef)>
        + Send
        + Sync,
>;

/// Constructors for the runtime side of every procedure kind.
///
/// A kind may register a source (used when it is a root of the query), a transformation
/// (used everywhere else), or both.
#[derive(Clone)]
pub struct ExecutionRegistry {
    sources: HashMap<String, CreateSource>,
    transformations: HashMap<String, CreateTransformation>,
}

impl ExecutionRegistry {
    pub fn builder() -> ExecutionRegistryBuilder {
        ExecutionRegistryBuilder::new()
    }

    pub fn has_source(&self, kind: &str) -> bool {
        self.sources.contains_key(kind)
    }

    pub fn has_transformation(&self, kind: &str) -> bool {
        self.transformations.contains_key(kind)
    }

    pub fn create_source(
        &self,
        id: DatasetId,
        node: &PlanNode,
        ctx: &ExecutionContext,
    ) -> StrataResult<Box<dyn Source>> {
        let create = self.sources.get(node.kind()).ok_or_else(|| {
            StrataError::UnsupportedKind(format!("{} has no source", node.kind()))
        })?;
        create(id, node, ctx)
    }

    pub fn create_transformation(
        &self,
        id: DatasetId,
        mode: AccumulationMode,
        node: &PlanNode,
        ctx: &ExecutionContext,
    ) -> StrataResult<(Box<dyn Transformation>, DatasetRef)> {
        let create = self.transformations.get(node.kind()).ok_or_else(|| {
            StrataError::UnsupportedKind(format!("{} has no transformation", node.kind()))
        })?;
        create(id, mode, node, ctx)
    }
}

pub struct ExecutionRegistryBuilder {
    sources: HashMap<String, CreateSource>,
    transformations: HashMap<String, CreateTransformation>,
}

impl Default for ExecutionRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionRegistryBuilder {
    /// A builder that already knows how to run stages.
    pub fn new() -> Self {
        let mut builder = Self {
            sources: HashMap::new(),
            transformations: HashMap::new(),
        };
        builder
            .register_source(STAGE_KIND, Arc::new(create_stage_source))
            .register_transformation(STAGE_KIND, Arc::new(create_stage_transformer));
        builder
    }

    pub fn register_source(&mut self, kind: &str, create: CreateSource) -> &mut Self {
        if self.sources.insert(kind.to_string(), create).is_some() {
            log::debug!("Replacing source constructor for {kind}");
        }
        self
    }

    pub fn register_transformation(
        &mut self,
        kind: &str,
        create: CreateTransformation,
    ) -> &mut Self {
        if self
            .transformations
            .insert(kind.to_string(), create)
            .is_some()
        {
            log::debug!("Replacing transformation constructor for {kind}");
        }
        self
    }

    pub fn build(self) -> ExecutionRegistry {
        ExecutionRegistry {
            sources: self.sources,
            transformations: self.transformations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_is_built_in() {
        let registry = ExecutionRegistry::builder().build();
        assert!(registry.has_source(STAGE_KIND));
        assert!(registry.has_transformation(STAGE_KIND));
        assert!(!registry.has_source("filter"));
    }
}
