use std::sync::Arc;

use async_trait::async_trait;
use common_error::StrataResult;
use strata_plan::{procedure_spec_as, PlanNode, Spec, StageProcedureSpec};
use strata_table::Bounds;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::{
    dataset::{DatasetId, Transformation, TransformationSet},
    sources::{forward_stream, Source, TableReaderFactory},
    state::ExecutionContext,
};

/// A stage at the root of a query: its staged sub-graph is handed to storage as a whole.
pub struct StageSource {
    id: DatasetId,
    spec: Spec,
    bounds: Option<Bounds>,
    reader: Arc<dyn TableReaderFactory>,
    transformations: TransformationSet,
}

impl StageSource {
    pub fn new(
        id: DatasetId,
        spec: Spec,
        bounds: Option<Bounds>,
        reader: Arc<dyn TableReaderFactory>,
    ) -> Self {
        Self {
            id,
            spec,
            bounds,
            reader,
            transformations: TransformationSet::new(),
        }
    }
}

#[async_trait]
impl Source for StageSource {
    fn name(&self) -> &'static str {
        "StageSource"
    }

    fn id(&self) -> DatasetId {
        self.id
    }

    fn add_transformation(&mut self, transformation: Box<dyn Transformation>) {
        self.transformations.push(transformation);
    }

    #[instrument(skip_all, name = "StageSource::run")]
    async fn run(mut self: Box<Self>, cancel: CancellationToken) -> StrataResult<()> {
        let stream = match self.reader.create_reader(&self.spec) {
            Ok(stream) => stream,
            Err(err) => {
                self.transformations.finish(self.id, Some(err.clone()));
                return Err(err);
            }
        };
        log::debug!(
            "Stage source {} reading {} staged operations",
            self.id,
            self.spec.operations.len()
        );
        forward_stream(self.id, stream, &mut self.transformations, self.bounds, cancel).await
    }
}

pub(crate) fn create_stage_source(
    id: DatasetId,
    node: &PlanNode,
    ctx: &ExecutionContext,
) -> StrataResult<Box<dyn Source>> {
    let stage = procedure_spec_as::<StageProcedureSpec>(node.spec.as_ref())?;
    Ok(Box::new(StageSource::new(
        id,
        stage.spec.clone(),
        node.bounds,
        ctx.state.reader()?,
    )))
}
