use std::{any::Any, sync::Arc};

use async_trait::async_trait;
use common_error::{StrataError, StrataResult};
use serde::{Deserialize, Serialize};
use strata_execution::{
    forward_stream, DatasetId, ExecutionContext, Source, TableReaderFactory, Transformation,
    TransformationSet,
};
use strata_plan::{
    kinds, operation_spec_as, procedure_spec_as, Administration, Operation, OperationId,
    OperationSpec, PlanNode, ProcedureSpec, Spec,
};
use strata_table::{Bounds, Time};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Reads every table stored under `bucket`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FromOpSpec {
    pub bucket: String,
}

impl FromOpSpec {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
        }
    }
}

#[typetag::serde(name = "from")]
impl OperationSpec for FromOpSpec {
    fn kind(&self) -> &str {
        kinds::FROM
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Clone, Debug)]
pub struct FromProcedureSpec {
    pub bucket: String,
}

impl ProcedureSpec for FromProcedureSpec {
    fn kind(&self) -> &str {
        kinds::FROM
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn create_from_procedure(
    op: &Operation,
    _admin: &dyn Administration,
) -> StrataResult<Arc<dyn ProcedureSpec>> {
    let spec = operation_spec_as::<FromOpSpec>(op.spec.as_ref())?;
    if spec.bucket.is_empty() {
        return Err(StrataError::ValueError(format!(
            "{} must name a bucket",
            op.id
        )));
    }
    Ok(Arc::new(FromProcedureSpec {
        bucket: spec.bucket.clone(),
    }))
}

/// A `from` at the root of an unstaged query: storage is asked for the bucket alone.
pub struct FromSource {
    id: DatasetId,
    node: OperationId,
    bucket: String,
    now: Time,
    bounds: Option<Bounds>,
    reader: Arc<dyn TableReaderFactory>,
    transformations: TransformationSet,
}

#[async_trait]
impl Source for FromSource {
    fn name(&self) -> &'static str {
        "FromSource"
    }

    fn id(&self) -> DatasetId {
        self.id
    }

    fn add_transformation(&mut self, transformation: Box<dyn Transformation>) {
        self.transformations.push(transformation);
    }

    #[instrument(skip_all, name = "FromSource::run")]
    async fn run(mut self: Box<Self>, cancel: CancellationToken) -> StrataResult<()> {
        let spec = Spec::new(self.now)
            .with_operation(self.node.clone(), FromOpSpec::new(self.bucket.clone()));
        let stream = match self.reader.create_reader(&spec) {
            Ok(stream) => stream,
            Err(err) => {
                self.transformations.finish(self.id, Some(err.clone()));
                return Err(err);
            }
        };
        log::debug!("From source {} reading bucket {}", self.id, self.bucket);
        forward_stream(self.id, stream, &mut self.transformations, self.bounds, cancel).await
    }
}

pub(crate) fn create_from_source(
    id: DatasetId,
    node: &PlanNode,
    ctx: &ExecutionContext,
) -> StrataResult<Box<dyn Source>> {
    let spec = procedure_spec_as::<FromProcedureSpec>(node.spec.as_ref())?;
    Ok(Box::new(FromSource {
        id,
        node: node.id.clone(),
        bucket: spec.bucket.clone(),
        now: ctx.state.now,
        bounds: ctx.bounds,
        reader: ctx.state.reader()?,
        transformations: TransformationSet::new(),
    }))
}
