use async_trait::async_trait;
use common_error::{StrataError, StrataResult};
use futures::{stream::BoxStream, StreamExt};
use strata_plan::Spec;
use strata_table::{Bounds, Table};
use tokio_util::sync::CancellationToken;

use crate::dataset::{DatasetId, Transformation, TransformationSet};

pub type SourceStream<'a> = BoxStream<'a, StrataResult<Table>>;

/// Storage access: turns a spec whose roots read storage into a stream of tables.
///
/// A stage source hands over its whole staged sub-graph so that the storage layer can
/// evaluate the pushed-down operations itself.
pub trait TableReaderFactory: Send + Sync {
    fn create_reader(&self, spec: &Spec) -> StrataResult<SourceStream<'static>>;
}

/// Root of a pipeline: produces tables until exhausted, then finishes its transformations.
#[async_trait]
pub trait Source: Send {
    fn name(&self) -> &'static str;
    fn id(&self) -> DatasetId;
    fn add_transformation(&mut self, transformation: Box<dyn Transformation>);
    async fn run(self: Box<Self>, cancel: CancellationToken) -> StrataResult<()>;
}

/// Forwards every table of `stream` as produced by `id`, advances the watermark to the end
/// of `bounds` once the stream is exhausted, then finishes `transformations` with the
/// outcome. Cancellation ends the stream with [`StrataError::Cancelled`].
pub async fn forward_stream(
    id: DatasetId,
    mut stream: SourceStream<'static>,
    transformations: &mut TransformationSet,
    bounds: Option<Bounds>,
    cancel: CancellationToken,
) -> StrataResult<()> {
    let result = pump(id, &mut stream, transformations, bounds, &cancel).await;
    transformations.finish(id, result.as_ref().err().cloned());
    result
}

async fn pump(
    id: DatasetId,
    stream: &mut SourceStream<'static>,
    transformations: &mut TransformationSet,
    bounds: Option<Bounds>,
    cancel: &CancellationToken,
) -> StrataResult<()> {
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(StrataError::Cancelled),
            next = stream.next() => next,
        };
        match next {
            Some(table) => transformations.process(id, table?)?,
            None => break,
        }
    }
    if let Some(bounds) = bounds {
        transformations.update_watermark(id, bounds.stop)?;
    }
    Ok(())
}
