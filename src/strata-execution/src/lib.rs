mod cache;
mod concurrent;
mod dataset;
mod dispatcher;
mod executor;
mod pipeline;
mod registry;
mod result;
mod sources;
mod stage;
mod state;
mod transport;
mod trigger;


use std::sync::Arc;

use common_error::StrataError;
use snafu::Snafu;

pub use cache::CachedDataset;
pub use concurrent::ConcurrentDataset;
pub use dataset::{
    AccumulationMode, Clock, Dataset, DatasetId, DatasetRef, PassthroughDataset,
    Transformation, TransformationSet,
};
pub use dispatcher::Dispatcher;
pub use executor::{Executor, QueryResults};
pub use registry::{CreateSource, CreateTransformation, ExecutionRegistry, ExecutionRegistryBuilder};
pub use result::ResultSink;
pub use sources::{forward_stream, Source, SourceStream, TableReaderFactory};
pub use stage::{MergeRoute, SlotMerge, StageSource, StageTransformer};
pub use state::{ExecutionContext, ExecutionState, ResourceAccounting};
pub use transport::ConsecutiveTransport;
pub use trigger::TriggerSpec;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display(
        "Sender of OneShot Channel Dropped before sending data over: {}",
        source
    ))]
    OneShotRecvError {
        source: tokio::sync::oneshot::error::RecvError,
    },
    #[snafu(display("Error creating pipeline from {}: {}", plan_name, source))]
    PipelineCreationError {
        source: StrataError,
        plan_name: String,
    },
    #[snafu(display("Error when running pipeline node {}: {}", node_name, source))]
    PipelineExecutionError {
        source: StrataError,
        node_name: String,
    },
}

impl From<Error> for StrataError {
    fn from(err: Error) -> Self {
        match err {
            Error::PipelineCreationError { source, plan_name } => {
                log::error!("Error creating pipeline from {}", plan_name);
                source
            }
            Error::PipelineExecutionError { source, node_name } => {
                log::error!("Error when running pipeline node {}", node_name);
                source
            }
            Error::OneShotRecvError { .. } => Self::External(Arc::new(err)),
        }
    }
}

type Result<T, E = Error> = std::result::Result<T, E>;
