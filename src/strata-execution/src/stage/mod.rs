mod merge;
mod source;
mod transformer;

pub use merge::{MergeRoute, SlotMerge};
pub(crate) use source::create_stage_source;
pub use source::StageSource;
pub(crate) use transformer::create_stage_transformer;
pub use transformer::StageTransformer;
