mod source;

pub use source::{forward_stream, Source, SourceStream, TableReaderFactory};
