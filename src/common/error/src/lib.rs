mod error;

pub use error::{GenericError, StrataError, StrataResult};
