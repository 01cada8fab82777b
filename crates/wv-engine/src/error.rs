//! Sequence engine error types

use thiserror::Error;

use wv_file::FileError;

#[derive(Error, Debug)]
pub enum SequenceError {
    /// An invariant would be violated: bad argument, sample-count
    /// overflow, or an inconsistent candidate block list. The sequence is
    /// unchanged when this is returned.
    #[error("Sequence inconsistency detected in {0}")]
    Inconsistent(&'static str),

    #[error("Block file error: {0}")]
    File(#[from] FileError),

    #[error("Project XML error: {0}")]
    Xml(String),
}

pub type SeqResult<T> = Result<T, SequenceError>;
