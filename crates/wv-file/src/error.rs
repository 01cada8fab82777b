//! Block file I/O error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid block file: {0}")]
    InvalidFormat(String),

    #[error("WAV error: {0}")]
    WavError(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Block data not yet available: {0}")]
    NotAvailable(String),

    #[error("Short read: expected {expected} samples, got {actual}")]
    ShortRead { expected: usize, actual: usize },
}

pub type FileResult<T> = Result<T, FileError>;

impl From<hound::Error> for FileError {
    fn from(err: hound::Error) -> Self {
        FileError::WavError(err.to_string())
    }
}
