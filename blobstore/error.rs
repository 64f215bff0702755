use common::Digest;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Blob not found for: {0}")]
    NotFound(Digest),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Data became stale before write completed")]
    Stale,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
