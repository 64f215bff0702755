use thiserror::Error;

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("Digest format not valid: {0}")]
    InvalidDigest(String),
}
