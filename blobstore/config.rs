use crate::BlobError;
use serde::Deserialize;
use std::path::PathBuf;

/// Options for the circular storage backend, deserialized from the node's
/// TOML configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CircularConfig {
    /// Size of the data file in bytes. The cache never holds more than this
    /// many bytes of blob data.
    pub data_capacity: u64,
    pub data_file_path: PathBuf,
    pub offset_file_path: PathBuf,
    pub state_file_path: PathBuf,
    /// Puts larger than this are rejected up front. Defaults to
    /// `data_capacity`.
    #[serde(default)]
    pub max_blob_size: Option<u64>,
}

impl CircularConfig {
    pub(crate) fn validate(&self) -> Result<(), BlobError> {
        if self.data_capacity == 0 {
            return Err(BlobError::InvalidArgument(
                "data_capacity must be positive".to_string(),
            ));
        }
        if self.data_capacity > i64::MAX as u64 {
            return Err(BlobError::InvalidArgument(
                "data_capacity does not fit in a signed blob length".to_string(),
            ));
        }
        if let Some(max) = self.max_blob_size {
            if max > self.data_capacity {
                return Err(BlobError::InvalidArgument(
                    "max_blob_size cannot exceed data_capacity".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn max_blob_size(&self) -> u64 {
        self.max_blob_size.unwrap_or(self.data_capacity)
    }
}
