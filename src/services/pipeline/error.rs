use std::time::Duration;
use thiserror::Error;

use crate::services::raster::DecodeError;

/// Why a single uploaded file could not be converted and published.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    #[error("Upload exceeds the {limit} byte limit")]
    TooLarge { limit: usize },

    #[error("Failed to stage upload: {0}")]
    UploadIo(#[from] std::io::Error),

    #[error("Failed to extract archive: {0}")]
    Extraction(String),

    #[error("Conversion failed: {0}")]
    Conversion(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Conversion timed out after {0:?}")]
    Timeout(Duration),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Storage or catalog unavailable after retries, as opposed to bad input.
    pub fn is_service_failure(&self) -> bool {
        matches!(self, PipelineError::Publish(_))
    }
}

impl From<DecodeError> for PipelineError {
    fn from(e: DecodeError) -> Self {
        PipelineError::Conversion(e.to_string())
    }
}
