//! Error types for quilt core operations.

use thiserror::Error;

/// Result type for quilt core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while loading or validating quilt inputs.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Calibration record could not be parsed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Calibration record parsed but is unusable.
    #[error("Invalid calibration: {0}")]
    InvalidCalibration(String),
}
