//! Renderer error types.

use thiserror::Error;

use crate::buffer::FramePhase;

/// Result type for renderer operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// Errors that can occur during rendering.
#[derive(Debug, Error)]
pub enum RenderError {
    /// GPU initialization failed.
    #[error("GPU initialization failed: {0}")]
    GpuInit(String),

    /// Shader compilation failed.
    #[error("Shader compilation failed: {0}")]
    Shader(String),

    /// Buffer or texture allocation failed.
    #[error("Failed to allocate resource: {0}")]
    Resource(String),

    /// Rendering frame failed.
    #[error("Frame render failed: {0}")]
    Frame(String),

    /// A pipeline stage ran out of order.
    #[error("Pipeline phase out of order: {from} -> {to}")]
    PhaseOrder {
        /// Phase the quilt was in.
        from: FramePhase,
        /// Phase that was requested.
        to: FramePhase,
    },
}
