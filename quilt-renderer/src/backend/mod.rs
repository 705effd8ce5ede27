//! Compute backend implementations.
//!
//! A backend runs the view-reconstruction kernels over a [`QuiltBuffer`] and
//! produces the lightfield image from it.

pub mod cpu;
#[cfg(feature = "gpu")]
pub mod wgpu;

use serde::{Deserialize, Serialize};

use quilt_core::InterpolationPlan;

use crate::buffer::{FrameImage, QuiltBuffer};
use crate::composite::LightfieldParams;
use crate::error::RenderResult;
use crate::interpolate::DispatchPlan;

/// Workgroup size shared by the WGSL kernels and the CPU reference.
pub const WORKGROUP_SIZE: [u32; 3] = [8, 8, 1];

/// Available compute backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    /// wgpu compute shaders (requires a GPU adapter).
    #[default]
    Gpu,
    /// Reference kernels on the CPU (always available).
    Cpu,
}

/// Trait for compute backends.
pub trait ComputeBackend {
    /// Get the backend type.
    fn backend_type(&self) -> BackendType;

    /// Human-readable backend name for logs.
    fn name(&self) -> &str;

    /// Workgroup size the kernels are compiled for.
    fn workgroup_size(&self) -> [u32; 3] {
        WORKGROUP_SIZE
    }

    /// Run the reconstruction dispatches in order.
    ///
    /// The descriptor arrays come from `plan`; they live only for this
    /// call.
    ///
    /// # Errors
    ///
    /// Returns an error if resources cannot be allocated or a dispatch
    /// fails.
    fn interpolate(
        &mut self,
        buffer: &mut QuiltBuffer,
        plan: &InterpolationPlan,
        dispatch: &DispatchPlan,
    ) -> RenderResult<()>;

    /// Sample the quilt into a lightfield image for the display.
    ///
    /// # Errors
    ///
    /// Returns an error if resources cannot be allocated or the pass fails.
    fn lightfield(&mut self, buffer: &QuiltBuffer, params: &LightfieldParams) -> RenderResult<FrameImage>;
}

/// Create the preferred backend, falling back to the CPU.
///
/// # Errors
///
/// Returns an error if no backend can be created.
pub fn create_backend(preferred: BackendType) -> RenderResult<Box<dyn ComputeBackend>> {
    match preferred {
        BackendType::Gpu => {
            #[cfg(feature = "gpu")]
            {
                match self::wgpu::WgpuBackend::new() {
                    Ok(b) => return Ok(Box::new(b)),
                    Err(e) => {
                        tracing::warn!("GPU compute unavailable, falling back to CPU: {}", e);
                    }
                }
            }
            #[cfg(not(feature = "gpu"))]
            tracing::warn!("Built without the gpu feature, falling back to CPU");
            create_backend(BackendType::Cpu)
        }
        BackendType::Cpu => Ok(Box::new(cpu::CpuBackend::new())),
    }
}
