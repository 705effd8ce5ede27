//! # Saorsa Quilt Renderer
//!
//! Multi-view renderer for lenticular light-field displays, with view
//! interpolation on wgpu compute shaders.
//!
//! ## Frame Pipeline
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌──────────────┐   ┌────────────┐
//! │ Base views   │──>│ Interpolation │──>│ Post-process │──>│ Lightfield │
//! │ (scene)      │   │ (compute)     │   │ (optional)   │   │ composite  │
//! └──────────────┘   └───────────────┘   └──────────────┘   └────────────┘
//! ```
//!
//! ## Compute Backends
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │            ComputeBackend Trait             │
//! ├──────────────────────┬──────────────────────┤
//! │ wgpu                 │ CPU reference        │
//! │ (GPU, feature "gpu") │ (always available)   │
//! └──────────────────────┴──────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod buffer;
pub mod composite;
pub mod error;
pub mod holographic;
pub mod interpolate;
pub mod renderer;
pub mod scene;

pub use backend::{create_backend, BackendType, ComputeBackend};
pub use buffer::{FrameImage, FramePhase, QuiltBuffer};
pub use composite::{render_lightfield, DepthOfField, LightfieldParams, PostProcess};
pub use error::{RenderError, RenderResult};
pub use holographic::{FrameContext, FrameResult, FrameStats, QuiltRenderer, RenderMode, RendererConfig};
pub use interpolate::{InterpolationSettings, InterpolationStage, Kernel, KernelTable, Sweep};
pub use renderer::{RenderOptions, ViewRenderer};
pub use scene::{Card, CardScene, SceneSource, ViewTarget};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
