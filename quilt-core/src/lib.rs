//! # Saorsa Quilt Core
//!
//! Geometry and planning for multi-view quilt rendering on lenticular
//! displays. Nothing in this crate touches the GPU.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 quilt-core                  │
//! ├─────────────────────────────────────────────┤
//! │  Calibration     │  Quilt Layout            │
//! │  - Device record │  - Presets               │
//! │  - Emulation     │  - Tile addressing       │
//! ├─────────────────────────────────────────────┤
//! │  Camera Rig      │  Interpolation Plan      │
//! │  - Clip planes   │  - Base-view predicate   │
//! │  - View shear    │  - Skipped descriptors   │
//! └─────────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod calibration;
pub mod camera;
pub mod depth;
pub mod device;
pub mod error;
pub mod interpolation;
pub mod layout;

pub use calibration::{Calibration, CalibrationLoad, DEFAULT_VIEW_CONE};
pub use camera::{view_lerp, CameraRig, CameraState, ViewTransform, CULLING_FOV};
pub use device::{DeviceKind, DeviceSettings};
pub use error::{CoreError, CoreResult};
pub use interpolation::{
    is_base_view, BaseView, InterpolationPlan, SkippedView, ViewInterpolation,
};
pub use layout::{compute_layout, LayoutSource, QuiltLayout, QuiltPreset, TileRect, AUTO_ASPECT};

/// Quilt core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
