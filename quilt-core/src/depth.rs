//! Depth encoding shared by the renderer and the interpolation stage.
//!
//! Tiles carry device depth in `[0, 1]` as produced by a right-handed
//! zero-to-one perspective projection (near plane at 0, far plane at 1).
//! The depth quilt is cleared to [`DEPTH_CLEAR`], a sentinel outside that
//! range that marks "no data" and compares farther than any valid sample.

/// Clear value of the depth quilt.
pub const DEPTH_CLEAR: f32 = 2.0;

/// Device depth of the far plane, used as the per-view background.
pub const FAR_DEPTH: f32 = 1.0;

/// Whether a depth sample is the "no data" sentinel.
#[must_use]
pub fn is_sentinel(depth: f32) -> bool {
    depth > FAR_DEPTH
}

/// Convert device depth to a positive eye-space distance.
#[must_use]
pub fn linearize(depth: f32, near: f32, far: f32) -> f32 {
    near * far / (far - depth * (far - near))
}

/// Convert a positive eye-space distance to device depth.
#[must_use]
pub fn device_depth(distance: f32, near: f32, far: f32) -> f32 {
    far * (distance - near) / (distance * (far - near))
}
