//! # Camera Rig
//!
//! The rig describes the focal volume the quilt captures: a box of half
//! height `size` centred on the rig transform, viewed by a camera placed
//! `cam_distance` behind it. Every view is the center camera slid sideways
//! with a matching projection shear, so the focal plane stays fixed in
//! screen space while nearer and farther content shows parallax.
//!
//! Matrices are column-major `glam` matrices for a right-handed camera
//! looking down `-Z` with zero-to-one depth.

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

/// Field of view applied while rendering views, to keep culling from
/// clipping content that the sheared frusta still see.
pub const CULLING_FOV: f32 = 135.0;

/// Smallest allowed near clip distance.
pub const MIN_NEAR_CLIP: f32 = 0.1;

/// Capture volume and camera settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraRig {
    /// World transform of the focal center.
    pub transform: Mat4,
    /// Half height of the focal plane in world units.
    pub size: f32,
    /// Vertical field of view in degrees.
    pub fov: f32,
    /// Near clip distance in front of the focal plane, in multiples of `size`.
    pub near_clip_factor: f32,
    /// Far clip distance behind the focal plane, in multiples of `size`.
    pub far_clip_factor: f32,
    /// Scale applied to the calibration view cone (0..=1).
    pub view_cone_modifier: f32,
    /// Added to the calibration center when compositing.
    pub center_offset: f32,
    /// Horizontal frustum offset in degrees.
    pub horizontal_frustum_offset: f32,
    /// Vertical frustum offset in degrees.
    pub vertical_frustum_offset: f32,
    /// Target position in rig space. Overrides `fov` and the offsets.
    pub frustum_target: Option<Vec3>,
    /// Background color (RGBA).
    pub background: [f32; 4],
}

impl Default for CameraRig {
    fn default() -> Self {
        Self {
            transform: Mat4::IDENTITY,
            size: 5.0,
            fov: 14.0,
            near_clip_factor: 0.5,
            far_clip_factor: 4.0,
            view_cone_modifier: 1.0,
            center_offset: 0.0,
            horizontal_frustum_offset: 0.0,
            vertical_frustum_offset: 0.0,
            frustum_target: None,
            background: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl CameraRig {
    /// Field of view in degrees, derived from the frustum target if set.
    #[must_use]
    pub fn effective_fov(&self) -> f32 {
        match self.frustum_target {
            Some(target) if target.z != 0.0 => {
                2.0 * (self.size / target.z).abs().atan().to_degrees()
            }
            _ => self.fov,
        }
    }

    /// Distance from the camera to the focal plane. Always positive.
    #[must_use]
    pub fn cam_distance(&self) -> f32 {
        match self.frustum_target {
            Some(target) => target.z.abs(),
            None => self.size / (self.fov * 0.5).to_radians().tan(),
        }
    }

    /// Near and far clip distances.
    #[must_use]
    pub fn clip_planes(&self) -> (f32, f32) {
        let dist = self.cam_distance();
        let near = (dist - self.size * self.near_clip_factor).max(MIN_NEAR_CLIP);
        let far = (dist + self.size * self.far_clip_factor).max(near);
        (near, far)
    }

    /// Build the center (straight-ahead) camera for a content aspect.
    #[must_use]
    pub fn center_state(&self, aspect: f32) -> CameraState {
        let fov = self.effective_fov();
        let dist = self.cam_distance();
        let (near, far) = self.clip_planes();

        let mut view = self.transform.inverse();
        view.w_axis.z -= dist;
        let mut projection = Mat4::perspective_rh(fov.to_radians(), aspect, near, far);

        let (shift_x, shift_y) = match self.frustum_target {
            Some(target) => (-target.x, -target.y),
            None => (
                dist * self.horizontal_frustum_offset.to_radians().tan(),
                dist * self.vertical_frustum_offset.to_radians().tan(),
            ),
        };
        if shift_x != 0.0 {
            view.w_axis.x += shift_x;
            projection.z_axis.x += shift_x / (self.size * aspect);
        }
        if shift_y != 0.0 {
            view.w_axis.y += shift_y;
            projection.z_axis.y += shift_y / self.size;
        }

        CameraState {
            view,
            projection,
            fov,
            aspect,
            near,
            far,
            size: self.size,
            cam_distance: dist,
        }
    }

    /// Horizontal sweep across the whole view cone.
    #[must_use]
    pub fn view_cone_sweep(&self, view_cone: f32) -> f32 {
        -self.cam_distance() * (view_cone * self.view_cone_modifier).to_radians().tan()
    }
}

/// Live camera state: the matrices and lens values a scene renders with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    /// World-to-camera matrix.
    pub view: Mat4,
    /// Projection matrix.
    pub projection: Mat4,
    /// Vertical field of view in degrees.
    pub fov: f32,
    /// Content aspect ratio.
    pub aspect: f32,
    /// Near clip distance.
    pub near: f32,
    /// Far clip distance.
    pub far: f32,
    /// Half height of the focal plane.
    pub size: f32,
    /// Camera to focal plane distance.
    pub cam_distance: f32,
}

/// Position of a view across the cone, in `[-0.5, 0.5]`.
///
/// A single view is always the center view.
#[must_use]
#[allow(clippy::cast_precision_loss)] // View counts are tiny
pub fn view_lerp(index: u32, num_views: u32) -> f32 {
    if num_views <= 1 {
        return 0.0;
    }
    index as f32 / (num_views - 1) as f32 - 0.5
}

/// Matrices for one view of the quilt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    /// View index.
    pub index: u32,
    /// Position across the cone, see [`view_lerp`].
    pub lerp: f32,
    /// Horizontal camera shift in world units.
    pub shear: f32,
    /// World-to-camera matrix.
    pub view: Mat4,
    /// Projection matrix.
    pub projection: Mat4,
}

impl ViewTransform {
    /// Shear the center camera for view `index`.
    #[must_use]
    pub fn for_view(center: &CameraState, index: u32, num_views: u32, sweep: f32) -> Self {
        let lerp = view_lerp(index, num_views);
        let shear = lerp * sweep;
        let mut view = center.view;
        let mut projection = center.projection;
        view.w_axis.x += shear;
        projection.z_axis.x += shear / (center.size * center.aspect);
        Self {
            index,
            lerp,
            shear,
            view,
            projection,
        }
    }

    /// Combined world-to-clip matrix.
    #[must_use]
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }
}
