//! # Lightfield Composite
//!
//! Turns a finished quilt into the image shown on the display. Every
//! physical subpixel of the lenticular screen sees exactly one view; the
//! lightfield pass works out which one from the calibration and samples
//! that view's tile.
//!
//! Before compositing, an optional [`PostProcess`] runs over the quilt as
//! one image.

use bytemuck::{Pod, Zeroable};

use quilt_core::depth::{is_sentinel, linearize};
use quilt_core::{Calibration, CameraState, QuiltLayout};

use crate::buffer::{FrameImage, QuiltBuffer};
use crate::error::{RenderError, RenderResult};

/// Lenticular and quilt parameters for the lightfield pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightfieldParams {
    /// Output width in pixels.
    pub screen_width: u32,
    /// Output height in pixels.
    pub screen_height: u32,
    /// Lenticule pitch.
    pub pitch: f32,
    /// Lenticule slope.
    pub slope: f32,
    /// Lenticule phase, including the rig's center offset.
    pub center: f32,
    /// Width of one subpixel in normalized screen units.
    pub subpixel_size: f32,
    /// `[columns, rows, views, columns * rows]`.
    pub tile: [f32; 4],
    /// Fraction of the quilt covered by tiles, horizontally and vertically.
    pub view_portion: [f32; 2],
    /// Aspect of the quilt content.
    pub content_aspect: f32,
    /// Aspect of the display.
    pub display_aspect: f32,
    /// Crop rather than letterbox when the aspects differ.
    pub overscan: bool,
}

impl LightfieldParams {
    /// Parameters for a calibration and layout.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(calibration: &Calibration, layout: &QuiltLayout, center_offset: f32) -> Self {
        let (columns, rows) = layout.grid();
        Self {
            screen_width: calibration.screen_width,
            screen_height: calibration.screen_height,
            pitch: calibration.pitch,
            slope: calibration.slope,
            center: calibration.center + center_offset,
            subpixel_size: calibration.subpixel_size,
            tile: [
                columns as f32,
                rows as f32,
                layout.num_views() as f32,
                (columns * rows) as f32,
            ],
            view_portion: [layout.view_portion_horizontal(), layout.view_portion_vertical()],
            content_aspect: layout.effective_aspect(calibration.aspect),
            display_aspect: calibration.aspect,
            overscan: layout.overscan(),
        }
    }

    /// Map a screen coordinate into content space.
    ///
    /// Returns `None` for letterbox bars and cropped regions.
    #[must_use]
    pub fn fit_aspect(&self, u: f32, v: f32) -> Option<[f32; 2]> {
        let (c, d) = (self.content_aspect, self.display_aspect);
        let (mut x, mut y) = (u, v);
        let widen_x = |x: f32| (x - 0.5) * d / c + 0.5;
        let widen_y = |y: f32| (y - 0.5) * c / d + 0.5;
        if c > d {
            if self.overscan {
                x = widen_x(x);
            } else {
                y = widen_y(y);
            }
        } else if c < d {
            if self.overscan {
                y = widen_y(y);
            } else {
                x = widen_x(x);
            }
        }
        let inside = (0.0..1.0).contains(&x) && (0.0..1.0).contains(&y);
        inside.then_some([x, y])
    }

    /// View seen by subpixel `channel` at screen coordinate `(u, v)`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn view_for_subpixel(&self, u: f32, v: f32, channel: u32) -> u32 {
        let views = self.tile[2].max(1.0);
        let mut a = (u + channel as f32 * self.subpixel_size + v * self.slope) * self.pitch - self.center;
        a -= a.floor();
        let view = ((1.0 - a) * views).floor().clamp(0.0, views - 1.0);
        view as u32
    }

    /// GPU uniform block for a quilt size.
    #[must_use]
    pub fn uniforms(&self, quilt_width: u32, quilt_height: u32) -> LightfieldUniforms {
        LightfieldUniforms {
            screen_size: [self.screen_width, self.screen_height],
            quilt_size: [quilt_width, quilt_height],
            pitch: self.pitch,
            slope: self.slope,
            center: self.center,
            subpixel_size: self.subpixel_size,
            tile: self.tile,
            view_portion: self.view_portion,
            _pad: [0.0; 2],
            aspect: [
                self.content_aspect,
                self.display_aspect,
                if self.overscan { 1.0 } else { 0.0 },
                0.0,
            ],
        }
    }
}

/// Uniform block of the lightfield shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightfieldUniforms {
    /// Output size.
    pub screen_size: [u32; 2],
    /// Quilt size.
    pub quilt_size: [u32; 2],
    /// Lenticule pitch.
    pub pitch: f32,
    /// Lenticule slope.
    pub slope: f32,
    /// Lenticule phase.
    pub center: f32,
    /// Subpixel width.
    pub subpixel_size: f32,
    /// `[columns, rows, views, columns * rows]`.
    pub tile: [f32; 4],
    /// Tile coverage of the quilt.
    pub view_portion: [f32; 2],
    /// Padding.
    pub _pad: [f32; 2],
    /// `[content aspect, display aspect, overscan, 0]`.
    pub aspect: [f32; 4],
}

/// Nearest-filtered sample of view `view` at content coordinate `uv`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn sample_view(buffer: &QuiltBuffer, params: &LightfieldParams, view: u32, uv: [f32; 2]) -> [u8; 4] {
    let columns = params.tile[0].max(1.0) as u32;
    let rows = params.tile[1].max(1.0);
    let (qw, qh) = (buffer.width(), buffer.height());
    let qx = ((view % columns) as f32 + uv[0]) / columns as f32 * params.view_portion[0];
    let qy = ((view / columns) as f32 + uv[1]) / rows * params.view_portion[1];
    let px = (qx * qw as f32).floor().clamp(0.0, qw.saturating_sub(1) as f32) as u32;
    let py_up = (qy * qh as f32).floor().clamp(0.0, qh.saturating_sub(1) as f32) as u32;
    let py = qh.saturating_sub(1) - py_up;
    buffer.get_pixel(px, py).unwrap_or([0, 0, 0, 255])
}

/// Composite the quilt into a lightfield image on the CPU.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn render_lightfield(buffer: &QuiltBuffer, params: &LightfieldParams) -> FrameImage {
    let (w, h) = (params.screen_width, params.screen_height);
    let mut out = FrameImage::new(w, h);
    for y in 0..h {
        let v = 1.0 - (y as f32 + 0.5) / h as f32;
        for x in 0..w {
            let u = (x as f32 + 0.5) / w as f32;
            let idx = (y as usize * w as usize + x as usize) * 4;
            let pixel = match params.fit_aspect(u, v) {
                Some(uv) => {
                    let mut rgb = [0_u8; 3];
                    for (channel, value) in (0_u32..).zip(rgb.iter_mut()) {
                        let view = params.view_for_subpixel(u, v, channel);
                        *value = sample_view(buffer, params, view, uv)[channel as usize];
                    }
                    [rgb[0], rgb[1], rgb[2], 255]
                }
                None => [0, 0, 0, 255],
            };
            out.pixels[idx..idx + 4].copy_from_slice(&pixel);
        }
    }
    out
}

/// An image effect applied to the whole quilt before compositing.
///
/// The quilt is passed as one frame, so effects that sample neighbours
/// bleed across tile edges.
pub trait PostProcess {
    /// Effect name for logs.
    fn name(&self) -> &str;

    /// Apply the effect in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the image and depth sizes disagree.
    fn apply(
        &mut self,
        width: u32,
        height: u32,
        color: &mut [u8],
        depth: &[f32],
        camera: &CameraState,
    ) -> RenderResult<()>;
}

/// Depth-driven blur: pixels far from the focus distance are box-blurred
/// with a radius proportional to their defocus.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthOfField {
    /// Focus distance; the camera's focal plane when `None`.
    pub focus: Option<f32>,
    /// Defocus distance at which the blur reaches `max_radius`.
    pub range: f32,
    /// Largest blur radius in pixels.
    pub max_radius: u32,
}

impl Default for DepthOfField {
    fn default() -> Self {
        Self {
            focus: None,
            range: 10.0,
            max_radius: 2,
        }
    }
}

impl DepthOfField {
    /// Blur radius for one depth sample. Empty pixels take the largest.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn radius(&self, depth: f32, focus: f32, camera: &CameraState) -> u32 {
        if is_sentinel(depth) {
            return self.max_radius;
        }
        let distance = linearize(depth, camera.near, camera.far);
        let coc = (distance - focus).abs() / self.range.max(f32::EPSILON);
        (coc * self.max_radius as f32).round().clamp(0.0, self.max_radius as f32) as u32
    }
}

impl PostProcess for DepthOfField {
    fn name(&self) -> &str {
        "depth_of_field"
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn apply(
        &mut self,
        width: u32,
        height: u32,
        color: &mut [u8],
        depth: &[f32],
        camera: &CameraState,
    ) -> RenderResult<()> {
        let (w, h) = (width as usize, height as usize);
        if color.len() != w * h * 4 || depth.len() != w * h {
            return Err(RenderError::Frame(format!(
                "post-process input is not {width}x{height}"
            )));
        }
        let focus = self.focus.unwrap_or(camera.cam_distance);
        let source = color.to_vec();

        for y in 0..h {
            for x in 0..w {
                let r = self.radius(depth[y * w + x], focus, camera) as usize;
                if r == 0 {
                    continue;
                }
                let mut sum = [0_u32; 3];
                let mut count = 0_u32;
                for sy in y.saturating_sub(r)..=(y + r).min(h - 1) {
                    for sx in x.saturating_sub(r)..=(x + r).min(w - 1) {
                        let i = (sy * w + sx) * 4;
                        for (c, s) in sum.iter_mut().enumerate() {
                            *s += u32::from(source[i + c]);
                        }
                        count += 1;
                    }
                }
                let i = (y * w + x) * 4;
                for (c, s) in sum.iter().enumerate() {
                    color[i + c] = ((s + count / 2) / count) as u8;
                }
            }
        }
        Ok(())
    }
}
