//! # Scene Interface
//!
//! The renderer does not own a scene graph. Hosts implement
//! [`SceneSource`] to draw their scene for a given camera into a
//! [`ViewTarget`], and get notified around each rendered view.
//!
//! [`CardScene`] is a small software-rasterized scene of flat cards used
//! by the CLI and the tests.

use glam::{Vec2, Vec3, Vec4};
use quilt_core::CameraState;

use crate::buffer::{to_rgba8, FrameImage};
use crate::error::RenderResult;

/// Largest raw depth value (24-bit unsigned normalized).
pub const RAW_DEPTH_MAX: u32 = 0x00FF_FFFF;

/// Encode device depth in `[0, 1]` as 24-bit raw depth.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn encode_raw_depth(depth: f32) -> u32 {
    (depth.clamp(0.0, 1.0) * RAW_DEPTH_MAX as f32).round() as u32
}

/// Decode 24-bit raw depth to device depth in `[0, 1]`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn decode_raw_depth(raw: u32) -> f32 {
    raw.min(RAW_DEPTH_MAX) as f32 / RAW_DEPTH_MAX as f32
}

/// Color and depth target for a single view.
#[derive(Debug, Clone)]
pub struct ViewTarget {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// RGBA8 color, top-down.
    pub color: Vec<u8>,
    /// Raw 24-bit depth, top-down.
    pub depth: Vec<u32>,
}

impl ViewTarget {
    /// Allocate a view target.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        let pixels = width as usize * height as usize;
        Self {
            width,
            height,
            color: vec![0; pixels * 4],
            depth: vec![RAW_DEPTH_MAX; pixels],
        }
    }

    /// Clear color to `background` and depth to the far plane.
    pub fn clear(&mut self, background: [f32; 4]) {
        let rgba = to_rgba8(background);
        for chunk in self.color.chunks_exact_mut(4) {
            chunk.copy_from_slice(&rgba);
        }
        self.depth.fill(RAW_DEPTH_MAX);
    }

    /// Resolve raw depth into single-channel float depth.
    pub fn resolve_depth(&self, out: &mut Vec<f32>) {
        out.clear();
        out.extend(self.depth.iter().map(|&raw| decode_raw_depth(raw)));
    }

    /// Write a pixel if it passes the depth test.
    pub fn plot(&mut self, x: u32, y: u32, depth: f32, color: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = y as usize * self.width as usize + x as usize;
        let raw = encode_raw_depth(depth);
        if raw < self.depth[idx] {
            self.depth[idx] = raw;
            self.color[idx * 4..idx * 4 + 4].copy_from_slice(&color);
        }
    }

    /// Take the color plane as an image.
    #[must_use]
    pub fn into_image(self) -> FrameImage {
        FrameImage {
            width: self.width,
            height: self.height,
            pixels: self.color,
        }
    }
}

/// Reuses view targets across views and frames.
#[derive(Debug, Default)]
pub struct ViewTargetPool {
    free: Vec<ViewTarget>,
    allocations: u64,
}

impl ViewTargetPool {
    /// Most targets kept for reuse.
    pub const MAX_FREE: usize = 4;

    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a target of the given size.
    pub fn acquire(&mut self, width: u32, height: u32) -> ViewTarget {
        if let Some(pos) = self
            .free
            .iter()
            .position(|t| t.width == width && t.height == height)
        {
            return self.free.swap_remove(pos);
        }
        self.allocations += 1;
        tracing::trace!("Allocating view target {}x{}", width, height);
        ViewTarget::new(width, height)
    }

    /// Return a target for reuse.
    pub fn release(&mut self, target: ViewTarget) {
        if self.free.len() < Self::MAX_FREE {
            self.free.push(target);
        }
    }

    /// Total targets allocated since creation.
    #[must_use]
    pub const fn allocations(&self) -> u64 {
        self.allocations
    }

    /// Drop every pooled target.
    pub fn clear(&mut self) {
        self.free.clear();
    }
}

/// A scene that can be drawn from an arbitrary camera.
pub trait SceneSource {
    /// Draw the scene into `target`.
    ///
    /// The target is already cleared. `camera.view` and `camera.projection`
    /// are the matrices to draw with; `camera.fov` may be wider than the
    /// projection and is only meant for culling.
    ///
    /// # Errors
    ///
    /// Returns an error if drawing fails.
    fn render_view(&mut self, camera: &CameraState, target: &mut ViewTarget) -> RenderResult<()>;

    /// Called before view `index` is drawn.
    fn before_view(&mut self, _index: u32) {}

    /// Called once after the last view of a quilt.
    fn after_views(&mut self, _num_views: u32) {}
}

/// A flat, axis-aligned card facing `+Z`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Card {
    /// Center in world space.
    pub center: Vec3,
    /// Half extents along X and Y.
    pub half_size: Vec2,
    /// Fill color.
    pub color: [u8; 4],
}

/// A scene made of flat colored cards.
#[derive(Debug, Clone, Default)]
pub struct CardScene {
    cards: Vec<Card>,
    view_log: Vec<u32>,
    quilt_open: bool,
    quilts_finished: u32,
}

impl CardScene {
    /// Create an empty scene.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Three overlapping cards in front of, on and behind the focal plane.
    #[must_use]
    pub fn layered() -> Self {
        let mut scene = Self::new();
        scene.add_card(Card {
            center: Vec3::new(0.0, 0.0, -3.0),
            half_size: Vec2::new(4.0, 4.0),
            color: [40, 80, 200, 255],
        });
        scene.add_card(Card {
            center: Vec3::new(-0.5, 0.5, 0.0),
            half_size: Vec2::new(1.5, 1.5),
            color: [60, 200, 90, 255],
        });
        scene.add_card(Card {
            center: Vec3::new(0.8, -0.6, 2.0),
            half_size: Vec2::new(0.8, 0.8),
            color: [230, 70, 50, 255],
        });
        scene
    }

    /// Add a card.
    pub fn add_card(&mut self, card: Card) {
        self.cards.push(card);
    }

    /// Cards in the scene.
    #[must_use]
    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    /// View indices announced through [`SceneSource::before_view`] for the
    /// current or most recent quilt.
    #[must_use]
    pub fn view_log(&self) -> &[u32] {
        &self.view_log
    }

    /// Number of completed quilts.
    #[must_use]
    pub const fn quilts_finished(&self) -> u32 {
        self.quilts_finished
    }

    /// Clear the hook log.
    pub fn reset_log(&mut self) {
        self.view_log.clear();
        self.quilt_open = false;
        self.quilts_finished = 0;
    }
}

impl SceneSource for CardScene {
    fn render_view(&mut self, camera: &CameraState, target: &mut ViewTarget) -> RenderResult<()> {
        let view_projection = camera.projection * camera.view;
        for card in &self.cards {
            let corners = [
                Vec2::new(-1.0, -1.0),
                Vec2::new(1.0, -1.0),
                Vec2::new(1.0, 1.0),
                Vec2::new(-1.0, 1.0),
            ]
            .map(|c| {
                let p = card.center + (c * card.half_size).extend(0.0);
                view_projection * Vec4::new(p.x, p.y, p.z, 1.0)
            });
            if corners.iter().any(|c| c.w <= f32::EPSILON) {
                continue;
            }
            let screen = corners.map(|c| to_screen(c, target.width, target.height));
            rasterize_triangle(target, [screen[0], screen[1], screen[2]], card.color);
            rasterize_triangle(target, [screen[0], screen[2], screen[3]], card.color);
        }
        Ok(())
    }

    fn before_view(&mut self, index: u32) {
        if !self.quilt_open {
            self.view_log.clear();
            self.quilt_open = true;
        }
        self.view_log.push(index);
    }

    fn after_views(&mut self, _num_views: u32) {
        self.quilt_open = false;
        self.quilts_finished += 1;
    }
}

/// Clip space to pixel coordinates with device depth in `z`.
#[allow(clippy::cast_precision_loss)]
fn to_screen(clip: Vec4, width: u32, height: u32) -> Vec3 {
    let ndc = clip.truncate() / clip.w;
    Vec3::new(
        (ndc.x * 0.5 + 0.5) * width as f32,
        (0.5 - ndc.y * 0.5) * height as f32,
        ndc.z,
    )
}

fn edge(a: Vec3, b: Vec3, px: f32, py: f32) -> f32 {
    (b.x - a.x) * (py - a.y) - (b.y - a.y) * (px - a.x)
}

/// Fill a screen-space triangle with depth testing. Device depth is affine
/// in screen space, so it is interpolated directly.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn rasterize_triangle(target: &mut ViewTarget, tri: [Vec3; 3], color: [u8; 4]) {
    let [a, b, c] = tri;
    let area = edge(a, b, c.x, c.y);
    if area.abs() <= f32::EPSILON {
        return;
    }
    let min_x = a.x.min(b.x).min(c.x).floor().max(0.0) as u32;
    let min_y = a.y.min(b.y).min(c.y).floor().max(0.0) as u32;
    let max_x = (a.x.max(b.x).max(c.x).ceil().max(0.0) as u32).min(target.width);
    let max_y = (a.y.max(b.y).max(c.y).ceil().max(0.0) as u32).min(target.height);

    for y in min_y..max_y {
        let py = y as f32 + 0.5;
        for x in min_x..max_x {
            let px = x as f32 + 0.5;
            let w0 = edge(b, c, px, py) / area;
            let w1 = edge(c, a, px, py) / area;
            let w2 = edge(a, b, px, py) / area;
            if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                continue;
            }
            let z = w0 * a.z + w1 * b.z + w2 * c.z;
            if (0.0..=1.0).contains(&z) {
                target.plot(x, y, z, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quilt_core::CameraRig;

    #[test]
    fn test_raw_depth_round_trip() {
        assert_eq!(encode_raw_depth(1.0), RAW_DEPTH_MAX);
        assert_eq!(encode_raw_depth(-1.0), 0);
        assert!((decode_raw_depth(RAW_DEPTH_MAX) - 1.0).abs() < f32::EPSILON);
        assert!((decode_raw_depth(encode_raw_depth(0.37)) - 0.37).abs() < 1e-6);
    }

    #[test]
    fn test_clear_resolves_to_far_plane() {
        let mut target = ViewTarget::new(4, 4);
        target.clear([0.0, 0.0, 0.0, 1.0]);
        let mut depth = Vec::new();
        target.resolve_depth(&mut depth);
        assert_eq!(depth.len(), 16);
        assert!(depth.iter().all(|&d| d == 1.0));
    }

    #[test]
    fn test_plot_depth_test() {
        let mut target = ViewTarget::new(2, 2);
        target.plot(1, 1, 0.5, [1, 1, 1, 255]);
        target.plot(1, 1, 0.7, [2, 2, 2, 255]);
        target.plot(1, 1, 0.3, [3, 3, 3, 255]);
        target.plot(5, 5, 0.1, [4, 4, 4, 255]);
        let idx = 3 * 4;
        assert_eq!(&target.color[idx..idx + 4], &[3, 3, 3, 255]);
    }

    #[test]
    fn test_pool_reuses_targets() {
        let mut pool = ViewTargetPool::new();
        let a = pool.acquire(8, 8);
        pool.release(a);
        let _b = pool.acquire(8, 8);
        let _c = pool.acquire(4, 4);
        assert_eq!(pool.allocations(), 2);
    }

    #[test]
    fn test_card_scene_draws_center_card() {
        let rig = CameraRig::default();
        let camera = rig.center_state(1.0);
        let mut scene = CardScene::new();
        scene.add_card(Card {
            center: Vec3::ZERO,
            half_size: Vec2::new(1.0, 1.0),
            color: [255, 0, 0, 255],
        });
        let mut target = ViewTarget::new(32, 32);
        target.clear([0.0, 0.0, 0.0, 1.0]);
        scene
            .render_view(&camera, &mut target)
            .expect("should render");
        let center = (16 * 32 + 16) * 4;
        assert_eq!(&target.color[center..center + 4], &[255, 0, 0, 255]);
        assert!(target.depth[16 * 32 + 16] < RAW_DEPTH_MAX);
        assert_eq!(&target.color[0..4], &[0, 0, 0, 255]);
    }

    #[test]
    fn test_card_behind_camera_is_skipped() {
        let rig = CameraRig::default();
        let camera = rig.center_state(1.0);
        let mut scene = CardScene::new();
        scene.add_card(Card {
            center: Vec3::new(0.0, 0.0, rig.cam_distance() + 5.0),
            half_size: Vec2::new(1.0, 1.0),
            color: [255, 0, 0, 255],
        });
        let mut target = ViewTarget::new(8, 8);
        target.clear([0.0; 4]);
        scene
            .render_view(&camera, &mut target)
            .expect("should render");
        assert!(target.depth.iter().all(|&d| d == RAW_DEPTH_MAX));
    }

    #[test]
    fn test_hooks_are_logged() {
        let mut scene = CardScene::new();
        scene.before_view(0);
        scene.before_view(2);
        scene.after_views(3);
        assert_eq!(scene.view_log(), &[0, 2]);
        assert_eq!(scene.quilts_finished(), 1);
        scene.reset_log();
        assert!(scene.view_log().is_empty());
    }

    #[test]
    fn test_log_holds_only_the_latest_quilt() {
        let mut scene = CardScene::new();
        for _ in 0..100 {
            scene.before_view(0);
            scene.before_view(4);
            scene.after_views(8);
        }
        scene.before_view(1);
        assert_eq!(scene.view_log(), &[1]);
        scene.after_views(8);
        assert_eq!(scene.view_log(), &[1]);
        assert_eq!(scene.quilts_finished(), 101);
    }
}
