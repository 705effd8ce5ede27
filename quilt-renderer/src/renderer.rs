//! Single-view renderer: drives one camera through every base view and
//! writes the results into the quilt.

use std::ops::{Deref, DerefMut};

use quilt_core::{is_base_view, Calibration, CameraRig, CameraState, ViewTransform, CULLING_FOV};

use crate::buffer::{FrameImage, FramePhase, QuiltBuffer};
use crate::error::RenderResult;
use crate::scene::{SceneSource, ViewTargetPool};

/// Restores the live camera when dropped, including on early return.
struct CameraGuard<'a> {
    camera: &'a mut CameraState,
    saved: CameraState,
}

impl<'a> CameraGuard<'a> {
    fn new(camera: &'a mut CameraState) -> Self {
        let saved = *camera;
        Self { camera, saved }
    }
}

impl Deref for CameraGuard<'_> {
    type Target = CameraState;

    fn deref(&self) -> &CameraState {
        self.camera
    }
}

impl DerefMut for CameraGuard<'_> {
    fn deref_mut(&mut self) -> &mut CameraState {
        self.camera
    }
}

impl Drop for CameraGuard<'_> {
    fn drop(&mut self) {
        *self.camera = self.saved;
    }
}

/// Options for one quilt render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    /// Background color (RGBA).
    pub background: [f32; 4],
    /// Clear the color quilt before rendering. Off when an override quilt
    /// has already been copied in, in which case views only overwrite the
    /// pixels they cover.
    pub clear_color: bool,
}

/// Renders views of a scene into quilt tiles.
#[derive(Debug, Default)]
pub struct ViewRenderer {
    pool: ViewTargetPool,
    depth_scratch: Vec<f32>,
}

impl ViewRenderer {
    /// Create a renderer with an empty target pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Render every base view into `buffer`.
    ///
    /// The live `camera` is switched to each sheared view (with the wide
    /// culling field of view) and restored to its center state before
    /// returning. Returns the number of views rendered.
    ///
    /// # Errors
    ///
    /// Returns an error if the scene fails to draw or a view does not fit
    /// its tile.
    #[allow(clippy::too_many_arguments)]
    pub fn render_quilt(
        &mut self,
        scene: &mut dyn SceneSource,
        camera: &mut CameraState,
        rig: &CameraRig,
        calibration: &Calibration,
        factor: u32,
        buffer: &mut QuiltBuffer,
        options: RenderOptions,
    ) -> RenderResult<u32> {
        let layout = buffer.layout().clone();
        let num_views = layout.num_views();
        let sweep = rig.view_cone_sweep(calibration.effective_view_cone());

        buffer.begin_frame(options.background, options.clear_color);

        let center = *camera;
        let mut live = CameraGuard::new(camera);
        live.fov = CULLING_FOV;

        let mut rendered = 0;
        for index in 0..num_views {
            if !is_base_view(index, num_views, factor) {
                continue;
            }
            scene.before_view(index);

            let transform = ViewTransform::for_view(&center, index, num_views, sweep);
            live.view = transform.view;
            live.projection = transform.projection;
            live.aspect = center.aspect;

            let mut target = self.pool.acquire(layout.view_width(), layout.view_height());
            target.clear(options.background);
            scene.render_view(&live, &mut target)?;
            target.resolve_depth(&mut self.depth_scratch);
            if options.clear_color {
                buffer.write_tile(index, &target.color, &self.depth_scratch)?;
            } else {
                buffer.write_tile_over(index, &target.color, &self.depth_scratch)?;
            }
            self.pool.release(target);
            rendered += 1;
        }
        scene.after_views(num_views);
        drop(live);

        tracing::trace!("Rendered {} of {} views", rendered, num_views);
        buffer.advance(FramePhase::Rendered)?;
        Ok(rendered)
    }

    /// Render the center view at screen resolution for 2D preview.
    ///
    /// Returns the color image and its resolved device depth.
    ///
    /// # Errors
    ///
    /// Returns an error if the scene fails to draw.
    pub fn render_preview(
        &mut self,
        scene: &mut dyn SceneSource,
        camera: &CameraState,
        width: u32,
        height: u32,
        background: [f32; 4],
    ) -> RenderResult<(FrameImage, Vec<f32>)> {
        let mut target = self.pool.acquire(width, height);
        target.clear(background);
        scene.render_view(camera, &mut target)?;
        let mut depth = Vec::new();
        target.resolve_depth(&mut depth);
        Ok((target.into_image(), depth))
    }

    /// Release pooled targets.
    pub fn release_targets(&mut self) {
        self.pool.clear();
        self.depth_scratch = Vec::new();
    }

    /// Total view targets allocated.
    #[must_use]
    pub const fn target_allocations(&self) -> u64 {
        self.pool.allocations()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use crate::scene::{CardScene, ViewTarget};
    use quilt_core::depth::DEPTH_CLEAR;
    use quilt_core::QuiltLayout;

    struct Recorder {
        cameras: Vec<CameraState>,
        fail_at: Option<usize>,
    }

    impl SceneSource for Recorder {
        fn render_view(&mut self, camera: &CameraState, _target: &mut ViewTarget) -> RenderResult<()> {
            if self.fail_at == Some(self.cameras.len()) {
                return Err(RenderError::Frame("scene failed".to_string()));
            }
            self.cameras.push(*camera);
            Ok(())
        }
    }

    fn setup(num_views: u32) -> (CameraRig, Calibration, CameraState, QuiltBuffer) {
        let rig = CameraRig::default();
        let cal = Calibration::default();
        let camera = rig.center_state(cal.aspect);
        let layout = QuiltLayout::new(40, 30, 4, 3, num_views);
        (rig, cal, camera, QuiltBuffer::new(&layout))
    }

    fn options() -> RenderOptions {
        RenderOptions {
            background: [0.0, 0.0, 0.0, 1.0],
            clear_color: true,
        }
    }

    #[test]
    fn test_renders_only_base_views() {
        let (rig, cal, mut camera, mut buffer) = setup(12);
        let mut scene = CardScene::layered();
        let mut renderer = ViewRenderer::new();
        let rendered = renderer
            .render_quilt(&mut scene, &mut camera, &rig, &cal, 4, &mut buffer, options())
            .expect("should render");
        assert_eq!(rendered, 4);
        assert_eq!(scene.view_log(), &[0, 4, 8, 11]);
        assert_eq!(scene.quilts_finished(), 1);
        assert_eq!(buffer.phase(), FramePhase::Rendered);
        assert!(buffer.tile_depth(0).iter().all(|&d| d <= 1.0));
        assert!(buffer.tile_depth(1).iter().all(|&d| d == DEPTH_CLEAR));
    }

    #[test]
    fn test_camera_is_restored() {
        let (rig, cal, mut camera, mut buffer) = setup(12);
        let before = camera;
        let mut scene = Recorder {
            cameras: Vec::new(),
            fail_at: None,
        };
        ViewRenderer::new()
            .render_quilt(&mut scene, &mut camera, &rig, &cal, 1, &mut buffer, options())
            .expect("should render");
        assert_eq!(camera, before);
        assert_eq!(scene.cameras.len(), 12);
        assert!(scene.cameras.iter().all(|c| (c.fov - CULLING_FOV).abs() < f32::EPSILON));
        assert_ne!(scene.cameras[0].view, before.view);
    }

    #[test]
    fn test_camera_is_restored_on_error() {
        let (rig, cal, mut camera, mut buffer) = setup(12);
        let before = camera;
        let mut scene = Recorder {
            cameras: Vec::new(),
            fail_at: Some(3),
        };
        let result = ViewRenderer::new().render_quilt(
            &mut scene,
            &mut camera,
            &rig,
            &cal,
            1,
            &mut buffer,
            options(),
        );
        assert!(result.is_err());
        assert_eq!(camera, before);
        assert_eq!(buffer.phase(), FramePhase::Empty);
    }

    #[test]
    fn test_single_view_is_center_view() {
        let (rig, cal, mut camera, mut buffer) = setup(1);
        let center = camera;
        let mut scene = Recorder {
            cameras: Vec::new(),
            fail_at: None,
        };
        ViewRenderer::new()
            .render_quilt(&mut scene, &mut camera, &rig, &cal, 1, &mut buffer, options())
            .expect("should render");
        assert_eq!(scene.cameras.len(), 1);
        assert_eq!(scene.cameras[0].view, center.view);
        assert_eq!(scene.cameras[0].projection, center.projection);
    }

    #[test]
    fn test_targets_are_pooled() {
        let (rig, cal, mut camera, mut buffer) = setup(12);
        let mut scene = CardScene::layered();
        let mut renderer = ViewRenderer::new();
        for _ in 0..3 {
            renderer
                .render_quilt(&mut scene, &mut camera, &rig, &cal, 1, &mut buffer, options())
                .expect("should render");
        }
        assert_eq!(renderer.target_allocations(), 1);
    }

    #[test]
    fn test_preview_renders_screen_size() {
        let (rig, _, camera, _) = setup(12);
        let mut scene = CardScene::layered();
        let (image, depth) = ViewRenderer::new()
            .render_preview(&mut scene, &camera, 30, 40, rig.background)
            .expect("should render");
        assert_eq!((image.width, image.height), (30, 40));
        assert_eq!(depth.len(), 1200);
        assert!(depth.iter().any(|&d| d < 1.0));
    }
}
