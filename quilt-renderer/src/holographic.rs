//! # Holographic Rendering
//!
//! Drives one frame of holographic output for a lenticular display:
//!
//! ```text
//! 1. Render the base views of the scene into the quilt
//! 2. Reconstruct the skipped views (when interpolating)
//! 3. Run the optional post-process over the whole quilt
//! 4. Composite the quilt into the lightfield image
//! ```
//!
//! The host owns a [`QuiltRenderer`] and calls
//! [`QuiltRenderer::render_frame`] once per frame.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use quilt_core::{
    compute_layout, Calibration, CameraRig, CameraState, DeviceKind, LayoutSource, QuiltLayout,
};

use crate::backend::{create_backend, BackendType, ComputeBackend};
use crate::buffer::{FrameImage, FramePhase, QuiltBuffer};
use crate::composite::{LightfieldParams, PostProcess};
use crate::error::RenderResult;
use crate::interpolate::{InterpolationSettings, InterpolationStage};
use crate::renderer::{RenderOptions, ViewRenderer};
use crate::scene::SceneSource;

/// Quality bias used when none is configured.
pub const DEFAULT_QUALITY_BIAS: f32 = 0.5;

/// What a frame produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Full quilt plus lightfield composite.
    #[default]
    Quilt,
    /// Center view only, at screen resolution.
    #[serde(rename = "preview_2d")]
    Preview2D,
}

/// Configuration for the quilt renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Preferred compute backend (falls back to the CPU if unavailable).
    pub backend: BackendType,
    /// Where the quilt layout comes from.
    pub layout: LayoutSource,
    /// Bias towards larger quilts when the layout is automatic.
    pub quality_bias: f32,
    /// Device to emulate when no calibration is found.
    pub emulated_device: DeviceKind,
    /// Camera rig the views are placed around.
    pub rig: CameraRig,
    /// View interpolation settings.
    pub interpolation: InterpolationSettings,
    /// Output mode.
    pub mode: RenderMode,
    /// Render the scene over an override quilt instead of skipping it.
    pub render_override_behind: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::Gpu,
            layout: LayoutSource::default(),
            quality_bias: DEFAULT_QUALITY_BIAS,
            emulated_device: DeviceKind::default(),
            rig: CameraRig::default(),
            interpolation: InterpolationSettings::default(),
            mode: RenderMode::Quilt,
            render_override_behind: false,
        }
    }
}

/// Per-frame input from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameContext {
    /// Host frame counter.
    pub frame_index: u64,
    /// The output window is minimized.
    pub minimized: bool,
    /// Render even if this frame index was already rendered.
    pub force_render: bool,
}

impl FrameContext {
    /// Context for a visible frame.
    #[must_use]
    pub const fn new(frame_index: u64) -> Self {
        Self {
            frame_index,
            minimized: false,
            force_render: false,
        }
    }
}

/// Output of one rendered frame.
#[derive(Debug, Clone)]
pub struct FrameResult {
    /// Host frame counter.
    pub frame_index: u64,
    /// Mode the frame was rendered in.
    pub mode: RenderMode,
    /// Lightfield image, or the 2D preview.
    pub image: FrameImage,
    /// Views rendered directly.
    pub views_rendered: u32,
    /// Views reconstructed by interpolation.
    pub views_interpolated: u32,
    /// Wall time for the frame in milliseconds.
    pub render_time_ms: f64,
}

/// Frame statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameStats {
    /// Total frames rendered.
    pub frames_rendered: u64,
    /// Frames skipped (minimized or already rendered).
    pub frames_skipped: u64,
    /// Average render time in milliseconds.
    pub avg_render_time_ms: f64,
    /// Peak render time in milliseconds.
    pub peak_render_time_ms: f64,
    /// Total views rendered across all frames.
    pub total_views_rendered: u64,
    /// Total views interpolated across all frames.
    pub total_views_interpolated: u64,
}

impl FrameStats {
    /// Update statistics with a new frame.
    pub fn update(&mut self, result: &FrameResult) {
        self.frames_rendered += 1;
        self.total_views_rendered += u64::from(result.views_rendered);
        self.total_views_interpolated += u64::from(result.views_interpolated);

        // Exponential moving average
        let alpha = 0.1;
        self.avg_render_time_ms = alpha * result.render_time_ms + (1.0 - alpha) * self.avg_render_time_ms;

        if result.render_time_ms > self.peak_render_time_ms {
            self.peak_render_time_ms = result.render_time_ms;
        }
    }

    /// Count a skipped frame.
    pub fn record_skip(&mut self) {
        self.frames_skipped += 1;
    }

    /// Reset all statistics.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Renders frames of a scene for a lenticular display.
pub struct QuiltRenderer {
    config: RendererConfig,
    calibration: Calibration,
    calibration_found: bool,
    layout: QuiltLayout,
    buffer: QuiltBuffer,
    camera: CameraState,
    views: ViewRenderer,
    interpolation: InterpolationStage,
    backend: Box<dyn ComputeBackend>,
    post_process: Option<Box<dyn PostProcess>>,
    override_quilt: Option<FrameImage>,
    last_frame: Option<u64>,
    stats: FrameStats,
}

impl QuiltRenderer {
    /// Create a renderer. A missing calibration falls back to the emulated
    /// device.
    ///
    /// # Errors
    ///
    /// Returns an error if no compute backend is available.
    pub fn new(config: RendererConfig, calibration: Option<Calibration>) -> RenderResult<Self> {
        let load = Calibration::resolve(calibration, config.emulated_device);
        let layout = compute_layout(&config.layout, &load.calibration, config.quality_bias);
        let backend = create_backend(config.backend)?;
        let camera = config
            .rig
            .center_state(layout.effective_aspect(load.calibration.aspect));

        tracing::info!(
            "Quilt renderer on {} backend: {}x{} quilt, {} views, calibration {}",
            backend.name(),
            layout.quilt_width(),
            layout.quilt_height(),
            layout.num_views(),
            if load.calibration_found { "found" } else { "emulated" }
        );

        Ok(Self {
            buffer: QuiltBuffer::new(&layout),
            interpolation: InterpolationStage::new(config.interpolation),
            calibration: load.calibration,
            calibration_found: load.calibration_found,
            layout,
            camera,
            views: ViewRenderer::new(),
            backend,
            post_process: None,
            override_quilt: None,
            last_frame: None,
            stats: FrameStats::default(),
            config,
        })
    }

    /// Render one frame.
    ///
    /// Returns `None` when the frame is skipped: the host is minimized or
    /// this frame index was already rendered and `force_render` is off.
    ///
    /// # Errors
    ///
    /// Returns an error if any stage fails; the frame is dropped.
    pub fn render_frame(
        &mut self,
        ctx: &FrameContext,
        scene: &mut dyn SceneSource,
    ) -> RenderResult<Option<FrameResult>> {
        if ctx.minimized {
            tracing::trace!("Frame {} skipped: minimized", ctx.frame_index);
            self.stats.record_skip();
            return Ok(None);
        }
        if !ctx.force_render && self.last_frame == Some(ctx.frame_index) {
            tracing::trace!("Frame {} already rendered", ctx.frame_index);
            self.stats.record_skip();
            return Ok(None);
        }
        self.last_frame = Some(ctx.frame_index);

        let start = Instant::now();
        self.refresh_layout();
        self.camera = self
            .config
            .rig
            .center_state(self.layout.effective_aspect(self.calibration.aspect));

        let mode = self.config.mode;
        let (image, views_rendered, views_interpolated) = match mode {
            RenderMode::Preview2D => self.render_preview(scene)?,
            RenderMode::Quilt => self.render_quilt(scene)?,
        };

        let result = FrameResult {
            frame_index: ctx.frame_index,
            mode,
            image,
            views_rendered,
            views_interpolated,
            render_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        };
        self.stats.update(&result);
        Ok(Some(result))
    }

    fn render_quilt(&mut self, scene: &mut dyn SceneSource) -> RenderResult<(FrameImage, u32, u32)> {
        let background = self.config.rig.background;
        let factor = self.interpolation.factor(self.layout.num_views());

        let has_override = match &self.override_quilt {
            Some(image) => {
                self.buffer.copy_override(image);
                true
            }
            None => false,
        };

        let rendered = if has_override && !self.config.render_override_behind {
            self.buffer.begin_frame(background, false);
            self.buffer.advance(FramePhase::Rendered)?;
            0
        } else {
            let options = RenderOptions {
                background,
                clear_color: !has_override,
            };
            self.views.render_quilt(
                scene,
                &mut self.camera,
                &self.config.rig,
                &self.calibration,
                factor,
                &mut self.buffer,
                options,
            )?
        };

        let interpolated = if rendered > 0 && factor > 1 {
            self.interpolation.interpolate(
                &mut self.buffer,
                &self.camera,
                &self.calibration,
                self.config.rig.view_cone_modifier,
                self.backend.as_mut(),
            )?
        } else {
            0
        };

        if let Some(effect) = self.post_process.as_mut() {
            let (width, height) = (self.buffer.width(), self.buffer.height());
            let (color, depth) = self.buffer.planes_mut();
            tracing::trace!("Post-process {} over {}x{} quilt", effect.name(), width, height);
            effect.apply(width, height, color, depth, &self.camera)?;
        }

        let params = LightfieldParams::new(&self.calibration, &self.layout, self.config.rig.center_offset);
        let image = self.backend.lightfield(&self.buffer, &params)?;
        self.buffer.advance(FramePhase::Composited)?;
        Ok((image, rendered, interpolated))
    }

    fn render_preview(&mut self, scene: &mut dyn SceneSource) -> RenderResult<(FrameImage, u32, u32)> {
        let camera = self.config.rig.center_state(self.calibration.aspect);
        let (width, height) = (self.calibration.screen_width, self.calibration.screen_height);
        let (mut image, depth) =
            self.views
                .render_preview(scene, &camera, width, height, self.config.rig.background)?;
        if let Some(effect) = self.post_process.as_mut() {
            effect.apply(width, height, &mut image.pixels, &depth, &camera)?;
        }
        Ok((image, 1, 0))
    }

    /// Recompute the layout and reallocate the quilt if it changed.
    fn refresh_layout(&mut self) {
        let layout = compute_layout(&self.config.layout, &self.calibration, self.config.quality_bias);
        if layout != self.layout {
            tracing::debug!(
                "Quilt layout changed to {}x{} ({} views)",
                layout.quilt_width(),
                layout.quilt_height(),
                layout.num_views()
            );
            self.buffer = QuiltBuffer::new(&layout);
            self.layout = layout;
        }
    }

    /// Switch between quilt and 2D preview output.
    pub fn set_mode(&mut self, mode: RenderMode) {
        self.config.mode = mode;
    }

    /// Install or remove the post-process effect.
    pub fn set_post_process(&mut self, effect: Option<Box<dyn PostProcess>>) {
        self.post_process = effect;
    }

    /// Install or remove an externally supplied quilt.
    pub fn set_override_quilt(&mut self, image: Option<FrameImage>) {
        self.override_quilt = image;
    }

    /// Choose whether the scene is rendered over an override quilt.
    pub fn set_render_override_behind(&mut self, behind: bool) {
        self.config.render_override_behind = behind;
    }

    /// Replace the calibration, falling back to the emulated device.
    pub fn reload_calibration(&mut self, calibration: Option<Calibration>) {
        let load = Calibration::resolve(calibration, self.config.emulated_device);
        self.calibration = load.calibration;
        self.calibration_found = load.calibration_found;
        self.refresh_layout();
    }

    /// Change where the layout comes from.
    pub fn set_layout_source(&mut self, source: LayoutSource) {
        self.config.layout = source;
        self.refresh_layout();
    }

    /// Change the interpolation settings, resolving the kernel pair again.
    pub fn set_interpolation(&mut self, settings: InterpolationSettings) {
        self.config.interpolation = settings;
        self.interpolation = InterpolationStage::new(settings);
    }

    /// Replace the camera rig.
    pub fn set_rig(&mut self, rig: CameraRig) {
        self.config.rig = rig;
    }

    /// Get the renderer configuration.
    #[must_use]
    pub const fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Active calibration.
    #[must_use]
    pub const fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Whether a real calibration was supplied.
    #[must_use]
    pub const fn calibration_found(&self) -> bool {
        self.calibration_found
    }

    /// Active quilt layout.
    #[must_use]
    pub const fn layout(&self) -> &QuiltLayout {
        &self.layout
    }

    /// The quilt of the last frame.
    #[must_use]
    pub const fn quilt(&self) -> &QuiltBuffer {
        &self.buffer
    }

    /// Center camera of the last frame.
    #[must_use]
    pub const fn camera(&self) -> &CameraState {
        &self.camera
    }

    /// Get the active backend type.
    #[must_use]
    pub fn active_backend(&self) -> BackendType {
        self.backend.backend_type()
    }

    /// Get the current statistics.
    #[must_use]
    pub const fn stats(&self) -> &FrameStats {
        &self.stats
    }

    /// Reset the statistics.
    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    /// Release transient resources. The renderer stays usable.
    pub fn shutdown(&mut self) {
        self.views.release_targets();
        self.override_quilt = None;
        self.post_process = None;
        self.last_frame = None;
        tracing::info!("Quilt renderer shut down after {} frames", self.stats.frames_rendered);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::CardScene;
    use quilt_core::QuiltPreset;

    fn small_config() -> RendererConfig {
        RendererConfig {
            backend: BackendType::Cpu,
            layout: LayoutSource::Custom(QuiltLayout::new(64, 48, 4, 3, 12)),
            ..RendererConfig::default()
        }
    }

    fn small_calibration() -> Calibration {
        Calibration::with_screen(0, 24, 32)
    }

    #[test]
    fn test_config_defaults() {
        let config = RendererConfig::default();
        assert_eq!(config.mode, RenderMode::Quilt);
        assert_eq!(config.layout, LayoutSource::Preset(QuiltPreset::Automatic));
        assert!(!config.render_override_behind);
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: RendererConfig =
            serde_json::from_str(r#"{"backend": "cpu", "mode": "preview_2d"}"#).expect("parse");
        assert_eq!(config.backend, BackendType::Cpu);
        assert_eq!(config.mode, RenderMode::Preview2D);
        assert!((config.quality_bias - DEFAULT_QUALITY_BIAS).abs() < f32::EPSILON);
    }

    #[test]
    fn test_missing_calibration_is_emulated() {
        let renderer = QuiltRenderer::new(small_config(), None).expect("renderer");
        assert!(!renderer.calibration_found());
        assert_eq!(renderer.active_backend(), BackendType::Cpu);
    }

    #[test]
    fn test_quilt_frame() {
        let mut renderer = QuiltRenderer::new(small_config(), Some(small_calibration())).expect("renderer");
        let mut scene = CardScene::layered();
        let result = renderer
            .render_frame(&FrameContext::new(1), &mut scene)
            .expect("should render")
            .expect("not skipped");
        assert_eq!(result.views_rendered, 12);
        assert_eq!(result.views_interpolated, 0);
        assert_eq!((result.image.width, result.image.height), (24, 32));
        assert_eq!(renderer.quilt().phase(), FramePhase::Composited);
    }

    #[test]
    fn test_frame_guard() {
        let mut renderer = QuiltRenderer::new(small_config(), Some(small_calibration())).expect("renderer");
        let mut scene = CardScene::layered();
        let ctx = FrameContext::new(7);
        assert!(renderer.render_frame(&ctx, &mut scene).expect("render").is_some());
        assert!(renderer.render_frame(&ctx, &mut scene).expect("render").is_none());
        let forced = FrameContext {
            force_render: true,
            ..ctx
        };
        assert!(renderer.render_frame(&forced, &mut scene).expect("render").is_some());
        assert_eq!(renderer.stats().frames_rendered, 2);
        assert_eq!(renderer.stats().frames_skipped, 1);
    }

    #[test]
    fn test_minimized_frame_is_skipped() {
        let mut renderer = QuiltRenderer::new(small_config(), Some(small_calibration())).expect("renderer");
        let mut scene = CardScene::layered();
        let ctx = FrameContext {
            minimized: true,
            ..FrameContext::new(1)
        };
        assert!(renderer.render_frame(&ctx, &mut scene).expect("render").is_none());
        assert!(scene.view_log().is_empty());
    }

    #[test]
    fn test_stats_update_and_reset() {
        let mut stats = FrameStats::default();
        let result = FrameResult {
            frame_index: 0,
            mode: RenderMode::Quilt,
            image: FrameImage::new(1, 1),
            views_rendered: 25,
            views_interpolated: 23,
            render_time_ms: 10.0,
        };
        stats.update(&result);
        stats.update(&FrameResult {
            render_time_ms: 20.0,
            ..result
        });
        assert_eq!(stats.frames_rendered, 2);
        assert_eq!(stats.total_views_rendered, 50);
        assert_eq!(stats.total_views_interpolated, 46);
        assert!((stats.peak_render_time_ms - 20.0).abs() < f64::EPSILON);
        assert!((stats.avg_render_time_ms - 2.9).abs() < 1e-9);
        stats.reset();
        assert_eq!(stats.frames_rendered, 0);
    }

    #[test]
    fn test_layout_change_reallocates() {
        let mut renderer = QuiltRenderer::new(small_config(), Some(small_calibration())).expect("renderer");
        renderer.set_layout_source(LayoutSource::Custom(QuiltLayout::new(40, 30, 4, 3, 12)));
        assert_eq!(renderer.quilt().width(), 40);
        assert_eq!(renderer.layout().quilt_height(), 30);
    }

    #[test]
    fn test_shutdown_clears_frame_guard() {
        let mut renderer = QuiltRenderer::new(small_config(), Some(small_calibration())).expect("renderer");
        let mut scene = CardScene::layered();
        let ctx = FrameContext::new(3);
        renderer.render_frame(&ctx, &mut scene).expect("render");
        renderer.shutdown();
        assert!(renderer.render_frame(&ctx, &mut scene).expect("render").is_some());
    }
}
