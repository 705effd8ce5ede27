//! # View Interpolation
//!
//! Reconstructs the skipped views of a quilt from the base views that
//! bracket them. Each skipped view is filled by three kernels run in order:
//!
//! ```text
//! low base ──Forward──┐
//!                     ├──> skipped tile ──FillGaps──> done
//! high base ──Back────┘
//! ```
//!
//! `Forward` splats the lower base view shifted by its parallax, `Back` (or
//! `BackBlend`) splats the higher one, and `FillGaps` patches holes left by
//! disocclusion. The kernels themselves live in the compute backends; this
//! module decides which variants run, in what order and with what grid.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use quilt_core::{CameraState, Calibration, InterpolationPlan, QuiltLayout, ViewInterpolation};

use crate::backend::ComputeBackend;
use crate::buffer::{FramePhase, QuiltBuffer};
use crate::error::RenderResult;

/// Default search radius for gap filling, in pixels.
pub const DEFAULT_GAP_RADIUS: u32 = 8;

/// Default relative depth agreement for view blending.
pub const DEFAULT_BLEND_TOLERANCE: f32 = 0.05;

/// How a kernel walks the columns of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sweep {
    /// Every column in one dispatch.
    Full,
    /// One column in every `span`, selected by the dispatch phase.
    Strided,
}

/// A named reconstruction kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    /// Splat the lower base view.
    Forward(Sweep),
    /// Splat the higher base view, keeping the front-most sample.
    Back(Sweep),
    /// Splat the higher base view, blending where depths agree.
    BackBlend(Sweep),
    /// Patch remaining holes from horizontal neighbours.
    FillGaps,
}

impl Kernel {
    /// Every kernel a backend must provide.
    pub const ALL: [Self; 7] = [
        Self::Forward(Sweep::Full),
        Self::Forward(Sweep::Strided),
        Self::Back(Sweep::Full),
        Self::Back(Sweep::Strided),
        Self::BackBlend(Sweep::Full),
        Self::BackBlend(Sweep::Strided),
        Self::FillGaps,
    ];

    /// Shader entry point name.
    #[must_use]
    pub const fn entry_point(self) -> &'static str {
        match self {
            Self::Forward(Sweep::Full) => "quilt_forward",
            Self::Forward(Sweep::Strided) => "quilt_forward_strided",
            Self::Back(Sweep::Full) => "quilt_back",
            Self::Back(Sweep::Strided) => "quilt_back_strided",
            Self::BackBlend(Sweep::Full) => "quilt_back_blend",
            Self::BackBlend(Sweep::Strided) => "quilt_back_blend_strided",
            Self::FillGaps => "fill_gaps",
        }
    }

    /// Column sweep, if the kernel splats.
    #[must_use]
    pub const fn sweep(self) -> Option<Sweep> {
        match self {
            Self::Forward(sweep) | Self::Back(sweep) | Self::BackBlend(sweep) => Some(sweep),
            Self::FillGaps => None,
        }
    }
}

/// Interpolation settings, part of the renderer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolationSettings {
    /// Which views to skip.
    pub mode: ViewInterpolation,
    /// Sweep columns in phases so neighbouring writes do not race.
    pub reduce_flicker: bool,
    /// Blend the two base views where their depths agree.
    pub blend_views: bool,
    /// Patch disocclusion holes after splatting.
    pub fill_gaps: bool,
    /// Gap search radius in pixels.
    pub gap_radius: u32,
    /// Relative linear-depth difference under which samples blend.
    pub blend_tolerance: f32,
}

impl Default for InterpolationSettings {
    fn default() -> Self {
        Self {
            mode: ViewInterpolation::None,
            reduce_flicker: false,
            blend_views: false,
            fill_gaps: true,
            gap_radius: DEFAULT_GAP_RADIUS,
            blend_tolerance: DEFAULT_BLEND_TOLERANCE,
        }
    }
}

/// The forward/back kernel pair chosen for a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelTable {
    /// Kernel for the lower base view.
    pub forward: Kernel,
    /// Kernel for the higher base view.
    pub back: Kernel,
}

impl KernelTable {
    /// Pick the kernel pair for a configuration.
    #[must_use]
    pub const fn resolve(settings: &InterpolationSettings) -> Self {
        let sweep = if settings.reduce_flicker {
            Sweep::Strided
        } else {
            Sweep::Full
        };
        let back = if settings.blend_views {
            Kernel::BackBlend(sweep)
        } else {
            Kernel::Back(sweep)
        };
        Self {
            forward: Kernel::Forward(sweep),
            back,
        }
    }
}

/// Uniform block shared by every reconstruction kernel.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InterpolationUniforms {
    /// Tile size in pixels.
    pub view_size: [u32; 2],
    /// Quilt size in pixels.
    pub quilt_size: [u32; 2],
    /// Near clip distance.
    pub near: f32,
    /// Far clip distance.
    pub far: f32,
    /// Distance to the zero-parallax plane.
    pub focal_distance: f32,
    /// Width of the view frustum at unit distance.
    pub persp_w: f32,
    /// Column stride of a strided sweep.
    pub span: u32,
    /// Column phase of a strided sweep.
    pub phase: u32,
    /// Number of skipped views.
    pub view_count: u32,
    /// Gap search radius in pixels.
    pub gap_radius: u32,
    /// Relative depth agreement for blending.
    pub blend_tolerance: f32,
    /// Padding to a 16-byte multiple.
    pub _pad: [f32; 3],
}

impl InterpolationUniforms {
    /// Uniforms for a layout and center camera.
    #[must_use]
    pub fn new(
        layout: &QuiltLayout,
        camera: &CameraState,
        settings: &InterpolationSettings,
        factor: u32,
        view_count: u32,
    ) -> Self {
        Self {
            view_size: [layout.view_width(), layout.view_height()],
            quilt_size: [layout.quilt_width(), layout.quilt_height()],
            near: camera.near,
            far: camera.far,
            focal_distance: camera.cam_distance,
            persp_w: perspective_width(camera),
            span: factor.max(1) * 2,
            phase: 0,
            view_count,
            gap_radius: settings.gap_radius,
            blend_tolerance: settings.blend_tolerance,
            _pad: [0.0; 3],
        }
    }

    /// Copy with a different sweep phase.
    #[must_use]
    pub const fn with_phase(mut self, phase: u32) -> Self {
        self.phase = phase;
        self
    }
}

/// Frustum width at unit distance for a camera.
#[must_use]
pub fn perspective_width(camera: &CameraState) -> f32 {
    let half = (camera.fov * 0.5).to_radians();
    2.0 * (camera.aspect * half.tan()).atan().tan()
}

/// One ordered kernel dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    /// Kernel to run.
    pub kernel: Kernel,
    /// Column phase (zero for full sweeps).
    pub phase: u32,
    /// Workgroup counts.
    pub groups: [u32; 3],
}

/// Uniforms plus the ordered dispatches for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchPlan {
    /// Uniforms shared by every step; each step overrides the phase.
    pub uniforms: InterpolationUniforms,
    /// Dispatches in submission order.
    pub steps: Vec<Dispatch>,
}

impl DispatchPlan {
    /// Lay out the dispatches for a frame.
    #[must_use]
    pub fn build(
        uniforms: InterpolationUniforms,
        table: KernelTable,
        fill_gaps: bool,
        workgroup: [u32; 3],
    ) -> Self {
        let [gx, gy, gz] = workgroup.map(|g| g.max(1));
        let [vw, vh] = uniforms.view_size;
        let n = uniforms.view_count;
        let full = [vw.div_ceil(gx), vh.div_ceil(gy), n.div_ceil(gz)];

        let mut steps = Vec::new();
        match table.forward.sweep() {
            Some(Sweep::Strided) => {
                let span = uniforms.span.max(1);
                let strided = [vw.div_ceil(span).div_ceil(gx), full[1], full[2]];
                for phase in 0..span {
                    steps.push(Dispatch {
                        kernel: table.forward,
                        phase,
                        groups: strided,
                    });
                    steps.push(Dispatch {
                        kernel: table.back,
                        phase,
                        groups: strided,
                    });
                }
            }
            _ => {
                steps.push(Dispatch {
                    kernel: table.forward,
                    phase: 0,
                    groups: full,
                });
                steps.push(Dispatch {
                    kernel: table.back,
                    phase: 0,
                    groups: full,
                });
            }
        }
        if fill_gaps {
            steps.push(Dispatch {
                kernel: Kernel::FillGaps,
                phase: 0,
                groups: full,
            });
        }

        Self { uniforms, steps }
    }
}

/// The view-interpolation stage.
#[derive(Debug, Clone)]
pub struct InterpolationStage {
    settings: InterpolationSettings,
    table: KernelTable,
}

impl Default for InterpolationStage {
    fn default() -> Self {
        Self::new(InterpolationSettings::default())
    }
}

impl InterpolationStage {
    /// Create a stage, resolving its kernel pair once.
    #[must_use]
    pub const fn new(settings: InterpolationSettings) -> Self {
        Self {
            table: KernelTable::resolve(&settings),
            settings,
        }
    }

    /// Active settings.
    #[must_use]
    pub const fn settings(&self) -> &InterpolationSettings {
        &self.settings
    }

    /// Resolved kernel pair.
    #[must_use]
    pub const fn table(&self) -> KernelTable {
        self.table
    }

    /// Interpolation factor for a view count.
    #[must_use]
    pub const fn factor(&self, num_views: u32) -> u32 {
        self.settings.mode.factor(num_views)
    }

    /// Reconstruct every skipped view in `buffer`.
    ///
    /// `camera` is the center camera the base views were rendered around.
    /// Returns the number of views reconstructed.
    ///
    /// # Errors
    ///
    /// Returns an error if the base views have not been rendered this frame
    /// or the backend fails.
    pub fn interpolate(
        &self,
        buffer: &mut QuiltBuffer,
        camera: &CameraState,
        calibration: &Calibration,
        view_cone_modifier: f32,
        backend: &mut dyn ComputeBackend,
    ) -> RenderResult<u32> {
        if buffer.phase() != FramePhase::Rendered {
            return Err(crate::error::RenderError::PhaseOrder {
                from: buffer.phase(),
                to: FramePhase::Interpolated,
            });
        }

        let layout = buffer.layout().clone();
        let factor = self.factor(layout.num_views());
        let plan = InterpolationPlan::build(
            &layout,
            factor,
            calibration.effective_view_cone(),
            view_cone_modifier,
        );
        if plan.is_empty() {
            buffer.advance(FramePhase::Interpolated)?;
            return Ok(0);
        }

        let view_count = u32::try_from(plan.skipped.len()).unwrap_or(u32::MAX);
        let uniforms = InterpolationUniforms::new(&layout, camera, &self.settings, factor, view_count);
        let dispatch = DispatchPlan::build(
            uniforms,
            self.table,
            self.settings.fill_gaps,
            backend.workgroup_size(),
        );
        tracing::trace!(
            "Interpolating {} views with {} dispatches on {}",
            view_count,
            dispatch.steps.len(),
            backend.name()
        );

        backend.interpolate(buffer, &plan, &dispatch)?;
        buffer.advance(FramePhase::Interpolated)?;
        Ok(view_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::cpu::CpuBackend;
    use crate::error::RenderError;
    use quilt_core::CameraRig;

    fn settings(mode: ViewInterpolation, reduce_flicker: bool, blend_views: bool) -> InterpolationSettings {
        InterpolationSettings {
            mode,
            reduce_flicker,
            blend_views,
            ..InterpolationSettings::default()
        }
    }

    #[test]
    fn test_uniform_block_is_64_bytes() {
        assert_eq!(std::mem::size_of::<InterpolationUniforms>(), 64);
    }

    #[test]
    fn test_kernel_table() {
        let table = KernelTable::resolve(&settings(ViewInterpolation::EveryOther, false, false));
        assert_eq!(table.forward, Kernel::Forward(Sweep::Full));
        assert_eq!(table.back, Kernel::Back(Sweep::Full));

        let table = KernelTable::resolve(&settings(ViewInterpolation::EveryOther, true, true));
        assert_eq!(table.forward, Kernel::Forward(Sweep::Strided));
        assert_eq!(table.back, Kernel::BackBlend(Sweep::Strided));
    }

    #[test]
    fn test_entry_points_are_unique() {
        let mut names: Vec<&str> = Kernel::ALL.iter().map(|k| k.entry_point()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Kernel::ALL.len());
    }

    #[test]
    fn test_full_dispatch_grid() {
        let layout = QuiltLayout::new(400, 300, 4, 3, 12);
        let camera = CameraRig::default().center_state(0.75);
        let s = settings(ViewInterpolation::EveryOther, false, false);
        let uniforms = InterpolationUniforms::new(&layout, &camera, &s, 2, 5);
        let plan = DispatchPlan::build(uniforms, KernelTable::resolve(&s), true, [8, 8, 1]);
        let kernels: Vec<Kernel> = plan.steps.iter().map(|d| d.kernel).collect();
        assert_eq!(
            kernels,
            vec![
                Kernel::Forward(Sweep::Full),
                Kernel::Back(Sweep::Full),
                Kernel::FillGaps
            ]
        );
        // 100x100 tiles over 8x8 groups, one skipped view per z slice
        assert_eq!(plan.steps[0].groups, [13, 13, 5]);
    }

    #[test]
    fn test_strided_dispatch_covers_every_phase() {
        let layout = QuiltLayout::new(400, 300, 4, 3, 12);
        let camera = CameraRig::default().center_state(0.75);
        let s = settings(ViewInterpolation::EveryOther, true, false);
        let uniforms = InterpolationUniforms::new(&layout, &camera, &s, 2, 5);
        let plan = DispatchPlan::build(uniforms, KernelTable::resolve(&s), false, [8, 8, 1]);
        assert_eq!(plan.uniforms.span, 4);
        assert_eq!(plan.steps.len(), 8);
        let phases: Vec<u32> = plan.steps.iter().step_by(2).map(|d| d.phase).collect();
        assert_eq!(phases, vec![0, 1, 2, 3]);
        // ceil(100 / 4) = 25 columns per phase
        assert_eq!(plan.steps[0].groups, [4, 13, 5]);
        assert_eq!(plan.steps[1].kernel, Kernel::Back(Sweep::Strided));
    }

    #[test]
    fn test_perspective_width() {
        let mut camera = CameraRig::default().center_state(1.0);
        camera.fov = 90.0;
        assert!((perspective_width(&camera) - 2.0).abs() < 1e-5);
        camera.aspect = 0.5;
        assert!((perspective_width(&camera) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_requires_rendered_phase() {
        let layout = QuiltLayout::new(40, 30, 4, 3, 12);
        let mut buffer = QuiltBuffer::new(&layout);
        let cal = Calibration::default();
        let camera = CameraRig::default().center_state(cal.aspect);
        let stage = InterpolationStage::new(settings(ViewInterpolation::EveryOther, false, false));
        let result = stage.interpolate(&mut buffer, &camera, &cal, 1.0, &mut CpuBackend::new());
        assert!(matches!(result, Err(RenderError::PhaseOrder { .. })));
    }

    #[test]
    fn test_no_skipped_views_is_noop() {
        let layout = QuiltLayout::new(40, 30, 4, 3, 12);
        let mut buffer = QuiltBuffer::new(&layout);
        buffer.advance(FramePhase::Rendered).expect("advance");
        let before = buffer.color().to_vec();
        let cal = Calibration::default();
        let camera = CameraRig::default().center_state(cal.aspect);
        let stage = InterpolationStage::default();
        let count = stage
            .interpolate(&mut buffer, &camera, &cal, 1.0, &mut CpuBackend::new())
            .expect("should interpolate");
        assert_eq!(count, 0);
        assert_eq!(buffer.color(), before.as_slice());
        assert_eq!(buffer.phase(), FramePhase::Interpolated);
    }
}
