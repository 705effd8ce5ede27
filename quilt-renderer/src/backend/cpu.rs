//! Reference kernels on the CPU.
//!
//! Each dispatch walks its workgroups in order and runs the kernel once per
//! invocation, with the same indexing the WGSL kernels use. Results match
//! the GPU except where GPU invocations race on the same pixel.

use quilt_core::depth::{is_sentinel, linearize};
use quilt_core::InterpolationPlan;

use crate::buffer::{FrameImage, QuiltBuffer};
use crate::composite::{render_lightfield, LightfieldParams};
use crate::error::RenderResult;
use crate::interpolate::{DispatchPlan, InterpolationUniforms, Kernel, Sweep};

use super::{BackendType, ComputeBackend, WORKGROUP_SIZE};

/// Descriptor arrays for one interpolation call.
struct Descriptors {
    positions: Vec<[i32; 4]>,
    offsets: Vec<[f32; 2]>,
    bases: Vec<[i32; 2]>,
}

/// Which base view a splat reads from.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Source {
    Low,
    High,
}

/// CPU compute backend.
#[derive(Debug, Default)]
pub struct CpuBackend {
    dispatches: u64,
}

impl CpuBackend {
    /// Create a CPU backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total dispatches run.
    #[must_use]
    pub const fn dispatches(&self) -> u64 {
        self.dispatches
    }
}

impl ComputeBackend for CpuBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Cpu
    }

    fn name(&self) -> &str {
        "cpu"
    }

    fn interpolate(
        &mut self,
        buffer: &mut QuiltBuffer,
        plan: &InterpolationPlan,
        dispatch: &DispatchPlan,
    ) -> RenderResult<()> {
        let desc = Descriptors {
            positions: plan.view_positions(),
            offsets: plan.view_offsets(),
            bases: plan.base_positions(),
        };
        let (color, depth) = buffer.planes_mut();

        for step in &dispatch.steps {
            let u = dispatch.uniforms.with_phase(step.phase);
            tracing::trace!(
                "cpu dispatch {} phase {} groups {:?}",
                step.kernel.entry_point(),
                step.phase,
                step.groups
            );
            match step.kernel {
                Kernel::FillGaps => {
                    let snapshot = depth.to_vec();
                    for_each_invocation(step.groups, |gid| {
                        fill_gaps(&u, &desc, color, depth, &snapshot, gid);
                    });
                }
                Kernel::Forward(sweep) => for_each_invocation(step.groups, |gid| {
                    splat(&u, &desc, color, depth, gid, sweep, Source::Low, false);
                }),
                Kernel::Back(sweep) => for_each_invocation(step.groups, |gid| {
                    splat(&u, &desc, color, depth, gid, sweep, Source::High, false);
                }),
                Kernel::BackBlend(sweep) => for_each_invocation(step.groups, |gid| {
                    splat(&u, &desc, color, depth, gid, sweep, Source::High, true);
                }),
            }
            self.dispatches += 1;
        }
        Ok(())
    }

    fn lightfield(&mut self, buffer: &QuiltBuffer, params: &LightfieldParams) -> RenderResult<FrameImage> {
        Ok(render_lightfield(buffer, params))
    }
}

/// Run `kernel` for every global invocation id of a dispatch.
fn for_each_invocation(groups: [u32; 3], mut kernel: impl FnMut([u32; 3])) {
    let [wx, wy, wz] = WORKGROUP_SIZE;
    for gz in 0..groups[2] {
        for gy in 0..groups[1] {
            for gx in 0..groups[0] {
                for lz in 0..wz {
                    for ly in 0..wy {
                        for lx in 0..wx {
                            kernel([gx * wx + lx, gy * wy + ly, gz * wz + lz]);
                        }
                    }
                }
            }
        }
    }
}

#[allow(clippy::cast_sign_loss)]
fn pixel_index(u: &InterpolationUniforms, x: i32, y: i32) -> usize {
    y as usize * u.quilt_size[0] as usize + x as usize
}

fn copy_pixel(color: &mut [u8], src: usize, dst: usize) {
    color.copy_within(src * 4..src * 4 + 4, dst * 4);
}

/// Per-channel `mix(dst, src, t)` with unorm rounding.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn blend_pixel(color: &mut [u8], src: usize, dst: usize, t: f32) {
    for c in 0..4 {
        let a = f32::from(color[dst * 4 + c]) / 255.0;
        let b = f32::from(color[src * 4 + c]) / 255.0;
        let mixed = a * (1.0 - t) + b * t;
        color[dst * 4 + c] = (mixed.clamp(0.0, 1.0) * 255.0 + 0.5).floor() as u8;
    }
}

/// Splat one base-view pixel into a skipped view.
#[allow(
    clippy::too_many_arguments,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn splat(
    u: &InterpolationUniforms,
    desc: &Descriptors,
    color: &mut [u8],
    depth: &mut [f32],
    gid: [u32; 3],
    sweep: Sweep,
    source: Source,
    blend: bool,
) {
    let [vw, vh] = u.view_size;
    let x = match sweep {
        Sweep::Full => gid[0],
        Sweep::Strided => gid[0] * u.span + u.phase,
    };
    let (y, v) = (gid[1], gid[2]);
    if x >= vw || y >= vh || v >= u.view_count {
        return;
    }

    let [tile_x, tile_y, low, high] = desc.positions[v as usize];
    let [offset, lerp] = desc.offsets[v as usize];
    let slot = if source == Source::Low { low } else { high };
    let [base_x, base_y] = desc.bases[slot as usize];

    let src = pixel_index(u, base_x + x as i32, base_y + y as i32);
    let d = depth[src];
    if is_sentinel(d) {
        return;
    }

    let z = linearize(d, u.near, u.far);
    let parallax = offset * (1.0 - u.focal_distance / z) * vw as f32 / u.persp_w;
    let shift = match source {
        Source::Low => parallax * lerp,
        Source::High => -parallax * (1.0 - lerp),
    };
    if !shift.is_finite() {
        return;
    }
    let dx = (x as f32 + shift + 0.5).floor();
    if dx < 0.0 || dx >= vw as f32 {
        return;
    }

    let dst = pixel_index(u, tile_x + dx as i32, tile_y + y as i32);
    let existing = depth[dst];
    if blend && !is_sentinel(existing) {
        let agree = (linearize(existing, u.near, u.far) - z).abs() <= u.blend_tolerance * z;
        if agree {
            blend_pixel(color, src, dst, lerp);
            depth[dst] = existing.min(d);
            return;
        }
    }
    if d < existing {
        copy_pixel(color, src, dst);
        depth[dst] = d;
    }
}

/// Patch one hole from the farther of its nearest horizontal neighbours.
#[allow(clippy::cast_possible_wrap)]
fn fill_gaps(
    u: &InterpolationUniforms,
    desc: &Descriptors,
    color: &mut [u8],
    depth: &mut [f32],
    snapshot: &[f32],
    gid: [u32; 3],
) {
    let [vw, vh] = u.view_size;
    let [x, y, v] = gid;
    if x >= vw || y >= vh || v >= u.view_count {
        return;
    }
    let [tile_x, tile_y, _, _] = desc.positions[v as usize];
    let row = tile_y + y as i32;
    let dst = pixel_index(u, tile_x + x as i32, row);
    if !is_sentinel(snapshot[dst]) {
        return;
    }

    let find = |dir: i32| {
        (1..=u.gap_radius as i32)
            .map(|r| x as i32 + dir * r)
            .take_while(|&cx| cx >= 0 && cx < vw as i32)
            .map(|cx| pixel_index(u, tile_x + cx, row))
            .find(|&p| !is_sentinel(snapshot[p]))
    };
    let pick = match (find(-1), find(1)) {
        (Some(l), Some(r)) => {
            if snapshot[r] > snapshot[l] {
                r
            } else {
                l
            }
        }
        (Some(p), None) | (None, Some(p)) => p,
        (None, None) => return,
    };
    copy_pixel(color, pick, dst);
    depth[dst] = snapshot[pick];
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::FramePhase;
    use crate::interpolate::{Dispatch, InterpolationSettings, KernelTable};
    use quilt_core::depth::{device_depth, DEPTH_CLEAR};
    use quilt_core::QuiltLayout;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    /// Three 8x1 views; view 1 is skipped halfway between 0 and 2.
    fn fixture() -> (QuiltBuffer, InterpolationPlan, InterpolationUniforms) {
        let layout = QuiltLayout::new(24, 1, 3, 1, 3);
        let mut buffer = QuiltBuffer::new(&layout);
        buffer.begin_frame([0.0; 4], true);
        let mut plan = InterpolationPlan::build(&layout, 2, 35.0, 1.0);
        plan.skipped[0].cone_offset = 1.0;
        let uniforms = InterpolationUniforms {
            view_size: [8, 1],
            quilt_size: [24, 1],
            near: 1.0,
            far: 100.0,
            focal_distance: 10.0,
            persp_w: 1.0,
            span: 4,
            phase: 0,
            view_count: 1,
            gap_radius: 8,
            blend_tolerance: 0.05,
            _pad: [0.0; 3],
        };
        (buffer, plan, uniforms)
    }

    fn put(buffer: &mut QuiltBuffer, x: usize, color: [u8; 4], distance: f32) {
        let (c, d) = buffer.planes_mut();
        c[x * 4..x * 4 + 4].copy_from_slice(&color);
        d[x] = device_depth(distance, 1.0, 100.0);
    }

    fn run(buffer: &mut QuiltBuffer, plan: &InterpolationPlan, uniforms: InterpolationUniforms, blend: bool, fill: bool) {
        let settings = InterpolationSettings {
            blend_views: blend,
            ..InterpolationSettings::default()
        };
        let dispatch = DispatchPlan::build(uniforms, KernelTable::resolve(&settings), fill, WORKGROUP_SIZE);
        CpuBackend::new()
            .interpolate(buffer, plan, &dispatch)
            .expect("should interpolate");
    }

    #[test]
    fn test_forward_shifts_by_parallax() {
        let (mut buffer, plan, u) = fixture();
        // z = 20: parallax = 1 * (1 - 10/20) * 8 / 1 = 4, half of it forward
        put(&mut buffer, 1, RED, 20.0);
        run(&mut buffer, &plan, u, false, false);
        assert_eq!(buffer.get_pixel(8 + 3, 0), Some(RED));
        assert_eq!(buffer.get_pixel(8 + 1, 0), Some([0, 0, 0, 0]));
        assert!(buffer.get_depth(8 + 3, 0).is_some_and(|d| d < 1.0));
    }

    #[test]
    fn test_back_shifts_the_other_way() {
        let (mut buffer, plan, u) = fixture();
        put(&mut buffer, 16 + 5, BLUE, 20.0);
        run(&mut buffer, &plan, u, false, false);
        assert_eq!(buffer.get_pixel(8 + 3, 0), Some(BLUE));
    }

    #[test]
    fn test_focal_plane_does_not_shift() {
        let (mut buffer, plan, u) = fixture();
        put(&mut buffer, 6, RED, 10.0);
        run(&mut buffer, &plan, u, false, false);
        assert_eq!(buffer.get_pixel(8 + 6, 0), Some(RED));
    }

    #[test]
    fn test_zero_perspective_width_skips_splat() {
        let (mut buffer, plan, mut u) = fixture();
        u.persp_w = 0.0;
        // parallax divides by zero
        put(&mut buffer, 6, RED, 10.0);
        run(&mut buffer, &plan, u, false, false);
        assert_eq!(buffer.get_pixel(8, 0), Some([0, 0, 0, 0]));
        assert!(buffer.tile_depth(1).iter().all(|&d| d == DEPTH_CLEAR));
    }

    #[test]
    fn test_front_most_sample_wins() {
        let (mut buffer, plan, u) = fixture();
        put(&mut buffer, 1, RED, 20.0);
        // z = 40/3: parallax = 2, back shift = -1
        put(&mut buffer, 16 + 4, BLUE, 40.0 / 3.0);
        run(&mut buffer, &plan, u, false, false);
        assert_eq!(buffer.get_pixel(8 + 3, 0), Some(BLUE));
    }

    #[test]
    fn test_blend_mixes_agreeing_depths() {
        let (mut buffer, plan, u) = fixture();
        put(&mut buffer, 1, RED, 20.0);
        put(&mut buffer, 16 + 5, BLUE, 20.0);
        run(&mut buffer, &plan, u, true, false);
        assert_eq!(buffer.get_pixel(8 + 3, 0), Some([128, 0, 128, 255]));
    }

    #[test]
    fn test_sentinel_is_never_splatted() {
        let (mut buffer, plan, u) = fixture();
        run(&mut buffer, &plan, u, false, false);
        assert!(buffer.tile_depth(1).iter().all(|&d| d == DEPTH_CLEAR));
    }

    #[test]
    fn test_fill_gaps_takes_farther_neighbour() {
        let (mut buffer, plan, u) = fixture();
        put(&mut buffer, 8 + 3, RED, 5.0);
        put(&mut buffer, 8 + 6, BLUE, 50.0);
        let dispatch = DispatchPlan {
            uniforms: u,
            steps: vec![Dispatch {
                kernel: Kernel::FillGaps,
                phase: 0,
                groups: [1, 1, 1],
            }],
        };
        CpuBackend::new()
            .interpolate(&mut buffer, &plan, &dispatch)
            .expect("should fill");
        assert_eq!(buffer.get_pixel(8 + 4, 0), Some(BLUE));
        assert_eq!(buffer.get_pixel(8 + 5, 0), Some(BLUE));
        assert_eq!(buffer.get_pixel(8, 0), Some(RED));
        assert_eq!(buffer.get_pixel(8 + 7, 0), Some(BLUE));
        assert!(buffer.tile_depth(1).iter().all(|&d| d <= 1.0));
        // base tiles are untouched
        assert!(buffer.tile_depth(0).iter().all(|&d| d == DEPTH_CLEAR));
    }

    #[test]
    fn test_fill_gaps_tie_prefers_left() {
        let (mut buffer, plan, u) = fixture();
        put(&mut buffer, 8 + 2, RED, 20.0);
        put(&mut buffer, 8 + 6, BLUE, 20.0);
        let dispatch = DispatchPlan {
            uniforms: u,
            steps: vec![Dispatch {
                kernel: Kernel::FillGaps,
                phase: 0,
                groups: [1, 1, 1],
            }],
        };
        CpuBackend::new()
            .interpolate(&mut buffer, &plan, &dispatch)
            .expect("should fill");
        assert_eq!(buffer.get_pixel(8 + 4, 0), Some(RED));
    }

    #[test]
    fn test_fill_gaps_respects_radius() {
        let (mut buffer, plan, mut u) = fixture();
        u.gap_radius = 1;
        put(&mut buffer, 8, RED, 20.0);
        let dispatch = DispatchPlan {
            uniforms: u,
            steps: vec![Dispatch {
                kernel: Kernel::FillGaps,
                phase: 0,
                groups: [1, 1, 1],
            }],
        };
        CpuBackend::new()
            .interpolate(&mut buffer, &plan, &dispatch)
            .expect("should fill");
        assert_eq!(buffer.get_pixel(8 + 1, 0), Some(RED));
        assert_eq!(buffer.get_depth(8 + 2, 0), Some(DEPTH_CLEAR));
    }

    #[test]
    fn test_strided_sweep_reaches_every_column() {
        let (mut buffer, plan, u) = fixture();
        for x in 0..8 {
            put(&mut buffer, x, RED, 10.0);
        }
        let settings = InterpolationSettings {
            reduce_flicker: true,
            ..InterpolationSettings::default()
        };
        let dispatch = DispatchPlan::build(u, KernelTable::resolve(&settings), false, WORKGROUP_SIZE);
        let mut backend = CpuBackend::new();
        backend
            .interpolate(&mut buffer, &plan, &dispatch)
            .expect("should interpolate");
        assert_eq!(backend.dispatches(), 8);
        assert!(buffer.tile_image(1).pixels.chunks_exact(4).all(|p| p == RED));
        assert_eq!(buffer.phase(), FramePhase::Empty);
    }
}
