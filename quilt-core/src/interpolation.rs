//! View subsampling and interpolation planning.
//!
//! With an interpolation factor `K`, only every `K`th view (plus the last
//! view) is rendered. The remaining views are reconstructed from the two
//! rendered views that bracket them. [`InterpolationPlan`] holds the flat
//! per-frame descriptors the reconstruction kernels consume.

use serde::{Deserialize, Serialize};

use crate::layout::QuiltLayout;

/// How many views to skip between rendered views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewInterpolation {
    /// Render every view.
    #[default]
    None,
    /// Render every second view.
    EveryOther,
    /// Render every fourth view.
    Every4th,
    /// Render every eighth view.
    Every8th,
    /// Render roughly four views across the cone.
    FourViews,
    /// Render only the first and last view.
    TwoViews,
}

impl ViewInterpolation {
    /// Interpolation factor `K` for a view count. Never zero.
    #[must_use]
    pub const fn factor(self, num_views: u32) -> u32 {
        let k = match self {
            Self::None => 1,
            Self::EveryOther => 2,
            Self::Every4th => 4,
            Self::Every8th => 8,
            Self::FourViews => num_views / 3,
            Self::TwoViews => num_views,
        };
        if k == 0 {
            1
        } else {
            k
        }
    }
}

/// Whether view `index` is rendered directly.
#[must_use]
pub const fn is_base_view(index: u32, num_views: u32, factor: u32) -> bool {
    let factor = if factor == 0 { 1 } else { factor };
    index % factor == 0 || index + 1 == num_views
}

/// A directly rendered view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseView {
    /// View index.
    pub index: u32,
    /// Tile origin x in quilt pixels.
    pub x: u32,
    /// Tile origin y in quilt pixels (top-down).
    pub y: u32,
}

/// A view reconstructed from its two bracketing base views.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkippedView {
    /// View index.
    pub index: u32,
    /// Tile origin x in quilt pixels.
    pub x: u32,
    /// Tile origin y in quilt pixels (top-down).
    pub y: u32,
    /// Slot of the lower base view in [`InterpolationPlan::bases`].
    pub low: u32,
    /// Slot of the higher base view in [`InterpolationPlan::bases`].
    pub high: u32,
    /// Cone offset spanned by the two base views, in tangent units.
    pub cone_offset: f32,
    /// Position between the base views, in `(0, 1)`.
    pub lerp: f32,
}

/// Per-frame descriptors for view reconstruction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterpolationPlan {
    /// Base views in index order.
    pub bases: Vec<BaseView>,
    /// Skipped views in index order.
    pub skipped: Vec<SkippedView>,
    /// The interpolation factor the plan was built for.
    pub factor: u32,
}

impl InterpolationPlan {
    /// Build the descriptors for a layout.
    ///
    /// `view_cone` is in degrees and is scaled by `view_cone_modifier`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn build(
        layout: &QuiltLayout,
        factor: u32,
        view_cone: f32,
        view_cone_modifier: f32,
    ) -> Self {
        let num_views = layout.num_views();
        let factor = factor.max(1);
        let cone_tan = (view_cone * view_cone_modifier).to_radians().tan();

        let mut bases: Vec<BaseView> = Vec::new();
        let mut skipped = Vec::new();
        let mut pending: Vec<u32> = Vec::new();

        for index in 0..num_views {
            let rect = layout.tile_rect(index);
            if !is_base_view(index, num_views, factor) {
                pending.push(index);
                continue;
            }

            let slot = u32::try_from(bases.len()).unwrap_or(u32::MAX);
            if let Some(low) = bases.last() {
                let span = index - low.index;
                let cone_offset = span as f32 * cone_tan / (num_views - 1) as f32;
                for &view in &pending {
                    let tile = layout.tile_rect(view);
                    skipped.push(SkippedView {
                        index: view,
                        x: tile.x,
                        y: tile.y,
                        low: slot - 1,
                        high: slot,
                        cone_offset,
                        lerp: (view - low.index) as f32 / span as f32,
                    });
                }
            }
            pending.clear();
            bases.push(BaseView {
                index,
                x: rect.x,
                y: rect.y,
            });
        }

        tracing::trace!(
            "Interpolation plan: {} base views, {} skipped (K = {})",
            bases.len(),
            skipped.len(),
            factor
        );

        Self {
            bases,
            skipped,
            factor,
        }
    }

    /// Whether there is nothing to reconstruct.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.skipped.is_empty()
    }

    /// Flat `[tile_x, tile_y, low, high]` records.
    #[must_use]
    pub fn view_positions(&self) -> Vec<[i32; 4]> {
        self.skipped
            .iter()
            .map(|v| {
                [
                    i32::try_from(v.x).unwrap_or(i32::MAX),
                    i32::try_from(v.y).unwrap_or(i32::MAX),
                    i32::try_from(v.low).unwrap_or(i32::MAX),
                    i32::try_from(v.high).unwrap_or(i32::MAX),
                ]
            })
            .collect()
    }

    /// Flat `[cone_offset, lerp]` records.
    #[must_use]
    pub fn view_offsets(&self) -> Vec<[f32; 2]> {
        self.skipped.iter().map(|v| [v.cone_offset, v.lerp]).collect()
    }

    /// Flat `[x, y]` base tile origins.
    #[must_use]
    pub fn base_positions(&self) -> Vec<[i32; 2]> {
        self.bases
            .iter()
            .map(|b| {
                [
                    i32::try_from(b.x).unwrap_or(i32::MAX),
                    i32::try_from(b.y).unwrap_or(i32::MAX),
                ]
            })
            .collect()
    }
}
