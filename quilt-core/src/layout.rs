//! # Quilt Layout
//!
//! A quilt is a single texture containing a grid of rendered views. Tiles
//! are addressed bottom-up: view 0 sits in the bottom-left cell and the
//! last view in the top row, matching the display's inverted-Y convention.
//!
//! ```text
//! ┌────┬────┬────┬────┬────┬────┬────┬────┐
//! │ 40 │ 41 │ 42 │ 43 │ 44 │ 45 │ 46 │ 47 │  Row 5
//! ├────┼────┼────┼────┼────┼────┼────┼────┤
//! │ 32 │ 33 │ 34 │ 35 │ 36 │ 37 │ 38 │ 39 │  Row 4
//! ├────┼────┼────┼────┼────┼────┼────┼────┤
//! │ 24 │ 25 │ 26 │ 27 │ 28 │ 29 │ 30 │ 31 │  Row 3
//! ├────┼────┼────┼────┼────┼────┼────┼────┤
//! │ 16 │ 17 │ 18 │ 19 │ 20 │ 21 │ 22 │ 23 │  Row 2
//! ├────┼────┼────┼────┼────┼────┼────┼────┤
//! │  8 │  9 │ 10 │ 11 │ 12 │ 13 │ 14 │ 15 │  Row 1
//! ├────┼────┼────┼────┼────┼────┼────┼────┤
//! │  0 │  1 │  2 │  3 │  4 │  5 │  6 │  7 │  Row 0
//! └────┴────┴────┴────┴────┴────┴────┴────┘
//!         8 columns × 6 rows = 48 views
//! ```
//!
//! Pixel memory is stored top-down, so [`QuiltLayout::tile_rect`] converts
//! the bottom-up row into a top-down origin, including the vertical padding
//! left over when the quilt height is not a multiple of the row count.

use serde::{Deserialize, Serialize};

use crate::calibration::Calibration;
use crate::device::DeviceKind;

/// Aspect value meaning "use the display's aspect".
pub const AUTO_ASPECT: f32 = -1.0;

/// Pixel rectangle of one tile in top-down quilt memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileRect {
    /// Left edge in pixels.
    pub x: u32,
    /// Top edge in pixels (top-down).
    pub y: u32,
    /// Tile width in pixels.
    pub width: u32,
    /// Tile height in pixels.
    pub height: u32,
}

/// Serialized form of a layout: the input fields only.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LayoutInputs {
    quilt_width: u32,
    quilt_height: u32,
    view_columns: u32,
    view_rows: u32,
    num_views: u32,
    #[serde(default = "auto_aspect")]
    aspect: f32,
    #[serde(default)]
    overscan: bool,
}

const fn auto_aspect() -> f32 {
    AUTO_ASPECT
}

/// Tile grid of a quilt texture.
///
/// The derived fields are recomputed by every constructor and setter, so a
/// layout is always consistent with its inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "LayoutInputs", into = "LayoutInputs")]
pub struct QuiltLayout {
    quilt_width: u32,
    quilt_height: u32,
    view_columns: u32,
    view_rows: u32,
    num_views: u32,
    aspect: f32,
    overscan: bool,

    view_width: u32,
    view_height: u32,
    padding_horizontal: u32,
    padding_vertical: u32,
    view_portion_horizontal: f32,
    view_portion_vertical: f32,
}

impl From<LayoutInputs> for QuiltLayout {
    fn from(inputs: LayoutInputs) -> Self {
        Self::new(
            inputs.quilt_width,
            inputs.quilt_height,
            inputs.view_columns,
            inputs.view_rows,
            inputs.num_views,
        )
        .with_aspect(inputs.aspect, inputs.overscan)
    }
}

impl From<QuiltLayout> for LayoutInputs {
    fn from(layout: QuiltLayout) -> Self {
        Self {
            quilt_width: layout.quilt_width,
            quilt_height: layout.quilt_height,
            view_columns: layout.view_columns,
            view_rows: layout.view_rows,
            num_views: layout.num_views,
            aspect: layout.aspect,
            overscan: layout.overscan,
        }
    }
}

impl PartialEq for QuiltLayout {
    #[allow(clippy::float_cmp)] // Aspect is an input value, compared exactly
    fn eq(&self, other: &Self) -> bool {
        self.quilt_width == other.quilt_width
            && self.quilt_height == other.quilt_height
            && self.view_columns == other.view_columns
            && self.view_rows == other.view_rows
            && self.num_views == other.num_views
            && self.aspect == other.aspect
            && self.overscan == other.overscan
    }
}

impl Default for QuiltLayout {
    fn default() -> Self {
        QuiltPreset::Portrait.table_layout()
    }
}

impl QuiltLayout {
    /// Create a layout with automatic aspect and letterboxing.
    ///
    /// A zero column or row count does not fail: the whole quilt becomes a
    /// single tile. `num_views` is clamped to the tile capacity.
    #[must_use]
    pub fn new(
        quilt_width: u32,
        quilt_height: u32,
        view_columns: u32,
        view_rows: u32,
        num_views: u32,
    ) -> Self {
        let mut layout = Self {
            quilt_width,
            quilt_height,
            view_columns,
            view_rows,
            num_views,
            aspect: AUTO_ASPECT,
            overscan: false,
            view_width: 0,
            view_height: 0,
            padding_horizontal: 0,
            padding_vertical: 0,
            view_portion_horizontal: 1.0,
            view_portion_vertical: 1.0,
        };
        layout.setup();
        layout
    }

    /// Set the content aspect and overscan behaviour.
    #[must_use]
    pub fn with_aspect(mut self, aspect: f32, overscan: bool) -> Self {
        self.aspect = aspect;
        self.overscan = overscan;
        self
    }

    /// Preset layout for a device, with its aspect pinned to the device.
    #[must_use]
    pub fn for_device(kind: DeviceKind) -> Self {
        let settings = kind.settings();
        settings
            .quilt_preset
            .table_layout()
            .with_aspect(settings.aspect(), false)
    }

    /// Recompute derived fields from the inputs.
    #[allow(clippy::cast_precision_loss)]
    fn setup(&mut self) {
        if self.quilt_width == 0 || self.quilt_height == 0 {
            tracing::warn!(
                "Quilt size {}x{} is empty, using 1x1",
                self.quilt_width,
                self.quilt_height
            );
            self.quilt_width = self.quilt_width.max(1);
            self.quilt_height = self.quilt_height.max(1);
        }

        if self.is_degenerate() {
            self.view_width = self.quilt_width;
            self.view_height = self.quilt_height;
        } else {
            self.view_width = self.quilt_width / self.view_columns;
            self.view_height = self.quilt_height / self.view_rows;
        }

        let (columns, rows) = self.grid();
        self.padding_horizontal = self.quilt_width - columns * self.view_width;
        self.padding_vertical = self.quilt_height - rows * self.view_height;
        self.view_portion_horizontal =
            (columns * self.view_width) as f32 / self.quilt_width as f32;
        self.view_portion_vertical = (rows * self.view_height) as f32 / self.quilt_height as f32;

        let capacity = columns * rows;
        let clamped = self.num_views.clamp(1, capacity);
        if clamped != self.num_views {
            tracing::warn!(
                "View count {} does not fit a {}x{} grid, using {}",
                self.num_views,
                columns,
                rows,
                clamped
            );
            self.num_views = clamped;
        }

        tracing::debug!(
            "Quilt layout {}x{}: {}x{} tiles of {}x{}, {} views",
            self.quilt_width,
            self.quilt_height,
            columns,
            rows,
            self.view_width,
            self.view_height,
            self.num_views
        );
    }

    /// Whether the grid had a zero dimension and fell back to one tile.
    #[must_use]
    pub const fn is_degenerate(&self) -> bool {
        self.view_columns == 0 || self.view_rows == 0
    }

    /// Effective `(columns, rows)` used for addressing.
    #[must_use]
    pub const fn grid(&self) -> (u32, u32) {
        if self.is_degenerate() {
            (1, 1)
        } else {
            (self.view_columns, self.view_rows)
        }
    }

    /// Number of tiles in the grid.
    #[must_use]
    pub const fn tile_capacity(&self) -> u32 {
        let (columns, rows) = self.grid();
        columns * rows
    }

    /// Pixel rectangle of view `index` in top-down memory.
    ///
    /// Rows are counted from the bottom of the quilt.
    #[must_use]
    pub const fn tile_rect(&self, index: u32) -> TileRect {
        let (columns, rows) = self.grid();
        let column = index % columns;
        let row = index / columns;
        let flipped = rows - 1 - row;
        TileRect {
            x: column * self.view_width,
            y: flipped * self.view_height + self.padding_vertical,
            width: self.view_width,
            height: self.view_height,
        }
    }

    /// Content aspect, resolving [`AUTO_ASPECT`] to the display aspect.
    #[must_use]
    pub fn effective_aspect(&self, display_aspect: f32) -> f32 {
        if self.aspect > 0.0 {
            self.aspect
        } else {
            display_aspect
        }
    }

    /// Quilt texture width in pixels.
    #[must_use]
    pub const fn quilt_width(&self) -> u32 {
        self.quilt_width
    }

    /// Quilt texture height in pixels.
    #[must_use]
    pub const fn quilt_height(&self) -> u32 {
        self.quilt_height
    }

    /// Configured column count (zero when degenerate).
    #[must_use]
    pub const fn view_columns(&self) -> u32 {
        self.view_columns
    }

    /// Configured row count (zero when degenerate).
    #[must_use]
    pub const fn view_rows(&self) -> u32 {
        self.view_rows
    }

    /// Number of views.
    #[must_use]
    pub const fn num_views(&self) -> u32 {
        self.num_views
    }

    /// Content aspect, [`AUTO_ASPECT`] for "use the display".
    #[must_use]
    pub const fn aspect(&self) -> f32 {
        self.aspect
    }

    /// Whether mismatched aspects crop (true) or letterbox (false).
    #[must_use]
    pub const fn overscan(&self) -> bool {
        self.overscan
    }

    /// Tile width in pixels.
    #[must_use]
    pub const fn view_width(&self) -> u32 {
        self.view_width
    }

    /// Tile height in pixels.
    #[must_use]
    pub const fn view_height(&self) -> u32 {
        self.view_height
    }

    /// Unused pixels at the right edge.
    #[must_use]
    pub const fn padding_horizontal(&self) -> u32 {
        self.padding_horizontal
    }

    /// Unused pixels at the top edge.
    #[must_use]
    pub const fn padding_vertical(&self) -> u32 {
        self.padding_vertical
    }

    /// Fraction of the quilt width covered by tiles.
    #[must_use]
    pub const fn view_portion_horizontal(&self) -> f32 {
        self.view_portion_horizontal
    }

    /// Fraction of the quilt height covered by tiles.
    #[must_use]
    pub const fn view_portion_vertical(&self) -> f32 {
        self.view_portion_vertical
    }

    /// Change the quilt size.
    pub fn set_quilt_size(&mut self, width: u32, height: u32) {
        self.quilt_width = width;
        self.quilt_height = height;
        self.setup();
    }

    /// Change the tile grid.
    pub fn set_grid(&mut self, view_columns: u32, view_rows: u32) {
        self.view_columns = view_columns;
        self.view_rows = view_rows;
        self.setup();
    }

    /// Change the view count.
    pub fn set_num_views(&mut self, num_views: u32) {
        self.num_views = num_views;
        self.setup();
    }
}

/// Fixed quilt presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuiltPreset {
    /// Pick from the calibration and quality bias.
    #[default]
    Automatic,
    /// 3360 × 3360, 8 × 6, 48 views.
    Portrait,
    /// 3840 × 3840, 8 × 6, 48 views.
    HiResPortrait,
    /// 4096 × 4096, 5 × 9, 45 views.
    FourKStandard,
    /// 8192 × 8192, 5 × 9, 45 views.
    EightKStandard,
}

impl QuiltPreset {
    /// Table entry for a fixed preset. `Automatic` maps to `Portrait`.
    #[must_use]
    pub fn table_layout(self) -> QuiltLayout {
        match self {
            Self::Automatic | Self::Portrait => QuiltLayout::new(3360, 3360, 8, 6, 48),
            Self::HiResPortrait => QuiltLayout::new(3840, 3840, 8, 6, 48),
            Self::FourKStandard => QuiltLayout::new(4096, 4096, 5, 9, 45),
            Self::EightKStandard => QuiltLayout::new(8192, 8192, 5, 9, 45),
        }
    }

    /// Resolve `Automatic` against a calibration and quality bias.
    ///
    /// Portrait panels always get the portrait quilt. Otherwise a bias above
    /// 1 picks the 8K table on large screens and 4K elsewhere, a bias above
    /// 0.5 picks 4K, and anything lower falls back to portrait.
    #[must_use]
    pub fn resolve(self, cal: &Calibration, quality_bias: f32) -> Self {
        if self != Self::Automatic {
            return self;
        }
        if cal.is_portrait() {
            return Self::Portrait;
        }
        if quality_bias > 1.0 {
            if cal.screen_width > 4000 && cal.screen_height > 2000 {
                return Self::EightKStandard;
            }
            return Self::FourKStandard;
        }
        if quality_bias > 0.5 {
            return Self::FourKStandard;
        }
        Self::Portrait
    }
}

/// Where a quilt layout comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutSource {
    /// One of the fixed presets.
    Preset(QuiltPreset),
    /// User-supplied dimensions.
    Custom(QuiltLayout),
}

impl Default for LayoutSource {
    fn default() -> Self {
        Self::Preset(QuiltPreset::Automatic)
    }
}

/// Compute the quilt layout for a source and calibration.
#[must_use]
pub fn compute_layout(source: &LayoutSource, cal: &Calibration, quality_bias: f32) -> QuiltLayout {
    match source {
        LayoutSource::Preset(preset) => preset.resolve(cal, quality_bias).table_layout(),
        LayoutSource::Custom(layout) => layout.clone(),
    }
}
