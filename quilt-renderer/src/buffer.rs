//! # Quilt Buffers
//!
//! CPU-side storage for the quilt color and depth images, plus the
//! [`FramePhase`] tracker that keeps the pipeline stages in order.
//!
//! Both images are quilt-sized and stored top-down. Color is RGBA8; depth
//! is one `f32` per pixel holding device depth in `[0, 1]`, or
//! [`DEPTH_CLEAR`] where no view has written.

use std::fmt;

use quilt_core::depth::{DEPTH_CLEAR, FAR_DEPTH};
use quilt_core::QuiltLayout;

use crate::error::{RenderError, RenderResult};

/// Convert a linear RGBA color to 8-bit channels.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn to_rgba8(color: [f32; 4]) -> [u8; 4] {
    color.map(|c| (c.clamp(0.0, 1.0) * 255.0 + 0.5).floor() as u8)
}

/// An RGBA8 image, stored top-down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel data (RGBA, 8 bits per channel).
    pub pixels: Vec<u8>,
}

impl FrameImage {
    /// Create a transparent black image.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; pixel_count(width, height) * 4],
        }
    }

    /// Wrap raw RGBA8 data.
    ///
    /// # Errors
    ///
    /// Returns an error if the data length does not match the size.
    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> RenderResult<Self> {
        let expected = pixel_count(width, height) * 4;
        if pixels.len() != expected {
            return Err(RenderError::Resource(format!(
                "image data is {} bytes, expected {expected} for {width}x{height}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Fill the whole image with a color.
    pub fn clear(&mut self, color: [u8; 4]) {
        for chunk in self.pixels.chunks_exact_mut(4) {
            chunk.copy_from_slice(&color);
        }
    }

    /// Get the pixel at a coordinate.
    #[must_use]
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        self.pixels
            .get(idx..idx + 4)
            .map(|p| [p[0], p[1], p[2], p[3]])
    }

    /// Resample to a new size with nearest filtering.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // Source coordinates are below the source size
    pub fn resized_nearest(&self, width: u32, height: u32) -> Self {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let mut out = Self::new(width, height);
        if self.width == 0 || self.height == 0 {
            return out;
        }
        for y in 0..height {
            let sy = (u64::from(y) * u64::from(self.height) / u64::from(height.max(1))) as usize;
            for x in 0..width {
                let sx = (u64::from(x) * u64::from(self.width) / u64::from(width.max(1))) as usize;
                let src = (sy * self.width as usize + sx) * 4;
                let dst = (y as usize * width as usize + x as usize) * 4;
                out.pixels[dst..dst + 4].copy_from_slice(&self.pixels[src..src + 4]);
            }
        }
        out
    }

    /// Convert to an `image` buffer for encoding.
    #[cfg(feature = "images")]
    #[must_use]
    pub fn to_rgba_image(&self) -> Option<image::RgbaImage> {
        image::RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
    }

    /// Build from a decoded `image` buffer.
    #[cfg(feature = "images")]
    #[must_use]
    pub fn from_rgba_image(image: &image::RgbaImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            pixels: image.as_raw().clone(),
        }
    }
}

fn pixel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

/// Pipeline phase of the quilt for the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramePhase {
    /// Cleared, no view written yet.
    Empty,
    /// Base views written.
    Rendered,
    /// Skipped views reconstructed.
    Interpolated,
    /// Lightfield produced from the quilt.
    Composited,
}

impl fmt::Display for FramePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Empty => "empty",
            Self::Rendered => "rendered",
            Self::Interpolated => "interpolated",
            Self::Composited => "composited",
        };
        f.write_str(name)
    }
}

impl FramePhase {
    /// Whether moving from `self` to `next` keeps the stage order.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Empty, Self::Rendered)
                | (Self::Rendered, Self::Interpolated | Self::Composited)
                | (Self::Interpolated, Self::Composited)
        )
    }
}

/// Quilt color and depth images for one layout.
#[derive(Debug, Clone)]
pub struct QuiltBuffer {
    layout: QuiltLayout,
    color: Vec<u8>,
    depth: Vec<f32>,
    phase: FramePhase,
}

impl QuiltBuffer {
    /// Allocate buffers for a layout.
    #[must_use]
    pub fn new(layout: &QuiltLayout) -> Self {
        let pixels = pixel_count(layout.quilt_width(), layout.quilt_height());
        tracing::debug!(
            "Allocating quilt buffers {}x{}",
            layout.quilt_width(),
            layout.quilt_height()
        );
        Self {
            layout: layout.clone(),
            color: vec![0; pixels * 4],
            depth: vec![DEPTH_CLEAR; pixels],
            phase: FramePhase::Empty,
        }
    }

    /// The layout these buffers were allocated for.
    #[must_use]
    pub const fn layout(&self) -> &QuiltLayout {
        &self.layout
    }

    /// Quilt width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.layout.quilt_width()
    }

    /// Quilt height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.layout.quilt_height()
    }

    /// RGBA8 color data.
    #[must_use]
    pub fn color(&self) -> &[u8] {
        &self.color
    }

    /// Mutable RGBA8 color data.
    pub fn color_mut(&mut self) -> &mut [u8] {
        &mut self.color
    }

    /// Depth data.
    #[must_use]
    pub fn depth(&self) -> &[f32] {
        &self.depth
    }

    /// Mutable depth data.
    pub fn depth_mut(&mut self) -> &mut [f32] {
        &mut self.depth
    }

    /// Color and depth borrowed together.
    pub fn planes_mut(&mut self) -> (&mut [u8], &mut [f32]) {
        (&mut self.color, &mut self.depth)
    }

    /// Current pipeline phase.
    #[must_use]
    pub const fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Start a new frame: clear depth to the sentinel and, optionally,
    /// color to the background with zero alpha.
    pub fn begin_frame(&mut self, background: [f32; 4], clear_color: bool) {
        if clear_color {
            let [r, g, b, _] = to_rgba8(background);
            for chunk in self.color.chunks_exact_mut(4) {
                chunk.copy_from_slice(&[r, g, b, 0]);
            }
        }
        self.depth.fill(DEPTH_CLEAR);
        self.phase = FramePhase::Empty;
    }

    /// Move to the next pipeline phase.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::PhaseOrder`] if `next` does not follow the
    /// current phase.
    pub fn advance(&mut self, next: FramePhase) -> RenderResult<()> {
        if !self.phase.can_advance_to(next) {
            return Err(RenderError::PhaseOrder {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }

    /// Copy one view into its tile.
    ///
    /// `color` is RGBA8 and `depth` one float per pixel, both tile-sized
    /// and top-down.
    ///
    /// # Errors
    ///
    /// Returns an error if the view index or data sizes do not match the
    /// layout.
    pub fn write_tile(&mut self, index: u32, color: &[u8], depth: &[f32]) -> RenderResult<()> {
        self.copy_tile(index, color, depth, false)
    }

    /// Copy only the pixels of a view that hit geometry, leaving the rest
    /// of the tile as it was.
    ///
    /// # Errors
    ///
    /// Returns an error if the view index or data sizes do not match the
    /// layout.
    pub fn write_tile_over(&mut self, index: u32, color: &[u8], depth: &[f32]) -> RenderResult<()> {
        self.copy_tile(index, color, depth, true)
    }

    fn copy_tile(&mut self, index: u32, color: &[u8], depth: &[f32], covered_only: bool) -> RenderResult<()> {
        if index >= self.layout.num_views() {
            return Err(RenderError::Frame(format!(
                "view {index} out of range for {} views",
                self.layout.num_views()
            )));
        }
        let rect = self.layout.tile_rect(index);
        let (tw, th) = (rect.width as usize, rect.height as usize);
        if color.len() != tw * th * 4 || depth.len() != tw * th {
            return Err(RenderError::Frame(format!(
                "view {index} is not {}x{}",
                rect.width, rect.height
            )));
        }

        let qw = self.width() as usize;
        for row in 0..th {
            let dst = (rect.y as usize + row) * qw + rect.x as usize;
            if covered_only {
                for col in 0..tw {
                    let src = row * tw + col;
                    if depth[src] < FAR_DEPTH {
                        self.color[(dst + col) * 4..(dst + col + 1) * 4].copy_from_slice(&color[src * 4..src * 4 + 4]);
                        self.depth[dst + col] = depth[src];
                    }
                }
            } else {
                self.color[dst * 4..(dst + tw) * 4].copy_from_slice(&color[row * tw * 4..(row + 1) * tw * 4]);
                self.depth[dst..dst + tw].copy_from_slice(&depth[row * tw..(row + 1) * tw]);
            }
        }
        Ok(())
    }

    /// Copy an externally supplied quilt image over the color buffer.
    ///
    /// Images of a different size are resampled to the quilt size.
    pub fn copy_override(&mut self, image: &FrameImage) {
        let resized = image.resized_nearest(self.width(), self.height());
        self.color.copy_from_slice(&resized.pixels);
    }

    /// Color at a quilt pixel.
    #[must_use]
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        let idx = (y as usize * self.width() as usize + x as usize) * 4;
        Some([
            self.color[idx],
            self.color[idx + 1],
            self.color[idx + 2],
            self.color[idx + 3],
        ])
    }

    /// Depth at a quilt pixel.
    #[must_use]
    pub fn get_depth(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        self.depth
            .get(y as usize * self.width() as usize + x as usize)
            .copied()
    }

    /// Copy one tile's color out as a standalone image.
    #[must_use]
    pub fn tile_image(&self, index: u32) -> FrameImage {
        let rect = self.layout.tile_rect(index);
        let mut out = FrameImage::new(rect.width, rect.height);
        let (qw, tw) = (self.width() as usize, rect.width as usize);
        for row in 0..rect.height as usize {
            let src = ((rect.y as usize + row) * qw + rect.x as usize) * 4;
            out.pixels[row * tw * 4..(row + 1) * tw * 4].copy_from_slice(&self.color[src..src + tw * 4]);
        }
        out
    }

    /// Copy one tile's depth out.
    #[must_use]
    pub fn tile_depth(&self, index: u32) -> Vec<f32> {
        let rect = self.layout.tile_rect(index);
        let (qw, tw) = (self.width() as usize, rect.width as usize);
        let mut out = Vec::with_capacity(tw * rect.height as usize);
        for row in 0..rect.height as usize {
            let src = (rect.y as usize + row) * qw + rect.x as usize;
            out.extend_from_slice(&self.depth[src..src + tw]);
        }
        out
    }

    /// The whole color buffer as an image.
    #[must_use]
    pub fn to_image(&self) -> FrameImage {
        FrameImage {
            width: self.width(),
            height: self.height(),
            pixels: self.color.clone(),
        }
    }
}
