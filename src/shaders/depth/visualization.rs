// SPDX-License-Identifier: GPL-3.0-only

//! Depth visualization helpers
//!
//! CPU rendition of the false-color ramp in `depth_field.wgsl`:
//! - Turbo colormap (blue=near, red=far)
//! - Grayscale (bright=near, dark=far)
//!
//! Used by the terminal viewer and by snapshots when no GPU is available.

use super::constants::INVALID_COLOR;
use crate::backends::depth::DepthPlane;
use crate::config::{Colormap, Config, DepthRange};
use crate::sampler::VerticalOrientation;

/// Turbo colormap: perceptually uniform rainbow (blue=near, red=far)
///
/// Based on: https://ai.googleblog.com/2019/08/turbo-improved-rainbow-colormap-for.html
/// Simplified version with polynomial approximation.
#[inline]
pub fn turbo(t: f32) -> [u8; 4] {
    let r = (0.13572138
        + t * (4.6153926 + t * (-42.66032 + t * (132.13108 + t * (-152.54825 + t * 59.28144)))))
        .clamp(0.0, 1.0);
    let g = (0.09140261
        + t * (2.19418 + t * (4.84296 + t * (-14.18503 + t * (4.27805 + t * 2.53377)))))
        .clamp(0.0, 1.0);
    let b = (0.1066733
        + t * (12.64194 + t * (-60.58204 + t * (109.99648 + t * (-82.52904 + t * 20.43388)))))
        .clamp(0.0, 1.0);
    [(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8, 255]
}

/// How the depth field is colored and oriented
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldStyle {
    pub range: DepthRange,
    pub colormap: Colormap,
    /// Number of color bands (0 = smooth ramp)
    pub bands: u32,
    /// Row order of the depth grid, shared with the target sampler so the
    /// reticle and the field agree on what is up
    pub orientation: VerticalOrientation,
}

impl Default for FieldStyle {
    fn default() -> Self {
        Self {
            range: DepthRange::default(),
            colormap: Colormap::default(),
            bands: 0,
            orientation: VerticalOrientation::default(),
        }
    }
}

impl FieldStyle {
    pub fn from_config(config: &Config) -> Self {
        Self {
            range: config.depth_range,
            colormap: config.colormap,
            bands: config.quantize_bands,
            orientation: config.vertical_orientation,
        }
    }

    /// Whether a raw reading gets a color at all
    #[inline]
    pub fn is_valid(depth_m: f32) -> bool {
        depth_m.is_finite() && depth_m > 0.0
    }

    /// Color of one reading
    pub fn color(&self, depth_m: f32) -> [u8; 4] {
        if !Self::is_valid(depth_m) {
            return INVALID_COLOR;
        }
        let mut t = self.range.normalize(depth_m);
        if self.bands > 0 {
            let bands = self.bands as f32;
            t = (t * bands).floor().min(bands - 1.0) / (bands - 1.0).max(1.0);
        }
        match self.colormap {
            Colormap::Grayscale => {
                let gray = ((1.0 - t) * 255.0) as u8;
                [gray, gray, gray, 255]
            }
            Colormap::Turbo => turbo(t),
        }
    }

    /// Grid row shown on image row `image_row` (row 0 at the top)
    #[inline]
    pub fn source_row(&self, image_row: u32, height: u32) -> u32 {
        match self.orientation {
            VerticalOrientation::Flipped => height - 1 - image_row,
            VerticalOrientation::Direct => image_row,
        }
    }
}

/// Convert a depth plane to a top-down RGBA image (4 bytes per pixel)
///
/// Reads honor the plane's stride; cells whose address falls outside the
/// allocated buffer render as invalid.
pub fn depth_to_rgba(plane: &DepthPlane, style: &FieldStyle) -> Vec<u8> {
    let (width, height) = plane.dimensions();
    let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
    let view = plane.lock();
    for image_row in 0..height {
        let row = style.source_row(image_row, height);
        for col in 0..width {
            let depth = view.read(row, col).unwrap_or(f32::NAN);
            rgba.extend_from_slice(&style.color(depth));
        }
    }
    rgba
}
