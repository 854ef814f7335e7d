// SPDX-License-Identifier: GPL-3.0-only

//! Target sampler: screen point to depth reading
//!
//! Maps a reticle position in screen space onto the depth grid, reads the
//! distance under it and grades it with the confidence grid. Every failure
//! is reported as [`DepthSample::Invalid`]; nothing here returns an error or
//! panics on malformed producer frames.
//!
//! Plane memory is locked only after the coordinate and address checks have
//! passed, and only for the single read.

use crate::backends::depth::{
    BufferCell, ConfidenceGrade, ConfidencePlane, DepthFrame, ScreenSize, ScreenTarget,
};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Row order of the depth grid relative to the screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VerticalOrientation {
    /// Screen y grows downward while grid rows run the other way
    /// (default sensor orientation)
    #[default]
    Flipped,
    /// Grid rows follow screen y
    Direct,
}

/// Why a sample was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Screen size is zero, negative or not finite
    DegenerateScreen,
    /// Target maps outside `[0, width) x [0, height)`
    OutOfBounds,
    /// Stride addressing runs past the allocated plane
    AddressOutOfExtent,
    /// Reading is NaN or infinite
    NonFinite,
    /// Reading is zero or negative
    NonPositive,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Rejection::DegenerateScreen => "no screen",
            Rejection::OutOfBounds => "off grid",
            Rejection::AddressOutOfExtent => "outside buffer",
            Rejection::NonFinite => "no return",
            Rejection::NonPositive => "non-positive",
        };
        write!(f, "{}", text)
    }
}

/// An accepted depth reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthReading {
    /// Distance from the device in meters, finite and > 0
    pub distance_m: f32,
    pub grade: ConfidenceGrade,
    /// Grid cell the reading came from
    pub cell: BufferCell,
}

/// Result of sampling one frame at one target
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DepthSample {
    Valid(DepthReading),
    Invalid(Rejection),
}

impl DepthSample {
    pub fn is_valid(&self) -> bool {
        matches!(self, DepthSample::Valid(_))
    }

    pub fn reading(&self) -> Option<&DepthReading> {
        match self {
            DepthSample::Valid(reading) => Some(reading),
            DepthSample::Invalid(_) => None,
        }
    }

    pub fn distance_m(&self) -> Option<f32> {
        self.reading().map(|r| r.distance_m)
    }

    pub fn grade(&self) -> Option<ConfidenceGrade> {
        self.reading().map(|r| r.grade)
    }

    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            DepthSample::Valid(_) => None,
            DepthSample::Invalid(reason) => Some(*reason),
        }
    }
}

/// Map a screen target to a grid cell without clamping
///
/// `x = floor(target.x * width / screen.width)`; for the flipped orientation
/// `y = floor((1 - target.y / screen.height) * height)`, so `target.y == 0`
/// lands on row `height` and is rejected. Returns `None` for any index
/// outside the grid, including non-finite targets.
pub fn map_to_cell(
    target: ScreenTarget,
    screen: ScreenSize,
    width: u32,
    height: u32,
    orientation: VerticalOrientation,
) -> Option<BufferCell> {
    if !screen.is_valid() {
        return None;
    }
    let (w, h) = (f64::from(width), f64::from(height));

    let x = (target.x * w / screen.width).floor();
    let y = match orientation {
        VerticalOrientation::Flipped => ((1.0 - target.y / screen.height) * h).floor(),
        VerticalOrientation::Direct => (target.y / screen.height * h).floor(),
    };

    // Written so that NaN fails the comparison
    if !(x >= 0.0 && x < w && y >= 0.0 && y < h) {
        return None;
    }
    Some(BufferCell::new(x as u32, y as u32))
}

/// Samples the depth grid under a screen target
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetSampler {
    orientation: VerticalOrientation,
}

impl TargetSampler {
    pub fn new(orientation: VerticalOrientation) -> Self {
        Self { orientation }
    }

    pub fn orientation(&self) -> VerticalOrientation {
        self.orientation
    }

    /// Grid cell under `target` for a frame of the given size
    pub fn map(
        &self,
        target: ScreenTarget,
        screen: ScreenSize,
        frame: &DepthFrame,
    ) -> Option<BufferCell> {
        map_to_cell(target, screen, frame.width(), frame.height(), self.orientation)
    }

    /// Sample `frame` under `target`
    pub fn sample(
        &self,
        target: ScreenTarget,
        frame: &DepthFrame,
        screen: ScreenSize,
    ) -> DepthSample {
        if !screen.is_valid() {
            trace!(width = screen.width, height = screen.height, "Degenerate screen size");
            return DepthSample::Invalid(Rejection::DegenerateScreen);
        }

        let Some(cell) = self.map(target, screen, frame) else {
            trace!(
                x = target.x,
                y = target.y,
                seq = frame.sequence(),
                "Target outside depth grid"
            );
            return DepthSample::Invalid(Rejection::OutOfBounds);
        };

        let depth = frame.depth();
        let Some(offset) = depth.checked_offset(cell) else {
            trace!(?cell, stride = depth.stride(), "Depth address outside allocated plane");
            return DepthSample::Invalid(Rejection::AddressOutOfExtent);
        };

        let raw = {
            let view = depth.lock();
            view.read_at(offset)
        };
        let Some(distance_m) = raw else {
            return DepthSample::Invalid(Rejection::AddressOutOfExtent);
        };

        if !distance_m.is_finite() {
            trace!(?cell, "Non-finite depth reading");
            return DepthSample::Invalid(Rejection::NonFinite);
        }
        if distance_m <= 0.0 {
            trace!(?cell, distance_m, "Non-positive depth reading");
            return DepthSample::Invalid(Rejection::NonPositive);
        }

        let grade = frame
            .confidence()
            .map(|plane| grade_at(plane, cell))
            .unwrap_or_default();

        DepthSample::Valid(DepthReading {
            distance_m,
            grade,
            cell,
        })
    }
}

/// Confidence grade at `cell`; ungraded (`High`) when the address fails
fn grade_at(plane: &ConfidencePlane, cell: BufferCell) -> ConfidenceGrade {
    let Some(offset) = plane.checked_offset(cell) else {
        trace!(?cell, stride = plane.stride(), "Confidence address outside allocated plane");
        return ConfidenceGrade::default();
    };
    let code = {
        let view = plane.lock();
        view.read_at(offset)
    };
    code.map(ConfidenceGrade::from_code).unwrap_or_default()
}
