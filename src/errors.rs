// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the depth ranging application
//!
//! Per-frame conditions (a target outside the depth grid, a NaN reading, a
//! missing drawable) are not errors: the sampler and renderer report them as
//! values. The types here cover construction-time and lifecycle failures only.

use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Main application error type
#[derive(Debug, Clone)]
pub enum AppError {
    /// Depth frame construction errors
    Frame(FrameError),
    /// Frame producer errors
    Source(SourceError),
    /// Field renderer errors
    Render(RenderError),
    /// Configuration errors
    Config(String),
    /// Storage/filesystem errors
    Storage(String),
    /// Generic error with message
    Other(String),
}

/// Errors raised while assembling a depth frame from raw planes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Row stride is smaller than one tightly packed row
    StrideTooSmall { stride: usize, min: usize },
    /// Backing buffer cannot hold the values handed to the constructor
    BufferTooSmall { len: usize, required: usize },
    /// Confidence grid dimensions differ from the depth grid
    DimensionMismatch {
        depth: (u32, u32),
        confidence: (u32, u32),
    },
    /// Width or height is zero
    EmptyFrame,
}

/// Frame producer errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Source was started twice
    AlreadyRunning,
    /// Frames were requested from a stopped source
    NotRunning,
    /// The producing side went away
    Disconnected,
    /// Producer could not be started
    StartFailed(String),
    /// Producing a frame failed after a successful start
    FrameFailed(String),
}

/// Field renderer errors
#[derive(Debug, Clone)]
pub enum RenderError {
    /// No GPU adapter is available
    NoAdapter,
    /// Device could not be created from the adapter
    DeviceCreation(String),
    /// Shader or pipeline construction failed (fatal for the session)
    PipelineCreation(String),
    /// Requested output has no pixels
    EmptyFrame,
    /// Frame exceeds the device's texture size limit
    FrameTooLarge { width: u32, height: u32, max: u32 },
    /// GPU to CPU readback failed
    Readback(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Frame(e) => write!(f, "Frame error: {}", e),
            AppError::Source(e) => write!(f, "Source error: {}", e),
            AppError::Render(e) => write!(f, "Render error: {}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::StrideTooSmall { stride, min } => {
                write!(f, "Row stride {} is smaller than packed row size {}", stride, min)
            }
            FrameError::BufferTooSmall { len, required } => {
                write!(f, "Buffer holds {} bytes, {} required", len, required)
            }
            FrameError::DimensionMismatch { depth, confidence } => write!(
                f,
                "Confidence grid {}x{} does not match depth grid {}x{}",
                confidence.0, confidence.1, depth.0, depth.1
            ),
            FrameError::EmptyFrame => write!(f, "Frame has zero width or height"),
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::AlreadyRunning => write!(f, "Source is already running"),
            SourceError::NotRunning => write!(f, "Source is not running"),
            SourceError::Disconnected => write!(f, "Frame producer disconnected"),
            SourceError::StartFailed(msg) => write!(f, "Failed to start source: {}", msg),
            SourceError::FrameFailed(msg) => write!(f, "Failed to produce frame: {}", msg),
        }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::NoAdapter => write!(f, "No suitable GPU adapter found"),
            RenderError::DeviceCreation(msg) => write!(f, "Failed to create GPU device: {}", msg),
            RenderError::PipelineCreation(msg) => {
                write!(f, "Failed to build depth field pipeline: {}", msg)
            }
            RenderError::EmptyFrame => write!(f, "Output has no pixels to render"),
            RenderError::FrameTooLarge { width, height, max } => write!(
                f,
                "Frame {}x{} exceeds the GPU texture limit of {}",
                width, height, max
            ),
            RenderError::Readback(msg) => write!(f, "Readback failed: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for FrameError {}
impl std::error::Error for SourceError {}
impl std::error::Error for RenderError {}

impl RenderError {
    /// Whether the error disables field rendering for the rest of the session
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RenderError::NoAdapter
                | RenderError::DeviceCreation(_)
                | RenderError::PipelineCreation(_)
        )
    }
}

impl From<FrameError> for AppError {
    fn from(err: FrameError) -> Self {
        AppError::Frame(err)
    }
}

impl From<SourceError> for AppError {
    fn from(err: SourceError) -> Self {
        AppError::Source(err)
    }
}

impl From<RenderError> for AppError {
    fn from(err: RenderError) -> Self {
        AppError::Render(err)
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<image::ImageError> for AppError {
    fn from(err: image::ImageError) -> Self {
        AppError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_error_fatality() {
        assert!(RenderError::PipelineCreation("bad shader".into()).is_fatal());
        assert!(RenderError::NoAdapter.is_fatal());
        assert!(!RenderError::EmptyFrame.is_fatal());
        assert!(!RenderError::Readback("timeout".into()).is_fatal());
    }

    #[test]
    fn test_frame_error_display() {
        let err = FrameError::DimensionMismatch {
            depth: (256, 192),
            confidence: (128, 96),
        };
        assert_eq!(
            err.to_string(),
            "Confidence grid 128x96 does not match depth grid 256x192"
        );
        let app: AppError = err.into();
        assert!(app.to_string().starts_with("Frame error:"));
    }

    #[test]
    fn test_frame_failure_is_not_a_start_failure() {
        let err = SourceError::FrameFailed("Frame has no pixels".into());
        assert_eq!(err.to_string(), "Failed to produce frame: Frame has no pixels");
        assert!(!matches!(err, SourceError::StartFailed(_)));
    }
}
