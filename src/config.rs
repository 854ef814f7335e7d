// SPDX-License-Identifier: GPL-3.0-only

use crate::constants::{
    APP_DIR_NAME, DEFAULT_HISTORY_CAPACITY, DEFAULT_SYNTHETIC_FPS, DEFAULT_VELOCITY_WINDOW,
    SENSOR_MAX_RANGE_M, SENSOR_MIN_RANGE_M,
};
use crate::display::DistanceUnit;
use crate::errors::{AppError, AppResult};
use crate::sampler::VerticalOrientation;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CONFIG_FILE_NAME: &str = "config.json";
const SNAPSHOT_FOLDER_NAME: &str = "Motion Visualizer";

/// Color ramp used for the depth field
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum Colormap {
    /// Turbo rainbow, blue near and red far
    #[default]
    Turbo,
    /// Bright near, dark far
    Grayscale,
}

impl Colormap {
    pub fn toggled(&self) -> Self {
        match self {
            Colormap::Turbo => Colormap::Grayscale,
            Colormap::Grayscale => Colormap::Turbo,
        }
    }
}

/// Distance range mapped onto the color ramp (meters)
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct DepthRange {
    pub min_m: f32,
    pub max_m: f32,
}

impl Default for DepthRange {
    fn default() -> Self {
        Self {
            min_m: SENSOR_MIN_RANGE_M,
            max_m: SENSOR_MAX_RANGE_M,
        }
    }
}

impl DepthRange {
    pub fn is_valid(&self) -> bool {
        self.min_m.is_finite() && self.max_m.is_finite() && self.min_m < self.max_m
    }

    /// Position of `distance_m` on the ramp, clamped to 0.0..=1.0
    pub fn normalize(&self, distance_m: f32) -> f32 {
        ((distance_m - self.min_m) / (self.max_m - self.min_m)).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Unit used by the distance readout
    pub unit: DistanceUnit,
    /// Row order of the sensor's depth grid relative to the screen
    pub vertical_orientation: VerticalOrientation,
    pub colormap: Colormap,
    pub depth_range: DepthRange,
    /// Number of color bands in the field view (0 = smooth ramp)
    pub quantize_bands: u32,
    /// Samples kept for the distance chart
    pub history_capacity: usize,
    /// Recent samples used for the velocity estimate
    pub velocity_window: usize,
    /// Frame rate of the synthetic producer
    pub synthetic_fps: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            unit: DistanceUnit::default(),
            vertical_orientation: VerticalOrientation::default(),
            colormap: Colormap::default(),
            depth_range: DepthRange::default(),
            quantize_bands: 0,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            velocity_window: DEFAULT_VELOCITY_WINDOW,
            synthetic_fps: DEFAULT_SYNTHETIC_FPS,
        }
    }
}

/// Where snapshots go when no output path is given
///
/// `<Pictures>/Motion Visualizer`, falling back to the home directory and
/// then the working directory.
pub fn default_snapshot_dir() -> PathBuf {
    dirs::picture_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(SNAPSHOT_FOLDER_NAME)
}

impl Config {
    /// Default location: `<config dir>/motion-visualizer/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load from the default location, falling back to defaults when there
    /// is no config directory or no file yet
    pub fn load() -> AppResult<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("No config directory available, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load from `path`; a missing file yields defaults
    pub fn load_from(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)
            .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), "Loaded config");
        Ok(config.sanitized())
    }

    /// Save to the default location
    pub fn save(&self) -> AppResult<PathBuf> {
        let path = Self::default_path()
            .ok_or_else(|| AppError::Storage("No config directory available".to_string()))?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save as pretty JSON, creating parent directories as needed
    pub fn save_to(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        debug!(path = %path.display(), "Saved config");
        Ok(())
    }

    /// Replace out-of-range values with defaults
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if !self.depth_range.is_valid() {
            warn!(
                min_m = self.depth_range.min_m,
                max_m = self.depth_range.max_m,
                "Invalid depth range in config, using default"
            );
            self.depth_range = defaults.depth_range;
        }
        if self.history_capacity == 0 {
            self.history_capacity = defaults.history_capacity;
        }
        if self.velocity_window < 2 {
            self.velocity_window = defaults.velocity_window;
        }
        if self.synthetic_fps == 0 {
            self.synthetic_fps = defaults.synthetic_fps;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("motion-visualizer-test-{}-{}", std::process::id(), name))
            .join(CONFIG_FILE_NAME)
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::load_from(&temp_path("missing")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("save");
        let config = Config {
            unit: DistanceUnit::Centimeters,
            colormap: Colormap::Grayscale,
            quantize_bands: 16,
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let path = temp_path("partial");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{ "unit": "Centimeters" }"#).unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.unit, DistanceUnit::Centimeters);
        assert_eq!(config.history_capacity, DEFAULT_HISTORY_CAPACITY);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let path = temp_path("malformed");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Config::load_from(&path), Err(AppError::Config(_))));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_sanitize_bad_range() {
        let config = Config {
            depth_range: DepthRange {
                min_m: 3.0,
                max_m: 1.0,
            },
            velocity_window: 1,
            ..Config::default()
        }
        .sanitized();
        assert_eq!(config.depth_range, DepthRange::default());
        assert_eq!(config.velocity_window, DEFAULT_VELOCITY_WINDOW);
    }

    #[test]
    fn test_range_normalize_clamps() {
        let range = DepthRange::default();
        assert_eq!(range.normalize(0.0), 0.0);
        assert_eq!(range.normalize(10.0), 1.0);
        assert!((range.normalize(2.6) - 0.5).abs() < 1e-6);
    }
}
