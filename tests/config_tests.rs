// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use motion_visualizer::Config;
use motion_visualizer::config::{Colormap, DepthRange};
use motion_visualizer::display::DistanceUnit;
use motion_visualizer::sampler::VerticalOrientation;

#[test]
fn test_config_default() {
    let config = Config::default();

    assert_eq!(config.unit, DistanceUnit::Meters);
    assert_eq!(
        config.vertical_orientation,
        VerticalOrientation::Flipped,
        "Sensor grids are bottom-up by default"
    );
    assert_eq!(config.colormap, Colormap::Turbo);
    assert!(config.depth_range.is_valid());
    assert!(config.velocity_window >= 2);
}

#[test]
fn test_partial_json_fills_defaults() {
    let config: Config = serde_json::from_str(r#"{ "unit": "Centimeters" }"#).unwrap();
    assert_eq!(config.unit, DistanceUnit::Centimeters);
    assert_eq!(config.history_capacity, Config::default().history_capacity);
}

#[test]
fn test_sanitized_repairs_bad_values() {
    let config = Config {
        depth_range: DepthRange {
            min_m: 3.0,
            max_m: 1.0,
        },
        history_capacity: 0,
        velocity_window: 1,
        synthetic_fps: 0,
        ..Config::default()
    }
    .sanitized();

    let defaults = Config::default();
    assert_eq!(config.depth_range, defaults.depth_range);
    assert_eq!(config.history_capacity, defaults.history_capacity);
    assert_eq!(config.velocity_window, defaults.velocity_window);
    assert_eq!(config.synthetic_fps, defaults.synthetic_fps);
}

#[test]
fn test_malformed_file_is_an_error() {
    let dir = std::env::temp_dir().join(format!(
        "motion-visualizer-it-{}-malformed",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("config.json");
    std::fs::write(&path, "{ not json").unwrap();

    assert!(Config::load_from(&path).is_err());
    let _ = std::fs::remove_dir_all(&dir);
}
