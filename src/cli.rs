// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for headless ranging
//!
//! This module provides command-line functionality for:
//! - Running a ranging session against the synthetic scene
//! - Saving a false-color snapshot of the depth field

use chrono::Local;
use motion_visualizer::backends::depth::{
    ScreenSize, ScreenTarget, SyntheticDepthSource, SyntheticScene,
};
use motion_visualizer::config::{Colormap, Config, default_snapshot_dir};
use motion_visualizer::display::DistanceUnit;
use motion_visualizer::sampler::TargetSampler;
use motion_visualizer::session::{RangingSession, SessionOptions};
use motion_visualizer::shaders::{FieldRenderer, FieldStyle, depth_to_rgba};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::warn;

/// Screen the headless commands pretend to draw on (portrait phone, points)
const SIMULATED_SCREEN: ScreenSize = ScreenSize {
    width: 390.0,
    height: 844.0,
};

fn load_config() -> Config {
    match Config::load() {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    }
}

/// Run a ranging session and print the readout until `duration` elapses
pub fn simulate(
    duration: u64,
    target: Option<(f64, f64)>,
    unit: Option<DistanceUnit>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config();
    let unit = unit.unwrap_or(config.unit);

    let scene = SyntheticScene {
        fps: config.synthetic_fps,
        ..SyntheticScene::default()
    };
    println!(
        "Synthetic depth source: {}x{} @ {} fps",
        scene.width, scene.height, scene.fps
    );

    let mut options = SessionOptions::from_config(&config, SIMULATED_SCREEN);
    options.target = target.map(|(x, y)| ScreenTarget::new(x, y));

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let mut session =
            RangingSession::start(Box::new(SyntheticDepthSource::new(scene)), options)?;
        let target = session.target();
        println!("Target: ({:.0}, {:.0})", target.x, target.y);
        println!();
        println!("Ranging... (press Ctrl+C to stop early)");

        // Set up Ctrl+C handler
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_flag_clone = stop_flag.clone();
        ctrlc::set_handler(move || {
            stop_flag_clone.store(true, Ordering::SeqCst);
        })?;

        let start = Instant::now();
        let target_duration = Duration::from_secs(duration);
        let mut readout = session.readout();

        while start.elapsed() < target_duration {
            if stop_flag.load(Ordering::SeqCst) {
                println!();
                println!("Stopping early...");
                break;
            }

            let _ = tokio::time::timeout(Duration::from_millis(100), readout.changed()).await;
            // Nothing renders the field here; release the frame
            drop(session.take_latest_frame());

            let snapshot = readout.borrow_and_update().clone();
            let velocity = snapshot
                .velocity_mps
                .map(|v| unit.format_velocity(v))
                .unwrap_or_else(|| "Velocity: --".to_string());
            let precision = snapshot.grade.map(|g| g.label()).unwrap_or("--");
            let marker = if snapshot.live { ' ' } else { '*' };
            print!(
                "\r{}{} | {} | precision: {:<6}",
                snapshot.distance_label(unit),
                marker,
                velocity,
                precision
            );
            std::io::Write::flush(&mut std::io::stdout())?;
        }
        println!();

        let summary = session.snapshot();
        session.stop().await;
        println!(
            "Frames sampled: {} accepted, {} rejected (* = holding last good reading)",
            summary.accepted, summary.rejected
        );
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

/// Output size of a `width x height` frame upscaled by `scale` (0 counts as 1)
fn scaled_size(width: u32, height: u32, scale: u32) -> Result<(u32, u32), String> {
    let scale = scale.max(1);
    match (width.checked_mul(scale), height.checked_mul(scale)) {
        (Some(w), Some(h)) => Ok((w, h)),
        _ => Err(format!("Scale {} is too large for a {}x{} frame", scale, width, height)),
    }
}

/// Render the synthetic scene at `time` seconds and save it as PNG
pub fn snapshot(
    output: Option<PathBuf>,
    time: f32,
    scale: u32,
    grayscale: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config();
    let mut style = FieldStyle::from_config(&config);
    if grayscale {
        style.colormap = Colormap::Grayscale;
    }

    let scene = SyntheticScene::default();
    let frame = scene.render(0, time)?;
    let (width, height) = scaled_size(frame.width(), frame.height(), scale)?;

    let sampler = TargetSampler::new(config.vertical_orientation);
    let center = sampler.sample(SIMULATED_SCREEN.center(), &frame, SIMULATED_SCREEN);
    match center.reading() {
        Some(reading) => println!(
            "Center: {} ({} precision)",
            config.unit.format_distance(reading.distance_m),
            reading.grade
        ),
        None => println!("Center: no valid reading"),
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let rgba = runtime.block_on(async {
        match FieldRenderer::new_offscreen(style).await {
            Ok(mut renderer) => renderer
                .render_to_rgba(&frame, width, height)
                .await
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error>),
            Err(e) if e.is_fatal() => {
                warn!(error = %e, "GPU unavailable, using CPU colormap");
                println!("GPU unavailable ({}), using CPU colormap", e);
                let rgba = depth_to_rgba(frame.depth(), &style);
                let img: image::RgbaImage =
                    image::ImageBuffer::from_raw(frame.width(), frame.height(), rgba)
                        .ok_or("Failed to create image")?;
                Ok(image::imageops::resize(
                    &img,
                    width,
                    height,
                    image::imageops::FilterType::Nearest,
                )
                .into_raw())
            }
            Err(e) => Err(Box::new(e) as Box<dyn std::error::Error>),
        }
    })?;

    let img: image::RgbaImage =
        image::ImageBuffer::from_raw(width, height, rgba).ok_or("Failed to create image")?;

    let output_path = match output {
        Some(path) => path,
        None => {
            let dir = default_snapshot_dir();
            std::fs::create_dir_all(&dir)?;
            let timestamp = Local::now().format("%Y%m%d_%H%M%S");
            dir.join(format!("DEPTH_{}.png", timestamp))
        }
    };

    img.save(&output_path)?;
    println!("Snapshot saved: {}", output_path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_size() {
        assert_eq!(scaled_size(256, 192, 2), Ok((512, 384)));
        assert_eq!(scaled_size(256, 192, 0), Ok((256, 192)));
    }

    #[test]
    fn test_scaled_size_overflow_is_an_error() {
        assert!(scaled_size(256, 192, u32::MAX).is_err());
        assert!(scaled_size(1, 192, u32::MAX / 100).is_err());
    }
}
