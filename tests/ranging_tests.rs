// SPDX-License-Identifier: GPL-3.0-only

//! End-to-end tests: frames in, readout and depth field out

use motion_visualizer::backends::depth::{
    ChannelDepthSource, ConfidencePlane, DepthPlane, SyntheticDepthSource, SyntheticScene,
};
use motion_visualizer::config::Colormap;
use motion_visualizer::sampler::Rejection;
use motion_visualizer::session::SessionOptions;
use motion_visualizer::shaders::{FieldStyle, depth_to_rgba};
use motion_visualizer::{
    ConfidenceGrade, DepthFrame, RangingSession, ScreenSize, ScreenTarget, TargetSampler,
    VerticalOrientation,
};
use std::time::Duration;

fn uniform_frame(sequence: u64, depth: f32, confidence: u8) -> DepthFrame {
    let depth = DepthPlane::packed(4, 4, &[depth; 16]).unwrap();
    let confidence = ConfidencePlane::packed(4, 4, &[confidence; 16]).unwrap();
    DepthFrame::new(sequence, depth, Some(confidence)).unwrap()
}

#[test]
fn test_screen_center_of_uniform_frame() {
    let frame = uniform_frame(1, 2.5, 2);
    let sampler = TargetSampler::new(VerticalOrientation::Flipped);
    let sample = sampler.sample(
        ScreenTarget::new(200.0, 200.0),
        &frame,
        ScreenSize::new(400.0, 400.0),
    );

    let reading = sample.reading().unwrap();
    assert_eq!(reading.distance_m, 2.5);
    assert_eq!(reading.grade, ConfidenceGrade::High);
    assert_eq!((reading.cell.x, reading.cell.y), (2, 2));
}

#[test]
fn test_no_clamping_past_screen_edge() {
    let frame = uniform_frame(1, 2.5, 2);
    let sampler = TargetSampler::new(VerticalOrientation::Flipped);
    let sample = sampler.sample(
        ScreenTarget::new(401.0, 200.0),
        &frame,
        ScreenSize::new(400.0, 400.0),
    );
    assert_eq!(sample.rejection(), Some(Rejection::OutOfBounds));
}

#[test]
fn test_flip_boundary_rows() {
    let depth = DepthPlane::packed(100, 200, &vec![1.0; 100 * 200]).unwrap();
    let frame = DepthFrame::new(1, depth, None).unwrap();
    let screen = ScreenSize::new(1000.0, 2000.0);
    let sampler = TargetSampler::new(VerticalOrientation::Flipped);

    // Row index 200 is outside [0, 200)
    assert_eq!(
        sampler
            .sample(ScreenTarget::new(500.0, 0.0), &frame, screen)
            .rejection(),
        Some(Rejection::OutOfBounds)
    );

    let bottom = sampler.map(ScreenTarget::new(500.0, 2000.0), screen, &frame);
    assert_eq!(bottom.map(|c| c.y), Some(0));
    let near_top = sampler.map(ScreenTarget::new(500.0, 1.0), screen, &frame);
    assert_eq!(near_top.map(|c| c.y), Some(199));
}

#[test]
fn test_field_and_sampler_agree_on_orientation() {
    // Distance grows with the grid row so every row has its own color
    let (width, height) = (8u32, 6u32);
    let values: Vec<f32> = (0..height)
        .flat_map(|row| (0..width).map(move |_| 0.5 + row as f32 * 0.5))
        .collect();
    let depth = DepthPlane::packed(width, height, &values).unwrap();
    let frame = DepthFrame::new(1, depth, None).unwrap();

    for orientation in [VerticalOrientation::Flipped, VerticalOrientation::Direct] {
        let style = FieldStyle {
            orientation,
            ..FieldStyle::default()
        };
        let rgba = depth_to_rgba(frame.depth(), &style);

        // A screen the same size as the image, one point per pixel
        let screen = ScreenSize::new(f64::from(width), f64::from(height));
        let sampler = TargetSampler::new(orientation);
        for image_row in 0..height {
            let target = ScreenTarget::new(3.5, f64::from(image_row) + 0.5);
            let distance = sampler.sample(target, &frame, screen).distance_m().unwrap();

            let idx = ((image_row * width + 3) * 4) as usize;
            assert_eq!(
                &rgba[idx..idx + 4],
                &style.color(distance),
                "{:?}: image row {} shows a different cell than the reticle reads",
                orientation,
                image_row
            );
        }
    }
}

#[test]
fn test_synthetic_scene_draws_floor_at_the_bottom() {
    let scene = SyntheticScene {
        wall_distance_m: 4.0,
        wall_swing_m: 0.0,
        ..SyntheticScene::default()
    };
    let frame = scene.render(0, 0.0).unwrap();
    // Grayscale: bright is near
    let style = FieldStyle {
        colormap: Colormap::Grayscale,
        ..FieldStyle::default()
    };
    let rgba = depth_to_rgba(frame.depth(), &style);

    let width = frame.width() as usize;
    let row_mean = |image_row: usize| {
        let row = &rgba[image_row * width * 4..(image_row + 1) * width * 4];
        row.chunks_exact(4).map(|px| f64::from(px[0])).sum::<f64>() / width as f64
    };
    let top = row_mean(0);
    let bottom = row_mean(frame.height() as usize - 1);
    assert!(
        bottom > top + 100.0,
        "floor should be drawn at the bottom: top={} bottom={}",
        top,
        bottom
    );

    // The reticle agrees: the wall at the top of the screen, the floor at the bottom
    let screen = ScreenSize::new(390.0, 844.0);
    let sampler = TargetSampler::new(VerticalOrientation::default());
    let first_valid = |y: f64| {
        (0..40)
            .filter_map(|i| {
                let target = ScreenTarget::new(100.0 + f64::from(i) * 5.0, y);
                sampler.sample(target, &frame, screen).distance_m()
            })
            .next()
    };
    assert_eq!(first_valid(2.0), Some(4.0));
    let floor = first_valid(843.0).unwrap();
    assert!(floor < 1.5, "bottom of the screen reads {}", floor);
}

#[tokio::test]
async fn test_invalid_frames_hold_previous_distance() {
    let (sender, source) = ChannelDepthSource::new();
    let options = SessionOptions {
        orientation: VerticalOrientation::Flipped,
        screen: ScreenSize::new(400.0, 400.0),
        target: None,
        history_capacity: 16,
        velocity_window: 4,
    };
    let mut session = RangingSession::start(Box::new(source), options).unwrap();
    let mut readout = session.readout();

    sender.send(uniform_frame(1, 2.0, 0)).unwrap();
    sender.send(uniform_frame(2, 0.0, 2)).unwrap();

    let snapshot = tokio::time::timeout(
        Duration::from_secs(5),
        readout.wait_for(|s| s.sequence == Some(2)),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();

    // Frame 1 may have been superseded before sampling; either way 0.0 never shows
    assert_ne!(snapshot.distance_m, Some(0.0));
    assert_eq!(snapshot.last_rejection, Some(Rejection::NonPositive));
    assert!(!snapshot.live);

    session.stop().await;
    assert!(!session.is_running());
}

#[tokio::test]
async fn test_synthetic_session_produces_readings() {
    let scene = SyntheticScene {
        fps: 120,
        ..SyntheticScene::default()
    };
    let options = SessionOptions {
        orientation: VerticalOrientation::Flipped,
        screen: ScreenSize::new(390.0, 844.0),
        target: None,
        history_capacity: 64,
        velocity_window: 4,
    };
    let mut session =
        RangingSession::start(Box::new(SyntheticDepthSource::new(scene)), options).unwrap();
    let mut readout = session.readout();

    let snapshot = tokio::time::timeout(
        Duration::from_secs(5),
        readout.wait_for(|s| s.accepted >= 5),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();

    let distance = snapshot.distance_m.unwrap();
    assert!(distance.is_finite() && distance > 0.0);
    assert!(!snapshot.history.is_empty());

    session.stop().await;
}
