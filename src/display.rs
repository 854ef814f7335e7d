// SPDX-License-Identifier: GPL-3.0-only

//! Presentation-facing ranging state
//!
//! Samples arrive here as [`SampleUpdate`]s, in frame order, on a single
//! update context. [`RangeReadout`] keeps the last good distance on screen
//! while invalid samples stream past, and [`DistanceHistory`] feeds the
//! chart and the velocity estimate.

use crate::backends::depth::ConfidenceGrade;
use crate::constants::{DEFAULT_HISTORY_CAPACITY, DEFAULT_VELOCITY_WINDOW};
use crate::sampler::{DepthSample, Rejection};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;

/// Unit used to present distances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistanceUnit {
    #[default]
    Meters,
    Centimeters,
}

impl DistanceUnit {
    /// Convert a distance in meters into this unit
    pub fn convert(&self, meters: f32) -> f32 {
        match self {
            DistanceUnit::Meters => meters,
            DistanceUnit::Centimeters => meters * 100.0,
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            DistanceUnit::Meters => "m",
            DistanceUnit::Centimeters => "cm",
        }
    }

    /// The other unit
    pub fn toggled(&self) -> Self {
        match self {
            DistanceUnit::Meters => DistanceUnit::Centimeters,
            DistanceUnit::Centimeters => DistanceUnit::Meters,
        }
    }

    fn decimals(&self) -> usize {
        match self {
            DistanceUnit::Meters => 2,
            DistanceUnit::Centimeters => 1,
        }
    }

    /// Format a value in this unit, e.g. `2.50 m` or `250.0 cm`
    pub fn format_value(&self, meters: f32) -> String {
        format!(
            "{:.*} {}",
            self.decimals(),
            self.convert(meters),
            self.suffix()
        )
    }

    /// Readout line, e.g. `Distance: 2.50 m`
    pub fn format_distance(&self, meters: f32) -> String {
        format!("Distance: {}", self.format_value(meters))
    }

    /// Velocity line, e.g. `Velocity: -0.12 m/s`
    pub fn format_velocity(&self, meters_per_second: f32) -> String {
        format!(
            "Velocity: {:+.*} {}/s",
            self.decimals(),
            self.convert(meters_per_second),
            self.suffix()
        )
    }
}

impl std::fmt::Display for DistanceUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Display color of a confidence grade as RGB
///
/// High precision reads white, medium yellow, low red.
pub fn grade_color(grade: ConfidenceGrade) -> [u8; 3] {
    match grade {
        ConfidenceGrade::High => [255, 255, 255],
        ConfidenceGrade::Medium => [255, 214, 0],
        ConfidenceGrade::Low => [255, 59, 48],
    }
}

/// One sampler result, tagged with the frame it came from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleUpdate {
    pub sequence: u64,
    pub captured_at: Instant,
    pub sample: DepthSample,
}

/// Result of applying a [`SampleUpdate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Displayed distance and grade replaced
    Updated,
    /// Sample invalid; previous values kept
    Retained(Rejection),
    /// Update older than one already applied; dropped
    Stale,
}

/// A chart point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryPoint {
    /// Seconds since the first accepted sample
    pub t_s: f64,
    pub distance_m: f32,
    pub grade: ConfidenceGrade,
}

/// Bounded time series of accepted distances
#[derive(Debug, Clone)]
pub struct DistanceHistory {
    points: VecDeque<HistoryPoint>,
    capacity: usize,
    velocity_window: usize,
}

impl DistanceHistory {
    pub fn new(capacity: usize, velocity_window: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
            velocity_window: velocity_window.max(2),
        }
    }

    /// Append a point, evicting the oldest one when full
    pub fn push(&mut self, point: HistoryPoint) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&HistoryPoint> {
        self.points.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryPoint> {
        self.points.iter()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Least-squares slope of distance over time across the recent window
    ///
    /// Positive values mean the target is moving away. `None` until two
    /// points with distinct timestamps exist.
    pub fn velocity_mps(&self) -> Option<f32> {
        let n = self.points.len().min(self.velocity_window);
        if n < 2 {
            return None;
        }
        let window = self.points.iter().skip(self.points.len() - n);
        let (sum_t, sum_d) = window
            .clone()
            .fold((0.0f64, 0.0f64), |(st, sd), p| {
                (st + p.t_s, sd + f64::from(p.distance_m))
            });
        let mean_t = sum_t / n as f64;
        let mean_d = sum_d / n as f64;

        let (num, den) = window.fold((0.0f64, 0.0f64), |(num, den), p| {
            let dt = p.t_s - mean_t;
            (num + dt * (f64::from(p.distance_m) - mean_d), den + dt * dt)
        });
        if den <= f64::EPSILON {
            return None;
        }
        Some((num / den) as f32)
    }
}

impl Default for DistanceHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY, DEFAULT_VELOCITY_WINDOW)
    }
}

/// Copy of the readout handed to presentation code
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadoutSnapshot {
    /// Sequence of the last applied update
    pub sequence: Option<u64>,
    /// Last good distance, kept across invalid samples
    pub distance_m: Option<f32>,
    pub grade: Option<ConfidenceGrade>,
    /// Whether the most recent sample was valid
    pub live: bool,
    /// Why the most recent sample was rejected
    pub last_rejection: Option<Rejection>,
    pub velocity_mps: Option<f32>,
    pub accepted: u64,
    pub rejected: u64,
    pub history: Vec<HistoryPoint>,
}

impl ReadoutSnapshot {
    /// Readout line in `unit`, or a placeholder before the first good sample
    pub fn distance_label(&self, unit: DistanceUnit) -> String {
        match self.distance_m {
            Some(d) => unit.format_distance(d),
            None => "Distance: --".to_string(),
        }
    }
}

/// Displayed ranging state
#[derive(Debug, Clone, Default)]
pub struct RangeReadout {
    distance_m: Option<f32>,
    grade: Option<ConfidenceGrade>,
    last_sequence: Option<u64>,
    live: bool,
    last_rejection: Option<Rejection>,
    accepted: u64,
    rejected: u64,
    stale: u64,
    origin: Option<Instant>,
    history: DistanceHistory,
}

impl RangeReadout {
    pub fn new(history: DistanceHistory) -> Self {
        Self {
            history,
            ..Self::default()
        }
    }

    /// Apply one update
    ///
    /// Updates must arrive in frame order; anything not newer than the last
    /// applied sequence is dropped so a late update can never overwrite a
    /// newer reading.
    pub fn apply(&mut self, update: &SampleUpdate) -> ApplyOutcome {
        if self.last_sequence.is_some_and(|last| update.sequence <= last) {
            self.stale += 1;
            return ApplyOutcome::Stale;
        }
        self.last_sequence = Some(update.sequence);

        match update.sample {
            DepthSample::Valid(reading) => {
                self.distance_m = Some(reading.distance_m);
                self.grade = Some(reading.grade);
                self.live = true;
                self.last_rejection = None;
                self.accepted += 1;

                let origin = *self.origin.get_or_insert(update.captured_at);
                let t_s = update
                    .captured_at
                    .saturating_duration_since(origin)
                    .as_secs_f64();
                self.history.push(HistoryPoint {
                    t_s,
                    distance_m: reading.distance_m,
                    grade: reading.grade,
                });
                ApplyOutcome::Updated
            }
            DepthSample::Invalid(rejection) => {
                self.live = false;
                self.last_rejection = Some(rejection);
                self.rejected += 1;
                ApplyOutcome::Retained(rejection)
            }
        }
    }

    pub fn distance_m(&self) -> Option<f32> {
        self.distance_m
    }

    pub fn grade(&self) -> Option<ConfidenceGrade> {
        self.grade
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    /// Updates dropped for arriving out of order
    pub fn stale_updates(&self) -> u64 {
        self.stale
    }

    pub fn history(&self) -> &DistanceHistory {
        &self.history
    }

    pub fn snapshot(&self) -> ReadoutSnapshot {
        ReadoutSnapshot {
            sequence: self.last_sequence,
            distance_m: self.distance_m,
            grade: self.grade,
            live: self.live,
            last_rejection: self.last_rejection,
            velocity_mps: self.history.velocity_mps(),
            accepted: self.accepted,
            rejected: self.rejected,
            history: self.history.iter().copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::depth::BufferCell;
    use crate::sampler::DepthReading;
    use std::time::Duration;

    fn valid(sequence: u64, at: Instant, distance_m: f32, grade: ConfidenceGrade) -> SampleUpdate {
        SampleUpdate {
            sequence,
            captured_at: at,
            sample: DepthSample::Valid(DepthReading {
                distance_m,
                grade,
                cell: BufferCell::new(0, 0),
            }),
        }
    }

    fn invalid(sequence: u64, at: Instant, rejection: Rejection) -> SampleUpdate {
        SampleUpdate {
            sequence,
            captured_at: at,
            sample: DepthSample::Invalid(rejection),
        }
    }

    #[test]
    fn test_unit_formatting() {
        assert_eq!(DistanceUnit::Meters.format_distance(2.5), "Distance: 2.50 m");
        assert_eq!(
            DistanceUnit::Centimeters.format_distance(2.5),
            "Distance: 250.0 cm"
        );
        assert_eq!(
            DistanceUnit::Meters.format_velocity(-0.25),
            "Velocity: -0.25 m/s"
        );
        assert_eq!(DistanceUnit::Meters.toggled(), DistanceUnit::Centimeters);
    }

    #[test]
    fn test_grade_colors_are_distinct() {
        assert_eq!(grade_color(ConfidenceGrade::High), [255, 255, 255]);
        assert_ne!(
            grade_color(ConfidenceGrade::Medium),
            grade_color(ConfidenceGrade::Low)
        );
    }

    #[test]
    fn test_invalid_sample_retains_previous_value() {
        let t0 = Instant::now();
        let mut readout = RangeReadout::default();
        assert_eq!(
            readout.apply(&valid(1, t0, 1.75, ConfidenceGrade::Medium)),
            ApplyOutcome::Updated
        );
        for (seq, rejection) in [
            (2, Rejection::NonFinite),
            (3, Rejection::NonPositive),
            (4, Rejection::OutOfBounds),
        ] {
            assert_eq!(
                readout.apply(&invalid(seq, t0, rejection)),
                ApplyOutcome::Retained(rejection)
            );
            assert_eq!(readout.distance_m(), Some(1.75));
            assert_eq!(readout.grade(), Some(ConfidenceGrade::Medium));
        }
        let snapshot = readout.snapshot();
        assert!(!snapshot.live);
        assert_eq!(snapshot.rejected, 3);
        assert_eq!(snapshot.history.len(), 1);
    }

    #[test]
    fn test_stale_update_never_overwrites_newer() {
        let t0 = Instant::now();
        let mut readout = RangeReadout::default();
        readout.apply(&valid(5, t0, 3.0, ConfidenceGrade::High));
        assert_eq!(
            readout.apply(&valid(4, t0, 1.0, ConfidenceGrade::Low)),
            ApplyOutcome::Stale
        );
        assert_eq!(
            readout.apply(&valid(5, t0, 1.0, ConfidenceGrade::Low)),
            ApplyOutcome::Stale
        );
        assert_eq!(readout.distance_m(), Some(3.0));
        assert_eq!(readout.stale_updates(), 2);
        assert_eq!(readout.last_sequence(), Some(5));
    }

    #[test]
    fn test_placeholder_before_first_reading() {
        let mut readout = RangeReadout::default();
        readout.apply(&invalid(0, Instant::now(), Rejection::OutOfBounds));
        assert_eq!(
            readout.snapshot().distance_label(DistanceUnit::Meters),
            "Distance: --"
        );
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = DistanceHistory::new(3, 8);
        for i in 0..5 {
            history.push(HistoryPoint {
                t_s: f64::from(i),
                distance_m: i as f32,
                grade: ConfidenceGrade::High,
            });
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.iter().next().map(|p| p.distance_m), Some(2.0));
        assert_eq!(history.latest().map(|p| p.distance_m), Some(4.0));
    }

    #[test]
    fn test_velocity_is_linear_slope() {
        let t0 = Instant::now();
        let mut readout = RangeReadout::new(DistanceHistory::new(100, 4));
        // Receding at 0.5 m/s, sampled every 100 ms
        for i in 0..10u64 {
            let at = t0 + Duration::from_millis(100 * i);
            readout.apply(&valid(i, at, 1.0 + 0.05 * i as f32, ConfidenceGrade::High));
        }
        let velocity = readout.history().velocity_mps().unwrap();
        assert!((velocity - 0.5).abs() < 1e-3, "velocity {velocity}");
    }

    #[test]
    fn test_velocity_needs_two_distinct_times() {
        let mut history = DistanceHistory::new(10, 8);
        assert!(history.velocity_mps().is_none());
        let point = HistoryPoint {
            t_s: 1.0,
            distance_m: 2.0,
            grade: ConfidenceGrade::High,
        };
        history.push(point);
        assert!(history.velocity_mps().is_none());
        history.push(point);
        assert!(history.velocity_mps().is_none());
    }
}
