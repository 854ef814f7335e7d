// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for depth frame producers and consumers
//!
//! A [`DepthFrame`] carries a depth plane (one `f32` meters value per pixel)
//! and an optional confidence plane (one byte per pixel). Both are addressed
//! through their row stride, which may be larger than a tightly packed row.
//! Plane memory is only readable through a scoped [`PlaneView`], mirroring
//! the lock/unlock bracket platform pixel buffers require.

use crate::errors::FrameError;
use bytemuck::Pod;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::Instant;

/// Backing memory of one plane
///
/// The byte length is fixed at creation. Producers may refill the bytes in
/// place (buffer recycling); readers go through [`PlaneBuffer::lock`].
pub struct PlaneBuffer {
    bytes: RwLock<Box<[u8]>>,
    len: usize,
    lock_count: AtomicU64,
}

impl PlaneBuffer {
    /// Wrap an owned byte buffer
    pub fn new(bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        Self {
            bytes: RwLock::new(bytes.into_boxed_slice()),
            len,
            lock_count: AtomicU64::new(0),
        }
    }

    /// Allocate a zero-filled buffer
    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![0u8; len])
    }

    /// Allocated length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Acquire the read lock for the lifetime of the returned guard
    pub fn lock(&self) -> PlaneGuard<'_> {
        self.lock_count.fetch_add(1, Ordering::Relaxed);
        // Plane bytes carry no invariants a panicking writer could break
        let bytes = self.bytes.read().unwrap_or_else(|e| e.into_inner());
        PlaneGuard { bytes }
    }

    /// Number of read locks taken so far
    pub fn lock_count(&self) -> u64 {
        self.lock_count.load(Ordering::Relaxed)
    }

    /// Rewrite the bytes in place under the write lock
    pub fn fill_with<R>(&self, fill: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut bytes = self.bytes.write().unwrap_or_else(|e| e.into_inner());
        fill(&mut bytes[..])
    }
}

impl std::fmt::Debug for PlaneBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PlaneBuffer({} bytes)", self.len)
    }
}

/// Read lock over a plane's bytes, released on drop
pub struct PlaneGuard<'a> {
    bytes: RwLockReadGuard<'a, Box<[u8]>>,
}

impl Deref for PlaneGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes[..]
    }
}

/// A cell of a depth or confidence grid (column `x`, row `y`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferCell {
    pub x: u32,
    pub y: u32,
}

impl BufferCell {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// A 2D grid of `T` values addressed through a row stride in bytes
pub struct Plane<T> {
    width: u32,
    height: u32,
    stride: usize,
    buffer: Arc<PlaneBuffer>,
    _element: PhantomData<T>,
}

/// Depth plane: meters per pixel
pub type DepthPlane = Plane<f32>;

/// Confidence plane: one [`ConfidenceGrade`] code per pixel
pub type ConfidencePlane = Plane<u8>;

impl<T> Clone for Plane<T> {
    fn clone(&self) -> Self {
        Self {
            width: self.width,
            height: self.height,
            stride: self.stride,
            buffer: Arc::clone(&self.buffer),
            _element: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Plane<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plane")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("buffer", &self.buffer)
            .finish()
    }
}

impl<T: Pod> Plane<T> {
    /// Size of one element in bytes
    pub const ELEMENT_SIZE: usize = std::mem::size_of::<T>();

    /// Wrap producer memory as-is
    ///
    /// No layout validation happens here: producer strides and buffer sizes
    /// are untrusted and every read re-checks its address.
    pub fn from_raw(width: u32, height: u32, stride: usize, buffer: Arc<PlaneBuffer>) -> Self {
        Self {
            width,
            height,
            stride,
            buffer,
            _element: PhantomData,
        }
    }

    /// Build a plane from row-major values, padding each row out to `stride`
    pub fn from_values(
        width: u32,
        height: u32,
        stride: usize,
        values: &[T],
    ) -> Result<Self, FrameError> {
        let row_bytes = width as usize * Self::ELEMENT_SIZE;
        if stride < row_bytes {
            return Err(FrameError::StrideTooSmall {
                stride,
                min: row_bytes,
            });
        }
        let count = width as usize * height as usize;
        if values.len() < count {
            return Err(FrameError::BufferTooSmall {
                len: values.len() * Self::ELEMENT_SIZE,
                required: count * Self::ELEMENT_SIZE,
            });
        }

        let mut bytes = vec![0u8; stride * height as usize];
        if row_bytes > 0 {
            for (row, src) in values[..count].chunks_exact(width as usize).enumerate() {
                let start = row * stride;
                bytes[start..start + row_bytes].copy_from_slice(bytemuck::cast_slice(src));
            }
        }

        Ok(Self::from_raw(
            width,
            height,
            stride,
            Arc::new(PlaneBuffer::new(bytes)),
        ))
    }

    /// Build a plane where every cell holds `value`
    pub fn filled(width: u32, height: u32, stride: usize, value: T) -> Result<Self, FrameError> {
        let values = vec![value; width as usize * height as usize];
        Self::from_values(width, height, stride, &values)
    }

    /// Build a tightly packed plane
    pub fn packed(width: u32, height: u32, values: &[T]) -> Result<Self, FrameError> {
        Self::from_values(width, height, width as usize * Self::ELEMENT_SIZE, values)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes between the starts of consecutive rows
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn buffer(&self) -> &Arc<PlaneBuffer> {
        &self.buffer
    }

    /// Whether `cell` lies inside `[0, width) x [0, height)`
    pub fn contains(&self, cell: BufferCell) -> bool {
        cell.x < self.width && cell.y < self.height
    }

    /// Byte offset of `cell`, or `None` when the element would not fit
    ///
    /// The element must end within `stride * height` and within the bytes
    /// actually allocated. Malformed producer strides can break either bound
    /// even for cells inside the grid.
    pub fn checked_offset(&self, cell: BufferCell) -> Option<usize> {
        if !self.contains(cell) {
            return None;
        }
        let offset = (cell.y as usize)
            .checked_mul(self.stride)?
            .checked_add((cell.x as usize).checked_mul(Self::ELEMENT_SIZE)?)?;
        let end = offset.checked_add(Self::ELEMENT_SIZE)?;
        let extent = self.stride.checked_mul(self.height as usize)?;
        (end <= extent && end <= self.buffer.len()).then_some(offset)
    }

    /// Lock the plane memory for reading
    pub fn lock(&self) -> PlaneView<'_, T> {
        PlaneView {
            guard: self.buffer.lock(),
            plane: self,
        }
    }
}

/// Scoped read access to a locked plane
///
/// The lock is released when the view is dropped.
pub struct PlaneView<'a, T> {
    guard: PlaneGuard<'a>,
    plane: &'a Plane<T>,
}

impl<T: Pod> PlaneView<'_, T> {
    /// Read the element starting at a byte offset from [`Plane::checked_offset`]
    pub fn read_at(&self, offset: usize) -> Option<T> {
        let bytes = self.guard.get(offset..offset.checked_add(Plane::<T>::ELEMENT_SIZE)?)?;
        Some(bytemuck::pod_read_unaligned(bytes))
    }

    /// Read the element at `(row, col)`, `None` when out of bounds or extent
    pub fn read(&self, row: u32, col: u32) -> Option<T> {
        self.read_at(self.plane.checked_offset(BufferCell::new(col, row))?)
    }

    /// Raw locked bytes
    pub fn bytes(&self) -> &[u8] {
        &self.guard[..]
    }

    pub fn plane(&self) -> &Plane<T> {
        self.plane
    }
}

/// Per-pixel measurement confidence reported by the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum ConfidenceGrade {
    Low,
    Medium,
    /// Default for ungraded frames and unknown codes
    #[default]
    High,
}

impl ConfidenceGrade {
    pub const ALL: [ConfidenceGrade; 3] = [
        ConfidenceGrade::Low,
        ConfidenceGrade::Medium,
        ConfidenceGrade::High,
    ];

    /// Decode a confidence byte; codes outside {0, 1, 2} are `High`
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => ConfidenceGrade::Low,
            1 => ConfidenceGrade::Medium,
            _ => ConfidenceGrade::High,
        }
    }

    /// Wire code of this grade
    pub fn code(&self) -> u8 {
        match self {
            ConfidenceGrade::Low => 0,
            ConfidenceGrade::Medium => 1,
            ConfidenceGrade::High => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConfidenceGrade::Low => "low",
            ConfidenceGrade::Medium => "medium",
            ConfidenceGrade::High => "high",
        }
    }
}

impl std::fmt::Display for ConfidenceGrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One snapshot from the depth sensor
#[derive(Debug, Clone)]
pub struct DepthFrame {
    sequence: u64,
    captured_at: Instant,
    depth: DepthPlane,
    confidence: Option<ConfidencePlane>,
}

impl DepthFrame {
    /// Assemble a frame, checking that the grids line up
    pub fn new(
        sequence: u64,
        depth: DepthPlane,
        confidence: Option<ConfidencePlane>,
    ) -> Result<Self, FrameError> {
        if depth.width() == 0 || depth.height() == 0 {
            return Err(FrameError::EmptyFrame);
        }
        if let Some(conf) = &confidence
            && conf.dimensions() != depth.dimensions()
        {
            return Err(FrameError::DimensionMismatch {
                depth: depth.dimensions(),
                confidence: conf.dimensions(),
            });
        }
        Ok(Self {
            sequence,
            captured_at: Instant::now(),
            depth,
            confidence,
        })
    }

    /// Override the capture time (replayed or synthetic frames)
    pub fn with_captured_at(mut self, captured_at: Instant) -> Self {
        self.captured_at = captured_at;
        self
    }

    /// Producer-assigned, monotonically increasing frame number
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn depth(&self) -> &DepthPlane {
        &self.depth
    }

    pub fn confidence(&self) -> Option<&ConfidencePlane> {
        self.confidence.as_ref()
    }

    pub fn width(&self) -> u32 {
        self.depth.width()
    }

    pub fn height(&self) -> u32 {
        self.depth.height()
    }
}

/// A point in screen space, origin top-left, y growing downward
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScreenTarget {
    pub x: f64,
    pub y: f64,
}

impl ScreenTarget {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Size of the display surface in screen units
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScreenSize {
    pub width: f64,
    pub height: f64,
}

impl ScreenSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Whether both sides are finite and strictly positive
    pub fn is_valid(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }

    /// Center of the surface, the initial reticle position
    pub fn center(&self) -> ScreenTarget {
        ScreenTarget::new(self.width / 2.0, self.height / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_values_pads_rows() {
        let plane = Plane::<f32>::from_values(2, 2, 12, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(plane.buffer().len(), 24);
        let view = plane.lock();
        assert_eq!(view.read(0, 1), Some(2.0));
        assert_eq!(view.read(1, 0), Some(3.0));
        // Padding bytes after each row stay zero
        assert_eq!(&view.bytes()[8..12], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_stride_too_small() {
        let err = Plane::<f32>::from_values(4, 1, 8, &[0.0; 4]).unwrap_err();
        assert_eq!(err, FrameError::StrideTooSmall { stride: 8, min: 16 });
    }

    #[test]
    fn test_checked_offset_uses_stride() {
        let plane = Plane::<f32>::filled(3, 2, 16, 1.0).unwrap();
        assert_eq!(plane.checked_offset(BufferCell::new(0, 0)), Some(0));
        assert_eq!(plane.checked_offset(BufferCell::new(2, 1)), Some(16 + 8));
        assert_eq!(plane.checked_offset(BufferCell::new(3, 0)), None);
        assert_eq!(plane.checked_offset(BufferCell::new(0, 2)), None);
    }

    #[test]
    fn test_checked_offset_rejects_short_buffer() {
        // Producer claims a 64-byte stride but only allocated 72 bytes
        let buffer = Arc::new(PlaneBuffer::zeroed(72));
        let plane = Plane::<f32>::from_raw(4, 2, 64, buffer);
        assert_eq!(plane.checked_offset(BufferCell::new(3, 1)), None);
        assert_eq!(plane.checked_offset(BufferCell::new(1, 1)), Some(68));
        assert_eq!(plane.checked_offset(BufferCell::new(3, 0)), Some(12));
    }

    #[test]
    fn test_checked_offset_rejects_stride_smaller_than_row() {
        // A stride shorter than the packed row makes late columns spill past stride * height
        let buffer = Arc::new(PlaneBuffer::zeroed(64));
        let plane = Plane::<f32>::from_raw(8, 2, 8, buffer);
        assert_eq!(plane.checked_offset(BufferCell::new(7, 1)), None);
    }

    #[test]
    fn test_lock_counts() {
        let plane = Plane::<u8>::filled(2, 2, 2, 1).unwrap();
        assert_eq!(plane.buffer().lock_count(), 0);
        {
            let view = plane.lock();
            assert_eq!(view.read(1, 1), Some(1));
        }
        assert_eq!(plane.buffer().lock_count(), 1);
    }

    #[test]
    fn test_fill_with_rewrites_in_place() {
        let plane = Plane::<u8>::filled(2, 1, 2, 0).unwrap();
        plane.buffer().fill_with(|bytes| bytes[1] = 7);
        assert_eq!(plane.lock().read(0, 1), Some(7));
    }

    #[test]
    fn test_confidence_codes() {
        assert_eq!(ConfidenceGrade::from_code(0), ConfidenceGrade::Low);
        assert_eq!(ConfidenceGrade::from_code(1), ConfidenceGrade::Medium);
        assert_eq!(ConfidenceGrade::from_code(2), ConfidenceGrade::High);
        for code in 3..=u8::MAX {
            assert_eq!(ConfidenceGrade::from_code(code), ConfidenceGrade::High);
        }
        for grade in ConfidenceGrade::ALL {
            assert_eq!(ConfidenceGrade::from_code(grade.code()), grade);
        }
    }

    #[test]
    fn test_frame_dimension_mismatch() {
        let depth = Plane::<f32>::filled(4, 4, 16, 1.0).unwrap();
        let confidence = Plane::<u8>::filled(2, 2, 2, 2).unwrap();
        let err = DepthFrame::new(0, depth, Some(confidence)).unwrap_err();
        assert!(matches!(err, FrameError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_frame_rejects_empty() {
        let depth = Plane::<f32>::filled(0, 4, 0, 1.0).unwrap();
        assert_eq!(
            DepthFrame::new(0, depth, None).unwrap_err(),
            FrameError::EmptyFrame
        );
    }

    #[test]
    fn test_screen_size_validity() {
        assert!(ScreenSize::new(400.0, 400.0).is_valid());
        assert!(!ScreenSize::new(0.0, 400.0).is_valid());
        assert!(!ScreenSize::new(f64::NAN, 400.0).is_valid());
        assert_eq!(
            ScreenSize::new(400.0, 200.0).center(),
            ScreenTarget::new(200.0, 100.0)
        );
    }
}
