// SPDX-License-Identifier: GPL-3.0-only

//! Core types for scan results and the sampling loop

use chrono::{DateTime, Local};

/// A rectangle in source-frame pixel coordinates.
///
/// The presentation layer is responsible for scaling into display space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Axis-aligned box around a set of points, clamped to the frame
    pub fn from_points(points: &[(f32, f32)], frame_width: u32, frame_height: u32) -> Self {
        let mut min_x = f32::MAX;
        let mut min_y = f32::MAX;
        let mut max_x = f32::MIN;
        let mut max_y = f32::MIN;
        for &(x, y) in points {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        let min_x = min_x.max(0.0).min(frame_width as f32);
        let min_y = min_y.max(0.0).min(frame_height as f32);
        let max_x = max_x.max(min_x).min(frame_width as f32);
        let max_y = max_y.max(min_y).min(frame_height as f32);
        Self {
            x: min_x as u32,
            y: min_y as u32,
            width: (max_x - min_x) as u32,
            height: (max_y - min_y) as u32,
        }
    }
}

/// One successfully decoded payload.
///
/// Immutable once produced; consumed exactly once by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult {
    /// Decoded text, returned verbatim without interpretation
    pub text: String,
    /// Where the code sat in the source frame, when known
    pub bounds: Option<BoundingBox>,
    /// When the payload was decoded
    pub decoded_at: DateTime<Local>,
}

impl ScanResult {
    pub fn new(text: impl Into<String>, bounds: Option<BoundingBox>) -> Self {
        Self {
            text: text.into(),
            bounds,
            decoded_at: Local::now(),
        }
    }
}

/// Sampling loop state machine
#[derive(Debug, Clone, PartialEq)]
pub enum ScanLoopState {
    /// Spawned but the task has not ticked yet
    NotStarted,
    /// Actively sampling frames
    Sampling,
    /// First decode accepted and reported; terminal
    Completed,
    /// Stopped by the owner; terminal
    Stopped,
    /// Circuit breaker fired; terminal
    Error(String),
}

/// Events the loop delivers to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// The first (and only) accepted decode of this session
    Decoded(ScanResult),
    /// The loop gave up after repeated decoder crashes
    Failed(String),
}
