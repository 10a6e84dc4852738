// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for camera backends

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Which way a camera points, inferred from its label.
///
/// Handheld scanning prefers a back-facing ("environment") camera when
/// one is available; laptop webcams usually report no usable hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Facing {
    /// Faces the user (selfie / webcam)
    Front,
    /// Faces away from the user (environment)
    Back,
    /// No usable hint in the device label
    #[default]
    Unknown,
}

impl Facing {
    /// Infer a facing hint from a device label
    pub fn from_label(label: &str) -> Self {
        let label = label.to_ascii_lowercase();
        if label.contains("back") || label.contains("rear") || label.contains("environment") {
            Facing::Back
        } else if label.contains("front") || label.contains("user") || label.contains("integrated")
        {
            Facing::Front
        } else {
            Facing::Unknown
        }
    }
}

impl std::fmt::Display for Facing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Facing::Front => write!(f, "front"),
            Facing::Back => write!(f, "back"),
            Facing::Unknown => write!(f, "unknown"),
        }
    }
}

/// Represents a camera device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDevice {
    /// Capture device path (e.g. /dev/video0)
    pub path: String,
    /// Human-readable label
    pub label: String,
    /// Facing hint inferred from the label
    pub facing: Facing,
}

/// Preferred capture geometry for a session.
///
/// Format negotiation picks the driver format closest to the ideal
/// dimensions that still falls inside the min/max bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraConstraints {
    pub min_width: u32,
    pub min_height: u32,
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    /// Preferred facing when more than one device is available
    pub facing: Option<Facing>,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        use crate::constants::camera;
        Self {
            min_width: camera::MIN_WIDTH,
            min_height: camera::MIN_HEIGHT,
            ideal_width: camera::IDEAL_WIDTH,
            ideal_height: camera::IDEAL_HEIGHT,
            max_width: camera::MAX_WIDTH,
            max_height: camera::MAX_HEIGHT,
            facing: Some(Facing::Back),
        }
    }
}

impl CameraConstraints {
    /// Check whether a resolution falls inside the min/max bounds
    pub fn contains(&self, width: u32, height: u32) -> bool {
        width >= self.min_width
            && width <= self.max_width
            && height >= self.min_height
            && height <= self.max_height
    }

    /// Distance of a resolution from the ideal, for candidate ranking
    pub fn distance(&self, width: u32, height: u32) -> u64 {
        let ideal = u64::from(self.ideal_width) * u64::from(self.ideal_height);
        let actual = u64::from(width) * u64::from(height);
        ideal.abs_diff(actual)
    }
}

/// A single frame from a camera session.
///
/// Pixel data is always RGBA; raw driver formats are converted by the
/// capture thread before publication. `stride` is bytes per row and may
/// exceed `width * 4` when the driver pads rows.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    /// RGBA pixel data
    pub data: Arc<[u8]>,
    /// Bytes per row
    pub stride: u32,
    /// When the frame was captured
    pub captured_at: Instant,
}

impl CameraFrame {
    /// Build a frame from tightly packed RGBA bytes
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data: Arc::from(data.into_boxed_slice()),
            stride: width * 4,
            captured_at: Instant::now(),
        }
    }

    /// Sample one pixel as RGB, clamping coordinates to the frame
    pub fn rgb_at(&self, x: u32, y: u32) -> (u8, u8, u8) {
        let x = x.min(self.width.saturating_sub(1));
        let y = y.min(self.height.saturating_sub(1));
        let idx = (y * self.stride + x * 4) as usize;
        if idx + 2 < self.data.len() {
            (self.data[idx], self.data[idx + 1], self.data[idx + 2])
        } else {
            (0, 0, 0)
        }
    }
}

/// Result type for camera operations
pub type CameraResult<T> = Result<T, CameraError>;

/// Error types for camera operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    /// The user (or the OS) denied access to the device
    PermissionDenied(String),
    /// The named device does not exist
    DeviceNotFound(String),
    /// No capture device is present at all
    NoDeviceFound,
    /// Device exists but is held by another process
    DeviceUnavailable(String),
    /// No driver format satisfies the requested constraints
    ConstraintsNotSatisfiable(String),
    /// Device vanished mid-session
    Disconnected,
    /// General I/O error
    Io(String),
}

impl std::fmt::Display for CameraError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            CameraError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            CameraError::NoDeviceFound => write!(f, "No camera devices found"),
            CameraError::DeviceUnavailable(msg) => write!(f, "Device busy: {}", msg),
            CameraError::ConstraintsNotSatisfiable(msg) => {
                write!(f, "No format satisfies constraints: {}", msg)
            }
            CameraError::Disconnected => write!(f, "Camera disconnected"),
            CameraError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for CameraError {}
