// SPDX-License-Identifier: GPL-3.0-only

//! QR payload extraction from camera frames
//!
//! Frames are converted to a luminance plane, downscaled to a bounded
//! working size, and handed to the rqrr detector. A miss is the normal
//! outcome and stays silent.

use super::types::{BoundingBox, ScanResult};
use crate::backends::camera::CameraFrame;
use crate::constants::scan;
use image::GrayImage;
use image::imageops::FilterType;
use std::time::Instant;
use tracing::{debug, trace};

/// Extracts at most one payload from a pixel buffer.
///
/// Implementations must not retain the frame after returning; the caller
/// owns and reuses the buffer.
pub trait FrameDecoder: Send + Sync {
    fn decode(&self, frame: &CameraFrame) -> Option<ScanResult>;
}

/// QR code decoder backed by rqrr
pub struct QrDecoder {
    /// Frames larger than this are downscaled before detection
    max_dimension: u32,
}

impl Default for QrDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl QrDecoder {
    pub fn new() -> Self {
        Self {
            max_dimension: scan::DECODE_MAX_DIMENSION,
        }
    }

    pub fn with_max_dimension(max_dimension: u32) -> Self {
        Self { max_dimension }
    }
}

impl FrameDecoder for QrDecoder {
    fn decode(&self, frame: &CameraFrame) -> Option<ScanResult> {
        let start = Instant::now();

        let luma = luminance_plane(frame);
        let (luma, scale) = if frame.width.max(frame.height) > self.max_dimension {
            let scale = frame.width.max(frame.height) as f32 / self.max_dimension as f32;
            let new_width = (frame.width as f32 / scale).max(1.0) as u32;
            let new_height = (frame.height as f32 / scale).max(1.0) as u32;
            (
                image::imageops::resize(&luma, new_width, new_height, FilterType::Triangle),
                scale,
            )
        } else {
            (luma, 1.0)
        };

        let mut prepared = rqrr::PreparedImage::prepare(luma);
        let grids = prepared.detect_grids();
        trace!(
            count = grids.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "QR detection pass complete"
        );

        for grid in grids {
            match grid.decode() {
                Ok((_meta, content)) => {
                    let corners: Vec<(f32, f32)> = grid
                        .bounds
                        .iter()
                        .map(|p| (p.x as f32 * scale, p.y as f32 * scale))
                        .collect();
                    let bounds = BoundingBox::from_points(&corners, frame.width, frame.height);
                    debug!(
                        content = %content,
                        x = bounds.x,
                        y = bounds.y,
                        width = bounds.width,
                        height = bounds.height,
                        total_ms = start.elapsed().as_millis(),
                        "Decoded QR payload"
                    );
                    return Some(ScanResult::new(content, Some(bounds)));
                }
                Err(err) => {
                    // A located but undecodable grid; keep trying the rest
                    trace!(error = %err, "Grid failed to decode");
                }
            }
        }

        None
    }
}

/// Stride-aware RGBA to luminance conversion (BT.601 integer weights)
fn luminance_plane(frame: &CameraFrame) -> GrayImage {
    let width = frame.width as usize;
    let height = frame.height as usize;
    let stride = frame.stride as usize;
    let mut luma = Vec::with_capacity(width * height);

    for row in 0..height {
        let row_start = row * stride;
        for col in 0..width {
            let idx = row_start + col * 4;
            if idx + 2 < frame.data.len() {
                let r = frame.data[idx] as u32;
                let g = frame.data[idx + 1] as u32;
                let b = frame.data[idx + 2] as u32;
                luma.push(((77 * r + 150 * g + 29 * b) >> 8) as u8);
            } else {
                luma.push(0);
            }
        }
    }

    GrayImage::from_raw(frame.width, frame.height, luma)
        .expect("luminance plane should match frame dimensions")
}
