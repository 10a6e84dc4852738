// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for scanner operations
//!
//! This module provides command-line functionality for:
//! - Listing available cameras
//! - One-shot decoding of an image file

use quickscan::backends::camera::{CameraError, default_backend, file_source};
use quickscan::scan::{FrameDecoder, QrDecoder};
use std::path::PathBuf;

/// List all available cameras
pub fn list_cameras() -> Result<(), Box<dyn std::error::Error>> {
    let backend = default_backend();
    let devices = match backend.list_devices() {
        Ok(devices) => devices,
        Err(CameraError::NoDeviceFound) => {
            println!("No cameras found.");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    println!("Available cameras:");
    println!();
    for (index, device) in devices.iter().enumerate() {
        println!("  [{}] {} ({})", index, device.label, device.path);
        println!("      Facing: {}", device.facing);
    }
    println!();

    Ok(())
}

/// Decode a barcode from an image file and print the payload
pub fn decode_image(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let frame = file_source::load_frame(&path)?;
    let decoder = QrDecoder::new();

    match decoder.decode(&frame) {
        Some(result) => {
            println!("Decoded: {}", result.text);
            if let Some(b) = result.bounds {
                println!("Bounds:  {}x{} at ({}, {})", b.width, b.height, b.x, b.y);
            }
        }
        None => {
            println!("No QR code found in {}", path.display());
        }
    }

    Ok(())
}
