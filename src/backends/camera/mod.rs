// SPDX-License-Identifier: GPL-3.0-only

//! Camera backend abstraction
//!
//! Trait-based split between device discovery/acquisition (the backend)
//! and an open capture stream (the session), so the scan pipeline can run
//! against real V4L2 hardware, a still image, or a test double without
//! the coordinator knowing the difference.

pub mod convert;
pub mod file_source;
pub mod frame_loop;
pub mod types;
pub mod v4l2;

pub use types::*;

use std::sync::Arc;

/// Camera capture backend
///
/// Implementations enumerate devices and acquire exclusive capture
/// sessions. Acquisition errors map to the `CameraError` taxonomy so the
/// coordinator can present them uniformly.
pub trait CameraBackend: Send + Sync {
    /// Enumerate available capture devices.
    ///
    /// Fails with `NoDeviceFound` when nothing is present and
    /// `PermissionDenied` when device nodes exist but cannot be opened.
    fn list_devices(&self) -> CameraResult<Vec<CameraDevice>>;

    /// Acquire exclusive access to `device` honoring `constraints`.
    ///
    /// On success the capture loop is already running and the returned
    /// session serves frames on demand.
    fn open(
        &self,
        device: &CameraDevice,
        constraints: &CameraConstraints,
    ) -> CameraResult<Arc<dyn CameraSession>>;
}

/// An open camera stream bound to one device
pub trait CameraSession: Send + Sync {
    /// The device this session captures from
    fn device(&self) -> &CameraDevice;

    /// Latest captured frame, or `None` before the first frame arrives
    fn frame(&self) -> Option<Arc<CameraFrame>>;

    /// Release the device and all capture resources.
    ///
    /// Synchronous from the caller's perspective: no frame is delivered
    /// after this returns and the hardware indicator light goes off.
    /// Safe to call any number of times.
    fn stop(&self);

    /// Whether `stop` has been called
    fn is_stopped(&self) -> bool;
}

/// Get the platform capture backend
pub fn default_backend() -> Arc<dyn CameraBackend> {
    Arc::new(v4l2::V4l2Backend::new())
}

/// Pick the device to scan with.
///
/// Preference order: facing hint from the constraints, then the
/// remembered device path, then the first enumerated device.
pub fn pick_device<'a>(
    devices: &'a [CameraDevice],
    constraints: &CameraConstraints,
    last_path: Option<&str>,
) -> Option<&'a CameraDevice> {
    if let Some(facing) = constraints.facing {
        if let Some(device) = devices.iter().find(|d| d.facing == facing) {
            return Some(device);
        }
    }
    if let Some(path) = last_path {
        if let Some(device) = devices.iter().find(|d| d.path == path) {
            return Some(device);
        }
    }
    devices.first()
}
