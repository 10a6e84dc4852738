// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 camera backend
//!
//! Enumerates `/dev/video*` capture nodes, negotiates a raw format per
//! the session constraints, and streams frames from an mmap queue on a
//! dedicated capture thread. All raw formats are converted to RGBA
//! before publication.

use super::convert;
use super::frame_loop::CaptureLoopController;
use super::types::{
    CameraConstraints, CameraDevice, CameraError, CameraFrame, CameraResult, Facing,
};
use super::{CameraBackend, CameraSession};
use crate::constants::camera;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::framesize::FrameSizeEnum;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

/// Raw driver formats this backend can consume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawFormat {
    /// Packed YUV 4:2:2, the cheapest to convert
    Yuyv,
    /// 24-bit RGB
    Rgb24,
    /// Motion-JPEG, decoded per frame
    Mjpg,
    /// 8-bit grayscale
    Gray8,
}

impl RawFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(RawFormat::Yuyv),
            b"RGB3" => Some(RawFormat::Rgb24),
            b"MJPG" | b"JPEG" => Some(RawFormat::Mjpg),
            b"GREY" => Some(RawFormat::Gray8),
            _ => None,
        }
    }

    fn fourcc(self) -> FourCC {
        match self {
            RawFormat::Yuyv => FourCC::new(b"YUYV"),
            RawFormat::Rgb24 => FourCC::new(b"RGB3"),
            RawFormat::Mjpg => FourCC::new(b"MJPG"),
            RawFormat::Gray8 => FourCC::new(b"GREY"),
        }
    }

    /// Conversion-cost rank used to break ties between equal resolutions
    fn rank(self) -> u32 {
        match self {
            RawFormat::Yuyv => 0,
            RawFormat::Rgb24 => 1,
            RawFormat::Mjpg => 2,
            RawFormat::Gray8 => 3,
        }
    }

    fn bytes_per_pixel(self) -> u32 {
        match self {
            RawFormat::Yuyv => 2,
            RawFormat::Rgb24 => 3,
            // Compressed, no fixed stride
            RawFormat::Mjpg => 0,
            RawFormat::Gray8 => 1,
        }
    }
}

/// Map a device I/O error to the camera error taxonomy
fn map_io_error(err: &std::io::Error, path: &str) -> CameraError {
    if let Some(code) = err.raw_os_error() {
        if code == libc::EBUSY {
            return CameraError::DeviceUnavailable(path.to_string());
        }
        if code == libc::EACCES || code == libc::EPERM {
            return CameraError::PermissionDenied(path.to_string());
        }
        if code == libc::ENOENT || code == libc::ENODEV || code == libc::ENXIO {
            return CameraError::DeviceNotFound(path.to_string());
        }
    }
    match err.kind() {
        std::io::ErrorKind::PermissionDenied => CameraError::PermissionDenied(path.to_string()),
        std::io::ErrorKind::NotFound => CameraError::DeviceNotFound(path.to_string()),
        _ => CameraError::Io(format!("{}: {}", path, err)),
    }
}

/// V4L2 capture backend
#[derive(Debug, Default)]
pub struct V4l2Backend;

impl V4l2Backend {
    pub fn new() -> Self {
        Self
    }
}

impl CameraBackend for V4l2Backend {
    fn list_devices(&self) -> CameraResult<Vec<CameraDevice>> {
        let nodes = v4l::context::enum_devices();
        if nodes.is_empty() {
            return Err(CameraError::NoDeviceFound);
        }

        let mut devices = Vec::new();
        let mut denied = 0usize;
        for node in nodes {
            let path = node.path().to_string_lossy().to_string();
            let dev = match Device::with_path(node.path()) {
                Ok(dev) => dev,
                Err(err) => {
                    if matches!(
                        map_io_error(&err, &path),
                        CameraError::PermissionDenied(_)
                    ) {
                        denied += 1;
                    }
                    debug!(device = %path, error = %err, "Skipping unopenable node");
                    continue;
                }
            };
            let caps = match dev.query_caps() {
                Ok(caps) => caps,
                Err(err) => {
                    debug!(device = %path, error = %err, "Capability query failed");
                    continue;
                }
            };
            // Metadata and output nodes share the video* namespace
            if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
                continue;
            }
            let label = node
                .name()
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| caps.card.clone());
            devices.push(CameraDevice {
                path,
                facing: Facing::from_label(&label),
                label,
            });
        }

        if devices.is_empty() {
            if denied > 0 {
                Err(CameraError::PermissionDenied(
                    "video devices exist but are not readable".to_string(),
                ))
            } else {
                Err(CameraError::NoDeviceFound)
            }
        } else {
            debug!(count = devices.len(), "Enumerated capture devices");
            Ok(devices)
        }
    }

    fn open(
        &self,
        device: &CameraDevice,
        constraints: &CameraConstraints,
    ) -> CameraResult<Arc<dyn CameraSession>> {
        let mut dev =
            Device::with_path(&device.path).map_err(|e| map_io_error(&e, &device.path))?;
        let (raw, format) = negotiate_format(&mut dev, constraints)?;
        info!(
            device = %device.path,
            fourcc = %format.fourcc,
            width = format.width,
            height = format.height,
            "Camera format negotiated"
        );

        let (ready_tx, ready_rx) = mpsc::channel::<CameraResult<()>>();
        let (frame_tx, frame_rx) = watch::channel::<Option<Arc<CameraFrame>>>(None);

        let width = format.width;
        let height = format.height;
        let stride = if format.stride > 0 {
            format.stride
        } else {
            width * raw.bytes_per_pixel()
        };
        let path = device.path.clone();

        let controller = CaptureLoopController::spawn("v4l2-capture", move |stop| {
            capture_loop(dev, raw, width, height, stride, path, stop, ready_tx, frame_tx)
        });

        match ready_rx.recv_timeout(camera::STARTUP_TIMEOUT) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                return Err(CameraError::Io(format!(
                    "{}: capture thread did not start",
                    device.path
                )));
            }
        }

        Ok(Arc::new(V4l2Session {
            device: device.clone(),
            frames: frame_rx,
            controller: Mutex::new(Some(controller)),
            stopped: AtomicBool::new(false),
        }))
    }
}

/// Dedicated capture thread body: owns the device and the mmap queue for
/// its whole lifetime, so teardown is a join away.
#[allow(clippy::too_many_arguments)]
fn capture_loop(
    mut dev: Device,
    raw: RawFormat,
    width: u32,
    height: u32,
    stride: u32,
    path: String,
    stop: Arc<std::sync::atomic::AtomicBool>,
    ready: mpsc::Sender<CameraResult<()>>,
    frames: watch::Sender<Option<Arc<CameraFrame>>>,
) {
    let mut stream = match Stream::with_buffers(&mut dev, Type::VideoCapture, camera::BUFFER_COUNT)
    {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready.send(Err(map_io_error(&err, &path)));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    while !stop.load(Ordering::SeqCst) {
        let (buf, meta) = match stream.next() {
            Ok(pair) => pair,
            Err(err) => {
                warn!(device = %path, error = %err, "Frame dequeue failed, stopping capture");
                break;
            }
        };
        let used = meta.bytesused as usize;
        let data = if used > 0 && used <= buf.len() {
            &buf[..used]
        } else {
            buf
        };

        let frame = match raw {
            RawFormat::Yuyv => Some(CameraFrame::from_rgba(
                width,
                height,
                convert::yuyv_to_rgba(data, width, height, stride),
            )),
            RawFormat::Rgb24 => Some(CameraFrame::from_rgba(
                width,
                height,
                convert::rgb24_to_rgba(data, width, height, stride),
            )),
            RawFormat::Gray8 => Some(CameraFrame::from_rgba(
                width,
                height,
                convert::gray8_to_rgba(data, width, height, stride),
            )),
            RawFormat::Mjpg => {
                match image::load_from_memory_with_format(data, image::ImageFormat::Jpeg) {
                    Ok(img) => {
                        let rgba = img.to_rgba8();
                        let (w, h) = rgba.dimensions();
                        Some(CameraFrame::from_rgba(w, h, rgba.into_raw()))
                    }
                    Err(err) => {
                        trace!(device = %path, error = %err, "Dropping undecodable MJPG frame");
                        None
                    }
                }
            }
        };

        if let Some(frame) = frame {
            frames.send_replace(Some(Arc::new(frame)));
        }
    }
    // Device and mapped buffers released here; the indicator light goes off.
}

/// Negotiate a capture format honoring the constraints
fn negotiate_format(
    dev: &mut Device,
    constraints: &CameraConstraints,
) -> CameraResult<(RawFormat, Format)> {
    let descriptions = dev
        .enum_formats()
        .map_err(|e| CameraError::Io(e.to_string()))?;

    let mut candidates: Vec<(RawFormat, u32, u32)> = Vec::new();
    for desc in &descriptions {
        let Some(raw) = RawFormat::from_fourcc(desc.fourcc) else {
            continue;
        };
        for framesize in dev.enum_framesizes(desc.fourcc).unwrap_or_default() {
            match framesize.size {
                FrameSizeEnum::Discrete(d) => candidates.push((raw, d.width, d.height)),
                FrameSizeEnum::Stepwise(s) => {
                    let w = constraints.ideal_width.clamp(s.min_width, s.max_width);
                    let h = constraints.ideal_height.clamp(s.min_height, s.max_height);
                    candidates.push((raw, w, h));
                }
            }
        }
    }

    let Some((raw, width, height)) = select_candidate(&candidates, constraints) else {
        return Err(CameraError::ConstraintsNotSatisfiable(format!(
            "no supported format within {}x{}..{}x{}",
            constraints.min_width,
            constraints.min_height,
            constraints.max_width,
            constraints.max_height
        )));
    };

    let requested = Format::new(width, height, raw.fourcc());
    let actual = dev
        .set_format(&requested)
        .map_err(|e| map_io_error(&e, "set_format"))?;

    // The driver may substitute; verify the substitute still fits.
    if RawFormat::from_fourcc(actual.fourcc) != Some(raw)
        || !constraints.contains(actual.width, actual.height)
    {
        return Err(CameraError::ConstraintsNotSatisfiable(format!(
            "driver substituted {} {}x{}",
            actual.fourcc, actual.width, actual.height
        )));
    }

    Ok((raw, actual))
}

/// Pick the candidate closest to the ideal resolution inside the bounds,
/// breaking ties on conversion cost
fn select_candidate(
    candidates: &[(RawFormat, u32, u32)],
    constraints: &CameraConstraints,
) -> Option<(RawFormat, u32, u32)> {
    candidates
        .iter()
        .filter(|(_, w, h)| constraints.contains(*w, *h))
        .min_by_key(|(raw, w, h)| (constraints.distance(*w, *h), raw.rank()))
        .copied()
}

/// An open V4L2 capture session
struct V4l2Session {
    device: CameraDevice,
    frames: watch::Receiver<Option<Arc<CameraFrame>>>,
    controller: Mutex<Option<CaptureLoopController>>,
    stopped: AtomicBool,
}

impl CameraSession for V4l2Session {
    fn device(&self) -> &CameraDevice {
        &self.device
    }

    fn frame(&self) -> Option<Arc<CameraFrame>> {
        self.frames.borrow().clone()
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut controller) = self.controller.lock().unwrap().take() {
            controller.stop();
        }
        info!(device = %self.device.path, "Camera session stopped");
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for V4l2Session {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraints() -> CameraConstraints {
        CameraConstraints {
            min_width: 320,
            min_height: 240,
            ideal_width: 1280,
            ideal_height: 720,
            max_width: 1920,
            max_height: 1080,
            facing: None,
        }
    }

    #[test]
    fn test_fourcc_round_trip() {
        for raw in [
            RawFormat::Yuyv,
            RawFormat::Rgb24,
            RawFormat::Mjpg,
            RawFormat::Gray8,
        ] {
            assert_eq!(RawFormat::from_fourcc(raw.fourcc()), Some(raw));
        }
        assert_eq!(RawFormat::from_fourcc(FourCC::new(b"H264")), None);
    }

    #[test]
    fn test_select_candidate_prefers_ideal_resolution() {
        let candidates = vec![
            (RawFormat::Yuyv, 640, 480),
            (RawFormat::Yuyv, 1280, 720),
            (RawFormat::Yuyv, 1920, 1080),
        ];
        let picked = select_candidate(&candidates, &constraints()).unwrap();
        assert_eq!((picked.1, picked.2), (1280, 720));
    }

    #[test]
    fn test_select_candidate_breaks_ties_on_conversion_cost() {
        let candidates = vec![
            (RawFormat::Mjpg, 1280, 720),
            (RawFormat::Yuyv, 1280, 720),
        ];
        let picked = select_candidate(&candidates, &constraints()).unwrap();
        assert_eq!(picked.0, RawFormat::Yuyv);
    }

    #[test]
    fn test_select_candidate_rejects_out_of_bounds() {
        let candidates = vec![(RawFormat::Yuyv, 160, 120), (RawFormat::Yuyv, 4096, 2160)];
        assert!(select_candidate(&candidates, &constraints()).is_none());
    }

    #[test]
    fn test_busy_errno_maps_to_device_unavailable() {
        let err = std::io::Error::from_raw_os_error(libc::EBUSY);
        assert_eq!(
            map_io_error(&err, "/dev/video0"),
            CameraError::DeviceUnavailable("/dev/video0".to_string())
        );
    }

    #[test]
    fn test_permission_errno_maps_to_permission_denied() {
        let err = std::io::Error::from_raw_os_error(libc::EACCES);
        assert!(matches!(
            map_io_error(&err, "/dev/video0"),
            CameraError::PermissionDenied(_)
        ));
    }
}
