// SPDX-License-Identifier: GPL-3.0-only

//! File-backed frame source
//!
//! Serves a still image as an endless frame stream. Used by the one-shot
//! `decode` command, by `scan --input`, and by tests that need a
//! deterministic camera.

use super::types::{CameraConstraints, CameraDevice, CameraError, CameraFrame, CameraResult, Facing};
use super::{CameraBackend, CameraSession};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Load an image file as an RGBA camera frame
pub fn load_frame(path: &Path) -> CameraResult<CameraFrame> {
    let img = image::open(path)
        .map_err(|e| CameraError::Io(format!("{}: {}", path.display(), e)))?;
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    debug!(path = %path.display(), width, height, "Loaded image as frame");
    Ok(CameraFrame::from_rgba(width, height, rgba.into_raw()))
}

/// Backend serving frames from a single image file
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn device(&self) -> CameraDevice {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string());
        CameraDevice {
            path: self.path.display().to_string(),
            label: format!("File: {}", name),
            facing: Facing::Unknown,
        }
    }
}

impl CameraBackend for FileBackend {
    fn list_devices(&self) -> CameraResult<Vec<CameraDevice>> {
        Ok(vec![self.device()])
    }

    /// Constraint bounds are not enforced here: the file is what it is,
    /// and the decoder downscales oversized frames itself.
    fn open(
        &self,
        device: &CameraDevice,
        _constraints: &CameraConstraints,
    ) -> CameraResult<Arc<dyn CameraSession>> {
        let frame = load_frame(&self.path)?;
        info!(device = %device.path, "File source opened");
        Ok(Arc::new(FileSession {
            device: device.clone(),
            frame: Arc::new(frame),
            stopped: AtomicBool::new(false),
        }))
    }
}

/// Session serving the same decoded image on every pull
struct FileSession {
    device: CameraDevice,
    frame: Arc<CameraFrame>,
    stopped: AtomicBool,
}

impl CameraSession for FileSession {
    fn device(&self) -> &CameraDevice {
        &self.device
    }

    fn frame(&self) -> Option<Arc<CameraFrame>> {
        if self.stopped.load(Ordering::SeqCst) {
            None
        } else {
            Some(Arc::clone(&self.frame))
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::CameraConstraints;

    fn write_test_png(dir: &Path) -> PathBuf {
        let path = dir.join("frame.png");
        let img = image::RgbaImage::from_pixel(8, 6, image::Rgba([10, 20, 30, 255]));
        img.save(&path).expect("failed to write test image");
        path
    }

    #[test]
    fn test_load_frame_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_png(dir.path());
        let frame = load_frame(&path).unwrap();
        assert_eq!((frame.width, frame.height), (8, 6));
        assert_eq!(frame.rgb_at(3, 3), (10, 20, 30));
    }

    #[test]
    fn test_load_frame_missing_file() {
        let err = load_frame(Path::new("/nonexistent/frame.png")).unwrap_err();
        assert!(matches!(err, CameraError::Io(_)));
    }

    #[test]
    fn test_session_serves_frames_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_png(dir.path());
        let backend = FileBackend::new(&path);
        let devices = backend.list_devices().unwrap();
        let session = backend
            .open(&devices[0], &CameraConstraints::default())
            .unwrap();

        assert!(session.frame().is_some());
        assert!(!session.is_stopped());

        session.stop();
        session.stop(); // idempotent
        assert!(session.is_stopped());
        assert!(session.frame().is_none());
    }
}
