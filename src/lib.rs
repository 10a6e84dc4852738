// SPDX-License-Identifier: GPL-3.0-only

//! quickscan — camera-driven borrow/return client for a library catalog
//!
//! Points a camera at a book's QR/barcode label, decodes the ISBN, and
//! drives the borrow or return action against the catalog's REST API.
//!
//! # Architecture
//!
//! - [`backends`]: camera capture abstraction (V4L2, file source)
//! - [`scan`]: frame decoding and the sampling loop
//! - [`catalog`]: catalog service types and HTTP client
//! - [`app`]: the screen-level scan coordinator and its state machine
//! - [`terminal`]: ratatui presentation layer
//! - [`config`]: user configuration handling

pub mod app;
pub mod backends;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod errors;
pub mod scan;
pub mod terminal;

// Re-export commonly used types
pub use app::{
    Intent, Navigation, ScanCoordinator, ScanSettings, ScanState, ScreenEvent, StatusMessage,
    UserSession,
};
pub use backends::camera::{CameraBackend, CameraDevice, CameraFrame, CameraSession};
pub use catalog::{ApiError, Book, BorrowRecord, CatalogApi, HttpCatalogClient, UserHome};
pub use config::Config;
pub use errors::{AppError, AppResult};
pub use scan::{BoundingBox, FrameDecoder, QrDecoder, ScanResult};
