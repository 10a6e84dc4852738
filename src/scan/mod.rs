// SPDX-License-Identifier: GPL-3.0-only

//! Scan pipeline: frame decoding and the sampling loop
//!
//! `decoder` turns one frame into at most one payload; `scan_loop` drives
//! the decoder against a live session with serialized attempts, a
//! first-success acceptance policy, and a crash circuit breaker.

pub mod decoder;
pub mod scan_loop;
pub mod types;

pub use decoder::{FrameDecoder, QrDecoder};
pub use scan_loop::{ScanLoop, ScanLoopHandle};
pub use types::{BoundingBox, ScanEvent, ScanLoopState, ScanResult};
