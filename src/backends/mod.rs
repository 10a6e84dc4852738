// SPDX-License-Identifier: GPL-3.0-only

//! Capture backend abstraction

pub mod camera;
