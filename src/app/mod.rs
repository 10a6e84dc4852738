// SPDX-License-Identifier: GPL-3.0-only

//! Screen-level application logic

pub mod coordinator;
pub mod state;

pub use coordinator::{ScanCoordinator, ScanSettings};
pub use state::{
    Intent, MessageKind, Navigation, ScanState, ScreenEvent, StatusMessage, UserSession,
};
