// SPDX-License-Identifier: GPL-3.0-only

//! Scan screen state types

use crate::scan::ScanResult;

/// Screen-level state machine.
///
/// Exactly one instance per coordinator; every transition is emitted as a
/// `ScreenEvent::StateChanged` so the presentation layer stays a pure
/// reflection of it.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanState {
    /// Nothing running; scanning can be (re)started
    Idle,
    /// Camera acquisition in progress
    Starting,
    /// Live sampling in progress
    Scanning,
    /// Accepted a decode; resolving and acting on it
    Processing,
    /// Action succeeded; navigation scheduled
    NavigatingAway,
    /// A terminal failure the user must acknowledge or retry
    Error(String),
}

impl ScanState {
    /// True while a start request must be ignored (exclusivity invariant)
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            ScanState::Starting | ScanState::Scanning | ScanState::Processing
        )
    }

    /// Short label for the status bar
    pub fn label(&self) -> &str {
        match self {
            ScanState::Idle => "idle",
            ScanState::Starting => "starting camera",
            ScanState::Scanning => "scanning",
            ScanState::Processing => "processing",
            ScanState::NavigatingAway => "done",
            ScanState::Error(_) => "error",
        }
    }
}

/// The caller-configured purpose of a scan session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Borrow,
    Return,
}

impl Intent {
    pub fn verb(&self) -> &'static str {
        match self {
            Intent::Borrow => "borrow",
            Intent::Return => "return",
        }
    }
}

impl std::str::FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "borrow" => Ok(Intent::Borrow),
            "return" => Ok(Intent::Return),
            other => Err(format!("unknown intent '{}', expected borrow|return", other)),
        }
    }
}

/// The authenticated user, passed in explicitly rather than read from
/// ambient state so the coordinator stays testable in isolation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSession {
    pub user_id: u32,
    pub username: String,
}

/// Severity of a status message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Info,
    Success,
    Error,
}

/// One user-visible status line. At most one is shown at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusMessage {
    pub text: String,
    pub kind: MessageKind,
    /// Persistent messages skip the auto-dismiss timer
    pub persistent: bool,
}

impl StatusMessage {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: MessageKind::Info,
            persistent: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: MessageKind::Error,
            persistent: false,
        }
    }

    /// Final confirmation: stays visible until navigation happens
    pub fn confirmation(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: MessageKind::Success,
            persistent: true,
        }
    }
}

/// Where the surrounding application should go after a completed action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    /// The resolved book's detail view
    BookDetail { book_id: u32 },
    /// Back to the list/home view
    Home,
}

/// Events emitted by the coordinator for the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub enum ScreenEvent {
    StateChanged(ScanState),
    /// Replaces any currently shown message
    Message(StatusMessage),
    /// The auto-dismiss timer fired for the current message
    MessageCleared,
    /// The accepted decode, for the overlay
    Detection(ScanResult),
    /// Leave the scan screen
    Navigate(Navigation),
}
