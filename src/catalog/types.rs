// SPDX-License-Identifier: GPL-3.0-only

//! Catalog service payloads
//!
//! Field names mirror the catalog's JSON exactly; every endpoint wraps
//! its payload in an `{error, message}` envelope.

use serde::Deserialize;

/// A catalog book
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Book {
    pub id: u32,
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub isbn: String,
    /// Availability flag: true while the book is on loan
    #[serde(default)]
    pub is_borrowed: bool,
}

/// One borrow transaction.
///
/// The open-records list omits `returned` entirely; defaulting to false
/// matches the service's meaning (listed because still open).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BorrowRecord {
    pub id: u32,
    pub book_title: String,
    #[serde(default)]
    pub borrow_date: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub return_date: Option<String>,
    #[serde(default)]
    pub returned: bool,
    #[serde(default)]
    pub is_overdue: bool,
}

impl BorrowRecord {
    /// An open record is one not yet marked returned
    pub fn is_open(&self) -> bool {
        !self.returned
    }
}

/// Payload of `GET /api/user_home/`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserHome {
    #[serde(default)]
    pub username: Option<String>,
    /// Records still open for this user
    #[serde(default)]
    pub borrowed_books: Vec<BorrowRecord>,
    /// Full borrow history
    #[serde(default)]
    pub all_records: Vec<BorrowRecord>,
}

/// Payload of `GET /api/books/`
#[derive(Debug, Deserialize)]
pub(crate) struct BookList {
    #[serde(default)]
    pub books: Vec<Book>,
}

/// The `{error, message}` envelope every endpoint uses
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiEnvelope {
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub message: String,
}

/// Result type for catalog operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Error types for catalog operations
#[derive(Debug, Clone, PartialEq)]
pub enum ApiError {
    /// Transport failure: connect, timeout, TLS
    Request(String),
    /// Non-2xx response; `message` is the server's text, verbatim
    Server { status: u16, message: String },
    /// 2xx response with an unreadable body
    Decode(String),
}

impl ApiError {
    /// Text shown to the user: the server message verbatim when present,
    /// otherwise a generic network failure line.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Server { message, .. } if !message.is_empty() => message.clone(),
            _ => "Network error or no response from the catalog service".to_string(),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Request(msg) => write!(f, "Request failed: {}", msg),
            ApiError::Server { status, message } => {
                if message.is_empty() {
                    write!(f, "Server returned status {}", status)
                } else {
                    write!(f, "{}", message)
                }
            }
            ApiError::Decode(msg) => write!(f, "Malformed response: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}
