// SPDX-License-Identifier: GPL-3.0-only

//! Catalog service client
//!
//! Types and HTTP client for the external library-catalog REST API.

pub mod client;
pub mod types;

pub use client::{CatalogApi, HttpCatalogClient};
pub use types::{ApiError, ApiResult, Book, BorrowRecord, UserHome};
