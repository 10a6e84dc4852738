// SPDX-License-Identifier: GPL-3.0-only

//! HTTP client for the catalog service

use super::types::{ApiEnvelope, ApiError, ApiResult, Book, BookList, UserHome};
use crate::constants::api;
use serde::de::DeserializeOwned;
use std::future::Future;
use tracing::{debug, warn};

/// Operations the scan screen needs from the catalog service.
///
/// The seam the coordinator is generic over, so tests can substitute an
/// in-memory catalog.
pub trait CatalogApi: Send + Sync {
    /// Full book list, used to resolve a scanned ISBN to a book
    fn list_books(&self) -> impl Future<Output = ApiResult<Vec<Book>>> + Send;

    /// A user's open borrow records and history
    fn user_home(&self, user_id: u32) -> impl Future<Output = ApiResult<UserHome>> + Send;

    /// Borrow a book for a user; returns the server's confirmation text
    fn borrow_book(
        &self,
        book_id: u32,
        user_id: u32,
    ) -> impl Future<Output = ApiResult<String>> + Send;

    /// Close a borrow record; returns the server's confirmation text
    fn return_book(&self, record_id: u32) -> impl Future<Output = ApiResult<String>> + Send;
}

/// Catalog client over HTTP
#[derive(Debug, Clone)]
pub struct HttpCatalogClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpCatalogClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(api::REQUEST_TIMEOUT)
            .connect_timeout(api::CONNECT_TIMEOUT)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Base URL this client talks to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> ApiResult<T> {
        debug!(url = %url, "GET");
        let response = self.http.get(&url).send().await.map_err(|e| {
            warn!(url = %url, error = %e, "Request failed");
            ApiError::Request(e.to_string())
        })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(ApiError::Server {
                status: status.as_u16(),
                message: extract_message(&body),
            });
        }
        serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn post_for_message(&self, url: String, body: serde_json::Value) -> ApiResult<String> {
        debug!(url = %url, "POST");
        let response = self.http.post(&url).json(&body).send().await.map_err(|e| {
            warn!(url = %url, error = %e, "Request failed");
            ApiError::Request(e.to_string())
        })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;
        let message = extract_message(&text);
        if status.is_success() {
            Ok(message)
        } else {
            Err(ApiError::Server {
                status: status.as_u16(),
                message,
            })
        }
    }
}

impl CatalogApi for HttpCatalogClient {
    async fn list_books(&self) -> ApiResult<Vec<Book>> {
        let list: BookList = self.get_json(self.url("/api/books/")).await?;
        Ok(list.books)
    }

    async fn user_home(&self, user_id: u32) -> ApiResult<UserHome> {
        self.get_json(self.url(&format!("/api/user_home/?user_id={}", user_id)))
            .await
    }

    async fn borrow_book(&self, book_id: u32, user_id: u32) -> ApiResult<String> {
        self.post_for_message(
            self.url(&format!("/api/books/borrow/{}/", book_id)),
            serde_json::json!({ "user_id": user_id }),
        )
        .await
    }

    async fn return_book(&self, record_id: u32) -> ApiResult<String> {
        self.post_for_message(
            self.url(&format!("/api/books/return/{}/", record_id)),
            serde_json::json!({}),
        )
        .await
    }
}

/// Pull the `message` field out of an envelope body, tolerating
/// non-JSON bodies (proxies, crashes)
fn extract_message(body: &str) -> String {
    serde_json::from_str::<ApiEnvelope>(body)
        .map(|env| env.message)
        .unwrap_or_default()
}
