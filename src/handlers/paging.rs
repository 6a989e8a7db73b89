//! JSON envelope for paginated listings.

use crate::services::pagination::{Page, PageNumbers};
use axum::http::{HeaderMap, Uri, header};
use serde::{Deserialize, Serialize};

/// `?offset=&limit=` query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PagedResponse<T> {
    pub count: i64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub page: PageNumbers,
    pub results: Vec<T>,
}

impl<T> PagedResponse<T> {
    /// Links are absolute when the request carried a `Host` header.
    pub fn new(page: Page<T>, uri: &Uri, headers: &HeaderMap) -> Self {
        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok());
        Self {
            count: page.count,
            next: page.next_link(uri, host),
            previous: page.previous_link(uri, host),
            page: page.page_numbers(),
            results: page.items,
        }
    }
}
