//! HTTP handlers. Each one extracts its inputs, calls into
//! `HarborService` and maps the outcome onto a response.

pub mod auth;
pub mod bucket_handlers;
pub mod dir_handlers;
pub mod download_handlers;
pub mod health_handlers;
pub mod object_handlers;
pub mod paging;
