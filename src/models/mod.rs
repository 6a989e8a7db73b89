//! Core data models for the Harbor storage gateway.
//!
//! These entities represent buckets, the file/directory nodes inside them and
//! the caller identity handed over by the authentication layer. They map to
//! database rows via `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod bucket;
pub mod object;
pub mod user;
