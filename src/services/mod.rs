//! Core services: bucket lifecycle, the object tree, pagination, byte ranges
//! and the coordinator that ties them to a blob backend.

pub mod bucket_manager;
pub mod harbor_service;
pub mod object_tree;
pub mod pagination;
pub mod range;
