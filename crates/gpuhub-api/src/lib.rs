//! gpuhub-api: REST API server for gpuhub
//!
//! This crate provides the REST API in front of the allocator service:
//! - Get-or-assign and release
//! - Allocation listing
//! - Host occupancy and system status

pub mod rest;

pub use rest::create_router;
