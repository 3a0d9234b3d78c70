//! gpuhub-core: Core types for the gpuhub allocator
//!
//! This crate provides the fundamental types used throughout gpuhub:
//! - Resource catalog parsing (host capacities and driver versions)
//! - Allocation table and occupancy view
//! - Configuration types
//! - Error handling

pub mod catalog;
pub mod config;
pub mod error;
pub mod model;

pub use catalog::*;
pub use config::*;
pub use error::*;
pub use model::*;
