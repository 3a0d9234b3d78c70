//! gpuhub-store: Allocation table storage
//!
//! This crate provides persistence for the allocation table:
//! - JSON file storage with atomic replace
//! - Exclusive store lock shared across threads and processes (unix only)
//! - Occupancy derivation against the resource catalog

pub mod lock;
pub mod table;

pub use lock::StoreLock;
pub use table::AllocationStore;
