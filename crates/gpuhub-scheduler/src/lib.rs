//! gpuhub-scheduler: GPU slot allocation for gpuhub
//!
//! This crate provides the allocation logic on top of the store:
//! - Pluggable placement strategies (first-fit)
//! - Idempotent get-or-assign and release
//! - A single-writer service serializing all allocator operations

pub mod allocator;
pub mod service;
pub mod strategy;

pub use allocator::GpuResourceAllocator;
pub use service::{AllocatorHandle, AllocatorService};
pub use strategy::{strategy_for, AssignmentStrategy, FirstFitStrategy};
