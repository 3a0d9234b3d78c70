//! gpuhub-runtime: Spawn workflow glue
//!
//! This crate connects GPU placements to a container orchestrator:
//! - The orchestrator interface the spawn workflow drives
//! - Translation of a placement into host constraints and device mounts
//! - Start/stop flow that reserves before launch and releases after teardown

pub mod mounts;
pub mod spawner;
pub mod traits;

pub use mounts::{ContainerParameter, DeviceMounts, PlacementConstraint};
pub use spawner::{GpuSpawner, SpawnRequest, SpawnerConfig};
pub use traits::{ContainerOrchestrator, ContainerRequest, Endpoint};
