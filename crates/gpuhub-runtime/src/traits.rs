//! Orchestrator trait definitions

use async_trait::async_trait;
use gpuhub_core::GpuhubResult;
use serde::{Deserialize, Serialize};

use crate::mounts::{ContainerParameter, PlacementConstraint};

/// Everything the orchestrator needs to launch one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRequest {
    /// Unique container name
    pub name: String,
    /// Image to run
    pub image: String,
    /// Command override, empty for the image default
    pub command: Vec<String>,
    /// Host placement constraints
    pub constraints: Vec<PlacementConstraint>,
    /// Docker parameters (devices, volumes, workdir)
    pub parameters: Vec<ContainerParameter>,
}

/// Network endpoint of a running container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: String,
    pub port: u16,
}

/// Container orchestrator driven by the spawn workflow
#[async_trait]
pub trait ContainerOrchestrator: Send + Sync {
    /// Submit a container for launch
    async fn start_container(&self, request: &ContainerRequest) -> GpuhubResult<()>;

    /// Stop and remove a container
    async fn stop_container(&self, name: &str) -> GpuhubResult<()>;

    /// Endpoint of the container once it is reachable
    async fn endpoint(&self, name: &str) -> GpuhubResult<Option<Endpoint>>;

    /// Get the orchestrator name
    fn name(&self) -> &'static str;
}
