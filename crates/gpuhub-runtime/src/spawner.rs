//! GPU-aware container spawner
//!
//! Reserves GPUs before asking the orchestrator for a container and returns
//! them to the pool once the container is torn down.

use gpuhub_core::{GpuhubError, GpuhubResult};
use gpuhub_scheduler::AllocatorHandle;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::mounts::{ContainerParameter, DeviceMounts};
use crate::traits::{ContainerOrchestrator, ContainerRequest, Endpoint};

/// Spawner configuration
#[derive(Debug, Clone)]
pub struct SpawnerConfig {
    /// Orchestrator group containers are created under
    pub group: String,
    /// Base working directory; each requester gets a subdirectory
    pub work_dir: String,
    /// How long to wait for a started container to become reachable
    pub start_timeout: Duration,
    /// Delay between reachability checks
    pub poll_interval: Duration,
}

impl Default for SpawnerConfig {
    fn default() -> Self {
        Self {
            group: "gpuhub".to_string(),
            work_dir: "/home".to_string(),
            start_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// A request to launch one container for a requester
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub requester: String,
    pub image: String,
    pub command: Vec<String>,
    pub gpu_count: u32,
}

/// Drives the orchestrator with GPU reservations attached
pub struct GpuSpawner {
    orchestrator: Arc<dyn ContainerOrchestrator>,
    allocator: AllocatorHandle,
    config: SpawnerConfig,
}

impl GpuSpawner {
    /// Create a new spawner
    pub fn new(
        orchestrator: Arc<dyn ContainerOrchestrator>,
        allocator: AllocatorHandle,
        config: SpawnerConfig,
    ) -> Self {
        Self {
            orchestrator,
            allocator,
            config,
        }
    }

    /// Container name used for a requester
    pub fn container_name(&self, requester: &str) -> String {
        format!("/{}/{}-notebook", self.config.group, requester)
    }

    /// Build the launch request, reserving GPUs when any are asked for
    pub async fn build_request(&self, request: &SpawnRequest) -> GpuhubResult<ContainerRequest> {
        let mut constraints = Vec::new();
        let mut parameters = Vec::new();

        if request.gpu_count > 0 {
            let placement = self
                .allocator
                .get_or_assign(&request.requester, request.gpu_count)
                .await?;
            let driver_version = self.allocator.driver_version(&placement.host).await?;
            let mounts = DeviceMounts::for_placement(&placement, driver_version.as_deref());

            constraints.push(mounts.constraint);
            parameters.extend(mounts.parameters);
        }

        parameters.push(ContainerParameter::new(
            "workdir",
            format!(
                "{}/{}",
                self.config.work_dir.trim_end_matches('/'),
                request.requester
            ),
        ));

        Ok(ContainerRequest {
            name: self.container_name(&request.requester),
            image: request.image.clone(),
            command: request.command.clone(),
            constraints,
            parameters,
        })
    }

    /// Launch the container and wait until it is reachable
    pub async fn start(&self, request: &SpawnRequest) -> GpuhubResult<Endpoint> {
        let container = self.build_request(request).await?;

        info!(
            requester = %request.requester,
            container = %container.name,
            orchestrator = self.orchestrator.name(),
            gpus = request.gpu_count,
            "Starting container"
        );

        if let Err(e) = self.orchestrator.start_container(&container).await {
            error!(
                requester = %request.requester,
                container = %container.name,
                error = %e,
                "Orchestrator rejected container"
            );
            if request.gpu_count > 0 {
                self.allocator.release(&request.requester).await?;
            }
            return Err(e);
        }

        let started = tokio::time::Instant::now();
        loop {
            if let Some(endpoint) = self.orchestrator.endpoint(&container.name).await? {
                info!(
                    container = %container.name,
                    ip = %endpoint.ip,
                    port = endpoint.port,
                    "Container reachable"
                );
                return Ok(endpoint);
            }

            if started.elapsed() >= self.config.start_timeout {
                warn!(
                    container = %container.name,
                    timeout_secs = self.config.start_timeout.as_secs(),
                    "Container did not become reachable"
                );
                return Err(GpuhubError::Runtime(format!(
                    "container {} not reachable after {:?}",
                    container.name, self.config.start_timeout
                )));
            }

            debug!(container = %container.name, "Waiting for container");
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Stop the requester's container and return its GPUs
    pub async fn stop(&self, requester: &str) -> GpuhubResult<()> {
        let name = self.container_name(requester);
        info!(requester = requester, container = %name, "Stopping container");

        self.orchestrator.stop_container(&name).await?;
        self.allocator.release(requester).await?;
        Ok(())
    }

    /// Endpoint of the requester's container, if running
    pub async fn poll(&self, requester: &str) -> GpuhubResult<Option<Endpoint>> {
        self.orchestrator
            .endpoint(&self.container_name(requester))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gpuhub_core::Placement;
    use gpuhub_scheduler::{AllocatorService, GpuResourceAllocator};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockOrchestrator {
        started: Mutex<Vec<ContainerRequest>>,
        stopped: Mutex<Vec<String>>,
        reject_start: bool,
        polls_until_ready: u32,
        polls: AtomicU32,
    }

    #[async_trait]
    impl ContainerOrchestrator for MockOrchestrator {
        async fn start_container(&self, request: &ContainerRequest) -> GpuhubResult<()> {
            if self.reject_start {
                return Err(GpuhubError::Runtime("deployment rejected".to_string()));
            }
            self.started.lock().unwrap().push(request.clone());
            Ok(())
        }

        async fn stop_container(&self, name: &str) -> GpuhubResult<()> {
            self.stopped.lock().unwrap().push(name.to_string());
            Ok(())
        }

        async fn endpoint(&self, _name: &str) -> GpuhubResult<Option<Endpoint>> {
            let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            if polls > self.polls_until_ready {
                Ok(Some(Endpoint {
                    ip: "10.0.0.7".to_string(),
                    port: 31000,
                }))
            } else {
                Ok(None)
            }
        }

        fn name(&self) -> &'static str {
            "mock"
        }
    }

    fn allocator(dir: &tempfile::TempDir, catalog: &str) -> AllocatorHandle {
        std::fs::write(dir.path().join("resources.txt"), catalog).unwrap();
        AllocatorService::spawn(GpuResourceAllocator::new(
            dir.path().join("resources.txt"),
            dir.path().join("allocations.json"),
        ))
        .unwrap()
    }

    fn config() -> SpawnerConfig {
        SpawnerConfig {
            group: "jupyter".to_string(),
            work_dir: "/data/".to_string(),
            start_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(5),
        }
    }

    fn request(requester: &str, gpu_count: u32) -> SpawnRequest {
        SpawnRequest {
            requester: requester.to_string(),
            image: "notebook:latest".to_string(),
            command: Vec::new(),
            gpu_count,
        }
    }

    #[tokio::test]
    async fn test_start_with_gpus() {
        let dir = tempfile::tempdir().unwrap();
        let handle = allocator(&dir, "gpu-a 2 375.66\n");
        let orchestrator = Arc::new(MockOrchestrator {
            polls_until_ready: 2,
            ..Default::default()
        });
        let spawner = GpuSpawner::new(orchestrator.clone(), handle.clone(), config());

        let endpoint = spawner.start(&request("alice", 2)).await.unwrap();
        assert_eq!(endpoint.port, 31000);

        let started = orchestrator.started.lock().unwrap().clone();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].name, "/jupyter/alice-notebook");
        assert_eq!(started[0].constraints[0].2, "gpu-a");
        assert!(started[0]
            .parameters
            .contains(&ContainerParameter::device("/dev/nvidia1")));
        assert_eq!(
            started[0].parameters.last(),
            Some(&ContainerParameter::new("workdir", "/data/alice"))
        );

        assert_eq!(
            handle.placement_of("alice").await.unwrap(),
            Some(Placement::new("gpu-a", vec![0, 1]))
        );
    }

    #[tokio::test]
    async fn test_start_without_gpus_skips_allocation() {
        let dir = tempfile::tempdir().unwrap();
        let handle = allocator(&dir, "gpu-a 1\n");
        let orchestrator = Arc::new(MockOrchestrator::default());
        let spawner = GpuSpawner::new(orchestrator.clone(), handle.clone(), config());

        spawner.start(&request("bob", 0)).await.unwrap();

        let started = orchestrator.started.lock().unwrap().clone();
        assert!(started[0].constraints.is_empty());
        assert_eq!(started[0].parameters.len(), 1);
        assert!(handle.allocations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_start_releases_gpus() {
        let dir = tempfile::tempdir().unwrap();
        let handle = allocator(&dir, "gpu-a 1\n");
        let orchestrator = Arc::new(MockOrchestrator {
            reject_start: true,
            ..Default::default()
        });
        let spawner = GpuSpawner::new(orchestrator, handle.clone(), config());

        let err = spawner.start(&request("carol", 1)).await.unwrap_err();
        assert!(matches!(err, GpuhubError::Runtime(_)));
        assert!(handle.placement_of("carol").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_gpus_available() {
        let dir = tempfile::tempdir().unwrap();
        let handle = allocator(&dir, "gpu-a 1\n");
        handle.get_or_assign("someone", 1).await.unwrap();

        let orchestrator = Arc::new(MockOrchestrator::default());
        let spawner = GpuSpawner::new(orchestrator.clone(), handle, config());

        let err = spawner.start(&request("dave", 1)).await.unwrap_err();
        assert!(matches!(err, GpuhubError::InsufficientResources { .. }));
        assert!(orchestrator.started.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let handle = allocator(&dir, "gpu-a 1\n");
        let orchestrator = Arc::new(MockOrchestrator {
            polls_until_ready: u32::MAX,
            ..Default::default()
        });
        let spawner = GpuSpawner::new(orchestrator, handle.clone(), config());

        let err = spawner.start(&request("erin", 1)).await.unwrap_err();
        assert!(matches!(err, GpuhubError::Runtime(_)));
        // Still held until the container is stopped
        assert!(handle.placement_of("erin").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stop_releases_gpus() {
        let dir = tempfile::tempdir().unwrap();
        let handle = allocator(&dir, "gpu-a 1\n");
        let orchestrator = Arc::new(MockOrchestrator::default());
        let spawner = GpuSpawner::new(orchestrator.clone(), handle.clone(), config());

        spawner.start(&request("frank", 1)).await.unwrap();
        spawner.stop("frank").await.unwrap();

        assert_eq!(
            orchestrator.stopped.lock().unwrap().clone(),
            vec!["/jupyter/frank-notebook".to_string()]
        );
        assert!(handle.allocations().await.unwrap().is_empty());
        assert!(spawner.start(&request("grace", 1)).await.is_ok());
    }
}
