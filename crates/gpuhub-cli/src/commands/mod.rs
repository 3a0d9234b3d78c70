//! CLI commands implementation

use anyhow::{anyhow, bail, Result};
use gpuhub_core::{GpuhubResult, HostStatus};
use gpuhub_scheduler::GpuResourceAllocator;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// API client for communicating with the daemon
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// URL of a single requester's allocation, with the id percent-encoded
    pub fn allocation_url(&self, requester: &str) -> Result<Url> {
        let mut url = Url::parse(&self.url("/api/v1/allocations"))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("API address '{}' cannot be a base URL", self.base_url))?
            .push(requester);
        Ok(url)
    }
}

/// Where commands are executed
pub enum Backend {
    /// Through the daemon's REST API
    Remote(ApiClient),
    /// Directly against the catalog and store files
    Local(Arc<GpuResourceAllocator>),
}

/// Run a blocking allocator call off the async runtime
async fn run_local<T, F>(allocator: &Arc<GpuResourceAllocator>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&GpuResourceAllocator) -> GpuhubResult<T> + Send + 'static,
{
    let allocator = Arc::clone(allocator);
    Ok(tokio::task::spawn_blocking(move || f(&allocator)).await??)
}

/// Allocation response from API
#[derive(Debug, Deserialize)]
pub struct Assignment {
    pub requester: String,
    pub host: String,
    pub slots: Vec<u32>,
    pub driver_version: Option<String>,
}

/// Allocation listing entry from API
#[derive(Debug, Deserialize)]
pub struct Reservation {
    pub requester: String,
    pub host: String,
    pub slots: Vec<u32>,
}

impl Backend {
    async fn assign(&self, requester: &str, gpus: u32) -> Result<Assignment> {
        match self {
            Backend::Remote(client) => {
                #[derive(Serialize)]
                struct AllocationRequest<'a> {
                    requester: &'a str,
                    gpu_count: u32,
                }

                let response = client
                    .client
                    .post(client.url("/api/v1/allocations"))
                    .json(&AllocationRequest {
                        requester,
                        gpu_count: gpus,
                    })
                    .send()
                    .await?;

                if !response.status().is_success() {
                    let error = response.text().await?;
                    bail!("Failed to assign GPUs: {}", error);
                }
                Ok(response.json().await?)
            }
            Backend::Local(allocator) => {
                let requester = requester.to_string();
                run_local(allocator, move |allocator| {
                    let placement = allocator.get_or_assign(&requester, gpus)?;
                    let driver_version = allocator.driver_version(&placement.host)?;
                    Ok(Assignment {
                        requester,
                        host: placement.host,
                        slots: placement.slots,
                        driver_version,
                    })
                })
                .await
            }
        }
    }

    async fn release(&self, requester: &str) -> Result<()> {
        match self {
            Backend::Remote(client) => {
                let response = client
                    .client
                    .delete(client.allocation_url(requester)?)
                    .send()
                    .await?;

                if !response.status().is_success() {
                    let error = response.text().await?;
                    bail!("Failed to release GPUs: {}", error);
                }
                Ok(())
            }
            Backend::Local(allocator) => {
                let requester = requester.to_string();
                run_local(allocator, move |allocator| allocator.release(&requester)).await?;
                Ok(())
            }
        }
    }

    async fn reservations(&self) -> Result<Vec<Reservation>> {
        match self {
            Backend::Remote(client) => {
                let response = client
                    .client
                    .get(client.url("/api/v1/allocations"))
                    .send()
                    .await?;

                if !response.status().is_success() {
                    let error = response.text().await?;
                    bail!("Failed to list allocations: {}", error);
                }
                Ok(response.json().await?)
            }
            Backend::Local(allocator) => {
                let table = run_local(allocator, |allocator| allocator.allocations()).await?;
                Ok(table
                    .placements()
                    .into_iter()
                    .map(|(requester, placement)| Reservation {
                        requester,
                        host: placement.host,
                        slots: placement.slots,
                    })
                    .collect())
            }
        }
    }

    async fn hosts(&self) -> Result<Vec<HostStatus>> {
        match self {
            Backend::Remote(client) => {
                let response = client.client.get(client.url("/api/v1/hosts")).send().await?;

                if !response.status().is_success() {
                    let error = response.text().await?;
                    bail!("Failed to get host status: {}", error);
                }
                Ok(response.json().await?)
            }
            Backend::Local(allocator) => run_local(allocator, |allocator| allocator.hosts()).await,
        }
    }
}

/// Reserve GPUs for a requester
pub async fn assign(backend: &Backend, requester: String, gpus: u32) -> Result<()> {
    let assignment = backend.assign(&requester, gpus).await?;

    println!("Requester '{}' assigned", assignment.requester);
    println!("  Host: {}", assignment.host);
    println!("  GPUs: {}", format_slots(&assignment.slots));
    if let Some(version) = assignment.driver_version {
        println!("  Driver: {}", version);
    }

    Ok(())
}

/// Release a requester's GPUs
pub async fn release(backend: &Backend, requester: String) -> Result<()> {
    backend.release(&requester).await?;
    println!("Requester '{}' released", requester);
    Ok(())
}

/// List all allocations
pub async fn ps(backend: &Backend) -> Result<()> {
    let reservations = backend.reservations().await?;

    if reservations.is_empty() {
        println!("No allocations found");
        return Ok(());
    }

    println!("{:<24} {:<24} {:<20}", "REQUESTER", "HOST", "GPUS");
    println!("{}", "-".repeat(70));
    for r in reservations {
        println!("{:<24} {:<24} {:<20}", r.requester, r.host, format_slots(&r.slots));
    }

    Ok(())
}

/// Show per-host occupancy
pub async fn hosts(backend: &Backend) -> Result<()> {
    let hosts = backend.hosts().await?;

    if hosts.is_empty() {
        println!("No hosts in catalog");
        return Ok(());
    }

    for host in hosts {
        println!(
            "{} - {}/{} free (driver: {})",
            host.name,
            host.free,
            host.capacity,
            host.driver_version.as_deref().unwrap_or("unknown")
        );
        for slot in host.slots {
            println!(
                "  [{}] {}",
                slot.index,
                slot.requester.as_deref().unwrap_or("-")
            );
        }
    }

    Ok(())
}

/// Show overall status
pub async fn top(backend: &Backend) -> Result<()> {
    let hosts = backend.hosts().await?;
    let reservations = backend.reservations().await?;

    let total: u64 = hosts.iter().map(|h| u64::from(h.capacity)).sum();
    let free: u64 = hosts.iter().map(|h| u64::from(h.free)).sum();

    println!("gpuhub v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Hosts: {}", hosts.len());
    println!("Requesters: {}", reservations.len());
    println!("GPUs: {} total, {} available", total, free);

    Ok(())
}

fn format_slots(slots: &[u32]) -> String {
    slots
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_slots() {
        assert_eq!(format_slots(&[0, 2, 3]), "0,2,3");
        assert_eq!(format_slots(&[]), "");
    }

    #[test]
    fn test_api_client_url() {
        let client = ApiClient::new("http://localhost:9190/");
        assert_eq!(
            client.url("/api/v1/hosts"),
            "http://localhost:9190/api/v1/hosts"
        );
    }

    #[test]
    fn test_allocation_url_encodes_requester() {
        let client = ApiClient::new("http://localhost:9190");
        assert_eq!(
            client.allocation_url("alice").unwrap().as_str(),
            "http://localhost:9190/api/v1/allocations/alice"
        );
        assert_eq!(
            client.allocation_url("team/a?b#c").unwrap().as_str(),
            "http://localhost:9190/api/v1/allocations/team%2Fa%3Fb%23c"
        );
    }

    #[tokio::test]
    async fn test_local_backend() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("resources.txt"), "n1 2 390.12\n").unwrap();
        let backend = Backend::Local(Arc::new(GpuResourceAllocator::new(
            dir.path().join("resources.txt"),
            dir.path().join("allocations.json"),
        )));

        let assignment = backend.assign("alice", 2).await.unwrap();
        assert_eq!(assignment.slots, vec![0, 1]);
        assert_eq!(assignment.driver_version.as_deref(), Some("390.12"));

        assert_eq!(backend.reservations().await.unwrap().len(), 1);
        backend.release("alice").await.unwrap();
        assert!(backend.reservations().await.unwrap().is_empty());
        assert_eq!(backend.hosts().await.unwrap()[0].free, 2);
    }
}
