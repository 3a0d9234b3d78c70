//! REST API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use gpuhub_core::{GpuhubError, HostStatus, Placement};
use gpuhub_scheduler::AllocatorHandle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Application state shared across handlers
pub struct AppState {
    pub allocator: AllocatorHandle,
}

type ApiError = (StatusCode, String);

/// Create the API router
pub fn create_router(allocator: AllocatorHandle) -> Router {
    let state = Arc::new(AppState { allocator });

    Router::new()
        .route(
            "/api/v1/allocations",
            post(get_or_assign).get(list_allocations),
        )
        .route(
            "/api/v1/allocations/:requester",
            get(get_allocation).delete(release_allocation),
        )
        .route("/api/v1/hosts", get(get_hosts))
        .route("/api/v1/status", get(get_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(err: GpuhubError) -> ApiError {
    let status = match &err {
        GpuhubError::InsufficientResources { .. } => StatusCode::SERVICE_UNAVAILABLE,
        GpuhubError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!(error = %err, "Allocator request failed");
    }
    (status, err.to_string())
}

/// Request to reserve GPUs for a requester
#[derive(Debug, Deserialize)]
pub struct AllocationRequest {
    /// Requester identifier (e.g. user name)
    pub requester: String,
    /// Number of GPUs wanted
    #[serde(default = "default_gpu_count")]
    pub gpu_count: u32,
}

fn default_gpu_count() -> u32 {
    1
}

/// Placement of a requester, with the host's driver version
#[derive(Debug, Serialize, Deserialize)]
pub struct AllocationResponse {
    pub requester: String,
    pub host: String,
    pub slots: Vec<u32>,
    pub driver_version: Option<String>,
}

/// Entry of the allocation listing
#[derive(Debug, Serialize, Deserialize)]
pub struct ReservationResponse {
    pub requester: String,
    pub host: String,
    pub slots: Vec<u32>,
}

impl ReservationResponse {
    fn new(requester: String, placement: Placement) -> Self {
        Self {
            requester,
            host: placement.host,
            slots: placement.slots,
        }
    }
}

async fn allocation_response(
    state: &AppState,
    requester: String,
    placement: Placement,
) -> Result<AllocationResponse, ApiError> {
    let driver_version = state
        .allocator
        .driver_version(&placement.host)
        .await
        .map_err(error_response)?;

    Ok(AllocationResponse {
        requester,
        host: placement.host,
        slots: placement.slots,
        driver_version,
    })
}

/// Get the requester's placement, assigning one if needed
async fn get_or_assign(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AllocationRequest>,
) -> Result<Json<AllocationResponse>, ApiError> {
    info!(
        requester = %req.requester,
        gpu_count = req.gpu_count,
        "Allocation requested"
    );

    let placement = state
        .allocator
        .get_or_assign(&req.requester, req.gpu_count)
        .await
        .map_err(error_response)?;

    let response = allocation_response(&state, req.requester, placement).await?;
    Ok(Json(response))
}

/// List all allocations
async fn list_allocations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ReservationResponse>>, ApiError> {
    let table = state.allocator.allocations().await.map_err(error_response)?;
    let responses = table
        .placements()
        .into_iter()
        .map(|(requester, placement)| ReservationResponse::new(requester, placement))
        .collect();
    Ok(Json(responses))
}

/// Get a requester's placement
async fn get_allocation(
    State(state): State<Arc<AppState>>,
    Path(requester): Path<String>,
) -> Result<Json<AllocationResponse>, ApiError> {
    let placement = state
        .allocator
        .placement_of(&requester)
        .await
        .map_err(error_response)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                format!("No allocation for requester: {}", requester),
            )
        })?;

    let response = allocation_response(&state, requester, placement).await?;
    Ok(Json(response))
}

/// Release a requester's GPUs
async fn release_allocation(
    State(state): State<Arc<AppState>>,
    Path(requester): Path<String>,
) -> Result<StatusCode, ApiError> {
    info!(requester = %requester, "Release requested");

    state
        .allocator
        .release(&requester)
        .await
        .map_err(error_response)?;

    Ok(StatusCode::NO_CONTENT)
}

/// Get host occupancy
async fn get_hosts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<HostStatus>>, ApiError> {
    let hosts = state.allocator.hosts().await.map_err(error_response)?;
    Ok(Json(hosts))
}

/// System status response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub hosts: usize,
    pub total_slots: u64,
    pub free_slots: u64,
    pub requesters: usize,
}

/// Get system status
async fn get_status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, ApiError> {
    let hosts = state.allocator.hosts().await.map_err(error_response)?;
    let table = state.allocator.allocations().await.map_err(error_response)?;

    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        hosts: hosts.len(),
        total_slots: hosts.iter().map(|h| u64::from(h.capacity)).sum(),
        free_slots: hosts.iter().map(|h| u64::from(h.free)).sum(),
        requesters: table.placements().len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use gpuhub_scheduler::{AllocatorService, GpuResourceAllocator};
    use tower::ServiceExt;

    fn router(dir: &tempfile::TempDir, catalog: &str) -> Router {
        std::fs::write(dir.path().join("resources.txt"), catalog).unwrap();
        let handle = AllocatorService::spawn(GpuResourceAllocator::new(
            dir.path().join("resources.txt"),
            dir.path().join("allocations.json"),
        ))
        .unwrap();
        create_router(handle)
    }

    fn assign(requester: &str, gpu_count: u32) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/allocations")
            .header("content-type", "application/json")
            .body(Body::from(format!(
                r#"{{"requester":"{}","gpu_count":{}}}"#,
                requester, gpu_count
            )))
            .unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_assign_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(&dir, "node1 2 375.66\n");

        let response = app.clone().oneshot(assign("alice", 2)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: AllocationResponse = body_json(response).await;
        assert_eq!(body.host, "node1");
        assert_eq!(body.slots, vec![0, 1]);
        assert_eq!(body.driver_version.as_deref(), Some("375.66"));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/allocations/alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_insufficient_resources_is_503() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(&dir, "node1 1\n");

        let response = app.clone().oneshot(assign("alice", 2)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = app.oneshot(assign("bob", 0)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_huge_gpu_count_is_503() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(&dir, "node1 2\n");

        let response = app.clone().oneshot(assign("alice", u32::MAX)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = app.oneshot(assign("bob", 2)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(&dir, "node1 1\n");
        app.clone().oneshot(assign("alice", 1)).await.unwrap();

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("DELETE")
                        .uri("/api/v1/allocations/alice")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/allocations/alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_release_encoded_requester() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(&dir, "node1 1\n");
        let response = app.clone().oneshot(assign("team/alice", 1)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/v1/allocations/team%2Falice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app.oneshot(assign("bob", 1)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(&dir, "node1 2\nnode2 4\n");
        app.clone().oneshot(assign("alice", 3)).await.unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let status: StatusResponse = body_json(response).await;
        assert_eq!(status.hosts, 2);
        assert_eq!(status.total_slots, 6);
        assert_eq!(status.free_slots, 3);
        assert_eq!(status.requesters, 1);
    }
}
