//! Sync Manager HTTP API - read access and manual trigger.
//!
//! Exposes three routes:
//! - `GET /api/snapshot` - the currently published snapshot
//! - `GET /api/status` - orchestrator phase, counters and throttle stats
//! - `POST /api/sync` - run one sync cycle now

use crate::orchestrator::{SyncOrchestrator, SyncOutcome, SyncPhase, SyncStatus};
use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use teamsync::rate_limit::{ThrottleRegistry, ThrottleStats};
use teamsync::snapshot::Snapshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Shared state for the API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<SyncOrchestrator>,
    /// Absent when the source is not throttled (tests, stub sources)
    pub throttles: Option<Arc<ThrottleRegistry>>,
}

/// Response for `GET /api/status`.
#[derive(Serialize)]
pub struct StatusResponse {
    pub phase: SyncPhase,
    pub last_sync_time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub status: SyncStatus,
    pub throttles: Vec<ThrottleStats>,
}

/// Response for `POST /api/sync`.
#[derive(Serialize)]
pub struct SyncResponse {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_of: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// HTTP handlers
// ---------------------------------------------------------------------------

async fn get_snapshot(State(state): State<Arc<ApiState>>) -> Json<Snapshot> {
    let snapshot = state.orchestrator.current_snapshot();
    Json(Snapshot::clone(&snapshot))
}

async fn get_status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    let orchestrator = &state.orchestrator;
    Json(StatusResponse {
        phase: orchestrator.phase(),
        last_sync_time: orchestrator.last_sync_time(),
        status: orchestrator.status(),
        throttles: state
            .throttles
            .as_ref()
            .map(|t| t.stats())
            .unwrap_or_default(),
    })
}

async fn post_sync(State(state): State<Arc<ApiState>>) -> Result<Json<SyncResponse>, AppError> {
    info!("Manual sync requested");
    match state.orchestrator.trigger_sync().await {
        SyncOutcome::Completed(as_of) => Ok(Json(SyncResponse {
            outcome: "completed",
            as_of: Some(as_of),
            error: None,
        })),
        SyncOutcome::Rejected(_) => Err(AppError::AlreadyRunning),
        SyncOutcome::Failed(e) => Err(AppError::SyncFailed(e.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

enum AppError {
    AlreadyRunning,
    SyncFailed(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::AlreadyRunning => (
                StatusCode::CONFLICT,
                SyncResponse {
                    outcome: "rejected",
                    as_of: None,
                    error: None,
                },
            ),
            AppError::SyncFailed(msg) => (
                StatusCode::BAD_GATEWAY,
                SyncResponse {
                    outcome: "failed",
                    as_of: None,
                    error: Some(msg),
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn create_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST]);

    Router::new()
        .route("/api/snapshot", get(get_snapshot))
        .route("/api/status", get(get_status))
        .route("/api/sync", post(post_sync))
        .layer(cors)
        .with_state(Arc::new(state))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::CatalogSource;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use teamsync::rate_limit::EndpointFamily;
    use teamsync::snapshot::{Catalog, SnapshotStore};
    use teamsync::SyncError;
    use tokio::sync::Notify;
    use tower::ServiceExt;

    struct EmptySource;

    #[async_trait]
    impl CatalogSource for EmptySource {
        fn name(&self) -> &str {
            "empty"
        }

        async fn collect(&self) -> Result<Catalog, SyncError> {
            Ok(Catalog::default())
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl CatalogSource for BrokenSource {
        fn name(&self) -> &str {
            "broken"
        }

        async fn collect(&self) -> Result<Catalog, SyncError> {
            Err(SyncError::Transient("connection reset".into()))
        }
    }

    struct GatedSource {
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl CatalogSource for GatedSource {
        fn name(&self) -> &str {
            "gated"
        }

        async fn collect(&self) -> Result<Catalog, SyncError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(Catalog::default())
        }
    }

    fn make_state(source: Arc<dyn CatalogSource>) -> ApiState {
        let throttles = ThrottleRegistry::default();
        throttles.throttle_for(EndpointFamily::Machines);
        ApiState {
            orchestrator: Arc::new(SyncOrchestrator::new(
                source,
                Arc::new(SnapshotStore::default()),
                None,
            )),
            throttles: Some(Arc::new(throttles)),
        }
    }

    async fn send(router: Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_snapshot_before_first_sync_is_empty() {
        let router = create_router(make_state(Arc::new(EmptySource)));
        let (status, body) = send(router, "GET", "/api/snapshot").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["origin"], "empty");
        assert_eq!(body["catalog"]["machines"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_post_sync_completed_then_status() {
        let state = make_state(Arc::new(EmptySource));

        let (status, body) = send(create_router(state.clone()), "POST", "/api/sync").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "completed");
        assert!(body["as_of"].is_string());

        let (status, body) = send(create_router(state), "GET", "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"], "idle");
        assert_eq!(body["sync_count"], 1);
        assert!(body["last_sync_time"].is_string());
        assert_eq!(body["throttles"][0]["family"], "machines");
        assert_eq!(body["throttles"][0]["in_flight"], 0);
    }

    #[tokio::test]
    async fn test_post_sync_failed_returns_bad_gateway() {
        let router = create_router(make_state(Arc::new(BrokenSource)));
        let (status, body) = send(router, "POST", "/api/sync").await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["outcome"], "failed");
        assert!(body["error"].as_str().unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_post_sync_while_running_returns_conflict() {
        let source = Arc::new(GatedSource {
            started: Notify::new(),
            release: Notify::new(),
        });
        let state = make_state(source.clone());

        let first = {
            let router = create_router(state.clone());
            tokio::spawn(async move { send(router, "POST", "/api/sync").await })
        };
        source.started.notified().await;

        let (status, body) = send(create_router(state.clone()), "POST", "/api/sync").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["outcome"], "rejected");

        source.release.notify_one();
        let (status, _) = first.await.unwrap();
        assert_eq!(status, StatusCode::OK);
    }
}
