//! Cluster HTTP Routes
//!
//! Operator view of the monitored cluster and the three operator commands:
//! switchover, forced failover and the interactive/automatic toggle.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::election::{Election, ElectionKind};
use crate::monitor::ClusterHandle;
use crate::observability::Diagnostic;
use crate::promotion::{CrashRecord, PromotionError, PromotionErrorKind, PromotionReport};
use crate::topology::ClusterSnapshot;

// ==================
// Request/Response Types
// ==================

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub cluster: ClusterSnapshot,
    pub promotion_in_progress: bool,
    pub metrics: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct TopologyNode {
    pub url: String,
    pub role: String,
    pub source: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TopologyResponse {
    pub kind: &'static str,
    pub leader: Option<String>,
    pub nodes: Vec<TopologyNode>,
}

#[derive(Debug, Deserialize)]
pub struct DiagnosticsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Deserialize)]
pub struct ElectionQuery {
    #[serde(default)]
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ModeRequest {
    pub interactive: bool,
}

#[derive(Debug, Serialize)]
pub struct ModeResponse {
    pub interactive: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn promotion_error(e: PromotionError) -> ApiError {
    let status = match e.kind {
        PromotionErrorKind::AlreadyInProgress => StatusCode::CONFLICT,
        PromotionErrorKind::ForbiddenTransition => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (
        status,
        Json(ErrorResponse {
            error: e.message.clone(),
            code: e.kind.code().to_string(),
        }),
    )
}

// ==================
// Cluster Routes
// ==================

/// Routes mounted under `/cluster`.
pub fn cluster_routes(handle: ClusterHandle) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/topology", get(topology_handler))
        .route("/diagnostics", get(diagnostics_handler))
        .route("/crashes", get(crashes_handler))
        .route("/election", get(election_handler))
        .route("/switchover", post(switchover_handler))
        .route("/failover", post(failover_handler))
        .route("/mode", post(mode_handler))
        .with_state(handle)
}

// ==================
// Read Handlers
// ==================

async fn status_handler(State(handle): State<ClusterHandle>) -> Json<StatusResponse> {
    Json(StatusResponse {
        cluster: handle.snapshot().await,
        promotion_in_progress: handle.guard().is_in_progress(),
        metrics: handle.metrics().to_json(),
    })
}

async fn topology_handler(State(handle): State<ClusterHandle>) -> Json<TopologyResponse> {
    let cluster = handle.cluster().read().await;
    let nodes = cluster
        .nodes()
        .iter()
        .map(|n| TopologyNode {
            url: n.url(),
            role: n.role.as_str().to_string(),
            source: n.status().map(|s| s.source_url()),
        })
        .collect();
    Json(TopologyResponse {
        kind: cluster.config.topology.as_str(),
        leader: cluster.leader().map(|n| n.url()),
        nodes,
    })
}

async fn diagnostics_handler(
    State(handle): State<ClusterHandle>,
    Query(query): Query<DiagnosticsQuery>,
) -> Json<Vec<Diagnostic>> {
    Json(handle.diagnostics(query.limit).await)
}

async fn crashes_handler(State(handle): State<ClusterHandle>) -> Json<Vec<CrashRecord>> {
    Json(handle.crashes().await)
}

async fn election_handler(
    State(handle): State<ClusterHandle>,
    Query(query): Query<ElectionQuery>,
) -> Result<Json<Election>, ApiError> {
    let kind = match query.kind.as_deref() {
        None | Some("switchover") => ElectionKind::Switchover,
        Some("failover") => ElectionKind::Failover,
        Some(other) => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: format!("unknown election kind '{}'", other),
                    code: "INVALID_ELECTION_KIND".to_string(),
                }),
            ))
        }
    };
    Ok(Json(handle.elect(kind).await))
}

// ==================
// Operator Commands
// ==================

async fn switchover_handler(
    State(handle): State<ClusterHandle>,
) -> Result<Json<PromotionReport>, ApiError> {
    handle.switchover().await.map(Json).map_err(promotion_error)
}

async fn failover_handler(
    State(handle): State<ClusterHandle>,
) -> Result<Json<PromotionReport>, ApiError> {
    handle.failover().await.map(Json).map_err(promotion_error)
}

async fn mode_handler(
    State(handle): State<ClusterHandle>,
    Json(request): Json<ModeRequest>,
) -> Json<ModeResponse> {
    handle.set_interactive(request.interactive).await;
    Json(ModeResponse {
        interactive: request.interactive,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::config::{NodeConfig, ReplmgrConfig};
    use crate::topology::sandbox::{leader_state, replica_state};
    use crate::topology::{Cluster, NodeAddr, SandboxDriver};

    async fn handle() -> ClusterHandle {
        let mut config = ReplmgrConfig::with_nodes(
            "shard1",
            vec![NodeConfig::new("db1", 3306), NodeConfig::new("db2", 3306)],
        );
        config.failover.switch_wait_trx_secs = 1;
        let driver = Arc::new(SandboxDriver::new());
        let leader = NodeAddr::new("db1", 3306);
        driver.add_node(&leader, leader_state(1, "0-1-10"));
        driver.add_node(&NodeAddr::new("db2", 3306), replica_state(&leader, 2, "0-1-10"));
        let handle = ClusterHandle::new(Cluster::from_config(&config), driver);
        handle.tick().await;
        handle
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_status_reports_leader() {
        let app = cluster_routes(handle().await);
        let response = app
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["cluster"]["leader"], "db1:3306");
        assert_eq!(json["promotion_in_progress"], false);
    }

    #[tokio::test]
    async fn test_topology_lists_sources() {
        let app = cluster_routes(handle().await);
        let response = app
            .oneshot(Request::get("/topology").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let json = body_json(response).await;
        assert_eq!(json["kind"], "leader_replica");
        assert_eq!(json["nodes"][1]["source"], "db1:3306");
    }

    #[tokio::test]
    async fn test_unknown_election_kind_is_rejected() {
        let app = cluster_routes(handle().await);
        let response = app
            .oneshot(
                Request::get("/election?kind=sideways")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_switchover_command() {
        let handle = handle().await;
        let app = cluster_routes(handle.clone());
        let response = app
            .oneshot(Request::post("/switchover").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["elected"], "db2:3306");
        assert_eq!(handle.snapshot().await.leader.as_deref(), Some("db2:3306"));
    }

    #[tokio::test]
    async fn test_promotion_in_progress_is_conflict() {
        let handle = handle().await;
        let _permit = handle.guard().try_acquire().unwrap();
        let app = cluster_routes(handle.clone());
        let response = app
            .oneshot(Request::post("/failover").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let json = body_json(response).await;
        assert_eq!(json["code"], "PROMOTION_IN_PROGRESS");
    }

    #[tokio::test]
    async fn test_mode_toggle() {
        let handle = handle().await;
        let app = cluster_routes(handle.clone());
        let response = app
            .oneshot(
                Request::post("/mode")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"interactive": false}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!handle.cluster().read().await.config.interactive);
    }
}
