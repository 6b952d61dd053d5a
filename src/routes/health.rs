//! Health check endpoints
//!
//! Provides Kubernetes-style health checks:
//! - /health, /healthz - Liveness check (is the service running?)
//! - /ready, /readyz - Readiness check (can the ledger store take writes?)
//! - /version - Build information
//!
//! Readiness pings MongoDB when it is configured. The in-memory backend
//! (dev mode) is always ready.

use bson::doc;
use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::warn;

use crate::projection::HotCacheStats;
use crate::server::AppState;

use super::{json_response, FullBody};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Overall health status (true if service is running)
    pub healthy: bool,
    pub version: &'static str,
    /// Uptime in seconds
    pub uptime: u64,
    pub timestamp: String,
    /// Operating mode
    pub mode: &'static str,
    pub node_id: String,
    /// Ledger backend: "mongodb" or "memory"
    pub storage: &'static str,
    pub projection_cache: HotCacheStats,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyResponse {
    pub ready: bool,
    pub storage: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionResponse {
    pub version: &'static str,
    pub commit: &'static str,
    pub commit_full: &'static str,
    pub build_time: &'static str,
    pub service: &'static str,
}

fn storage_kind(state: &AppState) -> &'static str {
    if state.mongo.is_some() {
        "mongodb"
    } else {
        "memory"
    }
}

/// Liveness check
pub fn health_check(state: &AppState) -> Response<FullBody> {
    let response = HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        mode: if state.args.dev_mode {
            "development"
        } else {
            "production"
        },
        node_id: state.args.node_id.to_string(),
        storage: storage_kind(state),
        projection_cache: state.projections.hot_cache_stats(),
    };
    json_response(StatusCode::OK, &response)
}

/// Readiness check
pub async fn readiness_check(state: &AppState) -> Response<FullBody> {
    let storage = storage_kind(state);
    let error = match &state.mongo {
        Some(mongo) => mongo
            .inner()
            .database(mongo.db_name())
            .run_command(doc! { "ping": 1 })
            .await
            .err()
            .map(|e| {
                warn!("Readiness ping failed: {}", e);
                e.to_string()
            }),
        None => None,
    };

    let (status, ready) = match error {
        None => (StatusCode::OK, true),
        Some(_) => (StatusCode::SERVICE_UNAVAILABLE, false),
    };
    json_response(
        status,
        &ReadyResponse {
            ready,
            storage,
            error,
        },
    )
}

/// Version info for deployment verification
pub fn version_info() -> Response<FullBody> {
    json_response(
        StatusCode::OK,
        &VersionResponse {
            version: env!("CARGO_PKG_VERSION"),
            commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
            commit_full: option_env!("GIT_COMMIT_FULL").unwrap_or("unknown"),
            build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
            service: "studbook",
        },
    )
}
