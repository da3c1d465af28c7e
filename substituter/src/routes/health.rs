//! Health check endpoints
//!
//! - /health, /healthz - Liveness probe
//! - /status - Version, uptime and storage backends

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::routes::json_response;
use crate::server::AppState;

/// Liveness response
#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    /// Uptime in seconds
    pub uptime: u64,
    pub timestamp: String,
    /// Operating mode
    pub mode: &'static str,
}

/// Storage backends in use
#[derive(Serialize)]
pub struct StorageStatus {
    /// Compendium record store
    pub records: &'static str,
    /// Compendium file trees
    pub files: &'static str,
}

/// Effective substitution settings
#[derive(Serialize)]
pub struct SubstitutionStatus {
    pub container_workdir: String,
    pub id_length: usize,
    pub filename_prefix: String,
    pub metadata_fields: Vec<String>,
}

/// Status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub uptime: u64,
    pub mode: &'static str,
    pub storage: StorageStatus,
    pub substitution: SubstitutionStatus,
}

fn mode(state: &AppState) -> &'static str {
    if state.args.dev_mode {
        "development"
    } else {
        "production"
    }
}

/// Handle liveness probe (/health, /healthz)
pub fn health_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let response = HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.uptime_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        mode: mode(&state),
    };

    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"healthy":true,"error":"Serialization failed"}"#.to_string());

    json_response(StatusCode::OK, body)
}

/// Handle status endpoint (/status)
pub fn status_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let config = state.substitution.config();
    let response = StatusResponse {
        service: "substituter",
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.uptime_secs(),
        mode: mode(&state),
        storage: StorageStatus {
            records: state.substitution.store_backend(),
            files: state.substitution.file_backend(),
        },
        substitution: SubstitutionStatus {
            container_workdir: config.mount.container_workdir.clone(),
            id_length: config.id_length,
            filename_prefix: config.filename_prefix.clone(),
            metadata_fields: config.metadata_fields.clone(),
        },
    };

    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"service":"substituter","error":"Serialization failed"}"#.to_string());

    json_response(StatusCode::OK, body)
}
