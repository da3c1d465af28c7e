//! Substitution endpoints
//!
//! - POST /api/v1/substitution - create a composite compendium
//! - GET /api/v1/substitution - list substituted compendia

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use substitution_core::SubstitutionRequest;
use tracing::{info, warn};

use crate::server::AppState;
use crate::types::SubstituterError;

#[derive(Debug, Serialize)]
struct CreatedResponse<'a> {
    id: &'a str,
}

#[derive(Debug, Serialize)]
struct ListResponse {
    results: Vec<String>,
}

/// Handle POST /api/v1/substitution
pub async fn create_substitution(state: Arc<AppState>, body: Bytes) -> Response<Full<Bytes>> {
    let request: SubstitutionRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return error_response(e.into()),
    };

    let timeout = Duration::from_millis(state.args.request_timeout_ms);
    let result = match tokio::time::timeout(timeout, state.substitution.substitute(request)).await {
        Ok(result) => result,
        Err(_) => Err(SubstituterError::Timeout(format!(
            "substitution did not finish within {} ms",
            state.args.request_timeout_ms
        ))),
    };

    match result {
        Ok(composite) => {
            info!(id = %composite.id, "Substitution complete");
            match serde_json::to_vec(&CreatedResponse { id: &composite.id }) {
                Ok(body) => json_response(StatusCode::OK, body),
                Err(e) => error_response(SubstituterError::Internal(e.to_string())),
            }
        }
        Err(e) => error_response(e),
    }
}

/// Handle GET /api/v1/substitution
pub async fn list_substitutions(state: Arc<AppState>) -> Response<Full<Bytes>> {
    match state.substitution.list_substitutions().await {
        Ok(results) => match serde_json::to_vec(&ListResponse { results }) {
            Ok(body) => json_response(StatusCode::OK, body),
            Err(e) => error_response(SubstituterError::Internal(e.to_string())),
        },
        Err(e) => error_response(e),
    }
}

/// JSON response with CORS header
pub fn json_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

/// `{"error": <message>}` with the status of `err`
pub fn error_response(err: SubstituterError) -> Response<Full<Bytes>> {
    if err.is_client_error() {
        info!(error = %err, "Rejected substitution request");
    } else {
        warn!(error = %err, "Substitution request failed");
    }
    let (status, body) = err.into_status_code_and_body();
    json_response(status, body)
}
