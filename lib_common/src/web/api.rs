//! # REST Endpoints
//!
//! The thin HTTP surface the UI uses next to its STOMP session: the current
//! backend listing, two data proxies and a liveness check.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::AppState;
use crate::discovery::UnknownServiceError;
use crate::retrieve::FetchError;

/// Query parameter naming the target backend of a proxy request.
const SERVICE_PARAM: &str = "service";

/// # API Error
///
/// Everything a REST handler can fail with, rendered as a JSON body
/// `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request has no `service` parameter.
    #[error("missing 'service' query parameter")]
    MissingService,
    /// The registry does not know the requested service.
    #[error(transparent)]
    UnknownService(#[from] UnknownServiceError),
    /// The backend could not be reached.
    #[error("backend '{service}' is unreachable: {source}")]
    Upstream {
        /// Requested service id.
        service: String,
        /// Underlying failure.
        #[source]
        source: FetchError,
    },
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingService | ApiError::UnknownService(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// `GET /` sends browsers to the UI entry page.
pub async fn index() -> impl IntoResponse {
    (StatusCode::FOUND, [(header::LOCATION, "/index.html")])
}

/// `GET /ws/healthz`
pub async fn healthz() -> Json<&'static str> {
    Json("OK")
}

/// `GET /ws/backends/list`: the `info` object of every registered backend.
pub async fn backends_list(State(state): State<Arc<AppState>>) -> Json<Vec<Value>> {
    let snapshot = state.registry.snapshot();
    Json(snapshot.descriptors().map(|d| d.info.to_value()).collect())
}

/// `GET /ws/data/all?service=<id>`
pub async fn data_all(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    proxy(&state, "ws/data/all", &params, false).await
}

/// `GET /ws/data/within?service=<id>&...`, every parameter is forwarded.
pub async fn data_within(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    proxy(&state, "ws/data/within", &params, true).await
}

/// Relays one GET to the backend named by `service` and hands back its
/// status, content type and body untouched.
async fn proxy(
    state: &AppState,
    path: &str,
    params: &[(String, String)],
    forward_query: bool,
) -> Result<Response, ApiError> {
    let service = params
        .iter()
        .find(|(k, _)| k == SERVICE_PARAM)
        .map(|(_, v)| v.clone())
        .ok_or(ApiError::MissingService)?;

    let backend = state.registry.lookup(&service)?;
    let query: &[(String, String)] = if forward_query { params } else { &[] };

    debug!(service = %service, backend = %backend.name, path = path, "Proxying request");
    let upstream = state
        .client
        .get(&backend.base_url, path, query)
        .await
        .map_err(|source| {
            warn!(service = %service, error = %source, "Proxy request failed");
            ApiError::Upstream {
                service: service.clone(),
                source,
            }
        })?;

    let content_type = upstream
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));

    let mut response = (upstream.status, upstream.body).into_response();
    response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    Ok(response)
}
