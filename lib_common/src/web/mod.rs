//! # Web Layer
//!
//! The axum router the relay serves:
//!
//! | Route | Handler |
//! |-------|---------|
//! | `GET /` | redirect to `/index.html` |
//! | `GET /ws/backends/list` | [`api::backends_list`] |
//! | `GET /ws/data/all` | [`api::data_all`] |
//! | `GET /ws/data/within` | [`api::data_within`] |
//! | `GET /ws/healthz` | [`api::healthz`] |
//! | `GET <prefix>/info` | [`sockjs::info`] |
//! | `GET <prefix>/{server}/{session}/websocket` | [`socket::sockjs_ws_handler`] |
//! | `GET <prefix>/websocket` | [`socket::raw_ws_handler`] |
//! | anything else | files from the static directory |

pub mod api;
pub mod socket;
pub mod sockjs;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::discovery::Registry;
use crate::messaging::SessionManager;
use crate::retrieve::BackendClient;

/// Default mount point of the SockJS endpoint.
pub const DEFAULT_SOCKJS_PREFIX: &str = "/socks-backends";
/// Default SockJS heartbeat period.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(25);

/// Knobs of the HTTP surface.
#[derive(Debug, Clone)]
pub struct WebSettings {
    /// Mount point of the SockJS endpoints, e.g. `/socks-backends`.
    pub sockjs_prefix: String,
    /// Period of SockJS `h` frames.
    pub heartbeat: Duration,
    /// Directory served for every path no route claims.
    pub static_dir: PathBuf,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            sockjs_prefix: DEFAULT_SOCKJS_PREFIX.to_string(),
            heartbeat: DEFAULT_HEARTBEAT,
            static_dir: PathBuf::from("static"),
        }
    }
}

/// # Application State
///
/// Shared by every handler.
#[derive(Debug)]
pub struct AppState {
    /// Read side of the backend registry.
    pub registry: Registry,
    /// Live client sessions.
    pub sessions: Arc<SessionManager>,
    /// Client for proxied backend requests.
    pub client: BackendClient,
    /// Route and transport settings.
    pub settings: WebSettings,
}

/// Normalizes a configured prefix to `/name` (leading slash, no trailing one).
fn normalize_prefix(prefix: &str) -> String {
    format!("/{}", prefix.trim_matches('/'))
}

/// Builds the complete router.
pub fn router(state: Arc<AppState>) -> Router {
    let prefix = normalize_prefix(&state.settings.sockjs_prefix);
    let static_files = ServeDir::new(&state.settings.static_dir);
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(api::index))
        .route("/ws/backends/list", get(api::backends_list))
        .route("/ws/data/all", get(api::data_all))
        .route("/ws/data/within", get(api::data_within))
        .route("/ws/healthz", get(api::healthz))
        .route(&format!("{}/info", prefix), get(sockjs::info))
        .route(&format!("{}/websocket", prefix), get(socket::raw_ws_handler))
        .route(
            &format!("{}/{{server}}/{{session}}/websocket", prefix),
            get(socket::sockjs_ws_handler),
        )
        .fallback_service(static_files)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
