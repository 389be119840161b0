//! # Data Retrieval Module
//!
//! Centralized HTTP access to backend services. Both the descriptor resolver
//! (discovery) and the proxy endpoints (web) go through the same
//! [`BackendClient`], so request timeouts, the user agent and error
//! classification live in one place.
//!
//! ## Contained Modules:
//!
//! - **`backend_client`**: a thin `reqwest` wrapper that builds backend URLs
//!   from `host:port` addresses and returns raw status/body pairs without
//!   retrying. Retrying is the caller's business: discovery simply tries
//!   again on its next cycle.

/// Plain HTTP client for backend services.
pub mod backend_client;

pub use backend_client::{BackendClient, FetchError, RawResponse};
