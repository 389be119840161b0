//! # Backend Descriptor Resolver
//!
//! Given a configured address, performs exactly one request to the
//! well-known discovery path (`/ws/info/`) and turns the answer into a
//! [`BackendDescriptor`]. The resolver is stateless and never retries: a
//! backend that fails to resolve is simply absent for this cycle and gets
//! another chance on the next one.
//!
//! Failures are typed so the discovery loop can tell "backend is down" apart
//! from "backend (or relay) is misbehaving" in its logs.

use async_trait::async_trait;

use super::descriptor::{BackendDescriptor, BackendInfo, InfoError};
use crate::retrieve::{BackendClient, FetchError};

/// Path queried on every backend.
pub const DISCOVERY_PATH: &str = "ws/info/";

/// Why one backend could not be resolved.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The address does not form a valid URL.
    #[error("invalid address: {0}")]
    InvalidAddress(#[source] FetchError),
    /// Nothing answered in time.
    #[error("backend timed out: {0}")]
    Timeout(#[source] FetchError),
    /// Connection refused, DNS failure and friends.
    #[error("backend unreachable: {0}")]
    Unreachable(#[source] FetchError),
    /// The backend answered with a non-2xx status.
    #[error("backend answered with status {0}")]
    Status(u16),
    /// The body is not the expected JSON object.
    #[error("backend info is malformed: {0}")]
    Malformed(String),
    /// The body has no `id`; the backend is excluded from the registry.
    #[error("backend info has no id")]
    MissingId,
}

impl ResolveError {
    /// `true` when the backend is simply not there right now. Everything else
    /// points at a misconfiguration or a bug on one side or the other and is
    /// worth a louder log line.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            ResolveError::Timeout(_) | ResolveError::Unreachable(_) | ResolveError::Status(_)
        )
    }
}

impl From<FetchError> for ResolveError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Timeout { .. } => ResolveError::Timeout(err),
            FetchError::Transport { .. } => ResolveError::Unreachable(err),
            FetchError::InvalidUrl { .. } | FetchError::Build(_) => ResolveError::InvalidAddress(err),
        }
    }
}

impl From<InfoError> for ResolveError {
    fn from(err: InfoError) -> Self {
        match err {
            InfoError::MissingId => ResolveError::MissingId,
            InfoError::Malformed(reason) => ResolveError::Malformed(reason),
        }
    }
}

/// Resolves one configured address into a descriptor.
///
/// The discovery loop only depends on this trait, which keeps the loop
/// testable without a network.
#[async_trait]
pub trait Resolve: Send + Sync {
    /// Fetches and normalizes the self-description of `address`.
    async fn resolve(&self, address: &str) -> Result<BackendDescriptor, ResolveError>;
}

/// # HTTP Resolver
///
/// The production [`Resolve`] implementation: `GET http://<address>/ws/info/`.
#[derive(Debug, Clone)]
pub struct HttpResolver {
    client: BackendClient,
}

impl HttpResolver {
    /// Wraps a shared backend client. The client's timeout bounds each
    /// resolution.
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Resolve for HttpResolver {
    async fn resolve(&self, address: &str) -> Result<BackendDescriptor, ResolveError> {
        let base_url = BackendClient::base_url(address)?;
        let response = self.client.get(&base_url, DISCOVERY_PATH, &[]).await?;

        if !response.is_success() {
            return Err(ResolveError::Status(response.status.as_u16()));
        }

        let info = BackendInfo::from_slice(&response.body)?;
        Ok(BackendDescriptor::new(address.trim(), base_url, info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resolver(timeout: Duration) -> HttpResolver {
        HttpResolver::new(BackendClient::new(timeout).unwrap())
    }

    fn address_of(server: &MockServer) -> String {
        server.address().to_string()
    }

    #[tokio::test]
    async fn resolves_and_fills_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ws/info/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "a1", "zoom": 4})))
            .expect(1)
            .mount(&server)
            .await;

        let address = address_of(&server);
        let descriptor = resolver(Duration::from_secs(2)).resolve(&address).await.unwrap();

        assert_eq!(descriptor.id, "a1");
        assert_eq!(descriptor.name, address);
        assert_eq!(descriptor.base_url.as_str(), format!("http://{}/", address));
        assert_eq!(descriptor.info.zoom, json!(4));
        assert_eq!(descriptor.info.scope, json!("all"));
    }

    #[tokio::test]
    async fn non_success_status_is_unreachable_kind() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ws/info/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = resolver(Duration::from_secs(2))
            .resolve(&address_of(&server))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Status(500)));
        assert!(err.is_unreachable());
    }

    #[tokio::test]
    async fn malformed_body_is_not_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ws/info/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = resolver(Duration::from_secs(2))
            .resolve(&address_of(&server))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Malformed(_)));
        assert!(!err.is_unreachable());
    }

    #[tokio::test]
    async fn body_without_id_is_missing_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ws/info/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"zoom": 2})))
            .mount(&server)
            .await;

        let err = resolver(Duration::from_secs(2))
            .resolve(&address_of(&server))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::MissingId));
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ws/info/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "slow"}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let err = resolver(Duration::from_millis(200))
            .resolve(&address_of(&server))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Timeout(_)), "got {:?}", err);
        assert!(err.is_unreachable());
    }

    #[tokio::test]
    async fn invalid_address_is_reported_as_such() {
        let err = resolver(Duration::from_secs(1))
            .resolve("not a host:1")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidAddress(_)));
        assert!(!err.is_unreachable());
    }
}
