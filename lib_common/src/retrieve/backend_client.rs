//! # Backend HTTP Client
//!
//! A small asynchronous client around `reqwest` used for every request the
//! relay makes to a backend. Responses are returned as a [`RawResponse`]
//! (status, content type, body bytes) so callers decide what success means:
//! the resolver wants a 2xx JSON object, the proxy endpoints forward
//! whatever came back.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use url::Url;

/// User agent sent with every backend request.
const USER_AGENT: &str = concat!("backends-relay/", env!("CARGO_PKG_VERSION"));

/// Errors raised before a backend produced any HTTP response.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The configured address (or a joined path) does not form a valid URL.
    #[error("invalid backend url '{input}': {source}")]
    InvalidUrl {
        /// The text that failed to parse.
        input: String,
        /// Underlying parse failure.
        #[source]
        source: url::ParseError,
    },
    /// The request did not complete within the client timeout.
    #[error("request to {url} timed out")]
    Timeout {
        /// Target of the request.
        url: Url,
    },
    /// Connection refused, DNS failure, reset while reading the body, ...
    #[error("request to {url} failed: {source}")]
    Transport {
        /// Target of the request.
        url: Url,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// The underlying client could not be constructed.
    #[error("failed to build http client: {0}")]
    Build(#[source] reqwest::Error),
}

impl FetchError {
    /// `true` when the failure means "the backend is not reachable right now",
    /// as opposed to a configuration or programming problem.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, FetchError::Timeout { .. } | FetchError::Transport { .. })
    }
}

/// # Raw Response
///
/// Status and body of a backend response, untouched.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status returned by the backend.
    pub status: StatusCode,
    /// The backend's `Content-Type` header, if any.
    pub content_type: Option<String>,
    /// Full response body.
    pub body: Bytes,
}

impl RawResponse {
    /// Whether the status code is in the 2xx range.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// # Backend Client
///
/// Cheap to clone: `reqwest::Client` is reference counted internally and
/// pools connections across clones.
#[derive(Debug, Clone)]
pub struct BackendClient {
    inner: reqwest::Client,
}

impl BackendClient {
    /// Creates a client whose requests (connect + full body read) are
    /// bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let inner = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(FetchError::Build)?;
        Ok(Self { inner })
    }

    /// Root URL for a configured `host:port` address, e.g.
    /// `notebook:8080` becomes `http://notebook:8080/`.
    pub fn base_url(address: &str) -> Result<Url, FetchError> {
        let input = format!("http://{}/", address.trim());
        Url::parse(&input).map_err(|source| FetchError::InvalidUrl { input, source })
    }

    /// Performs `GET base + path` with the given query pairs and returns the
    /// raw response. Non-2xx statuses are not errors at this level.
    pub async fn get(
        &self,
        base: &Url,
        path: &str,
        query: &[(String, String)],
    ) -> Result<RawResponse, FetchError> {
        let url = base.join(path).map_err(|source| FetchError::InvalidUrl {
            input: format!("{}{}", base, path),
            source,
        })?;

        let mut request = self.inner.get(url.clone());
        if !query.is_empty() {
            request = request.query(query);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify(url.clone(), e))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await.map_err(|e| classify(url, e))?;

        Ok(RawResponse {
            status,
            content_type,
            body,
        })
    }
}

fn classify(url: Url, source: reqwest::Error) -> FetchError {
    if source.is_timeout() {
        FetchError::Timeout { url }
    } else {
        FetchError::Transport { url, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn base_url_appends_trailing_slash() {
        let url = BackendClient::base_url("notebook:8080").unwrap();
        assert_eq!(url.as_str(), "http://notebook:8080/");
    }

    #[test]
    fn base_url_rejects_garbage() {
        let err = BackendClient::base_url("bad host:port").unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));
        assert!(!err.is_unreachable());
    }

    #[tokio::test]
    async fn get_returns_non_success_status_without_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ws/data/all"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let client = BackendClient::new(Duration::from_secs(2)).unwrap();
        let base = Url::parse(&format!("{}/", server.uri())).unwrap();
        let res = client.get(&base, "ws/data/all", &[]).await.unwrap();

        assert!(!res.is_success());
        assert_eq!(res.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(&res.body[..], b"busy");
    }

    #[tokio::test]
    async fn get_forwards_query_pairs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ws/data/within"))
            .and(query_param("lat", "1.5"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_string("[]"),
            )
            .mount(&server)
            .await;

        let client = BackendClient::new(Duration::from_secs(2)).unwrap();
        let base = Url::parse(&format!("{}/", server.uri())).unwrap();
        let query = vec![("lat".to_string(), "1.5".to_string())];
        let res = client.get(&base, "ws/data/within", &query).await.unwrap();

        assert!(res.is_success());
        assert_eq!(res.content_type.as_deref(), Some("application/json"));
    }

    #[tokio::test]
    async fn connection_refused_is_unreachable() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = BackendClient::new(Duration::from_secs(2)).unwrap();
        let base = BackendClient::base_url(&format!("127.0.0.1:{}", port)).unwrap();
        let err = client.get(&base, "ws/info/", &[]).await.unwrap_err();
        assert!(err.is_unreachable());
    }
}
