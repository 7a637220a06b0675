//! # ExpTech Net
//!
//! HTTP network backend for the ExpTech offline engine.
//!
//! Implements the engine's [`NetworkBackend`] seam over `reqwest`: live
//! fetches for the interceptor and cache-bypassing fetches for install
//! time precaching. A transport-level failure maps to the engine's
//! network error and triggers its cache fallback; an HTTP error status
//! is a successful fetch carrying that status.

use std::time::Duration;

use async_trait::async_trait;
use exptech_sw::{FetchRequest, FetchResponse, NetworkBackend, SwError};
use hashbrown::HashMap;
use reqwest::Method;
use thiserror::Error;
use tracing::{debug, trace};

/// Errors that can occur performing a live fetch.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Invalid method: {0}")]
    InvalidMethod(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// User agent string.
    pub user_agent: String,

    /// Request timeout.
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("ExpTechOffline/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(30),
        }
    }
}

/// A [`NetworkBackend`] over a shared `reqwest` client.
pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    /// Build a backend from configuration.
    pub fn new(config: ClientConfig) -> Result<Self, NetError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent)
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client })
    }

    async fn execute(&self, request: &FetchRequest) -> Result<FetchResponse, NetError> {
        let method = Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|err| NetError::InvalidMethod(err.to_string()))?;

        let mut builder = self.client.request(method, request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if request.bypass_cache {
            builder = builder
                .header("Cache-Control", "no-cache")
                .header("Pragma", "no-cache");
        }

        trace!(url = %request.url, bypass = request.bypass_cache, "live fetch");
        let response = builder.send().await?;

        let status = response.status();
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_string(), value.to_string());
            }
        }
        let body = response.bytes().await?.to_vec();

        debug!(url = %request.url, status = status.as_u16(), bytes = body.len(), "live fetch completed");
        Ok(FetchResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body,
            from_cache: false,
        })
    }
}

#[async_trait]
impl NetworkBackend for HttpBackend {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, SwError> {
        self.execute(request)
            .await
            .map_err(|err| SwError::NetworkError(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend() -> HttpBackend {
        HttpBackend::new(ClientConfig {
            timeout: Duration::from_secs(2),
            ..ClientConfig::default()
        })
        .unwrap()
    }

    fn request(server: &MockServer, path: &str) -> FetchRequest {
        let url = Url::parse(&server.uri()).unwrap().join(path).unwrap();
        FetchRequest::get(url)
    }

    #[tokio::test]
    async fn test_fetch_ok_maps_status_headers_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/app.js"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("console.log(1)")
                    .insert_header("content-type", "text/javascript"),
            )
            .mount(&server)
            .await;

        let response = backend().fetch(&request(&server, "/app.js")).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"console.log(1)");
        assert_eq!(
            response.headers.get("content-type").map(String::as_str),
            Some("text/javascript")
        );
        assert!(!response.from_cache);
    }

    #[tokio::test]
    async fn test_error_status_is_a_successful_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let response = backend().fetch(&request(&server, "/missing")).await.unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.status_text, "Not Found");
    }

    #[tokio::test]
    async fn test_connection_failure_is_network_error() {
        let server = MockServer::start().await;
        let req = request(&server, "/anything");
        drop(server);

        let err = backend().fetch(&req).await.unwrap_err();
        assert!(matches!(err, SwError::NetworkError(_)));
    }

    #[tokio::test]
    async fn test_cache_bypass_sends_no_cache_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fresh"))
            .and(header("Cache-Control", "no-cache"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let req = request(&server, "/fresh").with_cache_bypass();
        let response = backend().fetch(&req).await.unwrap();
        assert_eq!(response.status, 200);
    }
}
