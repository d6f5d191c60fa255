//! Pluggable HTTP transport.
//!
//! The orchestrator only ever issues GET requests through [`Transport`], so an
//! alternate client (different TLS stack, recorded fixtures, a test stub) can
//! be dropped in without touching the resilience logic.

use std::time::Duration;

use async_trait::async_trait;
use http::HeaderMap;
use thiserror::Error;
use url::Url;

use crate::modules::session::CookieMap;

mod reqwest_client;

pub use reqwest_client::ReqwestTransport;

/// Contract for the HTTP client used by the fetch pipeline.
///
/// Implementations follow redirects and report the cookies the final response
/// set. They must not keep their own cookie jar: cookies arrive in the
/// request headers and leave in [`TransportResponse::cookies`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// A single GET request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: Url,
    pub params: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub timeout: Duration,
}

impl TransportRequest {
    pub fn get(url: Url, timeout: Duration) -> Self {
        Self {
            url,
            params: Vec::new(),
            headers: HeaderMap::new(),
            timeout,
        }
    }

    pub fn with_params(mut self, params: Vec<(String, String)>) -> Self {
        self.params = params;
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// Minimal response returned by a transport.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
    pub cookies: CookieMap,
    /// Final URL after redirects.
    pub url: Url,
}

impl TransportResponse {
    /// Any 2xx status.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("failed to read response body: {0}")]
    Body(String),
    #[error("request could not be built: {0}")]
    InvalidRequest(String),
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Whether a later attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::InvalidRequest(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_invalid_requests_are_final() {
        assert!(TransportError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(TransportError::Connect("refused".into()).is_retryable());
        assert!(TransportError::Body("truncated".into()).is_retryable());
        assert!(TransportError::Other("reset".into()).is_retryable());
        assert!(!TransportError::InvalidRequest("bad header".into()).is_retryable());
    }

    #[test]
    fn any_2xx_is_ok() {
        let response = |status| TransportResponse {
            status,
            body: String::new(),
            cookies: CookieMap::new(),
            url: Url::parse("https://a.com/").unwrap(),
        };
        assert!(response(200).is_ok());
        assert!(response(204).is_ok());
        assert!(!response(301).is_ok());
        assert!(!response(404).is_ok());
    }

    #[test]
    fn request_builder_keeps_parts() {
        let url = Url::parse("https://a.com/jobs").unwrap();
        let request = TransportRequest::get(url.clone(), Duration::from_secs(5))
            .with_params(vec![("q".into(), "rust".into())]);
        assert_eq!(request.url, url);
        assert_eq!(request.params.len(), 1);
        assert!(request.headers.is_empty());
        assert_eq!(request.timeout, Duration::from_secs(5));
    }
}
