//! Reqwest-backed [`Transport`].
//!
//! Thin adapter around `reqwest::Client` that maps reqwest failures onto
//! [`TransportError`] and collects `Set-Cookie` values from the final response.

use async_trait::async_trait;
use reqwest::{Client, redirect::Policy};

use super::{Transport, TransportError, TransportRequest, TransportResponse};
use crate::modules::session::CookieMap;

const MAX_REDIRECTS: usize = 10;

/// Default transport. Follows redirects and leaves cookie handling to the caller.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .redirect(Policy::limited(MAX_REDIRECTS))
            .cookie_store(false)
            .build()
            .map_err(|err| TransportError::InvalidRequest(err.to_string()))?;

        Ok(Self { client })
    }

    /// Wraps an existing client. It should not carry a cookie store of its
    /// own, or cookies will be sent twice.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .client
            .get(request.url.clone())
            .headers(request.headers.clone())
            .timeout(request.timeout);
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| map_error(err, request))?;

        let status = response.status().as_u16();
        let url = response.url().clone();
        let cookies: CookieMap = response
            .cookies()
            .map(|cookie| (cookie.name().to_string(), cookie.value().to_string()))
            .collect();
        let body = response
            .text()
            .await
            .map_err(|err| map_error(err, request))?;

        Ok(TransportResponse {
            status,
            body,
            cookies,
            url,
        })
    }
}

fn map_error(err: reqwest::Error, request: &TransportRequest) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(request.timeout)
    } else if err.is_builder() {
        TransportError::InvalidRequest(err.to_string())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else if err.is_body() || err.is_decode() {
        TransportError::Body(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}
