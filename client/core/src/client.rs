//! Platform API Client
//!
//! Thin HTTP plumbing shared by streaming sessions and the research job API.
//! Holds the base URL and a pooled `reqwest::Client`, both fixed at
//! construction from a [`ClientConfig`].
//!
//! Non-streaming calls get the configured request timeout. Streaming calls
//! only get the connect timeout, since a healthy stream may stay open for as
//! long as the server keeps producing.
//!
//! URLs are built from path segments on the parsed base URL, so identifiers
//! issued by the server are percent-encoded and cannot change the route.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, Url};
use serde::{de::DeserializeOwned, Serialize};

use crate::config::ClientConfig;
use crate::error::ApiError;

/// HTTP client bound to one platform deployment
#[derive(Clone, Debug)]
pub struct ApiClient {
    /// Parsed base URL
    base_url: Url,
    /// Timeout for non-streaming requests
    request_timeout: Duration,
    /// Event channel capacity for streaming sessions
    event_buffer: usize,
    /// Longest line accepted from an event stream
    max_line_bytes: usize,
    /// HTTP client
    http_client: reqwest::Client,
}

impl ApiClient {
    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidUrl`] if the base URL does not parse or
    /// cannot carry a path, and [`ApiError::Request`] if the HTTP client
    /// cannot be built (for example when no TLS backend is available).
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let base_url = Url::parse(config.base_url.trim_end_matches('/'))
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {e}", config.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(config.base_url.clone()));
        }

        let http_client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            base_url,
            request_timeout: config.request_timeout,
            event_buffer: config.event_buffer.max(1),
            max_line_bytes: config.max_line_bytes.max(1),
            http_client,
        })
    }

    /// Get the base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Event channel capacity for streaming sessions
    #[must_use]
    pub fn event_buffer(&self) -> usize {
        self.event_buffer
    }

    /// Longest line accepted from an event stream
    #[must_use]
    pub fn max_line_bytes(&self) -> usize {
        self.max_line_bytes
    }

    /// Build an absolute URL for a fixed API path
    #[must_use]
    pub fn url(&self, path: &str) -> Url {
        self.url_with(path, &[])
    }

    /// Build an absolute URL for a fixed API path followed by `segments`
    ///
    /// Each entry of `segments` becomes exactly one percent-encoded path
    /// segment, whatever characters it contains.
    #[must_use]
    pub fn url_with(&self, path: &str, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Always a base URL, checked in `new`
        if let Ok(mut parts) = url.path_segments_mut() {
            parts
                .pop_if_empty()
                .extend(path.split('/').filter(|s| !s.is_empty()))
                .extend(segments);
        }
        url
    }

    /// Start a request with the non-streaming timeout applied
    #[must_use]
    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http_client
            .request(method, url)
            .timeout(self.request_timeout)
    }

    /// Start a streaming request (connect timeout only)
    #[must_use]
    pub fn stream_request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http_client
            .request(method, self.url(path))
            .header(reqwest::header::ACCEPT, "text/event-stream")
    }

    /// Send a request and fail on non-success status
    ///
    /// # Errors
    ///
    /// [`ApiError::Request`] if no response arrived, [`ApiError::Status`]
    /// with the server's response text for any non-2xx status.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request.send().await?;
        check_status(response).await
    }

    /// `GET` a URL and decode the JSON body
    ///
    /// # Errors
    ///
    /// Transport and status errors as for [`ApiClient::send`];
    /// [`ApiError::Decode`] if the body is not the expected JSON.
    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        let response = self.send(self.request(Method::GET, url)).await?;
        decode_json(response).await
    }

    /// `POST` a JSON body to a URL and decode the JSON response
    ///
    /// # Errors
    ///
    /// Transport and status errors as for [`ApiClient::send`];
    /// [`ApiError::Decode`] if the body is not the expected JSON.
    pub async fn post_json<B, T>(&self, url: Url, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .send(self.request(Method::POST, url).json(body))
            .await?;
        decode_json(response).await
    }
}

/// Turn a non-success response into [`ApiError::Status`]
///
/// # Errors
///
/// Returns [`ApiError::Status`] carrying the response text when the status
/// is not 2xx.
pub async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    let message = if message.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        extract_error_message(&message)
    };

    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Pull a human-readable message out of an error body
///
/// Platform errors are usually `{"detail": "..."}` or `{"error": "..."}`;
/// anything else is passed through verbatim.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["detail", "error", "message"]
                .iter()
                .find_map(|key| value.get(key).and_then(|v| v.as_str()).map(String::from))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ApiError::Read(e.to_string()))?;
    Ok(serde_json::from_slice(&bytes)?)
}
