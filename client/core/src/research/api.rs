//! Deep Research API
//!
//! The job endpoints the controller drives, behind an async trait so the
//! controller can run against the platform or against a scripted fake.
//!
//! # Endpoints
//!
//! ```text
//! POST /research/deep                       start a job
//! GET  /research/deep/{id}/status           poll
//! GET  /research/deep/{id}                  full result
//! POST /research/deep/{id}/cancel           request cancellation
//! GET  /research/deep/{id}/export?format=   download a report
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Method, Url};
use tracing::debug;

use crate::client::ApiClient;
use crate::error::ApiError;

use super::job::{
    CancelRequest, ExportFormat, JobId, JobPayload, JobStatusReport, StartJobRequest,
};

/// Base path of the deep research endpoints
pub const RESEARCH_JOBS_PATH: &str = "/research/deep";

/// Deep research job endpoints
///
/// Implement this trait to drive a [`JobController`] against something
/// other than the HTTP API.
///
/// [`JobController`]: super::JobController
#[async_trait]
pub trait ResearchApi: Send + Sync {
    /// Create a job; the returned payload carries the new id
    async fn start_job(&self, request: &StartJobRequest) -> Result<JobPayload, ApiError>;

    /// Fetch the lightweight status of a job
    async fn job_status(&self, id: &JobId) -> Result<JobStatusReport, ApiError>;

    /// Fetch the full job payload, including the final answer
    async fn job_result(&self, id: &JobId) -> Result<JobPayload, ApiError>;

    /// Ask the server to stop a job
    async fn cancel_job(&self, id: &JobId, request: &CancelRequest) -> Result<(), ApiError>;

    /// Download a report of a job
    async fn export(&self, id: &JobId, format: ExportFormat) -> Result<Bytes, ApiError>;
}

/// [`ResearchApi`] over the platform's HTTP API
#[derive(Clone, Debug)]
pub struct HttpResearchApi {
    client: ApiClient,
}

impl HttpResearchApi {
    /// Wrap an API client
    #[must_use]
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// The underlying client
    #[must_use]
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// URL of a job endpoint; the id is always a single path segment
    fn job_url(&self, id: &JobId, action: Option<&str>) -> Url {
        match action {
            Some(action) => self.client.url_with(RESEARCH_JOBS_PATH, &[id.as_str(), action]),
            None => self.client.url_with(RESEARCH_JOBS_PATH, &[id.as_str()]),
        }
    }
}

#[async_trait]
impl ResearchApi for HttpResearchApi {
    async fn start_job(&self, request: &StartJobRequest) -> Result<JobPayload, ApiError> {
        self.client
            .post_json(self.client.url(RESEARCH_JOBS_PATH), request)
            .await
    }

    async fn job_status(&self, id: &JobId) -> Result<JobStatusReport, ApiError> {
        self.client.get_json(self.job_url(id, Some("status"))).await
    }

    async fn job_result(&self, id: &JobId) -> Result<JobPayload, ApiError> {
        self.client.get_json(self.job_url(id, None)).await
    }

    async fn cancel_job(&self, id: &JobId, request: &CancelRequest) -> Result<(), ApiError> {
        let url = self.job_url(id, Some("cancel"));
        let response = self
            .client
            .send(self.client.request(Method::POST, url).json(request))
            .await?;
        debug!(job_id = %id, status = response.status().as_u16(), "Cancel acknowledged");
        Ok(())
    }

    async fn export(&self, id: &JobId, format: ExportFormat) -> Result<Bytes, ApiError> {
        let url = self.job_url(id, Some("export"));
        let response = self
            .client
            .send(
                self.client
                    .request(Method::GET, url)
                    .query(&[("format", format.as_str())]),
            )
            .await?;
        response
            .bytes()
            .await
            .map_err(|e| ApiError::Read(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::ClientConfig;

    fn api() -> HttpResearchApi {
        HttpResearchApi::new(
            ApiClient::new(&ClientConfig::new("http://localhost:8000/api/v1")).unwrap(),
        )
    }

    #[test]
    fn test_job_url() {
        let api = api();
        assert_eq!(
            api.job_url(&JobId::new("abc-123"), None).as_str(),
            "http://localhost:8000/api/v1/research/deep/abc-123"
        );
        assert_eq!(
            api.job_url(&JobId::new("abc-123"), Some("status")).as_str(),
            "http://localhost:8000/api/v1/research/deep/abc-123/status"
        );
    }

    #[test]
    fn test_job_url_encodes_reserved_characters() {
        let url = api().job_url(&JobId::new("x/../y?format=pdf#top"), Some("cancel"));
        assert_eq!(
            url.path(),
            "/api/v1/research/deep/x%2F..%2Fy%3Fformat=pdf%23top/cancel"
        );
        assert_eq!(url.query(), None);
    }
}
