//! HTTP client for the trainq job queue.
//!
//! Wraps the gateway endpoints (submit, status, result) using [`reqwest`]
//! and adds [`TrainClient::train`], which submits a request and polls until
//! the job finishes.

use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;
use trainq_core::serialization::{CorruptPayload, ModelDocument};
use trainq_core::training::TrainingRequest;
use trainq_core::types::{is_failed_status, JobId};

/// Default spacing between status polls in [`TrainClient::train`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Progress of a job as reported by `GET /status/{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct JobProgress {
    /// Percent complete in `[0, 100]`, or `-1` once the job failed.
    pub status: f64,
    pub finished: bool,
}

impl JobProgress {
    pub fn failed(&self) -> bool {
        is_failed_status(self.status)
    }
}

/// Errors from the queue client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with an unexpected non-2xx status.
    #[error("queue API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// The job id is unknown, or its result is not available yet.
    #[error("job {0} not found")]
    JobNotFound(JobId),

    /// The job finished with a failure; `diagnostic` is the server's report.
    #[error("job {job_id} failed:\n{diagnostic}")]
    TrainingFailed { job_id: JobId, diagnostic: String },

    /// The job did not finish within the configured ceiling.
    #[error("job {job_id} did not finish within {waited:?}")]
    Timeout { job_id: JobId, waited: Duration },

    /// The returned model document could not be parsed.
    #[error("invalid model document")]
    CorruptModel(#[from] CorruptPayload),
}

/// Client for one queue server.
#[derive(Debug, Clone)]
pub struct TrainClient {
    client: reqwest::Client,
    base_url: String,
    password: Option<String>,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl TrainClient {
    /// Create a client for the server at `base_url`, e.g. `http://host:3000`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            password: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }

    /// Send `password` as HTTP basic auth on every request.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Give up waiting in [`TrainClient::train`] after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enqueue a training request. Returns the job id.
    pub async fn submit(&self, request: &TrainingRequest) -> Result<JobId, ClientError> {
        let response = self
            .authorized(self.client.post(self.url("/train")))
            .json(request)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.text().await?.trim().to_string())
    }

    /// Current progress of a job.
    pub async fn status(&self, job_id: &str) -> Result<JobProgress, ClientError> {
        let response = self.get(&format!("/status/{job_id}"), job_id).await?;
        Ok(response.json().await?)
    }

    /// The stored result body: a model document or a failure description.
    pub async fn result_raw(&self, job_id: &str) -> Result<Vec<u8>, ClientError> {
        let response = self.get(&format!("/result/{job_id}"), job_id).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// The trained model of a successfully finished job.
    pub async fn result_model(&self, job_id: &str) -> Result<ModelDocument, ClientError> {
        let body = self.result_raw(job_id).await?;
        let text = String::from_utf8_lossy(&body);
        Ok(ModelDocument::from_json(&text)?)
    }

    /// Submit `request` and wait for its model.
    ///
    /// Polls the job status every poll interval, passing each percentage to
    /// `on_progress`. A failed job yields [`ClientError::TrainingFailed`]
    /// with the server's diagnostic.
    pub async fn train(
        &self,
        request: &TrainingRequest,
        mut on_progress: impl FnMut(f64),
    ) -> Result<ModelDocument, ClientError> {
        let job_id = self.submit(request).await?;
        tracing::debug!(job_id = %job_id, "Submitted training job");

        let started = Instant::now();
        let deadline = self.timeout.map(|timeout| started + timeout);
        loop {
            let progress = self.status(&job_id).await?;
            on_progress(progress.status);

            if progress.finished {
                if progress.failed() {
                    let body = self.result_raw(&job_id).await?;
                    return Err(ClientError::TrainingFailed {
                        job_id,
                        diagnostic: String::from_utf8_lossy(&body).into_owned(),
                    });
                }
                return self.result_model(&job_id).await;
            }

            let mut wait = self.poll_interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Err(ClientError::Timeout {
                        job_id,
                        waited: now - started,
                    });
                }
                wait = wait.min(deadline - now);
            }
            tokio::time::sleep(wait).await;
        }
    }

    // ---- private helpers ----

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.password {
            Some(password) => builder.basic_auth("", Some(password)),
            None => builder,
        }
    }

    /// GET a job resource, mapping 404 to [`ClientError::JobNotFound`].
    async fn get(&self, path: &str, job_id: &str) -> Result<reqwest::Response, ClientError> {
        let response = self
            .authorized(self.client.get(self.url(path)))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::JobNotFound(job_id.to_string()));
        }
        Self::ensure_success(response).await
    }

    /// Return the response unchanged on success, or an
    /// [`ClientError::Api`] with the status and body text.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ClientError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}
