//! GoAPI HTTP client.
//!
//! Every call is a JSON POST authenticated with `X-API-KEY`. Requests time out
//! after the configured interval and are retried on timeout only.

use std::collections::HashMap;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::actions::catalog;
use crate::config::GoApiConfig;
use crate::error::ServiceError;
use crate::jobs::{JobStatus, JobType};
use crate::service::retry::retry_on_timeout;
use crate::service::{CreatedJob, JobService, StatusReport};

/// HTTP implementation of [`JobService`].
pub struct GoApiClient {
    client: reqwest::Client,
    token: SecretString,
    urls: HashMap<String, String>,
    process_mode: String,
    retry_attempts: u32,
}

impl GoApiClient {
    pub fn new(config: &GoApiConfig, token: SecretString) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ServiceError::Http(e.to_string()))?;

        Ok(Self {
            client,
            token,
            urls: config.urls.clone(),
            process_mode: config.process_mode.clone(),
            retry_attempts: config.retry_attempts,
        })
    }

    fn url(&self, key: &str) -> Result<&str, ServiceError> {
        self.urls
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ServiceError::MissingEndpoint(key.to_string()))
    }

    /// POST with retry on timeout.
    async fn post(&self, url: &str, payload: &Value) -> Result<Value, ServiceError> {
        retry_on_timeout(self.retry_attempts, || self.post_once(url, payload)).await
    }

    async fn post_once(&self, url: &str, payload: &Value) -> Result<Value, ServiceError> {
        tracing::debug!(url, %payload, "Requesting POST");

        let response = self
            .client
            .post(url)
            .header("X-API-KEY", self.token.expose_secret())
            .json(payload)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let body = response.text().await.map_err(classify)?;

        if !status.is_success() {
            tracing::error!(%status, body = %body, "GoAPI request failed");
            return Err(ServiceError::Status { status, body });
        }

        let json: Value = serde_json::from_str(&body).map_err(|e| {
            tracing::error!(%status, body = %body, "JSON decode failed");
            ServiceError::InvalidResponse(e.to_string())
        })?;

        tracing::debug!(%status, response = %json, "GoAPI response");
        Ok(json)
    }
}

/// Separate timeouts from other transport errors so they can be retried.
fn classify(e: reqwest::Error) -> ServiceError {
    if e.is_timeout() {
        ServiceError::Timeout { attempts: 1 }
    } else {
        ServiceError::Http(e.to_string())
    }
}

fn imagine_payload(prompt: &str, aspect_ratio: &str, process_mode: &str) -> Value {
    serde_json::json!({
        "prompt": prompt,
        "aspect_ratio": aspect_ratio,
        "process_mode": process_mode,
        "webhook_endpoint": "",
        "webhook_secret": "",
    })
}

#[async_trait]
impl JobService for GoApiClient {
    async fn create_root_job(
        &self,
        prompt: &str,
        aspect_ratio: &str,
    ) -> Result<CreatedJob, ServiceError> {
        let url = self.url(catalog::entry(JobType::Generate).endpoint_key)?;
        let payload = imagine_payload(prompt, aspect_ratio, &self.process_mode);
        let raw = self.post(url, &payload).await?;
        Ok(CreatedJob::from_response(raw))
    }

    async fn create_derivative_job(
        &self,
        job_type: JobType,
        origin_id: &str,
        payload: &Value,
    ) -> Result<CreatedJob, ServiceError> {
        let url = self.url(catalog::entry(job_type).endpoint_key)?;
        tracing::info!(%job_type, origin_id, url, %payload, "Requesting derivative job");
        let raw = self.post(url, payload).await?;
        Ok(CreatedJob::from_response(raw))
    }

    async fn fetch_status(&self, job_id: &str) -> Result<StatusReport, ServiceError> {
        let url = self.url("fetch")?;
        let raw = self
            .post(url, &serde_json::json!({ "task_id": job_id }))
            .await?;

        let status = raw
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::InvalidResponse(format!("no status in {raw}")))?;
        let status = JobStatus::from_remote(status)?;

        Ok(StatusReport { status, raw })
    }

    fn has_endpoint(&self, job_type: JobType) -> bool {
        self.urls.contains_key(catalog::entry(job_type).endpoint_key)
    }
}
