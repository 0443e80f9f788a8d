//! Remote job service seam.
//!
//! The engine only talks to the image service through [`JobService`];
//! `GoApiClient` is the HTTP implementation.

pub mod goapi;
pub(crate) mod retry;

pub use goapi::GoApiClient;

use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result as EngineResult, ServiceError};
use crate::jobs::{JobStatus, JobType};

/// Response to a create request.
#[derive(Debug, Clone)]
pub struct CreatedJob {
    /// Task id, when the service returned a usable one.
    pub id: Option<String>,
    pub raw: Value,
}

impl CreatedJob {
    /// Build from a raw response, reading `task_id`.
    pub fn from_response(raw: Value) -> Self {
        let id = raw
            .get("task_id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Self { id, raw }
    }
}

/// Response to a status fetch.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub status: JobStatus,
    pub raw: Value,
}

/// Remote job service contract.
#[async_trait]
pub trait JobService: Send + Sync {
    /// Create a root generate job.
    async fn create_root_job(
        &self,
        prompt: &str,
        aspect_ratio: &str,
    ) -> Result<CreatedJob, ServiceError>;

    /// Create a derivative job on an existing result.
    async fn create_derivative_job(
        &self,
        job_type: JobType,
        origin_id: &str,
        payload: &Value,
    ) -> Result<CreatedJob, ServiceError>;

    /// Fetch the current status of a job.
    async fn fetch_status(&self, job_id: &str) -> Result<StatusReport, ServiceError>;

    /// Whether a remote endpoint is configured for this job type.
    fn has_endpoint(&self, job_type: JobType) -> bool;
}

/// Await a service call, giving up as soon as `cancel` fires.
pub(crate) async fn until_cancelled<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = Result<T, ServiceError>>,
) -> EngineResult<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = call => Ok(result?),
    }
}

/// Follow-up action identifiers advertised in a completion payload.
pub fn available_actions(completed: &Value) -> Vec<String> {
    completed
        .pointer("/task_result/actions")
        .and_then(Value::as_array)
        .map(|actions| {
            actions
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Scripted in-memory service for unit tests.

    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::Mutex;

    use super::*;

    /// Records every create request and answers status fetches from scripts.
    #[derive(Default)]
    pub struct ScriptedService {
        state: Mutex<ScriptState>,
        missing_endpoints: HashSet<JobType>,
        stalled_creates: HashSet<JobType>,
        stalled_fetches: bool,
    }

    #[derive(Default)]
    struct ScriptState {
        next_id: usize,
        job_types: HashMap<String, JobType>,
        /// Pending status answers per job id; the last one repeats.
        statuses: HashMap<String, VecDeque<&'static str>>,
        /// Actions advertised once a job of this type completes.
        actions: HashMap<JobType, Vec<String>>,
        failing: HashSet<JobType>,
        no_id: HashSet<JobType>,
        created: Vec<(JobType, Option<String>, Value)>,
        fetches: usize,
    }

    impl ScriptedService {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_actions(self, job_type: JobType, actions: &[&str]) -> Self {
            self.state
                .lock()
                .unwrap()
                .actions
                .insert(job_type, actions.iter().map(|s| s.to_string()).collect());
            self
        }

        /// Jobs of this type finish as failed.
        pub fn failing(self, job_type: JobType) -> Self {
            self.state.lock().unwrap().failing.insert(job_type);
            self
        }

        /// Create responses for this type carry no task id.
        pub fn without_id(self, job_type: JobType) -> Self {
            self.state.lock().unwrap().no_id.insert(job_type);
            self
        }

        pub fn without_endpoint(mut self, job_type: JobType) -> Self {
            self.missing_endpoints.insert(job_type);
            self
        }

        /// Create requests for this type are recorded but never answered.
        pub fn stalling_creates(mut self, job_type: JobType) -> Self {
            self.stalled_creates.insert(job_type);
            self
        }

        /// Status fetches are counted but never answered.
        pub fn stalling_fetches(mut self) -> Self {
            self.stalled_fetches = true;
            self
        }

        /// Override the status answers for a job id.
        pub fn script(&self, id: &str, statuses: &[&'static str]) {
            self.state
                .lock()
                .unwrap()
                .statuses
                .insert(id.to_string(), statuses.iter().copied().collect());
        }

        /// Every create request as `(type, origin, payload)`.
        pub fn created(&self) -> Vec<(JobType, Option<String>, Value)> {
            self.state.lock().unwrap().created.clone()
        }

        pub fn fetches(&self) -> usize {
            self.state.lock().unwrap().fetches
        }

        fn create(&self, job_type: JobType, origin: Option<&str>, payload: Value) -> CreatedJob {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let id = format!("{job_type}-{}", state.next_id);
            state
                .created
                .push((job_type, origin.map(str::to_string), payload));
            if state.no_id.contains(&job_type) {
                return CreatedJob::from_response(serde_json::json!({ "message": "queued" }));
            }
            let terminal = if state.failing.contains(&job_type) {
                "failed"
            } else {
                "completed"
            };
            state.job_types.insert(id.clone(), job_type);
            state
                .statuses
                .entry(id.clone())
                .or_insert_with(|| VecDeque::from(vec!["pending", terminal]));
            CreatedJob::from_response(serde_json::json!({ "task_id": id }))
        }
    }

    #[async_trait]
    impl JobService for ScriptedService {
        async fn create_root_job(
            &self,
            prompt: &str,
            aspect_ratio: &str,
        ) -> Result<CreatedJob, ServiceError> {
            let payload = serde_json::json!({ "prompt": prompt, "aspect_ratio": aspect_ratio });
            let created = self.create(JobType::Generate, None, payload);
            if self.stalled_creates.contains(&JobType::Generate) {
                std::future::pending::<()>().await;
            }
            Ok(created)
        }

        async fn create_derivative_job(
            &self,
            job_type: JobType,
            origin_id: &str,
            payload: &Value,
        ) -> Result<CreatedJob, ServiceError> {
            let created = self.create(job_type, Some(origin_id), payload.clone());
            if self.stalled_creates.contains(&job_type) {
                std::future::pending::<()>().await;
            }
            Ok(created)
        }

        async fn fetch_status(&self, job_id: &str) -> Result<StatusReport, ServiceError> {
            if self.stalled_fetches {
                self.state.lock().unwrap().fetches += 1;
                std::future::pending::<()>().await;
            }
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;
            state.fetches += 1;
            let queue = state.statuses.entry(job_id.to_string()).or_default();
            let status = if queue.len() > 1 {
                queue.pop_front().unwrap_or("pending")
            } else {
                queue.front().copied().unwrap_or("completed")
            };
            let actions = state
                .job_types
                .get(job_id)
                .and_then(|t| state.actions.get(t).cloned())
                .unwrap_or_default();
            let raw = serde_json::json!({
                "task_id": job_id,
                "status": status,
                "task_result": { "actions": actions },
            });
            Ok(StatusReport {
                status: JobStatus::from_remote(status)?,
                raw,
            })
        }

        fn has_endpoint(&self, job_type: JobType) -> bool {
            !self.missing_endpoints.contains(&job_type)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_job_reads_task_id() {
        let created = CreatedJob::from_response(serde_json::json!({ "task_id": "abc" }));
        assert_eq!(created.id.as_deref(), Some("abc"));
    }

    #[test]
    fn created_job_rejects_empty_id() {
        let created = CreatedJob::from_response(serde_json::json!({ "task_id": "" }));
        assert!(created.id.is_none());
        let created = CreatedJob::from_response(serde_json::json!({ "error": "bad" }));
        assert!(created.id.is_none());
    }

    #[test]
    fn available_actions_from_payload() {
        let raw = serde_json::json!({
            "task_result": { "actions": ["upscale1", "pan_left", 7] }
        });
        assert_eq!(available_actions(&raw), vec!["upscale1", "pan_left"]);
        assert!(available_actions(&serde_json::json!({})).is_empty());
    }
}
