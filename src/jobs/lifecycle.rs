//! Job lifecycle: create the job remotely, then poll it to a terminal state.

use std::time::Duration;

use rand::Rng;
use rand::seq::SliceRandom;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, JobError, Result, ServiceError};
use crate::jobs::{Job, JobStatus};
use crate::service::{JobService, until_cancelled};

const ASPECT_FLAG: &str = "--ar";

/// Append `--ar <aspect>` unless the prompt already carries one.
pub fn compose_prompt(prompt: &str, aspect_ratio: &str) -> String {
    if prompt.contains(ASPECT_FLAG) {
        tracing::warn!(
            prompt,
            "Prompt already contains '--ar'; it is used unmodified. Leave aspect ratio to config"
        );
        prompt.to_string()
    } else {
        format!("{prompt} {ASPECT_FLAG} {aspect_ratio}")
    }
}

/// Pick a prompt at random and compose it with the aspect ratio.
pub fn pick_prompt<R: Rng + ?Sized>(
    prompts: &[String],
    aspect_ratio: &str,
    rng: &mut R,
) -> Option<String> {
    prompts
        .choose(rng)
        .map(|prompt| compose_prompt(prompt, aspect_ratio))
}

impl Job {
    /// Create this root job on the service.
    pub async fn start(
        &mut self,
        service: &dyn JobService,
        prompt: &str,
        aspect_ratio: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if let Some(id) = self.id() {
            return Err(JobError::AlreadyStarted { id: id.to_string() }.into());
        }

        tracing::info!(job_type = %self.job_type(), "Starting job");
        let request = service.create_root_job(prompt, aspect_ratio);
        let created = until_cancelled(cancel, request).await?;
        let id = created
            .id
            .ok_or(ServiceError::MissingJobId {
                response: created.raw,
            })?;

        tracing::info!(job_id = %id, "Job started");
        self.assign_id(id);
        Ok(())
    }

    /// Poll until the job completes or fails.
    ///
    /// Returns the completion payload. A failed job yields
    /// [`JobError::Failed`] with the raw response and is not retried.
    pub async fn poll(
        &mut self,
        service: &dyn JobService,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let id = self
            .id()
            .ok_or_else(|| JobError::NotStarted {
                job_type: self.job_type().to_string(),
            })?
            .to_string();

        tracing::info!(job_id = %id, job_type = %self.job_type(), "Waiting for job to complete");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }

            tracing::debug!(job_id = %id, "Checking job status");
            let report = until_cancelled(cancel, service.fetch_status(&id)).await?;
            self.transition_to(report.status);

            match report.status {
                JobStatus::InProgress => continue,
                JobStatus::Completed => {
                    tracing::info!(job_id = %id, job_type = %self.job_type(), "Job completed");
                    return Ok(report.raw);
                }
                JobStatus::Failed => {
                    tracing::error!(job_id = %id, response = %report.raw, "Job failed");
                    return Err(JobError::Failed {
                        id,
                        response: report.raw,
                    }
                    .into());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::jobs::JobType;
    use crate::service::test_support::ScriptedService;

    const TICK: Duration = Duration::from_millis(1);

    #[test]
    fn aspect_ratio_is_appended() {
        assert_eq!(compose_prompt("a red fox", "16:9"), "a red fox --ar 16:9");
    }

    #[test]
    fn existing_aspect_ratio_is_kept() {
        assert_eq!(compose_prompt("a red fox --ar 1:1", "16:9"), "a red fox --ar 1:1");
    }

    #[test]
    fn pick_prompt_from_list() {
        let mut rng = StdRng::seed_from_u64(0);
        let prompts = vec!["one".to_string(), "two".to_string()];
        let prompt = pick_prompt(&prompts, "4:3", &mut rng).unwrap();
        assert!(prompt == "one --ar 4:3" || prompt == "two --ar 4:3");
        assert!(pick_prompt(&[], "4:3", &mut rng).is_none());
    }

    #[tokio::test]
    async fn start_assigns_id() {
        let service = ScriptedService::new();
        let mut job = Job::root();
        job.start(&service, "a fox --ar 1:1", "1:1", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(job.id(), Some("generate-1"));
        assert_eq!(job.status(), Some(JobStatus::InProgress));
    }

    #[tokio::test]
    async fn restart_is_rejected() {
        let service = ScriptedService::new();
        let mut job = Job::root();
        job.start(&service, "p", "1:1", &CancellationToken::new()).await.unwrap();
        let err = job
            .start(&service, "p", "1:1", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Job(JobError::AlreadyStarted { .. })));
        assert_eq!(service.created().len(), 1);
    }

    #[tokio::test]
    async fn missing_id_fails_start() {
        let service = ScriptedService::new().without_id(JobType::Generate);
        let mut job = Job::root();
        let err = job
            .start(&service, "p", "1:1", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Service(ServiceError::MissingJobId { .. })));
        assert!(job.id().is_none());
    }

    #[tokio::test]
    async fn poll_before_start_fails() {
        let service = ScriptedService::new();
        let mut job = Job::root();
        let err = job
            .poll(&service, TICK, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Job(JobError::NotStarted { .. })));
        assert_eq!(service.fetches(), 0);
    }

    #[tokio::test]
    async fn poll_waits_for_completion() {
        let service = ScriptedService::new();
        let mut job = Job::root();
        job.start(&service, "p", "1:1", &CancellationToken::new()).await.unwrap();
        service.script("generate-1", &["pending", "processing", "staged", "finished"]);

        let raw = job.poll(&service, TICK, &CancellationToken::new()).await.unwrap();
        assert_eq!(raw["status"], "finished");
        assert_eq!(job.status(), Some(JobStatus::Completed));
        assert_eq!(service.fetches(), 4);
    }

    #[tokio::test]
    async fn failed_job_carries_response() {
        let service = ScriptedService::new();
        let mut job = Job::root();
        job.start(&service, "p", "1:1", &CancellationToken::new()).await.unwrap();
        service.script("generate-1", &["failed"]);

        let err = job.poll(&service, TICK, &CancellationToken::new()).await.unwrap_err();
        match err {
            Error::Job(JobError::Failed { id, response }) => {
                assert_eq!(id, "generate-1");
                assert_eq!(response["status"], "failed");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(job.status(), Some(JobStatus::Failed));
        assert_eq!(service.fetches(), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_stalled_fetch() {
        let service = ScriptedService::new().stalling_fetches();
        let mut job = Job::root();
        job.start(&service, "p", "1:1", &CancellationToken::new()).await.unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let poll = job.poll(&service, TICK, &cancel);
        let result = tokio::time::timeout(Duration::from_secs(2), poll)
            .await
            .expect("poll should stop once cancelled");
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(service.fetches(), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_stalled_start() {
        let service = ScriptedService::new().stalling_creates(JobType::Generate);
        let mut job = Job::root();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let start = job.start(&service, "p", "1:1", &cancel);
        let result = tokio::time::timeout(Duration::from_secs(2), start)
            .await
            .expect("start should stop once cancelled");
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(job.id().is_none());
    }

    #[tokio::test]
    async fn cancellation_stops_polling() {
        let service = ScriptedService::new();
        let mut job = Job::root();
        job.start(&service, "p", "1:1", &CancellationToken::new()).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = job
            .poll(&service, Duration::from_secs(60), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
