//! Job types and the job state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// Kind of work a job performs on the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Generate,
    Upscale,
    Variant,
    Inpaint,
    Pan,
    Reroll,
    Outpaint,
}

impl JobType {
    /// All derivative types, i.e. everything except `Generate`.
    pub const DERIVATIVES: [JobType; 6] = [
        JobType::Upscale,
        JobType::Variant,
        JobType::Inpaint,
        JobType::Pan,
        JobType::Reroll,
        JobType::Outpaint,
    ];
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Generate => "generate",
            Self::Upscale => "upscale",
            Self::Variant => "variant",
            Self::Inpaint => "inpaint",
            Self::Pan => "pan",
            Self::Reroll => "reroll",
            Self::Outpaint => "outpaint",
        };
        write!(f, "{s}")
    }
}

/// Status of a job that exists on the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    /// Map a remote status string.
    pub fn from_remote(status: &str) -> Result<Self, ServiceError> {
        match status {
            "completed" | "finished" => Ok(Self::Completed),
            "failed" | "retry" => Ok(Self::Failed),
            "processing" | "pending" | "staged" => Ok(Self::InProgress),
            other => Err(ServiceError::UnknownStatus(other.to_string())),
        }
    }

    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, target),
            (InProgress, InProgress) | (InProgress, Completed) | (InProgress, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A state transition event.
#[derive(Debug, Clone, Serialize)]
pub struct StateTransition {
    pub from: Option<JobStatus>,
    pub to: JobStatus,
    pub timestamp: DateTime<Utc>,
}

/// One unit of work on the remote service, root or derivative.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    id: Option<String>,
    job_type: JobType,
    status: Option<JobStatus>,
    origin_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub transitions: Vec<StateTransition>,
}

impl Job {
    /// A root generate job that has not been created remotely yet.
    pub fn root() -> Self {
        Self {
            id: None,
            job_type: JobType::Generate,
            status: None,
            origin_id: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            transitions: Vec::new(),
        }
    }

    /// A derivative job the service has already accepted.
    pub fn derivative(id: impl Into<String>, job_type: JobType, origin_id: impl Into<String>) -> Self {
        let mut job = Self {
            origin_id: Some(origin_id.into()),
            job_type,
            ..Self::root()
        };
        job.assign_id(id.into());
        job
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn status(&self) -> Option<JobStatus> {
        self.status
    }

    pub fn origin_id(&self) -> Option<&str> {
        self.origin_id.as_deref()
    }

    /// Record the service-assigned id and enter `InProgress`.
    ///
    /// Callers check `id()` first; the id never changes once set.
    pub(crate) fn assign_id(&mut self, id: String) {
        debug_assert!(self.id.is_none());
        self.id = Some(id);
        self.started_at = Some(Utc::now());
        self.record(JobStatus::InProgress);
    }

    /// Move to a new status. Returns false when the transition is not allowed.
    pub(crate) fn transition_to(&mut self, target: JobStatus) -> bool {
        match self.status {
            Some(current) if current.can_transition_to(target) => {
                if current != target {
                    self.record(target);
                }
                true
            }
            _ => false,
        }
    }

    fn record(&mut self, to: JobStatus) {
        self.transitions.push(StateTransition {
            from: self.status,
            to,
            timestamp: Utc::now(),
        });
        self.status = Some(to);
        if to.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
    }
}
