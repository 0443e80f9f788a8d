//! Chain completion: random derivative actions on a completed job.
//!
//! Work is kept on an explicit stack of frames, one per origin job, and
//! processed depth-first. A frame at the last allowed level stops after its
//! first successful derivative. Actions within a chain never run
//! concurrently.

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::actions::{self, OccupiedIndexes, PayloadSkip, build_payload};
use crate::config::TaskConfig;
use crate::error::{Error, JobError, Result};
use crate::jobs::{Job, JobType};
use crate::service::{JobService, available_actions, until_cancelled};

/// Derivative levels a chain may reach below its root.
pub const MAX_CHAIN_DEPTH: usize = 2;

/// Tunables for chain completion.
#[derive(Debug, Clone)]
pub struct ChainSettings {
    /// Half-open range for the number of actions picked on a root job.
    pub top_level_range: Range<usize>,
    /// Half-open range for the number picked on a derivative.
    pub recursive_range: Range<usize>,
    /// Derivative levels below the root, capped at [`MAX_CHAIN_DEPTH`].
    pub max_depth: usize,
    pub poll_interval: Duration,
}

impl From<&TaskConfig> for ChainSettings {
    fn from(config: &TaskConfig) -> Self {
        Self {
            top_level_range: config.top_level_range(),
            recursive_range: config.recursive_range(),
            max_depth: config.max_depth,
            poll_interval: config.poll_interval(),
        }
    }
}

/// Why an action produced no derivative job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Payload(PayloadSkip),
    NoEndpoint,
    MissingId,
    Request(String),
}

/// What happened to one selected action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DerivativeOutcome {
    Completed,
    Failed,
    Skipped(SkipReason),
}

/// One selected action and its result.
#[derive(Debug, Clone)]
pub struct DerivativeRecord {
    pub job_type: JobType,
    pub origin_id: String,
    pub job_id: Option<String>,
    /// 1 for actions on the root, 2 for actions on a first-level derivative.
    pub level: usize,
    pub index: Option<&'static str>,
    pub outcome: DerivativeOutcome,
}

/// Actions picked for one origin.
#[derive(Debug, Clone)]
pub struct Selection {
    pub origin_id: String,
    pub level: usize,
    pub available: usize,
    pub selected: Vec<JobType>,
}

/// Everything one `complete_actions` call did.
#[derive(Debug, Default)]
pub struct ChainReport {
    pub selections: Vec<Selection>,
    pub records: Vec<DerivativeRecord>,
    pub occupied: OccupiedIndexes,
}

impl ChainReport {
    pub fn completed(&self) -> usize {
        self.count(|o| *o == DerivativeOutcome::Completed)
    }

    pub fn failed(&self) -> usize {
        self.count(|o| *o == DerivativeOutcome::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, DerivativeOutcome::Skipped(_)))
    }

    pub fn max_level(&self) -> usize {
        self.records.iter().map(|r| r.level).max().unwrap_or(0)
    }

    fn count(&self, pred: impl Fn(&DerivativeOutcome) -> bool) -> usize {
        self.records.iter().filter(|r| pred(&r.outcome)).count()
    }
}

struct Frame {
    origin_id: String,
    level: usize,
    pending: VecDeque<JobType>,
}

/// Result of running one action.
enum Step {
    Completed { job_id: String, payload: Value },
    Failed { job_id: String },
    Skipped(SkipReason),
}

/// Selects and executes derivative actions for completed jobs.
pub struct ChainCompleter {
    service: Arc<dyn JobService>,
    settings: ChainSettings,
    rng: Mutex<StdRng>,
}

impl ChainCompleter {
    pub fn new(service: Arc<dyn JobService>, settings: ChainSettings) -> Self {
        Self::with_rng(service, settings, StdRng::from_entropy())
    }

    pub fn with_rng(service: Arc<dyn JobService>, settings: ChainSettings, rng: StdRng) -> Self {
        Self {
            service,
            settings,
            rng: Mutex::new(rng),
        }
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pick `min(k, available)` distinct action instances.
    ///
    /// `k` comes from the top-level range for a root's own actions and from
    /// the recursive range otherwise.
    pub fn select(&self, available: &[JobType], top_level: bool) -> Vec<JobType> {
        let range = if top_level {
            self.settings.top_level_range.clone()
        } else {
            self.settings.recursive_range.clone()
        };
        let mut rng = self.rng();
        let k = if range.is_empty() {
            range.start
        } else {
            rng.gen_range(range)
        };
        tracing::info!(top_level, requested = k, available = available.len(), "Using buttons");
        available
            .choose_multiple(&mut *rng, k.min(available.len()))
            .copied()
            .collect()
    }

    /// Run random derivative actions on a completed job.
    ///
    /// With `recurse` the chain goes `max_depth` levels deep; without it only
    /// one action on `origin` completes and the count is drawn from the
    /// recursive range.
    pub async fn complete_actions(
        &self,
        origin: &Job,
        available: &[String],
        recurse: bool,
        cancel: &CancellationToken,
    ) -> Result<ChainReport> {
        let origin_id = origin
            .id()
            .ok_or_else(|| JobError::NotStarted {
                job_type: origin.job_type().to_string(),
            })?
            .to_string();
        let levels = if recurse {
            self.settings.max_depth.clamp(1, MAX_CHAIN_DEPTH)
        } else {
            1
        };

        let mut report = ChainReport::default();
        let actions = actions::translate(available)?;
        if actions.is_empty() {
            tracing::warn!(origin_id = %origin_id, "No actions available");
            return Ok(report);
        }

        let mut stack = vec![self.frame(&mut report, origin_id, 1, recurse, &actions)];

        while let Some(frame) = stack.last_mut() {
            let Some(job_type) = frame.pending.pop_front() else {
                stack.pop();
                continue;
            };
            let origin_id = frame.origin_id.clone();
            let level = frame.level;

            let (step, index) = self
                .run_action(job_type, &origin_id, &mut report.occupied, cancel)
                .await?;

            let mut record = DerivativeRecord {
                job_type,
                origin_id,
                job_id: None,
                level,
                index,
                outcome: DerivativeOutcome::Failed,
            };

            match step {
                Step::Skipped(reason) => {
                    record.outcome = DerivativeOutcome::Skipped(reason);
                    report.records.push(record);
                }
                Step::Failed { job_id } => {
                    record.job_id = Some(job_id);
                    report.records.push(record);
                }
                Step::Completed { job_id, payload } => {
                    record.job_id = Some(job_id.clone());
                    record.outcome = DerivativeOutcome::Completed;
                    report.records.push(record);

                    if level >= levels {
                        tracing::info!(job_id = %job_id, %job_type, "Child job finished. Chain completed");
                        if let Some(frame) = stack.last_mut() {
                            frame.pending.clear();
                        }
                        continue;
                    }

                    tracing::info!(job_id = %job_id, "Child job finished. Completing its actions");
                    if let Some(next) = self.follow_ups(&job_id, &payload) {
                        let frame = self.frame(&mut report, job_id, level + 1, false, &next);
                        stack.push(frame);
                    }
                }
            }
        }

        Ok(report)
    }

    fn frame(
        &self,
        report: &mut ChainReport,
        origin_id: String,
        level: usize,
        top_level: bool,
        actions: &[JobType],
    ) -> Frame {
        let selected = self.select(actions, top_level);
        tracing::info!(origin_id = %origin_id, level, ?selected, "Selected actions");
        report.selections.push(Selection {
            origin_id: origin_id.clone(),
            level,
            available: actions.len(),
            selected: selected.clone(),
        });
        Frame {
            origin_id,
            level,
            pending: selected.into(),
        }
    }

    /// Parsed follow-ups of a finished derivative, if any are usable.
    fn follow_ups(&self, job_id: &str, payload: &Value) -> Option<Vec<JobType>> {
        let raw = available_actions(payload);
        if raw.is_empty() {
            tracing::error!(job_id, "No actions available. Continuing to next action");
            return None;
        }
        match actions::translate(raw.as_slice()) {
            Ok(next) if next.is_empty() => {
                tracing::warn!(job_id, ?raw, "No usable actions. Continuing to next action");
                None
            }
            Ok(next) => Some(next),
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Could not map follow-up actions");
                None
            }
        }
    }

    /// Build, request and poll one derivative job.
    ///
    /// Only cancellation escapes; every other failure becomes a `Step`.
    async fn run_action(
        &self,
        job_type: JobType,
        origin_id: &str,
        occupied: &mut OccupiedIndexes,
        cancel: &CancellationToken,
    ) -> Result<(Step, Option<&'static str>)> {
        let built = {
            let mut rng = self.rng();
            build_payload(job_type, origin_id, occupied, &mut *rng)
        };
        let built = match built {
            Ok(built) => built,
            Err(skip) => {
                tracing::warn!(%job_type, origin_id, "Skipping action: {}", skip);
                return Ok((Step::Skipped(SkipReason::Payload(skip)), None));
            }
        };

        if !self.service.has_endpoint(job_type) {
            tracing::warn!(%job_type, "GoAPI URL not found, skipping action");
            return Ok((Step::Skipped(SkipReason::NoEndpoint), None));
        }

        let request = self
            .service
            .create_derivative_job(job_type, origin_id, &built.body);
        let created = match until_cancelled(cancel, request).await {
            Ok(created) => created,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                tracing::error!(%job_type, origin_id, error = %e, "Failed to request action");
                return Ok((Step::Skipped(SkipReason::Request(e.to_string())), None));
            }
        };
        let Some(job_id) = created.id else {
            tracing::error!(%job_type, response = %created.raw, "Failed to gather task_id");
            return Ok((Step::Skipped(SkipReason::MissingId), None));
        };

        if let Some(index) = built.consumed_index {
            tracing::info!(origin_id, index, "Included index in occupied indexes");
            occupied.occupy(origin_id, job_type, index);
        }

        let mut job = Job::derivative(job_id.clone(), job_type, origin_id);
        let step = match job
            .poll(self.service.as_ref(), self.settings.poll_interval, cancel)
            .await
        {
            Ok(payload) => Step::Completed { job_id, payload },
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                tracing::error!(job_id = %job_id, %job_type, error = %e, "Child job failed");
                Step::Failed { job_id }
            }
        };
        Ok((step, built.consumed_index))
    }
}
