//! Activity engine: keeps root jobs in flight and walks their chains.
//!
//! The engine runs two kinds of loops:
//! - one **producer** that tops the queue up to `max_tasks` root jobs
//! - N **consumers** that each take a job, hold a permit, and watch the job
//!   and its derivative chain to the end
//!
//! A root job's production slot is freed as soon as its own poll finishes,
//! while its permit is held for the whole chain.

mod slot;

pub use slot::{ActiveRoots, ActiveSlot};

use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::chain::{ChainCompleter, ChainReport, ChainSettings};
use crate::config::EngineConfig;
use crate::error::{ConfigError, Error, Result};
use crate::jobs::{Job, pick_prompt};
use crate::service::{JobService, available_actions};

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_tasks: usize,
    pub consumers: usize,
    pub producer_interval: Duration,
    pub poll_interval: Duration,
    pub prompts: Vec<String>,
    pub aspect_ratio: String,
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_tasks: config.max_tasks,
            consumers: config.consumers,
            producer_interval: config.producer_interval(),
            poll_interval: config.task.poll_interval(),
            prompts: config.task.prompts.clone(),
            aspect_ratio: config.task.ar.clone(),
        }
    }
}

/// A root job waiting for a consumer, with the slot it occupies.
struct Queued {
    job: Job,
    slot: ActiveSlot,
}

/// Producer/consumer scheduler for root jobs.
pub struct Engine {
    settings: EngineSettings,
    service: Arc<dyn JobService>,
    completer: ChainCompleter,
    active_roots: ActiveRoots,
    queue_tx: mpsc::UnboundedSender<Queued>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<Queued>>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    rng: StdMutex<StdRng>,
}

impl Engine {
    pub fn new(
        settings: EngineSettings,
        service: Arc<dyn JobService>,
        completer: ChainCompleter,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            permits: Arc::new(Semaphore::new(settings.max_tasks)),
            settings,
            service,
            completer,
            active_roots: ActiveRoots::new(),
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
            cancel: CancellationToken::new(),
            rng: StdMutex::new(StdRng::from_entropy()),
        }
    }

    /// Build an engine and its chain completer from configuration.
    pub fn from_config(config: &EngineConfig, service: Arc<dyn JobService>) -> Self {
        let completer = ChainCompleter::new(Arc::clone(&service), ChainSettings::from(&config.task));
        Self::new(EngineSettings::from(config), service, completer)
    }

    /// Root jobs currently queued or in their own poll phase.
    pub fn active_roots(&self) -> usize {
        self.active_roots.get()
    }

    /// Token that stops the producer and every consumer.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Slots the producer may fill right now.
    pub fn deficit(&self) -> usize {
        self.settings.max_tasks.saturating_sub(self.active_roots.get())
    }

    /// Run the producer and consumers until cancelled.
    pub async fn run(self: Arc<Self>) {
        tracing::info!(
            max_tasks = self.settings.max_tasks,
            consumers = self.settings.consumers,
            "Engine starting"
        );

        let mut handles: Vec<_> = (0..self.settings.consumers)
            .map(|n| tokio::spawn(Arc::clone(&self).consume(n)))
            .collect();
        handles.push(tokio::spawn(Arc::clone(&self).produce()));

        for result in join_all(handles).await {
            if let Err(e) = result {
                tracing::error!("Engine routine panicked: {e}");
            }
        }

        tracing::info!("Engine stopped");
    }

    async fn produce(self: Arc<Self>) {
        tracing::info!("Producer starting");

        loop {
            if self.fill_queue() == 0 {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.settings.producer_interval) => {}
                }
            } else if self.cancel.is_cancelled() {
                break;
            } else {
                tokio::task::yield_now().await;
            }
        }

        tracing::info!("Producer stopped");
    }

    /// Enqueue root jobs up to the budget. Returns how many were created.
    pub fn fill_queue(&self) -> usize {
        let deficit = self.deficit();
        if deficit == 0 {
            return 0;
        }

        tracing::info!("Queue not full. Creating {} jobs", deficit);
        for _ in 0..deficit {
            let queued = Queued {
                job: Job::root(),
                slot: self.active_roots.reserve(),
            };
            if self.queue_tx.send(queued).is_err() {
                tracing::warn!("Job queue closed");
                break;
            }
        }
        tracing::info!("Created {} jobs", deficit);
        deficit
    }

    async fn next_job(&self) -> Option<Queued> {
        self.queue_rx.lock().await.recv().await
    }

    async fn consume(self: Arc<Self>, n: usize) {
        tracing::debug!(consumer = n, "Consumer starting");

        loop {
            let queued = tokio::select! {
                _ = self.cancel.cancelled() => break,
                queued = self.next_job() => match queued {
                    Some(queued) => queued,
                    None => break,
                },
            };

            let permit = tokio::select! {
                _ = self.cancel.cancelled() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let chain_id = Uuid::new_v4();
            let span = tracing::info_span!("chain", %chain_id);
            let result = self.watch(queued).instrument(span).await;
            drop(permit);

            match result {
                Ok(report) => tracing::info!(
                    %chain_id,
                    completed = report.completed(),
                    failed = report.failed(),
                    skipped = report.skipped(),
                    "Chain completed"
                ),
                Err(Error::Cancelled) => break,
                Err(e) => tracing::error!(%chain_id, error = %e, "Chain abandoned"),
            }
        }

        tracing::debug!(consumer = n, "Consumer stopped");
    }

    /// Drive one root job through its lifecycle, then complete its chain.
    async fn watch(&self, queued: Queued) -> Result<ChainReport> {
        let Queued { mut job, slot } = queued;
        tracing::info!("Watching job");

        let polled = match self.next_prompt() {
            Ok(prompt) => match job
                .start(
                    self.service.as_ref(),
                    &prompt,
                    &self.settings.aspect_ratio,
                    &self.cancel,
                )
                .await
            {
                Ok(()) => {
                    job.poll(self.service.as_ref(), self.settings.poll_interval, &self.cancel)
                        .await
                }
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        slot.release();
        let completed = polled?;

        tracing::info!("Generate finished. Moving queue");
        let actions = available_actions(&completed);
        if actions.is_empty() {
            tracing::error!(job_id = job.id(), "No actions available");
            return Ok(ChainReport::default());
        }

        tracing::info!(?actions, "Proceeding to button actions");
        self.completer
            .complete_actions(&job, &actions, true, &self.cancel)
            .await
    }

    fn next_prompt(&self) -> Result<String> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        pick_prompt(&self.settings.prompts, &self.settings.aspect_ratio, &mut *rng).ok_or_else(
            || {
                Error::Config(ConfigError::InvalidValue {
                    key: "task.prompts".to_string(),
                    message: "must not be empty".to_string(),
                })
            },
        )
    }
}
