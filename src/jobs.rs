//! Typed background jobs: a bounded queue fed by the engine and the reaper,
//! drained by a worker with bounded concurrency and bounded retry.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits::{JOB_RETRY_BACKOFF_MS, MAX_JOB_ATTEMPTS};
use crate::model::{BusinessId, Ms};
use crate::notify::{self, Notifier, NotifyError};
use crate::tenant::TenantManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    ReservationConfirmation,
    ReservationRescheduled,
    ReservationCancelled,
    OrderCancelled,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::ReservationConfirmation => "reservation_confirmation",
            NotificationKind::ReservationRescheduled => "reservation_rescheduled",
            NotificationKind::ReservationCancelled => "reservation_cancelled",
            NotificationKind::OrderCancelled => "order_cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelOrderJob {
    pub business_id: BusinessId,
    pub order_id: Ulid,
    /// Sweep time the order was found overdue at.
    pub as_of: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationJob {
    pub business_id: BusinessId,
    pub order_id: Ulid,
    pub kind: NotificationKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    CancelOrder(CancelOrderJob),
    Notify(NotificationJob),
}

impl Job {
    pub fn business_id(&self) -> BusinessId {
        match self {
            Job::CancelOrder(j) => j.business_id,
            Job::Notify(j) => j.business_id,
        }
    }

    pub fn order_id(&self) -> Ulid {
        match self {
            Job::CancelOrder(j) => j.order_id,
            Job::Notify(j) => j.order_id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Job::CancelOrder(_) => "cancel_order",
            Job::Notify(_) => "notify",
        }
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
    #[error("business {0} is not loaded")]
    UnknownBusiness(BusinessId),
}

impl JobError {
    fn is_retryable(&self) -> bool {
        match self {
            JobError::Engine(e) => e.is_transient(),
            JobError::Notify(e) => e.is_retryable(),
            JobError::UnknownBusiness(_) => false,
        }
    }
}

/// Producer side of the job queue. Cancellation jobs are deduplicated per
/// order while one is queued or running.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    pending: Arc<DashSet<Ulid>>,
}

impl JobQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Job>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                pending: Arc::new(DashSet::new()),
            },
            rx,
        )
    }

    /// Queue a job without waiting. Returns `false` when it was a duplicate
    /// or the queue is full; a dropped cancellation is picked up again by
    /// the next sweep.
    pub fn enqueue(&self, job: Job) -> bool {
        if let Job::CancelOrder(j) = &job
            && !self.pending.insert(j.order_id)
        {
            debug!(order = %j.order_id, "cancellation already pending");
            return false;
        }
        match self.tx.try_send(job) {
            Ok(()) => {
                metrics::counter!(crate::observability::JOBS_ENQUEUED_TOTAL).increment(1);
                true
            }
            Err(TrySendError::Full(job) | TrySendError::Closed(job)) => {
                warn!(job = job.label(), order = %job.order_id(), "job queue unavailable, dropping job");
                metrics::counter!(crate::observability::JOBS_DROPPED_TOTAL).increment(1);
                self.finish(&job);
                false
            }
        }
    }

    pub fn is_pending(&self, order_id: Ulid) -> bool {
        self.pending.contains(&order_id)
    }

    fn finish(&self, job: &Job) {
        if let Job::CancelOrder(j) = job {
            self.pending.remove(&j.order_id);
        }
    }
}

/// Drain the queue until it closes or `shutdown` fires. At most
/// `concurrency` jobs run at once.
pub async fn run_worker(
    mut rx: mpsc::Receiver<Job>,
    queue: JobQueue,
    tenants: Arc<TenantManager>,
    notifier: Arc<dyn Notifier>,
    concurrency: usize,
    shutdown: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    loop {
        let job = tokio::select! {
            _ = shutdown.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let queue = queue.clone();
        let tenants = tenants.clone();
        let notifier = notifier.clone();
        tokio::spawn(async move {
            let _permit = permit;
            run_with_retry(&tenants, notifier.as_ref(), &job).await;
            queue.finish(&job);
        });
    }
    debug!("job worker stopped");
}

async fn run_with_retry(tenants: &TenantManager, notifier: &dyn Notifier, job: &Job) {
    for attempt in 1..=MAX_JOB_ATTEMPTS {
        match execute(tenants, notifier, job).await {
            Ok(()) => {
                metrics::counter!(crate::observability::JOBS_COMPLETED_TOTAL, "job" => job.label()).increment(1);
                return;
            }
            Err(e) if e.is_retryable() && attempt < MAX_JOB_ATTEMPTS => {
                warn!(job = job.label(), order = %job.order_id(), attempt, "job failed, retrying: {e}");
                tokio::time::sleep(Duration::from_millis(JOB_RETRY_BACKOFF_MS * attempt as u64)).await;
            }
            Err(e) => {
                error!(
                    business = %job.business_id(),
                    job = job.label(),
                    order = %job.order_id(),
                    attempts = attempt,
                    "job failed, dropping: {e}"
                );
                metrics::counter!(crate::observability::JOBS_FAILED_TOTAL, "job" => job.label()).increment(1);
                return;
            }
        }
    }
}

/// Run one job once.
pub async fn execute(tenants: &TenantManager, notifier: &dyn Notifier, job: &Job) -> Result<(), JobError> {
    let engine = tenants
        .get(job.business_id())
        .ok_or(JobError::UnknownBusiness(job.business_id()))?;

    match job {
        Job::CancelOrder(j) => {
            if !engine.cancel_overdue_order(j.order_id, j.as_of).await? {
                debug!(order = %j.order_id, "order no longer overdue, skipped");
            }
            Ok(())
        }
        Job::Notify(j) => {
            let composed = {
                let store = engine.read().await;
                let order = store.order(j.order_id)?;
                let client = order.client_id.and_then(|id| store.clients.get(&id));
                notify::compose(j.business_id, j.kind, order, client, store.config.utc_offset_minutes)
            };
            match composed {
                Ok(notification) => Ok(notifier.send(&notification).await?),
                Err(NotifyError::NoRecipient(order_id)) => {
                    debug!(order = %order_id, kind = j.kind.as_str(), "no recipient, notification skipped");
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        }
    }
}
