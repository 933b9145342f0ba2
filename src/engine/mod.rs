mod availability;
mod catalog;
mod conflict;
mod draft;
mod error;
mod orders;
mod queries;
mod reservations;
mod stock;
mod store;
mod time_blocks;
mod txn;
#[cfg(test)]
mod tests;

pub use availability::{
    check_event_availability, check_reservation_availability, check_reservations_in_window, free_windows,
};
pub use catalog::{ClientInput, PolicyInput, ProductInput, ResourceInput, SalesAreaInput};
pub use draft::{DraftCache, recompute_totals};
pub use error::{ConflictKind, EngineError};
pub use orders::{OVERDUE_REASON, OnlineOrderItem, PlaceOnlineOrder};
pub use reservations::{
    AddonRequest, AvailabilityQuery, ConfirmReservation, CreateReservation, ReservationItem, SlotChange,
    UpdateReservation,
};
pub use stock::Removal;
pub use store::{Directory, IndexedSpan, IntervalIndex, Store};
pub use time_blocks::{TimeBlockInput, TimeBlockPatch};
pub use txn::Txn;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, RwLockReadGuard, mpsc, oneshot};
use tracing::warn;
use ulid::Ulid;

use crate::clock::now_ms;
use crate::jobs::{Job, JobQueue, NotificationJob, NotificationKind};
use crate::limits::{TXN_LOCK_TIMEOUT_MS, TXN_MAX_RETRIES};
use crate::model::BusinessId;
use crate::wal::{Commit, Wal};

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        commit: Commit,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        snapshot: Commit,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Commit, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { commit, response } => {
                let mut batch = vec![(commit, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { commit, response }) => batch.push((commit, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (commit, _) in batch {
        if let Err(e) = wal.append_buffered(commit) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partial bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { snapshot, response } => {
            let result = Wal::write_compact_file(wal.path(), &snapshot).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { commit, response } => {
            let batch = vec![(commit, response)];
            let result = flush_batch(wal, &batch);
            respond_batch(batch, &result);
        }
    }
}

/// Handles shared by every engine of a process.
#[derive(Clone)]
pub struct EngineShared {
    pub directory: Arc<Directory>,
    pub drafts: Arc<DraftCache>,
    pub jobs: JobQueue,
}

/// One business: its projected state, its WAL writer and the transaction gate.
pub struct Engine {
    pub business_id: BusinessId,
    store: RwLock<Store>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    drafts: Arc<DraftCache>,
    jobs: JobQueue,
}

impl Engine {
    pub fn new(business_id: BusinessId, wal_path: PathBuf, shared: EngineShared) -> io::Result<Self> {
        let commits = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut store = Store::new(business_id, shared.directory);
        for commit in &commits {
            for event in &commit.events {
                store.apply(event);
            }
        }
        tracing::debug!(business = %business_id, commits = commits.len(), "replayed WAL");

        Ok(Self {
            business_id,
            store: RwLock::new(store),
            wal_tx,
            drafts: shared.drafts,
            jobs: shared.jobs,
        })
    }

    /// Shared view of the committed state.
    pub async fn read(&self) -> RwLockReadGuard<'_, Store> {
        self.store.read().await
    }

    /// Start a transaction. Waits for the business's write lock, giving up
    /// with `Busy` after a bounded number of timed-out attempts.
    pub async fn begin(&self, actor: Option<&str>) -> Result<Txn<'_>, EngineError> {
        let wait = Duration::from_millis(TXN_LOCK_TIMEOUT_MS);
        for attempt in 1..=TXN_MAX_RETRIES {
            match tokio::time::timeout(wait, self.store.write()).await {
                Ok(guard) => return Ok(Txn::new(guard, &self.drafts, actor)),
                Err(_) => warn!(business = %self.business_id, attempt, "transaction lock wait timed out"),
            }
        }
        metrics::counter!(crate::observability::TXN_BUSY_TOTAL).increment(1);
        Err(EngineError::Busy)
    }

    /// Make the staged events durable as one WAL record, then apply them.
    /// On error nothing is applied and the transaction is rolled back on drop.
    pub async fn commit(&self, mut txn: Txn<'_>) -> Result<(), EngineError> {
        let events = txn.take_staged();
        if events.is_empty() {
            return Ok(());
        }
        let commit = Commit {
            txn_id: txn.id,
            at: txn.now,
            events,
        };
        self.wal_append(commit.clone()).await?;
        let store = txn.store_mut();
        for event in &commit.events {
            store.apply(event);
        }
        metrics::counter!(crate::observability::TXN_COMMITTED_TOTAL).increment(1);
        Ok(())
    }

    async fn wal_append(&self, commit: Commit) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { commit, response: tx })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    /// Rewrite the WAL as a single snapshot record. Holds the read lock until
    /// the swap completes so no commit can land between snapshot and rename.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let store = self.store.read().await;
        let snapshot = Commit {
            txn_id: Ulid::new(),
            at: now_ms(),
            events: store.snapshot_events(),
        };
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { snapshot, response: tx })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()));
        drop(store);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    pub fn drafts(&self) -> &DraftCache {
        &self.drafts
    }

    /// Queue a notification for an order when the business has them enabled.
    pub(super) fn notify(&self, enabled: bool, order_id: Ulid, kind: NotificationKind) {
        if !enabled {
            return;
        }
        self.jobs.enqueue(Job::Notify(NotificationJob {
            business_id: self.business_id,
            order_id,
            kind,
        }));
    }
}
