//! Background audit writer
//!
//! Producers hand records to an [`AuditWriter`]. A single worker task drains
//! the bounded queue and persists records with a bounded number of
//! concurrent inserts. Persistence failures are logged and counted; they
//! never reach the producer.
//!
//! Under the `block` policy a full queue makes [`AuditWriter::log`] wait for
//! space, so capture tasks slow down instead of piling up records. Request
//! handlers call [`AuditWriter::log_detached`], which never waits. Every
//! record a producer has started to hand over is persisted before
//! [`AuditWorkerHandle::shutdown`] returns.

use serde::Serialize;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::AuditError;
use super::models::AuditRecord;
use super::store::AuditStore;

/// Default queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Default number of concurrent inserts
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

/// What the writer does when the queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueOverflowPolicy {
    /// Wait for queue space
    #[default]
    Block,
    /// Drop the incoming record
    DropNewest,
}

impl FromStr for QueueOverflowPolicy {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "block" => Ok(Self::Block),
            "drop_newest" | "drop" => Ok(Self::DropNewest),
            other => Err(AuditError::Validation(format!(
                "unknown overflow policy '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WriterConfig {
    pub queue_capacity: usize,
    pub overflow_policy: QueueOverflowPolicy,
    pub max_in_flight: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow_policy: QueueOverflowPolicy::Block,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

/// Counters shared between the writer handles and the worker
#[derive(Debug, Default)]
pub struct WriterStats {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`WriterStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriterStatsSnapshot {
    pub enqueued: u64,
    pub dropped: u64,
    pub written: u64,
    pub failed: u64,
}

impl WriterStats {
    pub fn snapshot(&self) -> WriterStatsSnapshot {
        WriterStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Producers currently handing a record over
#[derive(Debug, Default)]
struct Producers {
    active: AtomicUsize,
    settled: Notify,
}

impl Producers {
    fn enter(self: &Arc<Self>) -> ProducerGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        ProducerGuard {
            producers: self.clone(),
        }
    }

    fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Holds the worker's final drain open until dropped.
///
/// Take one before spawning a task that will log a record, so shutdown
/// waits for that record.
#[must_use = "the drain only waits while the guard is alive"]
pub struct ProducerGuard {
    producers: Arc<Producers>,
}

impl Drop for ProducerGuard {
    fn drop(&mut self) {
        if self.producers.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.producers.settled.notify_one();
        }
    }
}

/// Cheaply cloneable producer handle
#[derive(Clone)]
pub struct AuditWriter {
    tx: mpsc::Sender<AuditRecord>,
    overflow_policy: QueueOverflowPolicy,
    stats: Arc<WriterStats>,
    producers: Arc<Producers>,
}

/// Owns the worker task; used to drain the queue on shutdown
pub struct AuditWorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
    stats: Arc<WriterStats>,
}

impl AuditWriter {
    /// Start the worker for `store` and return the producer handle
    pub fn spawn(store: Arc<dyn AuditStore>, config: WriterConfig) -> (Self, AuditWorkerHandle) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(WriterStats::default());
        let producers = Arc::new(Producers::default());

        let join = tokio::spawn(run_worker(
            rx,
            shutdown_rx,
            store,
            config.max_in_flight.max(1),
            stats.clone(),
            producers.clone(),
        ));

        let writer = Self {
            tx,
            overflow_policy: config.overflow_policy,
            stats: stats.clone(),
            producers,
        };
        let handle = AuditWorkerHandle {
            shutdown_tx,
            join,
            stats,
        };
        (writer, handle)
    }

    /// Keep the shutdown drain waiting for a record that is still being built
    pub fn hold(&self) -> ProducerGuard {
        self.producers.enter()
    }

    /// Queue a record for persistence.
    ///
    /// Under the `block` policy this waits for queue space. Returns `false`
    /// when the record was dropped.
    pub async fn log(&self, record: AuditRecord) -> bool {
        let _guard = self.hold();
        match self.overflow_policy {
            QueueOverflowPolicy::Block => match self.tx.send(record).await {
                Ok(()) => self.accepted(),
                Err(err) => self.rejected(&err.0, "Audit queue closed, record dropped"),
            },
            QueueOverflowPolicy::DropNewest => self.offer(record),
        }
    }

    /// Queue a record without waiting.
    ///
    /// When the queue is full under the `block` policy the record is handed
    /// to a task that waits for space; shutdown still persists it.
    pub fn log_detached(&self, record: AuditRecord) {
        if self.overflow_policy == QueueOverflowPolicy::DropNewest {
            self.offer(record);
            return;
        }
        match self.tx.try_send(record) {
            Ok(()) => {
                self.accepted();
            },
            Err(mpsc::error::TrySendError::Full(record)) => {
                let guard = self.hold();
                let writer = self.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    writer.log(record).await;
                });
            },
            Err(mpsc::error::TrySendError::Closed(record)) => {
                self.rejected(&record, "Audit queue closed, record dropped");
            },
        }
    }

    pub fn stats(&self) -> WriterStatsSnapshot {
        self.stats.snapshot()
    }

    fn offer(&self, record: AuditRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => self.accepted(),
            Err(mpsc::error::TrySendError::Full(record)) => {
                self.rejected(&record, "Audit queue full, record dropped")
            },
            Err(mpsc::error::TrySendError::Closed(record)) => {
                self.rejected(&record, "Audit queue closed, record dropped")
            },
        }
    }

    fn accepted(&self) -> bool {
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn rejected(&self, record: &AuditRecord, reason: &str) -> bool {
        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        warn!(audit_id = %record.id, action = %record.action, "{}", reason);
        false
    }
}

impl AuditWorkerHandle {
    /// Persist everything queued or still being handed over, then stop and
    /// wait for in-flight inserts to finish
    pub async fn shutdown(self) -> WriterStatsSnapshot {
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.join.await {
            error!(error = %err, "Audit worker terminated abnormally");
        }
        let stats = self.stats.snapshot();
        info!(
            written = stats.written,
            failed = stats.failed,
            dropped = stats.dropped,
            "Audit writer stopped"
        );
        stats
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<AuditRecord>,
    mut shutdown_rx: watch::Receiver<bool>,
    store: Arc<dyn AuditStore>,
    max_in_flight: usize,
    stats: Arc<WriterStats>,
    producers: Arc<Producers>,
) {
    let permits = Arc::new(Semaphore::new(max_in_flight));
    debug!(store = store.name(), max_in_flight, "Audit worker started");

    loop {
        tokio::select! {
            maybe_record = rx.recv() => match maybe_record {
                Some(record) => persist(&store, &permits, &stats, record).await,
                None => break,
            },
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    drain(&mut rx, &store, &permits, &stats, &producers).await;
                    break;
                }
            }
        }
    }

    // Every permit back means every insert has finished
    let all = u32::try_from(max_in_flight).unwrap_or(u32::MAX);
    if permits.acquire_many(all).await.is_err() {
        warn!("Audit worker semaphore closed before drain completed");
    }
}

/// Keep receiving until no producer is mid-handover, then close the queue
/// and persist what is left
async fn drain(
    rx: &mut mpsc::Receiver<AuditRecord>,
    store: &Arc<dyn AuditStore>,
    permits: &Arc<Semaphore>,
    stats: &Arc<WriterStats>,
    producers: &Producers,
) {
    while producers.active() > 0 {
        tokio::select! {
            maybe_record = rx.recv() => match maybe_record {
                Some(record) => persist(store, permits, stats, record).await,
                None => return,
            },
            _ = producers.settled.notified() => {},
        }
    }

    rx.close();
    while let Some(record) = rx.recv().await {
        persist(store, permits, stats, record).await;
    }
}

async fn persist(
    store: &Arc<dyn AuditStore>,
    permits: &Arc<Semaphore>,
    stats: &Arc<WriterStats>,
    record: AuditRecord,
) {
    let Ok(permit) = permits.clone().acquire_owned().await else {
        stats.failed.fetch_add(1, Ordering::Relaxed);
        return;
    };

    let store = store.clone();
    let stats = stats.clone();
    tokio::spawn(async move {
        let _permit = permit;
        match store.insert(&record).await {
            Ok(()) => {
                stats.written.fetch_add(1, Ordering::Relaxed);
            },
            Err(err) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    audit_id = %record.id,
                    action = %record.action,
                    store = store.name(),
                    error = %err,
                    "Failed to persist audit record"
                );
            },
        }
    });
}
