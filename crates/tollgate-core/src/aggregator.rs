//! Batch aggregation and the flush pipeline.
//!
//! [`BatchAggregator::admit`] appends a record to the pending batch under a
//! mutex held only for the push (or the swap and enqueue, when the push
//! fills the batch). A full batch is detached and queued to the
//! [`FlushService`], which owns every write: it drains size-triggered
//! batches from the queue, owns the age trigger, runs the writes as tasks
//! and performs a final drain on cancellation.
//!
//! [`BatchWriter`] turns one detached [`Batch`] into one `bulk_write` call
//! per record kind, retrying transport failures with bounded linear
//! backoff, and summarizes the outcome in a [`FlushReport`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Notify, mpsc};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tollgate_types::config::BatchConfig;
use tollgate_types::record::{Record, RecordKey, TableKind};
use tollgate_types::{GovernorError, Result};

use crate::gateway::WarehouseGateway;
use crate::retry::{RetryConfig, with_retry};

// ── Batch ───────────────────────────────────────────────────────────────

/// What caused a batch to be detached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushTrigger {
    /// The batch reached `max_size`.
    Size,
    /// `max_age` elapsed since the first record.
    Age,
    /// An explicit `Governor::flush_now`.
    Manual,
    /// Final drain on shutdown.
    Shutdown,
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Size => "size",
            Self::Age => "age",
            Self::Manual => "manual",
            Self::Shutdown => "shutdown",
        })
    }
}

/// A detached, immutable batch of records awaiting a write.
#[derive(Debug, Clone)]
pub struct Batch {
    id: u64,
    trigger: FlushTrigger,
    records: Vec<Record>,
}

impl Batch {
    pub fn new(id: u64, trigger: FlushTrigger, records: Vec<Record>) -> Self {
        Self {
            id,
            trigger,
            records,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn trigger(&self) -> FlushTrigger {
        self.trigger
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Split into per-table partitions, preserving admission order within
    /// each partition.
    pub fn partition(self) -> BTreeMap<TableKind, Vec<Record>> {
        let mut partitions: BTreeMap<TableKind, Vec<Record>> = BTreeMap::new();
        for record in self.records {
            partitions.entry(record.table()).or_default().push(record);
        }
        partitions
    }
}

// ── BatchAggregator ─────────────────────────────────────────────────────

/// Result of a successful [`BatchAggregator::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// The record joined the pending batch.
    Pending { pending: usize },
    /// The record filled the batch, which was detached and queued for
    /// writing.
    Detached { batch_id: u64, batch_size: usize },
}

impl AdmitOutcome {
    pub fn triggered_flush(&self) -> bool {
        matches!(self, Self::Detached { .. })
    }
}

#[derive(Debug, Default)]
struct PendingBatch {
    records: Vec<Record>,
    /// When the first record of the current batch was admitted.
    opened_at: Option<Instant>,
    closed: bool,
}

/// Accumulates records into size- and age-bounded batches.
pub struct BatchAggregator {
    max_size: usize,
    max_age: Duration,
    pending: Mutex<PendingBatch>,
    flush_tx: mpsc::UnboundedSender<Batch>,
    /// Signalled when a record lands in an empty batch, arming the age timer.
    opened: Notify,
    next_id: AtomicU64,
}

impl BatchAggregator {
    /// Create an aggregator and the receiving end of its flush queue.
    pub fn new(config: &BatchConfig) -> (Self, mpsc::UnboundedReceiver<Batch>) {
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let aggregator = Self {
            max_size: config.max_size.max(1),
            max_age: config.max_age(),
            pending: Mutex::new(PendingBatch::default()),
            flush_tx,
            opened: Notify::new(),
            next_id: AtomicU64::new(1),
        };
        (aggregator, flush_rx)
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Append `record` to the pending batch. Never waits on I/O.
    ///
    /// Fails with [`GovernorError::Shutdown`] once the aggregator has been
    /// closed. A batch filled here is queued before the lock is released,
    /// so a concurrent [`close`](Self::close) always finds it in the queue.
    pub fn admit(&self, record: Record) -> Result<AdmitOutcome> {
        let mut state = self.pending.lock().expect("aggregator lock poisoned");
        if state.closed {
            return Err(GovernorError::Shutdown);
        }

        let opened = state.records.is_empty();
        if opened {
            state.opened_at = Some(Instant::now());
        }
        state.records.push(record);

        if state.records.len() >= self.max_size {
            if let Some(batch) = self.detach_locked(&mut state, FlushTrigger::Size) {
                return self.enqueue_locked(&mut state, batch);
            }
        }

        let pending = state.records.len();
        drop(state);
        if opened {
            self.opened.notify_one();
        }
        Ok(AdmitOutcome::Pending { pending })
    }

    /// Hand a size-triggered batch to the flush queue. Called with the
    /// pending lock held.
    ///
    /// If the queue is gone the aggregator closes itself. Records admitted
    /// before this call go back to the pending batch for a manual flush;
    /// the record being admitted is refused.
    fn enqueue_locked(&self, state: &mut PendingBatch, batch: Batch) -> Result<AdmitOutcome> {
        let batch_id = batch.id();
        let batch_size = batch.len();
        match self.flush_tx.send(batch) {
            Ok(()) => {
                debug!(batch_id, size = batch_size, "batch full, queued for flush");
                Ok(AdmitOutcome::Detached {
                    batch_id,
                    batch_size,
                })
            }
            Err(mpsc::error::SendError(lost)) => {
                let mut records = lost.records;
                records.pop();
                error!(
                    batch_id,
                    restored = records.len(),
                    "flush queue closed, aggregator shut down"
                );
                state.closed = true;
                state.opened_at = (!records.is_empty()).then(Instant::now);
                state.records = records;
                Err(GovernorError::Shutdown)
            }
        }
    }

    /// Number of records in the pending batch.
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .expect("aggregator lock poisoned")
            .records
            .len()
    }

    /// When the pending batch becomes due for an age flush, if it has any
    /// records.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending
            .lock()
            .expect("aggregator lock poisoned")
            .opened_at
            .map(|opened| opened + self.max_age)
    }

    /// Detach the pending batch if it is at least `max_age` old at `now`.
    pub fn take_expired(&self, now: Instant) -> Option<Batch> {
        let mut state = self.pending.lock().expect("aggregator lock poisoned");
        match state.opened_at {
            Some(opened) if opened + self.max_age <= now => {
                self.detach_locked(&mut state, FlushTrigger::Age)
            }
            _ => None,
        }
    }

    /// Detach the pending batch regardless of age. `None` if empty.
    pub fn detach(&self, trigger: FlushTrigger) -> Option<Batch> {
        let mut state = self.pending.lock().expect("aggregator lock poisoned");
        self.detach_locked(&mut state, trigger)
    }

    /// Stop accepting records and detach whatever is pending.
    pub fn close(&self) -> Option<Batch> {
        let mut state = self.pending.lock().expect("aggregator lock poisoned");
        state.closed = true;
        self.detach_locked(&mut state, FlushTrigger::Shutdown)
    }

    /// Resolves once a record lands in an empty batch. A signal sent while
    /// nobody is waiting is kept for the next waiter.
    pub async fn batch_opened(&self) {
        self.opened.notified().await;
    }

    fn detach_locked(&self, state: &mut PendingBatch, trigger: FlushTrigger) -> Option<Batch> {
        if state.records.is_empty() {
            return None;
        }
        state.opened_at = None;
        let records = std::mem::take(&mut state.records);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Some(Batch::new(id, trigger, records))
    }
}

impl fmt::Debug for BatchAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchAggregator")
            .field("max_size", &self.max_size)
            .field("max_age", &self.max_age)
            .field("pending", &self.pending())
            .finish()
    }
}

// ── FlushReport ─────────────────────────────────────────────────────────

/// Outcome of writing one table partition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionReport {
    pub table: TableKind,
    pub submitted: usize,
    pub inserted: usize,
    /// Keys the warehouse rejected individually. Not re-admitted.
    pub failed_keys: Vec<RecordKey>,
    /// Set when the partition failed wholesale after exhausting retries.
    pub error: Option<String>,
}

impl PartitionReport {
    pub fn failed_wholesale(&self) -> bool {
        self.error.is_some()
    }

    /// Records from this partition that did not land.
    pub fn failure_count(&self) -> usize {
        if self.failed_wholesale() {
            self.submitted
        } else {
            self.failed_keys.len()
        }
    }
}

/// Outcome of flushing one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlushReport {
    pub batch_id: u64,
    pub trigger: FlushTrigger,
    pub batch_size: usize,
    pub partitions: Vec<PartitionReport>,
}

impl FlushReport {
    /// A report for a flush that had nothing to write.
    pub fn empty(trigger: FlushTrigger) -> Self {
        Self {
            batch_id: 0,
            trigger,
            batch_size: 0,
            partitions: Vec::new(),
        }
    }

    pub fn inserted(&self) -> usize {
        self.partitions.iter().map(|p| p.inserted).sum()
    }

    pub fn failed_keys(&self) -> impl Iterator<Item = &RecordKey> {
        self.partitions.iter().flat_map(|p| p.failed_keys.iter())
    }

    pub fn failed_partitions(&self) -> impl Iterator<Item = &PartitionReport> {
        self.partitions.iter().filter(|p| p.failed_wholesale())
    }

    /// Records that did not land, whether rejected or lost with a failed
    /// partition.
    pub fn failure_count(&self) -> usize {
        self.partitions.iter().map(PartitionReport::failure_count).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failure_count() == 0
    }

    /// Convert to an error if anything failed.
    ///
    /// A wholesale partition failure takes precedence over per-record
    /// rejections.
    pub fn into_result(self) -> Result<FlushReport> {
        if let Some(failed) = self.failed_partitions().next() {
            return Err(GovernorError::unavailable(
                "bulk_write",
                format!(
                    "{} partition failed: {}",
                    failed.table,
                    failed.error.as_deref().unwrap_or("unknown error")
                ),
            ));
        }
        if let Some(rejected) = self.partitions.iter().find(|p| !p.failed_keys.is_empty()) {
            return Err(GovernorError::WritePartialFailure {
                table: rejected.table,
                failed_keys: rejected.failed_keys.clone(),
            });
        }
        Ok(self)
    }
}

// ── BatchWriter ─────────────────────────────────────────────────────────

/// Writes detached batches through the gateway.
#[derive(Clone)]
pub struct BatchWriter {
    gateway: Arc<dyn WarehouseGateway>,
    retry: RetryConfig,
}

impl BatchWriter {
    pub fn new(gateway: Arc<dyn WarehouseGateway>, retry: RetryConfig) -> Self {
        Self { gateway, retry }
    }

    /// Write `batch`, one `bulk_write` per table partition.
    ///
    /// Never fails: every outcome, including wholesale partition failure,
    /// is captured in the returned report.
    pub async fn write(&self, batch: Batch) -> FlushReport {
        let batch_id = batch.id();
        let trigger = batch.trigger();
        let batch_size = batch.len();

        let mut partitions = Vec::new();
        for (table, records) in batch.partition() {
            partitions.push(self.write_partition(batch_id, table, &records).await);
        }

        let report = FlushReport {
            batch_id,
            trigger,
            batch_size,
            partitions,
        };
        info!(
            batch_id,
            trigger = %trigger,
            size = batch_size,
            inserted = report.inserted(),
            failed = report.failure_count(),
            "batch flushed"
        );
        report
    }

    async fn write_partition(
        &self,
        batch_id: u64,
        table: TableKind,
        records: &[Record],
    ) -> PartitionReport {
        let gateway = &self.gateway;
        let result = with_retry(&self.retry, "bulk_write", move || {
            gateway.bulk_write(table, records)
        })
        .await;

        match result {
            Ok(ack) => {
                if !ack.failed_keys.is_empty() {
                    warn!(
                        batch_id,
                        table = %table,
                        failed_keys = ?ack.failed_keys,
                        "warehouse rejected records"
                    );
                }
                PartitionReport {
                    table,
                    submitted: records.len(),
                    inserted: ack.inserted_count,
                    failed_keys: ack.failed_keys,
                    error: None,
                }
            }
            Err(e) => {
                error!(
                    batch_id,
                    table = %table,
                    records = records.len(),
                    error = %e,
                    "partition write failed"
                );
                PartitionReport {
                    table,
                    submitted: records.len(),
                    inserted: 0,
                    failed_keys: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

impl fmt::Debug for BatchWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchWriter")
            .field("retry", &self.retry)
            .finish()
    }
}

// ── FlushService ────────────────────────────────────────────────────────

/// Totals accumulated by a [`FlushService`] over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushStats {
    pub batches: usize,
    pub records: usize,
    pub inserted: usize,
    pub failed_records: usize,
    pub failed_partitions: usize,
}

impl FlushStats {
    fn absorb(&mut self, report: &FlushReport) {
        self.batches += 1;
        self.records += report.batch_size;
        self.inserted += report.inserted();
        self.failed_records += report.failure_count();
        self.failed_partitions += report.failed_partitions().count();
    }
}

/// Owns every background write: drains size-triggered batches, fires age
/// flushes and drains everything on cancellation.
pub struct FlushService {
    aggregator: Arc<BatchAggregator>,
    writer: BatchWriter,
    queue: mpsc::UnboundedReceiver<Batch>,
    reports: Option<mpsc::UnboundedSender<FlushReport>>,
}

impl FlushService {
    pub fn new(
        aggregator: Arc<BatchAggregator>,
        writer: BatchWriter,
        queue: mpsc::UnboundedReceiver<Batch>,
    ) -> Self {
        Self {
            aggregator,
            writer,
            queue,
            reports: None,
        }
    }

    /// Publish every [`FlushReport`] on `tx`.
    pub fn with_reports(mut self, tx: mpsc::UnboundedSender<FlushReport>) -> Self {
        self.reports = Some(tx);
        self
    }

    /// Run until `cancel` fires, then close the aggregator, flush what is
    /// left and return the totals.
    ///
    /// Writes run as tasks alongside the loop, so a slow `bulk_write` never
    /// holds back the age trigger for the next batch.
    pub async fn run(mut self, cancel: CancellationToken) -> FlushStats {
        let mut stats = FlushStats::default();
        let mut writes: JoinSet<FlushReport> = JoinSet::new();
        info!(
            max_size = self.aggregator.max_size(),
            max_age_ms = self.aggregator.max_age().as_millis() as u64,
            "flush service started"
        );

        loop {
            let deadline = self.aggregator.deadline();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(batch) = self.queue.recv() => {
                    self.spawn_write(&mut writes, batch);
                }
                Some(joined) = writes.join_next(), if !writes.is_empty() => {
                    self.finish(joined, &mut stats);
                }
                _ = wait_for(&self.aggregator, deadline) => {
                    if let Some(batch) = self.aggregator.take_expired(Instant::now()) {
                        self.spawn_write(&mut writes, batch);
                    }
                }
            }
        }

        let last = self.aggregator.close();
        while let Ok(batch) = self.queue.try_recv() {
            self.spawn_write(&mut writes, batch);
        }
        if let Some(batch) = last {
            self.spawn_write(&mut writes, batch);
        }
        while let Some(joined) = writes.join_next().await {
            self.finish(joined, &mut stats);
        }

        info!(
            batches = stats.batches,
            records = stats.records,
            failed_records = stats.failed_records,
            "flush service stopped"
        );
        stats
    }

    fn spawn_write(&self, writes: &mut JoinSet<FlushReport>, batch: Batch) {
        let writer = self.writer.clone();
        writes.spawn(async move { writer.write(batch).await });
    }

    fn finish(&self, joined: std::result::Result<FlushReport, JoinError>, stats: &mut FlushStats) {
        match joined {
            Ok(report) => {
                stats.absorb(&report);
                if let Some(tx) = &self.reports {
                    // The listener going away does not stop flushing.
                    let _ = tx.send(report);
                }
            }
            Err(e) => error!(error = %e, "batch write task failed"),
        }
    }
}

/// Sleep until the age deadline, or until a batch opens if there is none.
async fn wait_for(aggregator: &BatchAggregator, deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => aggregator.batch_opened().await,
    }
}

impl fmt::Debug for FlushService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlushService")
            .field("aggregator", &self.aggregator)
            .field("writer", &self.writer)
            .finish()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryWarehouse;
    use chrono::Utc;
    use tollgate_types::record::{AnalysisRecord, Engagement, PostRecord, Sentiment};

    fn post(key: &str) -> Record {
        Record::post(
            key,
            PostRecord {
                post_id: key.to_string(),
                platform: "mastodon".into(),
                author_id: "a1".into(),
                content: "hello".into(),
                language: "en".into(),
                hashtags: vec![],
                engagement: Engagement::default(),
                created_at: Utc::now(),
                ingested_at: Utc::now(),
            },
        )
    }

    fn analysis(key: &str) -> Record {
        Record::analysis(
            key,
            AnalysisRecord {
                post_id: key.to_string(),
                sentiment: Sentiment::Positive,
                sentiment_score: 0.6,
                confidence: 0.8,
                model: "vader".into(),
                analyzed_at: Utc::now(),
            },
        )
    }

    fn config(max_size: usize, max_age_ms: u64) -> BatchConfig {
        BatchConfig {
            max_size,
            max_age_ms,
        }
    }

    fn writer(wh: &Arc<MemoryWarehouse>, retries: u32) -> BatchWriter {
        BatchWriter::new(
            wh.clone(),
            RetryConfig {
                max_retries: retries,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
            },
        )
    }

    // ── Aggregator ──────────────────────────────────────────────────

    #[test]
    fn burst_of_150_with_max_100() {
        let (agg, mut rx) = BatchAggregator::new(&config(100, 5_000));
        let mut detached = 0;
        for i in 0..150 {
            if agg.admit(post(&format!("k{i}"))).unwrap().triggered_flush() {
                detached += 1;
            }
        }
        assert_eq!(detached, 1);
        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.len(), 100);
        assert_eq!(batch.trigger(), FlushTrigger::Size);
        assert!(rx.try_recv().is_err());
        assert_eq!(agg.pending(), 50);
    }

    #[test]
    fn admit_reports_pending_count() {
        let (agg, _rx) = BatchAggregator::new(&config(10, 5_000));
        assert_eq!(
            agg.admit(post("a")).unwrap(),
            AdmitOutcome::Pending { pending: 1 }
        );
        assert_eq!(
            agg.admit(post("b")).unwrap(),
            AdmitOutcome::Pending { pending: 2 }
        );
    }

    #[test]
    fn empty_aggregator_detaches_nothing() {
        let (agg, _rx) = BatchAggregator::new(&config(10, 5_000));
        assert!(agg.detach(FlushTrigger::Manual).is_none());
        assert!(agg.deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_measured_from_first_record() {
        let (agg, _rx) = BatchAggregator::new(&config(10, 1_000));
        let start = Instant::now();
        agg.admit(post("a")).unwrap();
        tokio::time::advance(Duration::from_millis(400)).await;
        agg.admit(post("b")).unwrap();

        assert_eq!(agg.deadline(), Some(start + Duration::from_millis(1_000)));
        assert!(agg.take_expired(Instant::now()).is_none());

        tokio::time::advance(Duration::from_millis(600)).await;
        let batch = agg.take_expired(Instant::now()).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.trigger(), FlushTrigger::Age);
        assert!(agg.deadline().is_none());
    }

    #[test]
    fn closed_aggregator_rejects_admits() {
        let (agg, _rx) = BatchAggregator::new(&config(10, 1_000));
        agg.admit(post("a")).unwrap();
        let last = agg.close().unwrap();
        assert_eq!(last.trigger(), FlushTrigger::Shutdown);
        assert!(matches!(agg.admit(post("b")), Err(GovernorError::Shutdown)));
    }

    #[test]
    fn lost_queue_closes_and_keeps_earlier_records() {
        let (agg, rx) = BatchAggregator::new(&config(3, 1_000));
        drop(rx);
        agg.admit(post("a")).unwrap();
        agg.admit(post("b")).unwrap();

        assert!(matches!(agg.admit(post("c")), Err(GovernorError::Shutdown)));
        assert_eq!(agg.pending(), 2);
        assert!(agg.deadline().is_some());
        assert!(matches!(agg.admit(post("d")), Err(GovernorError::Shutdown)));

        let keys: Vec<_> = agg
            .detach(FlushTrigger::Manual)
            .unwrap()
            .records()
            .iter()
            .map(|r| r.key().as_str().to_string())
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn partition_groups_by_table_in_order() {
        let batch = Batch::new(
            1,
            FlushTrigger::Manual,
            vec![post("p1"), analysis("a1"), post("p2")],
        );
        let parts = batch.partition();
        assert_eq!(parts.len(), 2);
        let posts: Vec<_> = parts[&TableKind::Posts]
            .iter()
            .map(|r| r.key().as_str().to_string())
            .collect();
        assert_eq!(posts, vec!["p1", "p2"]);
        assert_eq!(parts[&TableKind::SentimentAnalysis].len(), 1);
    }

    // ── Writer ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn writer_issues_one_call_per_kind() {
        let wh = Arc::new(MemoryWarehouse::default());
        let batch = Batch::new(
            7,
            FlushTrigger::Manual,
            vec![post("p1"), analysis("a1"), post("p2"), analysis("a2")],
        );
        let report = writer(&wh, 0).write(batch).await;

        assert_eq!(wh.write_calls(), 2);
        assert_eq!(wh.rows(TableKind::Posts), 2);
        assert_eq!(wh.rows(TableKind::SentimentAnalysis), 2);
        assert_eq!(report.batch_id, 7);
        assert_eq!(report.inserted(), 4);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn rejected_keys_surface_without_readmission() {
        let wh = Arc::new(MemoryWarehouse::default());
        wh.reject_keys([RecordKey::new("p2")]);
        let batch = Batch::new(1, FlushTrigger::Manual, vec![post("p1"), post("p2")]);
        let report = writer(&wh, 3).write(batch).await;

        assert_eq!(report.failure_count(), 1);
        assert_eq!(
            report.failed_keys().collect::<Vec<_>>(),
            vec![&RecordKey::new("p2")]
        );
        assert_eq!(wh.write_calls(), 1);
        match report.into_result() {
            Err(GovernorError::WritePartialFailure { table, failed_keys }) => {
                assert_eq!(table, TableKind::Posts);
                assert_eq!(failed_keys, vec![RecordKey::new("p2")]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_retried_then_succeeds() {
        let wh = Arc::new(MemoryWarehouse::default());
        wh.fail_next_writes(2);
        let batch = Batch::new(1, FlushTrigger::Manual, vec![post("p1")]);
        let report = writer(&wh, 3).write(batch).await;

        assert!(report.is_clean());
        assert_eq!(wh.write_calls(), 3);
        assert_eq!(wh.rows(TableKind::Posts), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_fail_partition_wholesale() {
        let wh = Arc::new(MemoryWarehouse::default());
        wh.fail_next_writes(10);
        let batch = Batch::new(
            1,
            FlushTrigger::Manual,
            vec![post("p1"), post("p2"), analysis("a1")],
        );
        let report = writer(&wh, 2).write(batch).await;

        // 3 attempts per partition, two partitions.
        assert_eq!(wh.write_calls(), 6);
        assert_eq!(report.failed_partitions().count(), 2);
        assert_eq!(report.failure_count(), 3);
        let err = report.into_result().unwrap_err();
        assert!(err.is_retryable());
    }

    // ── Service ─────────────────────────────────────────────────────

    fn service(
        wh: &Arc<MemoryWarehouse>,
        cfg: BatchConfig,
    ) -> (Arc<BatchAggregator>, FlushService) {
        let (agg, rx) = BatchAggregator::new(&cfg);
        let agg = Arc::new(agg);
        let svc = FlushService::new(agg.clone(), writer(wh, 0), rx);
        (agg, svc)
    }

    #[tokio::test(start_paused = true)]
    async fn single_record_flushes_after_max_age() {
        let wh = Arc::new(MemoryWarehouse::default());
        let (agg, svc) = service(&wh, config(100, 1_000));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(svc.run(cancel.clone()));

        agg.admit(post("only")).unwrap();
        tokio::time::sleep(Duration::from_millis(990)).await;
        assert_eq!(wh.total_rows(), 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(wh.total_rows(), 1);
        assert_eq!(agg.pending(), 0);

        cancel.cancel();
        let stats = handle.await.unwrap();
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.records, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_write_does_not_hold_back_age_flush() {
        let wh = Arc::new(MemoryWarehouse::default());
        wh.set_latency(Duration::from_secs(5));
        let (agg, svc) = service(&wh, config(100, 1_000));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(svc.run(cancel.clone()));

        // First batch ages out at 1s and is still writing until 6s.
        agg.admit(post("a")).unwrap();
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(agg.pending(), 0);
        agg.admit(post("b")).unwrap();

        // Second batch is due at 2.5s.
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(agg.pending(), 0);
        assert_eq!(wh.total_rows(), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(wh.total_rows(), 2);

        cancel.cancel();
        let stats = handle.await.unwrap();
        assert_eq!(stats.batches, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_waits_for_in_flight_writes() {
        let wh = Arc::new(MemoryWarehouse::default());
        wh.set_latency(Duration::from_secs(3));
        let (agg, svc) = service(&wh, config(2, 60_000));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(svc.run(cancel.clone()));

        agg.admit(post("a")).unwrap();
        agg.admit(post("b")).unwrap();
        agg.admit(post("c")).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let stats = handle.await.unwrap();
        assert_eq!(stats.batches, 2);
        assert_eq!(stats.records, 3);
        assert_eq!(wh.total_rows(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn service_writes_size_batches_and_drains_on_cancel() {
        let wh = Arc::new(MemoryWarehouse::default());
        let (agg, svc) = service(&wh, config(100, 60_000));
        let (tx, mut reports) = mpsc::unbounded_channel();
        let svc = svc.with_reports(tx);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(svc.run(cancel.clone()));

        for i in 0..150 {
            agg.admit(post(&format!("k{i}"))).unwrap();
        }
        let first = reports.recv().await.unwrap();
        assert_eq!(first.trigger, FlushTrigger::Size);
        assert_eq!(first.batch_size, 100);
        assert_eq!(agg.pending(), 50);

        cancel.cancel();
        let stats = handle.await.unwrap();
        let last = reports.recv().await.unwrap();
        assert_eq!(last.trigger, FlushTrigger::Shutdown);
        assert_eq!(last.batch_size, 50);

        assert_eq!(stats.records, 150);
        assert_eq!(wh.submitted_records(), 150);
        assert_eq!(wh.rows(TableKind::Posts), 150);
        assert!(matches!(agg.admit(post("late")), Err(GovernorError::Shutdown)));
    }
}
