//! In-memory [`WarehouseGateway`] implementation.
//!
//! Stores rows per table keyed by idempotency key, so writing the same key
//! twice yields one stored row. Queries must be registered up front with a
//! [`QueryProfile`] describing what the dry run and the execution report.
//! Fault injection hooks (transport failures, rejected keys, latency) make
//! it the reference collaborator for tests and for `tollgate simulate`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use tollgate_types::job::{CostEstimate, JobMetrics, Query};
use tollgate_types::record::{Record, RecordKey, TableKind};
use tollgate_types::{GovernorError, Result};

use crate::gateway::{WarehouseGateway, WriteAck};

/// What the warehouse reports for a registered query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryProfile {
    pub bytes_processed: u64,
    pub bytes_billed: u64,
    pub slot_millis: u64,
    pub cache_hit: bool,
    /// Simulated wall-clock duration reported in the job metrics.
    pub duration: Duration,
    /// Query-level error reported with the metrics.
    pub error: Option<String>,
}

impl QueryProfile {
    /// A cache-miss scan of `bytes`, billed in full, at roughly 1 MiB per
    /// slot-millisecond.
    pub fn scanning(bytes: u64) -> Self {
        Self {
            bytes_processed: bytes,
            bytes_billed: bytes,
            slot_millis: (bytes / (1024 * 1024)).max(1),
            cache_hit: false,
            duration: Duration::from_secs(1),
            error: None,
        }
    }

    pub fn billed(mut self, bytes: u64) -> Self {
        self.bytes_billed = bytes;
        self
    }

    pub fn slot_millis(mut self, slot_millis: u64) -> Self {
        self.slot_millis = slot_millis;
        self
    }

    pub fn cached(mut self) -> Self {
        self.cache_hit = true;
        self.bytes_billed = 0;
        self
    }

    pub fn taking(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn failing(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// An in-memory analytical store.
pub struct MemoryWarehouse {
    price_per_tib_usd: f64,
    tables: Mutex<HashMap<TableKind, BTreeMap<RecordKey, Record>>>,
    queries: Mutex<HashMap<String, QueryProfile>>,
    rejected_keys: Mutex<HashSet<RecordKey>>,
    latency: Mutex<Duration>,
    /// Remaining bulk writes that fail at the transport level.
    failing_writes: AtomicUsize,
    /// Remaining dry runs that fail at the transport level.
    failing_dry_runs: AtomicUsize,
    write_calls: AtomicUsize,
    submitted_records: AtomicUsize,
    dry_run_calls: AtomicUsize,
    execute_calls: AtomicUsize,
    job_seq: AtomicU64,
}

impl MemoryWarehouse {
    /// Create an empty warehouse that prices dry runs at `price_per_tib_usd`.
    pub fn new(price_per_tib_usd: f64) -> Self {
        Self {
            price_per_tib_usd,
            tables: Mutex::new(HashMap::new()),
            queries: Mutex::new(HashMap::new()),
            rejected_keys: Mutex::new(HashSet::new()),
            latency: Mutex::new(Duration::ZERO),
            failing_writes: AtomicUsize::new(0),
            failing_dry_runs: AtomicUsize::new(0),
            write_calls: AtomicUsize::new(0),
            submitted_records: AtomicUsize::new(0),
            dry_run_calls: AtomicUsize::new(0),
            execute_calls: AtomicUsize::new(0),
            job_seq: AtomicU64::new(0),
        }
    }

    // ── Setup and fault injection ───────────────────────────────────

    /// Make `sql` estimable and executable with the given profile.
    pub fn register_query(&self, sql: impl Into<String>, profile: QueryProfile) {
        self.queries
            .lock()
            .expect("warehouse query lock poisoned")
            .insert(sql.into(), profile);
    }

    /// Reject these keys individually on every write.
    pub fn reject_keys<I>(&self, keys: I)
    where
        I: IntoIterator<Item = RecordKey>,
    {
        self.rejected_keys
            .lock()
            .expect("warehouse reject lock poisoned")
            .extend(keys);
    }

    /// Fail the next `n` bulk writes at the transport level.
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` dry runs at the transport level.
    pub fn fail_next_dry_runs(&self, n: usize) {
        self.failing_dry_runs.store(n, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().expect("warehouse latency lock poisoned") = latency;
    }

    // ── Inspection ──────────────────────────────────────────────────

    /// Stored rows in `table`.
    pub fn rows(&self, table: TableKind) -> usize {
        self.tables
            .lock()
            .expect("warehouse table lock poisoned")
            .get(&table)
            .map_or(0, BTreeMap::len)
    }

    /// Stored rows across all tables.
    pub fn total_rows(&self) -> usize {
        self.tables
            .lock()
            .expect("warehouse table lock poisoned")
            .values()
            .map(BTreeMap::len)
            .sum()
    }

    /// Whether `key` is stored in `table`.
    pub fn contains(&self, table: TableKind, key: &RecordKey) -> bool {
        self.tables
            .lock()
            .expect("warehouse table lock poisoned")
            .get(&table)
            .is_some_and(|rows| rows.contains_key(key))
    }

    /// Number of `bulk_write` calls that reached the warehouse.
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// Records carried by successful `bulk_write` calls, duplicates included.
    pub fn submitted_records(&self) -> usize {
        self.submitted_records.load(Ordering::SeqCst)
    }

    pub fn dry_run_calls(&self) -> usize {
        self.dry_run_calls.load(Ordering::SeqCst)
    }

    pub fn execute_calls(&self) -> usize {
        self.execute_calls.load(Ordering::SeqCst)
    }

    // ── Internal helpers ────────────────────────────────────────────

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock().expect("warehouse latency lock poisoned");
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// Decrement a fault counter, returning whether a fault fired.
    fn take_fault(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn profile(&self, query: &Query) -> Result<QueryProfile> {
        self.queries
            .lock()
            .expect("warehouse query lock poisoned")
            .get(&query.sql)
            .cloned()
            .ok_or_else(|| {
                GovernorError::estimate_failed(format!(
                    "unrecognized query: {}",
                    query.display_name()
                ))
            })
    }
}

impl Default for MemoryWarehouse {
    fn default() -> Self {
        Self::new(6.25)
    }
}

#[async_trait]
impl WarehouseGateway for MemoryWarehouse {
    async fn bulk_write(&self, table: TableKind, records: &[Record]) -> Result<WriteAck> {
        self.simulate_latency().await;
        self.write_calls.fetch_add(1, Ordering::SeqCst);

        if Self::take_fault(&self.failing_writes) {
            return Err(GovernorError::unavailable(
                "bulk_write",
                "injected transport failure",
            ));
        }

        let rejected = self
            .rejected_keys
            .lock()
            .expect("warehouse reject lock poisoned")
            .clone();
        let mut tables = self.tables.lock().expect("warehouse table lock poisoned");
        let rows = tables.entry(table).or_default();

        let mut ack = WriteAck::default();
        for record in records {
            if rejected.contains(record.key()) {
                ack.failed_keys.push(record.key().clone());
                continue;
            }
            rows.insert(record.key().clone(), record.clone());
            ack.inserted_count += 1;
        }
        self.submitted_records
            .fetch_add(records.len(), Ordering::SeqCst);

        debug!(
            table = %table,
            inserted = ack.inserted_count,
            rejected = ack.failed_keys.len(),
            "memory warehouse bulk write"
        );
        Ok(ack)
    }

    async fn dry_run(&self, query: &Query) -> Result<CostEstimate> {
        self.simulate_latency().await;
        self.dry_run_calls.fetch_add(1, Ordering::SeqCst);

        if Self::take_fault(&self.failing_dry_runs) {
            return Err(GovernorError::unavailable(
                "dry_run",
                "injected transport failure",
            ));
        }

        let profile = self.profile(query)?;
        Ok(CostEstimate::from_bytes(
            profile.bytes_processed,
            self.price_per_tib_usd,
        ))
    }

    async fn execute(&self, query: &Query) -> Result<JobMetrics> {
        self.simulate_latency().await;
        self.execute_calls.fetch_add(1, Ordering::SeqCst);

        let profile = self.profile(query)?;
        let seq = self.job_seq.fetch_add(1, Ordering::SeqCst);
        let ended_at = Utc::now();
        let elapsed =
            chrono::Duration::from_std(profile.duration).unwrap_or_else(|_| chrono::Duration::zero());
        let started_at = ended_at - elapsed;

        Ok(JobMetrics {
            job_id: format!("job-{seq:06}"),
            bytes_processed: profile.bytes_processed,
            bytes_billed: profile.bytes_billed,
            slot_millis: profile.slot_millis,
            cache_hit: profile.cache_hit,
            started_at,
            ended_at,
            error: profile.error,
        })
    }
}

impl std::fmt::Debug for MemoryWarehouse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryWarehouse")
            .field("price_per_tib_usd", &self.price_per_tib_usd)
            .field("rows", &self.total_rows())
            .field("write_calls", &self.write_calls())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_types::record::{AnalysisRecord, Sentiment};

    fn analysis(key: &str) -> Record {
        Record::analysis(
            key,
            AnalysisRecord {
                post_id: format!("p-{key}"),
                sentiment: Sentiment::Neutral,
                sentiment_score: 0.0,
                confidence: 0.9,
                model: "test".into(),
                analyzed_at: Utc::now(),
            },
        )
    }

    #[tokio::test]
    async fn same_key_twice_stores_one_row() {
        let wh = MemoryWarehouse::default();
        let rec = analysis("dup");
        wh.bulk_write(TableKind::SentimentAnalysis, std::slice::from_ref(&rec))
            .await
            .unwrap();
        wh.bulk_write(TableKind::SentimentAnalysis, &[rec]).await.unwrap();

        assert_eq!(wh.rows(TableKind::SentimentAnalysis), 1);
        assert_eq!(wh.submitted_records(), 2);
        assert_eq!(wh.write_calls(), 2);
    }

    #[tokio::test]
    async fn rejected_keys_reported_not_stored() {
        let wh = MemoryWarehouse::default();
        wh.reject_keys([RecordKey::new("bad")]);
        let ack = wh
            .bulk_write(
                TableKind::SentimentAnalysis,
                &[analysis("good"), analysis("bad")],
            )
            .await
            .unwrap();
        assert_eq!(ack.inserted_count, 1);
        assert_eq!(ack.failed_keys, vec![RecordKey::new("bad")]);
        assert!(wh.contains(TableKind::SentimentAnalysis, &RecordKey::new("good")));
        assert!(!wh.contains(TableKind::SentimentAnalysis, &RecordKey::new("bad")));
    }

    #[tokio::test]
    async fn injected_write_failures_are_transient() {
        let wh = MemoryWarehouse::default();
        wh.fail_next_writes(1);
        let err = wh
            .bulk_write(TableKind::SentimentAnalysis, &[analysis("a")])
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(wh.rows(TableKind::SentimentAnalysis), 0);

        wh.bulk_write(TableKind::SentimentAnalysis, &[analysis("a")])
            .await
            .unwrap();
        assert_eq!(wh.rows(TableKind::SentimentAnalysis), 1);
    }

    #[tokio::test]
    async fn unknown_query_fails_estimate() {
        let wh = MemoryWarehouse::default();
        let err = wh.dry_run(&Query::new("SELEC nonsense")).await.unwrap_err();
        assert!(matches!(err, GovernorError::EstimateFailed { .. }));
    }

    #[tokio::test]
    async fn execute_reports_profile() {
        let wh = MemoryWarehouse::default();
        wh.register_query(
            "SELECT count(*) FROM posts",
            QueryProfile::scanning(4096).cached().taking(Duration::from_millis(250)),
        );
        let metrics = wh
            .execute(&Query::new("SELECT count(*) FROM posts"))
            .await
            .unwrap();
        assert!(metrics.cache_hit);
        assert_eq!(metrics.bytes_billed, 0);
        assert_eq!(metrics.duration(), Duration::from_millis(250));
        assert_eq!(wh.execute_calls(), 1);
    }
}
