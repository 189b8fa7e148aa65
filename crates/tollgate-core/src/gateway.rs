//! The [`WarehouseGateway`] trait and a per-call timeout decorator.
//!
//! The gateway is the only collaborator that performs I/O. Everything else
//! in this crate is in-process state guarded by short-lived locks, so the
//! three gateway calls are the only suspension points in the system.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use tollgate_types::config::GatewayConfig;
use tollgate_types::job::{CostEstimate, JobMetrics, Query};
use tollgate_types::record::{Record, RecordKey, TableKind};
use tollgate_types::{GovernorError, Result};

/// Acknowledgement of a bulk write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteAck {
    /// Rows accepted (including rows deduplicated against an earlier write).
    pub inserted_count: usize,
    /// Keys of records the warehouse rejected individually.
    pub failed_keys: Vec<RecordKey>,
}

/// Narrow interface to the external analytical store.
///
/// Implementations must be idempotent per record key for `bulk_write`, and
/// `dry_run` must never incur billable cost.
#[async_trait]
pub trait WarehouseGateway: Send + Sync {
    /// Insert `records` into `table` as a single call.
    ///
    /// Transport failures are reported as
    /// [`GovernorError::GatewayUnavailable`]; per-record rejections are
    /// reported in [`WriteAck::failed_keys`].
    async fn bulk_write(&self, table: TableKind, records: &[Record]) -> Result<WriteAck>;

    /// Estimate the cost of `query` without running it.
    async fn dry_run(&self, query: &Query) -> Result<CostEstimate>;

    /// Run `query`. Billable.
    async fn execute(&self, query: &Query) -> Result<JobMetrics>;
}

#[async_trait]
impl<G: WarehouseGateway + ?Sized> WarehouseGateway for Arc<G> {
    async fn bulk_write(&self, table: TableKind, records: &[Record]) -> Result<WriteAck> {
        (**self).bulk_write(table, records).await
    }

    async fn dry_run(&self, query: &Query) -> Result<CostEstimate> {
        (**self).dry_run(query).await
    }

    async fn execute(&self, query: &Query) -> Result<JobMetrics> {
        (**self).execute(query).await
    }
}

// ── TimedGateway ────────────────────────────────────────────────────────

/// Per-call-kind timeouts, resolved from [`GatewayConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeouts {
    pub write: Duration,
    pub dry_run: Duration,
    pub execute: Duration,
}

impl From<&GatewayConfig> for CallTimeouts {
    fn from(cfg: &GatewayConfig) -> Self {
        Self {
            write: cfg.write_timeout(),
            dry_run: cfg.dry_run_timeout(),
            execute: cfg.execute_timeout(),
        }
    }
}

/// A gateway wrapper that bounds every call with its configured timeout.
///
/// An elapsed timeout is reported as [`GovernorError::GatewayUnavailable`],
/// exactly like a transport failure. The inner future is dropped on
/// timeout; a bulk write abandoned this way counts as failed and relies on
/// the warehouse's per-key idempotence if it is retried.
pub struct TimedGateway<G> {
    inner: G,
    timeouts: CallTimeouts,
}

impl<G: WarehouseGateway> TimedGateway<G> {
    pub fn new(inner: G, timeouts: CallTimeouts) -> Self {
        Self { inner, timeouts }
    }
}

async fn bounded<T>(
    operation: &'static str,
    limit: Duration,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, timeout_ms = limit.as_millis() as u64, "gateway call timed out");
            Err(GovernorError::unavailable(
                operation,
                format!("timed out after {}ms", limit.as_millis()),
            ))
        }
    }
}

#[async_trait]
impl<G: WarehouseGateway> WarehouseGateway for TimedGateway<G> {
    async fn bulk_write(&self, table: TableKind, records: &[Record]) -> Result<WriteAck> {
        bounded(
            "bulk_write",
            self.timeouts.write,
            self.inner.bulk_write(table, records),
        )
        .await
    }

    async fn dry_run(&self, query: &Query) -> Result<CostEstimate> {
        bounded("dry_run", self.timeouts.dry_run, self.inner.dry_run(query)).await
    }

    async fn execute(&self, query: &Query) -> Result<JobMetrics> {
        bounded("execute", self.timeouts.execute, self.inner.execute(query)).await
    }
}

impl<G> std::fmt::Debug for TimedGateway<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimedGateway")
            .field("timeouts", &self.timeouts)
            .finish()
    }
}
