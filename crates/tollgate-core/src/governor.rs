//! Wiring of one aggregator, ledger, admission controller and monitor
//! around a single warehouse gateway.
//!
//! [`Governor::new`] validates the configuration, wraps the gateway with
//! per-call timeouts and returns the governor together with the
//! [`FlushService`] the caller must spawn:
//!
//! ```rust,ignore
//! let (governor, flush) = Governor::new(config, gateway)?;
//! let cancel = CancellationToken::new();
//! let flusher = tokio::spawn(flush.run(cancel.clone()));
//!
//! governor.admit(record)?;
//! let outcome = governor.run_query(&Query::new("SELECT ...")).await?;
//!
//! cancel.cancel();
//! let stats = flusher.await?;
//! ```

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use tollgate_types::Result;
use tollgate_types::config::GovernorConfig;
use tollgate_types::job::{JobMetrics, Query};
use tollgate_types::record::Record;

use crate::admission::{AdmissionController, AdmissionDecision};
use crate::aggregator::{
    AdmitOutcome, BatchAggregator, BatchWriter, FlushReport, FlushService, FlushTrigger,
};
use crate::clock::{Clock, SystemClock};
use crate::gateway::{CallTimeouts, TimedGateway, WarehouseGateway};
use crate::ledger::BudgetLedger;
use crate::monitor::{MonitorReport, PerformanceMonitor};
use crate::retry::RetryConfig;
use crate::validation::ensure_valid;

/// Everything produced by one admitted and executed query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    pub decision: AdmissionDecision,
    pub metrics: JobMetrics,
    pub report: MonitorReport,
}

/// The process-wide owner of the governing components.
pub struct Governor {
    config: GovernorConfig,
    gateway: Arc<dyn WarehouseGateway>,
    aggregator: Arc<BatchAggregator>,
    writer: BatchWriter,
    ledger: Arc<BudgetLedger>,
    admission: AdmissionController,
    monitor: PerformanceMonitor,
}

impl Governor {
    /// Build a governor on the system clock.
    pub fn new(
        config: GovernorConfig,
        gateway: Arc<dyn WarehouseGateway>,
    ) -> Result<(Self, FlushService)> {
        Self::with_clock(config, gateway, Arc::new(SystemClock))
    }

    /// Build a governor whose ledger reads time from `clock`.
    ///
    /// Fails with `InvalidConfiguration` if validation reports any error.
    pub fn with_clock(
        config: GovernorConfig,
        gateway: Arc<dyn WarehouseGateway>,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, FlushService)> {
        for diagnostic in ensure_valid(&config)? {
            warn!(field = %diagnostic.field, "{}", diagnostic.message);
        }

        let gateway: Arc<dyn WarehouseGateway> = Arc::new(TimedGateway::new(
            gateway,
            CallTimeouts::from(&config.gateway),
        ));

        let (aggregator, queue) = BatchAggregator::new(&config.batch);
        let aggregator = Arc::new(aggregator);
        let writer = BatchWriter::new(gateway.clone(), RetryConfig::from(&config.gateway));
        let ledger = Arc::new(BudgetLedger::new(config.budget.clone(), clock));
        let admission = AdmissionController::new(gateway.clone(), ledger.clone());
        let monitor = PerformanceMonitor::new(
            config.monitor.clone(),
            config.pricing.clone(),
            ledger.clone(),
        );

        let service = FlushService::new(aggregator.clone(), writer.clone(), queue);

        info!(
            period_budget_usd = config.budget.period_budget_usd,
            period = ?config.budget.period,
            batch_max_size = config.batch.max_size,
            "governor initialized"
        );

        let governor = Self {
            config,
            gateway,
            aggregator,
            writer,
            ledger,
            admission,
            monitor,
        };
        Ok((governor, service))
    }

    // ── Write path ──────────────────────────────────────────────────

    /// Queue a record for writing. Never waits on I/O.
    pub fn admit(&self, record: Record) -> Result<AdmitOutcome> {
        self.aggregator.admit(record)
    }

    /// Write the pending batch now, regardless of its age.
    pub async fn flush_now(&self) -> FlushReport {
        match self.aggregator.detach(FlushTrigger::Manual) {
            Some(batch) => self.writer.write(batch).await,
            None => FlushReport::empty(FlushTrigger::Manual),
        }
    }

    // ── Read path ───────────────────────────────────────────────────

    /// Dry-run `query` and decide whether it may run. Rolls the budget
    /// period first if a boundary has passed.
    pub async fn evaluate(&self, query: &Query) -> AdmissionDecision {
        self.ledger.roll_if_due();
        self.admission.evaluate(query).await
    }

    /// Evaluate, execute if approved, and record the job's actual cost.
    ///
    /// A ceiling denial is returned as `BudgetExhausted`; a failed dry run
    /// as `EstimateFailed` or `GatewayUnavailable`. Nothing is executed or
    /// recorded in either case.
    pub async fn run_query(&self, query: &Query) -> Result<QueryOutcome> {
        let decision = self.evaluate(query).await.into_result()?;
        let metrics = self.gateway.execute(query).await?;
        let report = self.monitor.record(&metrics);
        Ok(QueryOutcome {
            decision,
            metrics,
            report,
        })
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<BudgetLedger> {
        &self.ledger
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    pub fn aggregator(&self) -> &Arc<BatchAggregator> {
        &self.aggregator
    }

    pub fn pending(&self) -> usize {
        self.aggregator.pending()
    }
}

impl std::fmt::Debug for Governor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Governor")
            .field("aggregator", &self.aggregator)
            .field("ledger", &self.ledger)
            .finish()
    }
}
